//! Scenario: base + site YAML files on disk produce one validated settings view
//!
//! GREEN when:
//! - Later files override earlier ones.
//! - Typed settings come back with defaults for everything unspecified.
//! - A missing file fails with its path in the error.

use rk_config::load_layered_yaml;
use std::io::Write;
use std::time::Duration;

fn write_yaml(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(body.as_bytes()).unwrap();
    path
}

#[test]
fn site_file_overrides_base_file() {
    let dir = tempfile::tempdir().unwrap();
    let base = write_yaml(
        &dir,
        "base.yaml",
        "sync:\n  resync_backoff_secs: 5\n  validation_timezone: \"UTC\"\nsnapshot:\n  url: \"http://127.0.0.1:9000/snapshot\"\n",
    );
    let site = write_yaml(
        &dir,
        "site.yaml",
        "sync:\n  resync_backoff_secs: 2\n  validation_timezone: \"America/New_York\"\nstore:\n  max_records: 50\n",
    );

    let loaded = load_layered_yaml(&[&base, &site]).unwrap();
    let s = loaded.settings().unwrap();

    assert_eq!(s.sync.resync_backoff(), Duration::from_secs(2));
    assert_eq!(s.sync.timezone().unwrap(), chrono_tz::America::New_York);
    assert_eq!(s.store.max_records, Some(50));
    assert_eq!(s.snapshot.url.as_deref(), Some("http://127.0.0.1:9000/snapshot"));
    assert_eq!(s.snapshot.timeout(), Duration::from_secs(60));
    assert_eq!(s.transport.metadata.sequence_key, "sequence_id");
    assert_eq!(s.daemon.bind_addr, "127.0.0.1:8899");
}

#[test]
fn missing_file_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.yaml");
    let err = load_layered_yaml(&[&missing]).unwrap_err();
    assert!(err.to_string().contains("nope.yaml"));
}
