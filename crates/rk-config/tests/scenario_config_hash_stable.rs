//! Scenario: config hash is a stable fingerprint of the effective config
//!
//! GREEN when:
//! - The same input hashes identically across loads.
//! - Reordering keys within YAML doesn't change the hash.
//! - A changed value changes the hash.
//! - An override layer that restates the base value is a no-op for the hash.

use rk_config::load_layered_yaml_from_strings;

const BASE_YAML: &str = r#"
sync:
  tick_interval_secs: 10
  missed_message_timeout_secs: 300
  stale_message_timeout_secs: 900
snapshot:
  url: "https://upstream.example/snapshot"
  token_env: "RK_SNAPSHOT_TOKEN"
"#;

const BASE_YAML_REORDERED: &str = r#"
snapshot:
  token_env: "RK_SNAPSHOT_TOKEN"
  url: "https://upstream.example/snapshot"
sync:
  stale_message_timeout_secs: 900
  tick_interval_secs: 10
  missed_message_timeout_secs: 300
"#;

const SITE_YAML: &str = r#"
sync:
  missed_message_timeout_secs: 60
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
    assert_eq!(a.config_hash.len(), 64, "sha256 hex digest");
}

#[test]
fn reordered_keys_produce_same_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}

#[test]
fn override_layer_changes_hash_and_value() {
    let base = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let layered = load_layered_yaml_from_strings(&[BASE_YAML, SITE_YAML]).unwrap();
    assert_ne!(base.config_hash, layered.config_hash);

    let s = layered.settings().unwrap();
    assert_eq!(s.sync.missed_message_timeout_secs, 60);
    // Untouched siblings survive the merge.
    assert_eq!(s.sync.stale_message_timeout_secs, 900);
}

#[test]
fn restating_a_value_is_hash_neutral() {
    let restate = "sync:\n  tick_interval_secs: 10\n";
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, restate]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}

#[test]
fn empty_layer_is_ignored() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, ""]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}
