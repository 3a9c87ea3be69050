use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub tick_interval_secs: u64,
    /// Zero is allowed: any tracked gap is considered missed on the next tick.
    pub missed_message_timeout_secs: u64,
    pub stale_message_timeout_secs: u64,
    pub resync_backoff_secs: u64,
    pub max_gap_span: usize,
    /// IANA name; the scheduled validation runs once per calendar day in this zone.
    pub validation_timezone: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: 10,
            missed_message_timeout_secs: 300,
            stale_message_timeout_secs: 900,
            resync_backoff_secs: 5,
            max_gap_span: 10_000,
            validation_timezone: "UTC".to_string(),
        }
    }
}

impl SyncSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn missed_message_timeout(&self) -> Duration {
        Duration::from_secs(self.missed_message_timeout_secs)
    }

    pub fn stale_message_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_message_timeout_secs)
    }

    pub fn resync_backoff(&self) -> Duration {
        Duration::from_secs(self.resync_backoff_secs)
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.validation_timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("CONFIG_INVALID /sync/validation_timezone: {e}"))
    }
}

/// Metadata keys the default event decoder reads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataKeys {
    pub sequence_key: String,
    pub record_key: String,
    pub status_key: String,
    pub expires_key: String,
}

impl Default for MetadataKeys {
    fn default() -> Self {
        Self {
            sequence_key: "sequence_id".to_string(),
            record_key: "record_key".to_string(),
            status_key: "status".to_string(),
            expires_key: "expires_at".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub url: Option<String>,
    pub reconnect_backoff_secs: u64,
    pub metadata: MetadataKeys,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            url: None,
            reconnect_backoff_secs: 5,
            metadata: MetadataKeys::default(),
        }
    }
}

impl TransportSettings {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    pub url: Option<String>,
    pub timeout_secs: u64,
    /// Name of the env var holding the bearer token. Never the token itself.
    pub token_env: Option<String>,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 60,
            token_env: None,
        }
    }
}

impl SnapshotSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub max_records: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub bind_addr: String,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8899".to_string(),
        }
    }
}

/// Typed view over the merged config. Every section is optional.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sync: SyncSettings,
    pub transport: TransportSettings,
    pub snapshot: SnapshotSettings,
    pub store: StoreSettings,
    pub daemon: DaemonSettings,
}

/// Serde cannot fill a struct from `null`; a bare `sync:` line in YAML means "defaults".
fn strip_null_sections(v: &Value) -> Value {
    match v {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, vv)| !vv.is_null())
                .map(|(k, vv)| (k.clone(), strip_null_sections(vv)))
                .collect(),
        ),
        other => other.clone(),
    }
}

impl Settings {
    pub fn from_config_json(config_json: &Value) -> Result<Self> {
        let settings: Settings = serde_json::from_value(strip_null_sections(config_json))
            .context("CONFIG_INVALID: settings do not match the expected shape")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("/sync/tick_interval_secs", self.sync.tick_interval_secs),
            (
                "/sync/stale_message_timeout_secs",
                self.sync.stale_message_timeout_secs,
            ),
            ("/sync/resync_backoff_secs", self.sync.resync_backoff_secs),
            (
                "/transport/reconnect_backoff_secs",
                self.transport.reconnect_backoff_secs,
            ),
            ("/snapshot/timeout_secs", self.snapshot.timeout_secs),
        ];
        for (ptr, v) in positive {
            if v == 0 {
                bail!("CONFIG_INVALID {ptr}: must be > 0");
            }
        }
        if self.sync.max_gap_span == 0 {
            bail!("CONFIG_INVALID /sync/max_gap_span: must be > 0");
        }
        if self.store.max_records == Some(0) {
            bail!("CONFIG_INVALID /store/max_records: must be > 0 when set");
        }
        self.sync.timezone()?;

        let keys = &self.transport.metadata;
        for (ptr, k) in [
            ("/transport/metadata/sequence_key", &keys.sequence_key),
            ("/transport/metadata/record_key", &keys.record_key),
            ("/transport/metadata/status_key", &keys.status_key),
            ("/transport/metadata/expires_key", &keys.expires_key),
        ] {
            if k.trim().is_empty() {
                bail!("CONFIG_INVALID {ptr}: must not be blank");
            }
        }
        Ok(())
    }
}
