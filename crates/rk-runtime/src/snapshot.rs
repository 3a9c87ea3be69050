use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rk_config::{ResolvedSecrets, SnapshotSettings};
use rk_schemas::{Record, RecordStatus, Snapshot};
use serde::Deserialize;
use std::time::Duration;

/// Authoritative full-state source used by resync and scheduled validation.
#[async_trait::async_trait]
pub trait SnapshotSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn fetch_snapshot(&self) -> Result<Snapshot>;
}

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    #[serde(default)]
    as_of: Option<DateTime<Utc>>,
    #[serde(default)]
    records: Vec<SnapshotRecord>,
}

#[derive(Debug, Deserialize)]
struct SnapshotRecord {
    key: String,
    status: RecordStatus,
    #[serde(default)]
    payload: String,
    #[serde(default)]
    received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl SnapshotRecord {
    fn into_record(self, fetched_at: DateTime<Utc>) -> Record {
        let mut r = Record::new(
            self.key,
            self.status,
            self.payload,
            self.received_at.unwrap_or(fetched_at),
        );
        r.expires_at = self.expires_at;
        r
    }
}

/// Snapshot source over HTTP GET returning `{"as_of": .., "records": [..]}`.
///
/// The bearer token comes from [`ResolvedSecrets`]; it is never logged.
#[derive(Clone)]
pub struct HttpSnapshotSource {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl std::fmt::Debug for HttpSnapshotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSnapshotSource")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl HttpSnapshotSource {
    pub fn new(url: impl Into<String>, timeout: Duration, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("snapshot http client build failed")?;
        Ok(Self {
            http,
            url: url.into(),
            token,
        })
    }

    pub fn from_settings(settings: &SnapshotSettings, secrets: &ResolvedSecrets) -> Result<Self> {
        let url = settings
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| anyhow!("CONFIG_MISSING /snapshot/url"))?;
        Self::new(url, settings.timeout(), secrets.snapshot_token.clone())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl SnapshotSource for HttpSnapshotSource {
    fn source_name(&self) -> &'static str {
        "http"
    }

    async fn fetch_snapshot(&self) -> Result<Snapshot> {
        let mut req = self.http.get(&self.url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.context("snapshot request failed")?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("snapshot http error status={}", status.as_u16()));
        }

        let body: SnapshotResponse = resp
            .json()
            .await
            .context("snapshot response json decode failed")?;

        let fetched_at = Utc::now();
        let records = body
            .records
            .into_iter()
            .map(|r| r.into_record(fetched_at))
            .collect();
        Ok(Snapshot::new(body.as_of.unwrap_or(fetched_at), records))
    }
}
