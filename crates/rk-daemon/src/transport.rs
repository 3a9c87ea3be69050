//! WebSocket stream listener.
//!
//! Connects to the upstream stream, hands every decoded frame to the shared
//! [`StreamEventProcessor`], and reconnects after a fixed backoff forever.
//! Reconnecting does not touch tracker state: a gap spanning the outage is
//! detected from the sequence ids like any other gap.
//!
//! Frames are handled inline on the session task. While a resync drains the
//! pending buffer it holds the gate's write lock, so the next frame waits on
//! that lock and blocks this worker thread until the drain finishes. The drain
//! itself runs on the blocking pool, and reads resume as soon as it returns.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures_util::{Stream, StreamExt};
use rk_config::TransportSettings;
use rk_runtime::StreamEventProcessor;
use rk_schemas::StreamEvent;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    pub url: String,
    pub reconnect_backoff: Duration,
}

impl TransportConfig {
    pub fn from_settings(s: &TransportSettings) -> Result<Self> {
        let url = s
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| anyhow!("CONFIG_MISSING /transport/url"))?;
        Ok(Self {
            url: url.to_string(),
            reconnect_backoff: s.reconnect_backoff(),
        })
    }
}

/// Why a session ended.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionEnd {
    Shutdown,
    /// Peer closed or the stream ended.
    Closed,
    Failed(String),
}

/// Parse one text frame: `{"metadata": {..}, "body": "..", "published_at": ..}`.
pub fn decode_frame(text: &str) -> Result<StreamEvent> {
    serde_json::from_str(text).context("stream frame json decode failed")
}

/// Synchronous. May wait on the gate lock during a pending drain.
fn handle_text(processor: &StreamEventProcessor, text: &str) {
    match decode_frame(text) {
        Ok(event) => {
            processor.handle(&event);
        }
        Err(e) => warn!(error = %format!("{e:#}"), bytes = text.len(), "dropping undecodable frame"),
    }
}

/// Drain one connected session until it ends or shutdown is signalled.
pub async fn pump<S>(
    frames: &mut S,
    processor: &StreamEventProcessor,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_text(processor, &text),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => handle_text(processor, text),
                    Err(_) => warn!(bytes = bytes.len(), "dropping non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "stream closed by peer");
                    return SessionEnd::Closed;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Failed(e.to_string()),
                None => return SessionEnd::Closed,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return SessionEnd::Shutdown;
                }
            }
        }
    }
}

/// Connect, pump, back off, repeat until shutdown.
pub async fn run_transport(
    cfg: TransportConfig,
    processor: StreamEventProcessor,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(url = %cfg.url, backoff_secs = cfg.reconnect_backoff.as_secs(), "transport starting");
    let mut session: u64 = 0;
    loop {
        if *shutdown.borrow() {
            break;
        }
        session += 1;

        let end = match tokio_tungstenite::connect_async(cfg.url.as_str()).await {
            Ok((mut ws, _resp)) => {
                info!(session, "stream connected");
                pump(&mut ws, &processor, &mut shutdown).await
            }
            Err(e) => SessionEnd::Failed(format!("connect failed: {e}")),
        };

        match end {
            SessionEnd::Shutdown => break,
            SessionEnd::Closed => warn!(session, "stream ended; reconnecting after backoff"),
            SessionEnd::Failed(reason) => {
                warn!(session, error = %reason, "stream failed; reconnecting after backoff")
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(cfg.reconnect_backoff) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
        debug!(session, "reconnecting");
    }
    info!("transport stopped");
}
