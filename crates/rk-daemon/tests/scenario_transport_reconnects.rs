//! Scenario: the WebSocket listener feeds the processor and survives reconnects
//!
//! GREEN when:
//! - Text frames are decoded and handed to the processor; undecodable frames
//!   are dropped without ending the session.
//! - A peer close triggers a reconnect after the backoff.
//! - Reconnecting keeps tracker state: `last_seen` continues across sessions.
//! - Shutdown stops the listener while connected.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use rk_daemon::transport::{run_transport, TransportConfig};
use rk_runtime::{ManualClock, MetadataDecoder, StreamEventProcessor, SyncContext};
use rk_schemas::SequenceId;
use rk_store::MemoryStore;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

fn frame(key: &str, seq: i64) -> Message {
    Message::Text(format!(
        r#"{{"metadata":{{"sequence_id":"{seq}","record_key":"{key}"}},"body":"payload-{key}"}}"#
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn frames_flow_across_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        ws.send(frame("A", 1)).await.unwrap();
        ws.send(Message::Text("garbage".to_string())).await.unwrap();
        ws.send(frame("B", 2)).await.unwrap();
        ws.close(None).await.unwrap();

        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        ws.send(frame("C", 3)).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
    let ctx = Arc::new(SyncContext::new(Arc::new(MemoryStore::new()), clock, 10_000));
    ctx.gate().revalidate_after_resync().unwrap();
    let processor = StreamEventProcessor::new(ctx.clone(), Arc::new(MetadataDecoder::default()));

    let (tx, rx) = watch::channel(false);
    let cfg = TransportConfig {
        url: format!("ws://{addr}"),
        reconnect_backoff: Duration::from_millis(20),
    };
    let client = tokio::spawn(run_transport(cfg, processor, rx));

    let mut received = 0;
    for _ in 0..300 {
        received = ctx.counters().snapshot().received;
        if received >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(received, 3, "garbage frame must not reach the processor");
    assert_eq!(ctx.tracker().last_seen(), Some(SequenceId(3)));
    assert_eq!(ctx.tracker().gap_count(), 0);
    assert_eq!(ctx.store().len(), 3);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), client)
        .await
        .expect("transport did not stop")
        .unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), server).await;
}

#[tokio::test]
async fn shutdown_interrupts_backoff_when_upstream_is_down() {
    // Bind then drop to get a port nothing listens on.
    let addr = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap()
    };
    let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
    let ctx = Arc::new(SyncContext::new(Arc::new(MemoryStore::new()), clock, 10_000));
    let processor = StreamEventProcessor::new(ctx, Arc::new(MetadataDecoder::default()));

    let (tx, rx) = watch::channel(false);
    let cfg = TransportConfig {
        url: format!("ws://{addr}"),
        reconnect_backoff: Duration::from_secs(3600),
    };
    let client = tokio::spawn(run_transport(cfg, processor, rx));
    tokio::time::sleep(Duration::from_millis(50)).await;

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), client)
        .await
        .expect("transport did not stop during backoff")
        .unwrap();
}
