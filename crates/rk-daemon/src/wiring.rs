//! Builds the sync pipeline from typed settings.

use std::sync::Arc;

use anyhow::{Context, Result};
use rk_config::{ResolvedSecrets, Settings};
use rk_runtime::{
    ControllerConfig, HttpSnapshotSource, MetadataDecoder, ReconciliationController,
    StreamEventProcessor, SyncContext, SystemClock,
};
use rk_store::MemoryStore;

use crate::transport::TransportConfig;

pub struct Wiring {
    pub ctx: Arc<SyncContext>,
    pub processor: StreamEventProcessor,
    pub controller: ReconciliationController,
    pub transport: TransportConfig,
}

pub fn build(settings: &Settings, secrets: &ResolvedSecrets) -> Result<Wiring> {
    let store = match settings.store.max_records {
        Some(cap) => MemoryStore::with_max_records(cap),
        None => MemoryStore::new(),
    };
    let ctx = Arc::new(SyncContext::new(
        Arc::new(store),
        Arc::new(SystemClock),
        settings.sync.max_gap_span,
    ));

    let decoder = MetadataDecoder::new(settings.transport.metadata.clone());
    let processor = StreamEventProcessor::new(ctx.clone(), Arc::new(decoder));

    let source = HttpSnapshotSource::from_settings(&settings.snapshot, secrets)
        .context("snapshot source")?;
    let cfg = ControllerConfig::from_settings(&settings.sync).context("controller config")?;
    let controller = ReconciliationController::new(ctx.clone(), Arc::new(source), cfg);

    let transport = TransportConfig::from_settings(&settings.transport)?;

    Ok(Wiring {
        ctx,
        processor,
        controller,
        transport,
    })
}
