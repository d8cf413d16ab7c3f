//! Periodic status reporting — snapshots daemon state into the log.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use cairn_radio::{ChannelDirectory, DeviceLink, MemoryChannelStore, TelemetryCorrelator};

pub struct StatusReporter<L: DeviceLink> {
    directory: Arc<ChannelDirectory<L>>,
    correlator: Arc<TelemetryCorrelator>,
    store: MemoryChannelStore,
    period: Duration,
    shutdown: broadcast::Receiver<()>,
}

#[derive(Serialize)]
struct StatusSnapshot {
    directory_valid: bool,
    channels: usize,
    persisted_rows: usize,
    window_len: usize,
    tracked_prefixes: usize,
}

impl<L: DeviceLink> StatusReporter<L> {
    pub fn new(
        directory: Arc<ChannelDirectory<L>>,
        correlator: Arc<TelemetryCorrelator>,
        store: MemoryChannelStore,
        period: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            directory,
            correlator,
            store,
            period,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("status reporter stopping");
                    return;
                }
                _ = interval.tick() => self.report(),
            }
        }
    }

    fn report(&self) {
        let stats = self.correlator.stats();
        let channels = self.directory.channels();
        let snapshot = StatusSnapshot {
            directory_valid: self.directory.is_valid(),
            channels: channels.len(),
            persisted_rows: self.store.len(),
            window_len: stats.window_len,
            tracked_prefixes: stats.tracked_prefixes,
        };
        match serde_json::to_string(&snapshot) {
            Ok(json) => tracing::info!(snapshot = %json, "daemon status"),
            Err(e) => tracing::warn!(error = %e, "status snapshot failed to serialize"),
        }
        for slot in &channels {
            tracing::info!(idx = slot.index, name = %slot.name, kind = ?slot.kind, "  channel");
        }
    }
}
