//! cairnd — Cairn companion daemon.
//!
//! Wires a device link to the channel directory and the telemetry
//! correlator, then runs until interrupted. This build drives the
//! scripted in-process device; a serial transport plugs into the same
//! [`cairn_radio::DeviceLink`] seam.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use cairn_core::channel::{derive_hashtag_key, CHANNEL_KEY_LEN};
use cairn_core::config::CairnConfig;
use cairn_radio::{
    ChannelDirectory, ChannelStore, DeviceGate, DeviceLink, MemoryChannelStore, SimLink,
    TelemetryCorrelator,
};

mod ingest;
mod status;

#[tokio::main]
async fn main() -> Result<()> {
    // Optional first argument: an explicit config path. Otherwise
    // $CAIRN_CONFIG, then the usual location.
    let config_path = std::env::args()
        .nth(1)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(CairnConfig::file_path);

    // Load config before logging so its level can seed the filter.
    // RUST_LOG still wins. Errors are reported once logging is up.
    let loaded = CairnConfig::load_from(&config_path);
    let config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => CairnConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log.level)),
        )
        .init();

    if let Err(e) = loaded {
        tracing::warn!(error = %e, "failed to load config, using defaults");
    }
    if let Err(e) = CairnConfig::write_default_if_missing(&config_path) {
        tracing::warn!(error = %e, "failed to write default config");
    }

    tracing::info!(
        max_channels = config.link.max_channels,
        window_ms = config.telemetry.correlation_window_ms,
        "cairnd starting"
    );

    // Scripted device with a couple of channels already on it.
    let link = Arc::new(SimLink::new());
    link.preload_slot(0, "#general", derive_hashtag_key("#general"));
    link.preload_slot(1, "field-ops", [0x42; CHANNEL_KEY_LEN]);

    let gate = DeviceGate::new();
    let store = MemoryChannelStore::new();
    let correlator = Arc::new(TelemetryCorrelator::new(&config.telemetry));
    let directory = Arc::new(ChannelDirectory::new(
        link.clone(),
        gate.clone(),
        Arc::new(store.clone()) as Arc<dyn ChannelStore>,
        &config.link,
    ));

    // ── Shutdown channel ─────────────────────────────────────────────────────

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let traffic_task = link.spawn_traffic(Duration::from_secs(2));

    let ingest_task = tokio::spawn(
        ingest::TelemetryIngest::new(
            link.events(),
            correlator.clone(),
            &config.telemetry,
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    let status_task = tokio::spawn(
        status::StatusReporter::new(
            directory.clone(),
            correlator.clone(),
            store.clone(),
            Duration::from_secs(10),
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    // Initial scan, before anything is reported against the directory.
    match directory.synchronize(false).await {
        Ok(report) => tracing::info!(
            channels = report.channels.len(),
            probed = report.probed,
            unresponsive = report.device_unresponsive,
            "initial channel scan done"
        ),
        Err(e) => tracing::error!(error = %e, "initial channel scan failed"),
    }

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = ingest_task        => tracing::error!("telemetry ingest exited: {:?}", r),
        r = status_task        => tracing::error!("status reporter exited: {:?}", r),
        r = traffic_task       => tracing::error!("traffic generator exited: {:?}", r),
    }

    link.detach();
    Ok(())
}
