//! Cairn integration test harness.
//!
//! Tests run against the scripted in-process device; no hardware or
//! external environment is needed. Each test builds its own rig and
//! throws it away, so they are free to run in parallel.
//!
//!   cargo test --test integration

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cairn_core::channel::ChannelSlot;
use cairn_core::config::LinkConfig;
use cairn_radio::{ChannelDirectory, ChannelStore, DeviceGate, MemoryChannelStore, SimLink};

mod channels;
mod sync;
mod telemetry;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Link config tuned for tests: small slot table, tight timeouts.
pub fn test_link_config(max_channels: u8) -> LinkConfig {
    LinkConfig {
        max_channels,
        fetch_timeout_ms: 50,
        probe_spacing_ms: 1,
    }
}

/// Store wrapper that counts mutations, so tests can pin down exactly
/// which persistence side effects an operation had.
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryChannelStore,
    pub replaces: AtomicUsize,
    pub upserts: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl ChannelStore for CountingStore {
    fn replace_all(&self, rows: &[ChannelSlot]) {
        self.replaces.fetch_add(1, Ordering::SeqCst);
        self.inner.replace_all(rows);
    }

    fn upsert(&self, row: &ChannelSlot) {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(row);
    }

    fn delete(&self, idx: u8) {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(idx);
    }
}

/// A directory wired to a scripted device and a counting store.
pub struct Rig {
    pub link: Arc<SimLink>,
    pub store: Arc<CountingStore>,
    pub directory: ChannelDirectory<SimLink>,
}

pub fn rig(max_channels: u8) -> Rig {
    let link = Arc::new(SimLink::new());
    let store = Arc::new(CountingStore::default());
    let directory = ChannelDirectory::new(
        link.clone(),
        DeviceGate::new(),
        store.clone() as Arc<dyn ChannelStore>,
        &test_link_config(max_channels),
    );
    Rig {
        link,
        store,
        directory,
    }
}

// ── Smoke ─────────────────────────────────────────────────────────────────────

/// The rig wires up and an empty device scans clean.
#[tokio::test]
async fn empty_device_scans_clean() {
    let rig = rig(4);

    let report = rig.directory.synchronize(false).await.expect("scan failed");

    assert!(report.channels.is_empty());
    assert_eq!(report.probed, 4);
    assert!(!report.device_unresponsive);
    assert!(rig.directory.is_valid());
    assert!(rig.store.inner.is_empty());
}
