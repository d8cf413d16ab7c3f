use crate::*;

use std::sync::atomic::Ordering;

use cairn_core::channel::{derive_hashtag_key, ChannelKind};

/// A full scan finds hashtag and custom channels and skips empty slots.
#[tokio::test]
async fn full_scan_classifies_hashtag_and_custom_slots() {
    let rig = rig(8);
    rig.link
        .preload_slot(0, "#general", derive_hashtag_key("#general"));
    rig.link.preload_slot(3, "ops", [0x11; 16]);

    let report = rig.directory.synchronize(false).await.expect("scan failed");

    assert_eq!(report.probed, 8);
    assert!(!report.device_unresponsive);
    assert_eq!(report.channels.len(), 2);
    assert_eq!(report.channels[0].index, 0);
    assert_eq!(report.channels[0].kind, ChannelKind::Hashtag);
    assert_eq!(report.channels[1].index, 3);
    assert_eq!(report.channels[1].kind, ChannelKind::Custom);

    // one probe per slot, and the discovered set replaced the store
    assert_eq!(rig.link.command_count("get_channel"), 8);
    assert_eq!(rig.store.replaces.load(Ordering::SeqCst), 1);
    assert_eq!(rig.store.inner.rows().len(), 2);
    assert!(rig.directory.is_valid());
}

/// A device that never answers is abandoned after exactly three probes.
#[tokio::test]
async fn unresponsive_device_aborts_after_three_probes() {
    let rig = rig(8);
    rig.link.mute_all(true);

    let report = rig.directory.synchronize(false).await.expect("scan errored");

    assert!(report.device_unresponsive);
    assert!(report.channels.is_empty());
    assert_eq!(report.probed, 3);
    assert_eq!(rig.link.command_count("get_channel"), 3);
    assert!(!rig.directory.is_valid());
    assert_eq!(rig.store.replaces.load(Ordering::SeqCst), 0);
}

/// An abandoned scan leaves the previously discovered channels alone.
#[tokio::test]
async fn abort_preserves_previous_cache() {
    let rig = rig(4);
    rig.link
        .preload_slot(0, "#general", derive_hashtag_key("#general"));
    rig.directory.synchronize(false).await.expect("first scan");
    assert_eq!(rig.directory.channels().len(), 1);

    rig.directory.invalidate();
    rig.link.mute_all(true);
    let report = rig.directory.synchronize(false).await.expect("rescan");

    assert!(report.device_unresponsive);
    // stale view survives for readers, but stays marked stale
    assert_eq!(rig.directory.channels().len(), 1);
    assert!(!rig.directory.is_valid());
    assert_eq!(rig.store.inner.rows().len(), 1);
    assert_eq!(rig.store.replaces.load(Ordering::SeqCst), 1);
}

/// A reply inside the early window resets the timeout streak, so two
/// dead slots followed by a configured one do not abandon the scan.
#[tokio::test]
async fn early_reply_resets_the_timeout_streak() {
    let rig = rig(6);
    rig.link.silence(0, u32::MAX);
    rig.link.silence(1, u32::MAX);
    rig.link
        .preload_slot(2, "#general", derive_hashtag_key("#general"));

    let report = rig.directory.synchronize(false).await.expect("scan failed");

    assert!(!report.device_unresponsive);
    assert_eq!(report.probed, 6);
    assert_eq!(report.channels.len(), 1);
    assert_eq!(report.channels[0].index, 2);
    assert!(rig.directory.is_valid());
}

/// Timeouts past the first few slots are ordinary absent slots, even
/// three in a row.
#[tokio::test]
async fn late_timeouts_do_not_abort_the_scan() {
    let rig = rig(8);
    rig.link
        .preload_slot(0, "#general", derive_hashtag_key("#general"));
    rig.link.silence(5, u32::MAX);
    rig.link.silence(6, u32::MAX);
    rig.link.silence(7, u32::MAX);

    let report = rig.directory.synchronize(false).await.expect("scan failed");

    assert!(!report.device_unresponsive);
    assert_eq!(report.probed, 8);
    assert_eq!(report.channels.len(), 1);
    assert!(rig.directory.is_valid());
}

/// While the cache is valid, synchronize serves it without touching the
/// device. Invalidation brings the probes back.
#[tokio::test]
async fn cached_view_serves_without_device_traffic() {
    let rig = rig(4);
    rig.link
        .preload_slot(2, "#general", derive_hashtag_key("#general"));

    let first = rig.directory.synchronize(false).await.expect("first scan");
    assert_eq!(first.probed, 4);
    assert_eq!(rig.link.command_count("get_channel"), 4);

    let second = rig.directory.synchronize(false).await.expect("cached read");
    assert_eq!(second.probed, 0);
    assert_eq!(second.channels, first.channels);
    assert_eq!(rig.link.command_count("get_channel"), 4);

    rig.directory.invalidate();
    let third = rig.directory.synchronize(false).await.expect("rescan");
    assert_eq!(third.probed, 4);
    assert_eq!(rig.link.command_count("get_channel"), 8);
}

/// force_refresh probes even when the cache is valid.
#[tokio::test]
async fn force_refresh_ignores_valid_cache() {
    let rig = rig(4);
    rig.directory.synchronize(false).await.expect("first scan");

    let report = rig.directory.synchronize(true).await.expect("forced scan");
    assert_eq!(report.probed, 4);
    assert_eq!(rig.link.command_count("get_channel"), 8);
}
