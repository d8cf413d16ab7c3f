use crate::*;

use std::sync::atomic::Ordering;

use cairn_core::channel::{derive_hashtag_key, ChannelKind, ZERO_KEY};
use cairn_radio::DirectoryError;

/// Adding a hashtag channel normalizes the name, derives the secret,
/// writes the device, and persists the slot the device reports back.
#[tokio::test]
async fn add_hashtag_channel_normalizes_and_persists() {
    let rig = rig(8);

    let slot = rig
        .directory
        .add_channel(2, "#Alpine", None)
        .await
        .expect("add failed");

    assert_eq!(slot.index, 2);
    assert_eq!(slot.name, "#alpine");
    assert_eq!(slot.kind, ChannelKind::Hashtag);
    assert_eq!(slot.key, derive_hashtag_key("#alpine"));

    // the device holds it, the cache serves it, the store saw one upsert
    assert_eq!(
        rig.link.slot(2),
        Some(("#alpine".to_string(), derive_hashtag_key("#alpine")))
    );
    assert_eq!(rig.directory.get(2).map(|s| s.name), Some("#alpine".into()));
    assert_eq!(rig.store.upserts.load(Ordering::SeqCst), 1);
    assert_eq!(rig.store.inner.rows().len(), 1);
}

/// A supplied secret is fine as long as it matches the derivation.
#[tokio::test]
async fn add_accepts_matching_secret_for_hashtag() {
    let rig = rig(8);

    let slot = rig
        .directory
        .add_channel(1, "#general", Some(derive_hashtag_key("#general")))
        .await
        .expect("add failed");

    assert_eq!(slot.kind, ChannelKind::Hashtag);
}

/// Custom channels carry the caller's secret through write and read-back.
#[tokio::test]
async fn add_custom_channel_round_trips_secret() {
    let rig = rig(8);

    let slot = rig
        .directory
        .add_channel(4, "field-ops", Some([0x42; 16]))
        .await
        .expect("add failed");

    assert_eq!(slot.kind, ChannelKind::Custom);
    assert_eq!(slot.key, [0x42; 16]);
    assert_eq!(rig.link.slot(4), Some(("field-ops".to_string(), [0x42; 16])));
}

/// When the read-back disagrees with the request, nothing is adopted:
/// the device may hold the write, but cache and store stay untouched.
#[tokio::test]
async fn unconfirmed_add_leaves_cache_and_store_alone() {
    let rig = rig(8);
    rig.link.override_echo(5, "mangled", [0x07; 16]);

    let err = rig
        .directory
        .add_channel(5, "ops", Some([0x42; 16]))
        .await
        .unwrap_err();

    assert!(matches!(err, DirectoryError::ConfirmationMismatch { .. }));
    assert!(rig.directory.get(5).is_none());
    assert_eq!(rig.store.upserts.load(Ordering::SeqCst), 0);
    assert!(rig.store.inner.is_empty());
    // the write itself did reach the device
    assert_eq!(rig.link.slot(5), Some(("ops".to_string(), [0x42; 16])));
}

/// Removal clears the slot, confirms via read-back, and deletes from
/// the store exactly once.
#[tokio::test]
async fn remove_channel_confirms_and_deletes_once() {
    let rig = rig(8);
    rig.link
        .preload_slot(1, "#general", derive_hashtag_key("#general"));
    rig.directory.synchronize(false).await.expect("scan failed");
    assert!(rig.directory.get(1).is_some());

    rig.directory.remove_channel(1).await.expect("remove failed");

    assert!(rig.directory.get(1).is_none());
    assert_eq!(rig.link.slot(1), Some((String::new(), ZERO_KEY)));
    assert_eq!(rig.store.deletes.load(Ordering::SeqCst), 1);
}

/// One swallowed read-back earns one retry; the delete still happens
/// exactly once.
#[tokio::test]
async fn remove_retries_one_ambiguous_timeout() {
    let rig = rig(8);
    rig.link
        .preload_slot(1, "#general", derive_hashtag_key("#general"));
    rig.directory.synchronize(false).await.expect("scan failed");
    let probes_after_scan = rig.link.command_count("get_channel");

    rig.link.silence(1, 1);
    rig.directory.remove_channel(1).await.expect("remove failed");

    // first read-back swallowed, second confirmed
    assert_eq!(rig.link.command_count("get_channel"), probes_after_scan + 2);
    assert_eq!(rig.store.deletes.load(Ordering::SeqCst), 1);
    assert!(rig.directory.get(1).is_none());
}

/// A slot that reads back still configured fails the removal and keeps
/// the cached entry.
#[tokio::test]
async fn remove_fails_when_slot_reads_back_configured() {
    let rig = rig(8);
    rig.link
        .preload_slot(1, "#general", derive_hashtag_key("#general"));
    rig.directory.synchronize(false).await.expect("scan failed");

    // device claims the channel is still there no matter what was written
    rig.link
        .override_echo(1, "#general", derive_hashtag_key("#general"));

    let err = rig.directory.remove_channel(1).await.unwrap_err();

    assert!(matches!(err, DirectoryError::ConfirmationMismatch { .. }));
    assert_eq!(rig.store.deletes.load(Ordering::SeqCst), 0);
    assert!(rig.directory.get(1).is_some());
}

/// Mutations reject indices past the device's slot table up front.
#[tokio::test]
async fn mutations_respect_slot_range() {
    let rig = rig(4);

    let err = rig.directory.add_channel(4, "#x", None).await.unwrap_err();
    assert!(matches!(err, DirectoryError::IndexOutOfRange { idx: 4, max: 4 }));

    let err = rig.directory.remove_channel(7).await.unwrap_err();
    assert!(matches!(err, DirectoryError::IndexOutOfRange { idx: 7, max: 4 }));

    assert!(rig.link.commands().is_empty());
}
