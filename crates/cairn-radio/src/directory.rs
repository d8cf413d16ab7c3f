//! Channel directory — discovers and manages the device's channel table.
//!
//! The device holds a fixed table of channel slots and answers one
//! probe at a time. A full synchronization walks every index with the
//! subscribe-send-await pattern, classifies each slot, and adopts the
//! discovered set wholesale. Individual adds and removes write a slot
//! and then read it back; a write nobody confirmed never touches the
//! cache or the store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cairn_core::channel::{
    derive_hashtag_key, normalize_hashtag, ChannelKind, ChannelSlot, CHANNEL_KEY_LEN, ZERO_KEY,
};
use cairn_core::config::LinkConfig;

use crate::link::{DeviceGate, DeviceLink, EventClass, LinkError, LinkEvent};
use crate::store::ChannelStore;

/// Consecutive probe timeouts that abandon a scan.
const EARLY_ABORT_THRESHOLD: u32 = 3;
/// The abort heuristic only applies this early in the scan. Timeouts on
/// later indices are ordinary absent slots.
const EARLY_ABORT_WINDOW: u8 = 3;

// ── Probe outcomes ────────────────────────────────────────────────────────────

/// Classification of one probed slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The slot holds a usable channel.
    Configured(ChannelSlot),
    /// The device answered with an empty name or zero secret.
    Empty,
    /// No reply within the fetch timeout.
    Absent,
}

/// Result of a full synchronization pass.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Configured slots, in index order.
    pub channels: Vec<ChannelSlot>,
    /// Set when the scan was abandoned because the device never spoke.
    /// The cache keeps whatever it held before.
    pub device_unresponsive: bool,
    /// Slots actually probed. Zero when the cached view was served.
    pub probed: usize,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("channel index {idx} out of range (device has {max} slots)")]
    IndexOutOfRange { idx: u8, max: u8 },

    #[error("channel name must not be empty")]
    EmptyName,

    #[error("custom channel needs a non-zero 16-byte secret")]
    MissingSecret,

    #[error("supplied secret contradicts the hashtag derivation for {name}")]
    SecretMismatch { name: String },

    /// The post-write read-back disagreed with the request. The cache
    /// and store were left untouched.
    #[error("device did not confirm the write: {reason}")]
    ConfirmationMismatch { reason: String },

    #[error(transparent)]
    Link(#[from] LinkError),
}

// ── Directory ─────────────────────────────────────────────────────────────────

/// In-memory channel cache plus the device-facing probe protocol.
///
/// All device traffic goes through the [`DeviceGate`], one round-trip
/// at a time. The cached view is served without device traffic while
/// `valid` holds; [`invalidate`](Self::invalidate) clears the flag but
/// keeps the slots as a stale fallback for readers.
pub struct ChannelDirectory<L: DeviceLink> {
    link: Arc<L>,
    gate: DeviceGate,
    store: Arc<dyn ChannelStore>,
    slots: Mutex<BTreeMap<u8, ChannelSlot>>,
    valid: AtomicBool,
    max_channels: u8,
    fetch_timeout: Duration,
    probe_spacing: Duration,
}

impl<L: DeviceLink> ChannelDirectory<L> {
    pub fn new(
        link: Arc<L>,
        gate: DeviceGate,
        store: Arc<dyn ChannelStore>,
        config: &LinkConfig,
    ) -> Self {
        Self {
            link,
            gate,
            store,
            slots: Mutex::new(BTreeMap::new()),
            valid: AtomicBool::new(false),
            max_channels: config.max_channels,
            fetch_timeout: config.fetch_timeout(),
            probe_spacing: config.probe_spacing(),
        }
    }

    // ── Cached view ──────────────────────────────────────────────────

    /// Configured channels in index order. May be stale; check
    /// [`is_valid`](Self::is_valid).
    pub fn channels(&self) -> Vec<ChannelSlot> {
        self.slots_lock().values().cloned().collect()
    }

    pub fn get(&self, idx: u8) -> Option<ChannelSlot> {
        self.slots_lock().get(&idx).cloned()
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Mark the cache stale without clearing it. Readers keep the old
    /// view until the next synchronization replaces it.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
        tracing::debug!("channel cache invalidated");
    }

    // ── Synchronization ──────────────────────────────────────────────

    /// Walk every slot index and adopt what the device reports.
    ///
    /// Serves the cached view when it is valid and `force_refresh` is
    /// off. A scan that the early-abort heuristic cuts short returns
    /// `device_unresponsive` with an empty channel list and leaves the
    /// cache, the valid flag, and the store exactly as they were.
    pub async fn synchronize(&self, force_refresh: bool) -> Result<SyncReport, DirectoryError> {
        if self.is_valid() && !force_refresh {
            return Ok(SyncReport {
                channels: self.channels(),
                device_unresponsive: false,
                probed: 0,
            });
        }

        let _device = self.gate.acquire().await;
        tracing::info!(slots = self.max_channels, "starting channel scan");

        let mut discovered: Vec<ChannelSlot> = Vec::new();
        let mut consecutive_timeouts: u32 = 0;
        let mut probed = 0usize;

        for idx in 0..self.max_channels {
            let outcome = self.probe_slot(idx).await?;
            probed += 1;

            match outcome {
                ProbeOutcome::Configured(slot) => {
                    consecutive_timeouts = 0;
                    tracing::debug!(idx, name = %slot.name, kind = ?slot.kind, "slot configured");
                    discovered.push(slot);
                }
                ProbeOutcome::Empty => {
                    consecutive_timeouts = 0;
                    tracing::debug!(idx, "slot empty");
                }
                ProbeOutcome::Absent => {
                    consecutive_timeouts += 1;
                    tracing::debug!(idx, consecutive_timeouts, "no reply for slot");
                }
            }

            if consecutive_timeouts >= EARLY_ABORT_THRESHOLD && idx < EARLY_ABORT_WINDOW {
                tracing::warn!(
                    probed,
                    "device unresponsive from the first slot on, abandoning scan"
                );
                return Ok(SyncReport {
                    channels: Vec::new(),
                    device_unresponsive: true,
                    probed,
                });
            }

            tokio::time::sleep(self.probe_spacing).await;
        }

        {
            let mut slots = self.slots_lock();
            slots.clear();
            for slot in &discovered {
                slots.insert(slot.index, slot.clone());
            }
        }
        self.valid.store(true, Ordering::Release);
        self.store.replace_all(&discovered);
        tracing::info!(configured = discovered.len(), probed, "channel scan complete");

        Ok(SyncReport {
            channels: discovered,
            device_unresponsive: false,
            probed,
        })
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Write a channel into a slot and confirm the device kept it.
    ///
    /// A name starting with `#` is a hashtag channel: the secret is
    /// derived from the name, and a caller-supplied secret is rejected
    /// unless it matches the derivation. Any other name needs an
    /// explicit non-zero secret. The cache and store pick up the slot
    /// as the device reports it back, and only then.
    pub async fn add_channel(
        &self,
        idx: u8,
        name: &str,
        secret: Option<[u8; CHANNEL_KEY_LEN]>,
    ) -> Result<ChannelSlot, DirectoryError> {
        if idx >= self.max_channels {
            return Err(DirectoryError::IndexOutOfRange {
                idx,
                max: self.max_channels,
            });
        }
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed == "#" {
            return Err(DirectoryError::EmptyName);
        }

        let (name, key, kind) = if trimmed.starts_with('#') {
            let canonical = normalize_hashtag(trimmed);
            let derived = derive_hashtag_key(&canonical);
            if let Some(supplied) = secret {
                if supplied != derived {
                    return Err(DirectoryError::SecretMismatch { name: canonical });
                }
            }
            (canonical, derived, ChannelKind::Hashtag)
        } else {
            let key = secret.ok_or(DirectoryError::MissingSecret)?;
            if key == ZERO_KEY {
                return Err(DirectoryError::MissingSecret);
            }
            (trimmed.to_string(), key, ChannelKind::Custom)
        };

        let _device = self.gate.acquire().await;

        self.link.send_command(vec![
            "set_channel".into(),
            idx.to_string(),
            name.clone(),
            hex::encode(key),
        ])?;

        // the write is only real once the device echoes it back
        let slot = match self.probe_slot(idx).await? {
            ProbeOutcome::Configured(slot) => slot,
            ProbeOutcome::Empty => {
                return Err(Self::unconfirmed(
                    idx,
                    format!("slot {idx} reads back unconfigured"),
                ));
            }
            ProbeOutcome::Absent => {
                return Err(Self::unconfirmed(
                    idx,
                    format!("no read-back for slot {idx} within timeout"),
                ));
            }
        };

        if slot.name != name {
            return Err(Self::unconfirmed(
                idx,
                format!("slot {idx} kept name {:?}, wanted {:?}", slot.name, name),
            ));
        }
        match kind {
            ChannelKind::Custom if slot.key != key => {
                return Err(Self::unconfirmed(
                    idx,
                    format!("slot {idx} kept a different secret"),
                ));
            }
            ChannelKind::Hashtag if slot.key != key => {
                // the firmware derives hashtag keys on its own; a
                // disagreement means an unreachable channel, not a
                // failed write
                tracing::warn!(idx, name = %name, "device derived a different hashtag key");
            }
            _ => {}
        }

        self.slots_lock().insert(idx, slot.clone());
        self.store.upsert(&slot);
        tracing::info!(idx, name = %slot.name, kind = ?slot.kind, "channel added");
        Ok(slot)
    }

    /// Clear a slot and confirm the device reports it empty.
    ///
    /// One ambiguous timeout earns one re-probe before the removal is
    /// declared failed. Cache and store are only touched after the
    /// device confirms; the store sees exactly one delete.
    pub async fn remove_channel(&self, idx: u8) -> Result<(), DirectoryError> {
        if idx >= self.max_channels {
            return Err(DirectoryError::IndexOutOfRange {
                idx,
                max: self.max_channels,
            });
        }

        let _device = self.gate.acquire().await;

        self.link.send_command(vec![
            "set_channel".into(),
            idx.to_string(),
            String::new(),
            hex::encode(ZERO_KEY),
        ])?;

        let mut outcome = self.probe_slot(idx).await?;
        if outcome == ProbeOutcome::Absent {
            tracing::debug!(idx, "removal read-back timed out, probing once more");
            outcome = self.probe_slot(idx).await?;
        }

        match outcome {
            ProbeOutcome::Empty => {
                self.slots_lock().remove(&idx);
                self.store.delete(idx);
                tracing::info!(idx, "channel removed");
                Ok(())
            }
            ProbeOutcome::Configured(slot) => Err(Self::unconfirmed(
                idx,
                format!("slot {idx} still holds {:?}", slot.name),
            )),
            ProbeOutcome::Absent => Err(Self::unconfirmed(
                idx,
                format!("no read-back for slot {idx} after retry"),
            )),
        }
    }

    // ── Probe primitive ──────────────────────────────────────────────

    /// One subscribe-send-await round-trip for a slot.
    ///
    /// The subscription handle drops on every path out of this
    /// function, so no listener outlives its probe. Callers hold the
    /// device gate.
    async fn probe_slot(&self, idx: u8) -> Result<ProbeOutcome, LinkError> {
        let mut sub = self
            .link
            .events()
            .subscribe_filtered(EventClass::ChannelInfo, move |event| {
                matches!(event, LinkEvent::ChannelInfo(info) if info.channel_idx == idx)
            });

        self.link
            .send_command(vec!["get_channel".into(), idx.to_string()])?;

        match tokio::time::timeout(self.fetch_timeout, sub.recv()).await {
            Ok(Some(LinkEvent::ChannelInfo(info))) => {
                let name = info.channel_name.trim_end_matches('\0').trim();
                Ok(match ChannelSlot::classify(idx, name, info.channel_secret) {
                    Some(slot) => ProbeOutcome::Configured(slot),
                    None => ProbeOutcome::Empty,
                })
            }
            // filtered subscription only ever yields channel info; a
            // closed bus counts as silence
            Ok(_) => Ok(ProbeOutcome::Absent),
            Err(_) => Ok(ProbeOutcome::Absent),
        }
    }

    fn slots_lock(&self) -> MutexGuard<'_, BTreeMap<u8, ChannelSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unconfirmed(idx: u8, reason: String) -> DirectoryError {
        tracing::warn!(idx, %reason, "write not confirmed");
        DirectoryError::ConfirmationMismatch { reason }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
