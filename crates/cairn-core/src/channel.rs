//! Channel slots and hashtag key derivation.
//!
//! A device exposes a fixed table of channel slots, each holding a name
//! and a 16-byte secret. A slot with an empty name or an all-zero secret
//! is unconfigured. Hashtag channels ("#general") derive their secret
//! from the name alone; the firmware performs the identical derivation,
//! so it must never change shape.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Size in bytes of a channel secret.
pub const CHANNEL_KEY_LEN: usize = 16;

/// The all-zero secret a device reports for an unconfigured slot.
pub const ZERO_KEY: [u8; CHANNEL_KEY_LEN] = [0u8; CHANNEL_KEY_LEN];

/// How a channel's secret came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    /// Secret is derived from the name; anyone knowing the name can join.
    Hashtag,
    /// Secret was supplied out of band.
    Custom,
}

/// One configured channel slot on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSlot {
    /// Slot index on the device. Unique key.
    pub index: u8,
    pub name: String,
    pub key: [u8; CHANNEL_KEY_LEN],
    pub kind: ChannelKind,
}

impl ChannelSlot {
    /// Build a slot from what a device reported, classifying its kind.
    ///
    /// Returns `None` for unconfigured slots (empty name or zero key);
    /// those never appear in the directory's configured view.
    pub fn classify(index: u8, name: &str, key: [u8; CHANNEL_KEY_LEN]) -> Option<Self> {
        if name.is_empty() || key == ZERO_KEY {
            return None;
        }
        let kind = if key == derive_hashtag_key(name) {
            ChannelKind::Hashtag
        } else {
            ChannelKind::Custom
        };
        Some(ChannelSlot {
            index,
            name: name.to_string(),
            key,
            kind,
        })
    }

    /// Secret as 32 lowercase hex chars, the form commands and logs use.
    pub fn key_hex(&self) -> String {
        hex::encode(self.key)
    }
}

/// Normalize a channel name to canonical hashtag form: leading `#`,
/// lowercase.
pub fn normalize_hashtag(name: &str) -> String {
    let bare = name.strip_prefix('#').unwrap_or(name);
    format!("#{}", bare.to_lowercase())
}

/// Derive the 16-byte secret of a hashtag channel from its name.
///
/// SHA-256 over the normalized name's UTF-8 bytes, truncated to 16
/// bytes. The device firmware runs the same derivation; a deviation here
/// produces a channel nobody else can hear.
pub fn derive_hashtag_key(name: &str) -> [u8; CHANNEL_KEY_LEN] {
    let digest = Sha256::digest(normalize_hashtag(name).as_bytes());
    let mut key = [0u8; CHANNEL_KEY_LEN];
    key.copy_from_slice(&digest[..CHANNEL_KEY_LEN]);
    key
}

// ── Tests ─────────────────────────────────────────────────────────────────────
