//! cairn-core — packet format, channel model, and configuration.
//! All other Cairn crates depend on this one.

pub mod channel;
pub mod config;
pub mod packet;

pub use channel::{derive_hashtag_key, ChannelKind, ChannelSlot};
pub use packet::{decode, DecodeError, DecodedPacket, PayloadType, RouteType};
