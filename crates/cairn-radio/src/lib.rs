//! cairn-radio — device-facing services: the event bus and link
//! abstraction, telemetry correlation, and the channel directory.

pub mod directory;
pub mod link;
pub mod sim;
pub mod store;
pub mod telemetry;

pub use directory::{ChannelDirectory, DirectoryError, ProbeOutcome, SyncReport};
pub use link::{
    ChannelInfoEvent, DeviceGate, DeviceLink, EventBus, EventClass, LinkError, LinkEvent,
    MessageEvent, RfSampleEvent, Subscription,
};
pub use sim::SimLink;
pub use store::{ChannelStore, MemoryChannelStore};
pub use telemetry::{
    Correlation, MatchKind, SignalQuality, TelemetryCorrelator, TelemetrySample, TelemetryStats,
};
