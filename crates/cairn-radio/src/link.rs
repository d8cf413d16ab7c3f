//! Device link abstraction — typed events, filtered subscriptions, and
//! the single-flight command gate.
//!
//! A radio device speaks an asymmetric protocol: commands go down as
//! token lists, replies come back as events on a shared stream, and
//! unsolicited traffic (RF samples, inbound messages) arrives on the
//! same stream. Consumers subscribe to the event class they care about,
//! optionally with a predicate, and hold the subscription only as long
//! as they are waiting; dropping the handle unsubscribes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use cairn_core::channel::CHANNEL_KEY_LEN;

// ── Events ────────────────────────────────────────────────────────────────────

/// Event classes a subscriber can select on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    /// Raw RF sample with link-quality readings.
    RfTelemetry,
    /// Reply to a channel query or write.
    ChannelInfo,
    /// Inbound user-visible message.
    Message,
}

/// RF sample as reported by the device.
#[derive(Debug, Clone)]
pub struct RfSampleEvent {
    /// Signal-to-noise ratio in dB.
    pub snr: f32,
    /// Received signal strength in dBm.
    pub rssi: i16,
    /// The raw frame as lowercase hex.
    pub raw_hex: String,
    /// Device-extracted payload as lowercase hex, when provided.
    pub payload_hex: String,
    pub payload_len: usize,
    /// Sender pubkey prefix, when the device already resolved one.
    pub pubkey_prefix: Option<String>,
}

/// Channel slot contents, as reported in reply to a probe.
#[derive(Debug, Clone)]
pub struct ChannelInfoEvent {
    pub channel_idx: u8,
    pub channel_name: String,
    pub channel_secret: [u8; CHANNEL_KEY_LEN],
}

/// An inbound text message, already decrypted by the device.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Channel the message arrived on; `None` for direct messages.
    pub channel_idx: Option<u8>,
    pub text: String,
    /// Sender pubkey prefix, when known.
    pub sender_prefix: Option<String>,
}

/// One event from the device.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Rf(RfSampleEvent),
    ChannelInfo(ChannelInfoEvent),
    Message(MessageEvent),
}

impl LinkEvent {
    pub fn class(&self) -> EventClass {
        match self {
            LinkEvent::Rf(_) => EventClass::RfTelemetry,
            LinkEvent::ChannelInfo(_) => EventClass::ChannelInfo,
            LinkEvent::Message(_) => EventClass::Message,
        }
    }
}

// ── Event bus ─────────────────────────────────────────────────────────────────

type Predicate = Arc<dyn Fn(&LinkEvent) -> bool + Send + Sync>;

struct Subscriber {
    class: EventClass,
    predicate: Option<Predicate>,
    tx: mpsc::UnboundedSender<LinkEvent>,
}

/// Fan-out registry for device events.
///
/// Cloned handles share one subscriber table. Publishing walks the table
/// and delivers to every subscriber whose class and predicate accept the
/// event; subscribers that went away are pruned on the next publish.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<DashMap<u64, Subscriber>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event class. The handle unsubscribes on drop.
    pub fn subscribe(&self, class: EventClass) -> Subscription {
        self.subscribe_inner(class, None)
    }

    /// Subscribe with a predicate over events of the class.
    pub fn subscribe_filtered<F>(&self, class: EventClass, predicate: F) -> Subscription
    where
        F: Fn(&LinkEvent) -> bool + Send + Sync + 'static,
    {
        self.subscribe_inner(class, Some(Arc::new(predicate)))
    }

    fn subscribe_inner(&self, class: EventClass, predicate: Option<Predicate>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(
            id,
            Subscriber {
                class,
                predicate,
                tx,
            },
        );
        Subscription {
            id,
            rx,
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    /// Deliver an event to every matching subscriber.
    pub fn publish(&self, event: &LinkEvent) {
        let mut dead = Vec::new();
        for entry in self.subscribers.iter() {
            let sub = entry.value();
            if sub.class != event.class() {
                continue;
            }
            if let Some(predicate) = &sub.predicate {
                if !predicate(event) {
                    continue;
                }
            }
            if sub.tx.send(event.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.subscribers.remove(&id);
        }
    }

    /// Number of live subscriptions. Lets tests verify nothing leaks.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// A live subscription.
///
/// Receives matching events until dropped. Dropping removes the
/// subscriber from the bus, so early returns and `?` propagation tear
/// the listener down without any explicit unsubscribe call.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<LinkEvent>,
    subscribers: Arc<DashMap<u64, Subscriber>>,
}

impl Subscription {
    /// Next matching event. `None` once the publishing side is gone.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.rx.recv().await
    }

    /// Non-blocking variant; `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<LinkEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.subscribers.remove(&self.id);
    }
}

// ── Device link ───────────────────────────────────────────────────────────────

/// One physical radio device.
///
/// Implementations publish everything the device emits on their
/// [`EventBus`] and accept textual commands as token lists. Command
/// replies arrive as events, never as return values; the directory's
/// subscribe-then-send pattern depends on that ordering.
pub trait DeviceLink: Send + Sync + 'static {
    /// The bus this device publishes on.
    fn events(&self) -> &EventBus;

    /// Hand one command to the device transport.
    ///
    /// An `Ok` means the command was accepted for transmission, nothing
    /// more. Whether it took effect is only observable via events.
    fn send_command(&self, tokens: Vec<String>) -> Result<(), LinkError>;
}

/// Serializes device access.
///
/// The protocol allows one outstanding request at a time. Every command
/// round-trip (send, await reply or timeout) must hold this gate from
/// start to finish; callers that only fire-and-forget still take it to
/// keep ordering sane.
#[derive(Clone, Default)]
pub struct DeviceGate {
    inner: Arc<tokio::sync::Mutex<()>>,
}

impl DeviceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire exclusive use of the device.
    pub async fn acquire(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inner.lock().await
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// The transport to the device is gone.
    #[error("device link closed")]
    Closed,

    /// The link refused the command before transmission.
    #[error("command rejected: {0}")]
    Rejected(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
