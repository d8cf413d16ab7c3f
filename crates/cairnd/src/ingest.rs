//! Telemetry ingest — feeds device events into the correlator.
//!
//! Subscribes to RF samples and inbound messages. Samples go straight
//! into the sliding window; each message gets annotated with the best
//! matching sample's signal quality and route, which is the whole point
//! of keeping the window around. Senders the window no longer covers
//! are reported with their last-known quality instead.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use cairn_core::config::TelemetryConfig;
use cairn_radio::{
    Correlation, EventBus, EventClass, LinkEvent, MessageEvent, SignalQuality, Subscription,
    TelemetryCorrelator,
};

/// What the correlator could say about a message's sender.
#[derive(Debug)]
enum SenderSignal {
    /// A sample in the window matched (or stood in for) the sender.
    InWindow(Correlation),
    /// Nothing in the window, but the sender has been heard before.
    LastKnown(SignalQuality),
    Unheard,
}

pub struct TelemetryIngest {
    rf: Subscription,
    messages: Subscription,
    correlator: Arc<TelemetryCorrelator>,
    window: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl TelemetryIngest {
    pub fn new(
        bus: &EventBus,
        correlator: Arc<TelemetryCorrelator>,
        config: &TelemetryConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            rf: bus.subscribe(EventClass::RfTelemetry),
            messages: bus.subscribe(EventClass::Message),
            correlator,
            window: config.correlation_window(),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("telemetry ingest stopping");
                    return;
                }
                event = self.rf.recv() => match event {
                    Some(LinkEvent::Rf(sample)) => self.correlator.ingest(&sample),
                    Some(_) => {}
                    None => return,
                },
                event = self.messages.recv() => match event {
                    Some(LinkEvent::Message(message)) => {
                        self.annotate(&message);
                    }
                    Some(_) => {}
                    None => return,
                },
            }
        }
    }

    /// Attach signal telemetry to an inbound message: the best matching
    /// window sample when one exists, otherwise whatever quality the
    /// sender was last heard with.
    fn annotate(&self, message: &MessageEvent) -> SenderSignal {
        let sender = message.sender_prefix.as_deref();
        let signal = match self.correlator.lookup(sender, self.window) {
            Some(found) => SenderSignal::InWindow(found),
            None => match sender.and_then(|s| self.correlator.last_quality(s)) {
                Some(quality) => SenderSignal::LastKnown(quality),
                None => SenderSignal::Unheard,
            },
        };

        match &signal {
            SenderSignal::InWindow(found) => {
                let sample = &found.sample;
                let route = sample
                    .routing
                    .as_ref()
                    .map(|packet| packet.summary())
                    .unwrap_or_else(|| "unparsed".to_string());
                tracing::info!(
                    sender = sender.unwrap_or("?"),
                    kind = ?found.kind,
                    snr = sample.snr,
                    rssi = sample.rssi,
                    route = %route,
                    age_ms = sample.at.elapsed().as_millis() as u64,
                    text = %message.text,
                    "message correlated"
                );
            }
            SenderSignal::LastKnown(quality) => {
                tracing::info!(
                    sender = sender.unwrap_or("?"),
                    snr = quality.snr,
                    rssi = quality.rssi,
                    text = %message.text,
                    "sender heard before, nothing in window"
                );
            }
            SenderSignal::Unheard => {
                tracing::debug!(
                    sender = sender.unwrap_or("?"),
                    text = %message.text,
                    "no telemetry in window"
                );
            }
        }
        signal
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
