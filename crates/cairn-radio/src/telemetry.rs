//! Telemetry correlation — pairs link-quality readings with the
//! messages they describe.
//!
//! The device reports RF samples (snr, rssi, raw frame) on one event
//! path and decrypted messages on another, with nothing but timing and
//! partial key material to tie them together. This module keeps a short
//! sliding window of samples and answers best-effort lookups: prefix
//! match when possible, newest sample otherwise. Callers get told which
//! of the two they received.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use cairn_core::config::TelemetryConfig;
use cairn_core::packet::{self, DecodedPacket};

use crate::link::RfSampleEvent;

/// Hex length of a full 32-byte public key. Prefixes are cut to at most
/// this many characters.
pub const PUBKEY_PREFIX_HEX: usize = 64;

// ── Sample model ──────────────────────────────────────────────────────────────

/// One retained RF sample.
#[derive(Debug, Clone)]
pub struct TelemetrySample {
    pub at: Instant,
    /// Correlation key: explicit metadata, or leading bytes of the raw
    /// frame, or leading bytes of the reported payload. `None` when the
    /// event carried nothing usable.
    pub pubkey_prefix: Option<String>,
    pub snr: f32,
    pub rssi: i16,
    pub raw_hex: String,
    pub payload_hex: String,
    pub payload_len: usize,
    /// Routing metadata, when the raw frame decodes.
    pub routing: Option<DecodedPacket>,
}

/// Why a lookup returned the sample it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// The sample's prefix and the query matched (substring either way).
    Prefix,
    /// No prefix matched; this is simply the newest sample in the
    /// window. Can misattribute when several senders share a burst.
    Fallback,
}

/// A lookup result: the sample plus how it was chosen.
#[derive(Debug, Clone)]
pub struct Correlation {
    pub sample: TelemetrySample,
    pub kind: MatchKind,
}

/// Last-known link quality for one sender. Outlives the window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalQuality {
    pub snr: f32,
    pub rssi: i16,
}

/// Correlator counters for status reporting.
#[derive(Debug, Clone, Copy)]
pub struct TelemetryStats {
    /// Samples retained since the last ingest-time sweep.
    pub window_len: usize,
    /// Distinct prefixes in the last-known map.
    pub tracked_prefixes: usize,
}

// ── Last-known map ────────────────────────────────────────────────────────────

/// Bounded map of per-sender link quality.
///
/// Keeps the `capacity` most recently updated prefixes and drops the
/// stalest on overflow. Capacity 0 means unbounded.
struct LastKnownMap {
    capacity: usize,
    entries: HashMap<String, SignalQuality>,
    order: VecDeque<String>,
}

impl LastKnownMap {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn touch(&mut self, prefix: String, quality: SignalQuality) {
        if self.entries.insert(prefix.clone(), quality).is_some() {
            if let Some(pos) = self.order.iter().position(|p| p == &prefix) {
                self.order.remove(pos);
            }
        }
        self.order.push_back(prefix);

        if self.capacity > 0 {
            while self.entries.len() > self.capacity {
                match self.order.pop_front() {
                    Some(oldest) => {
                        self.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
        }
    }

    fn get(&self, prefix: &str) -> Option<SignalQuality> {
        self.entries.get(prefix).copied()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

// ── Correlator ────────────────────────────────────────────────────────────────

struct State {
    window: VecDeque<TelemetrySample>,
    last_known: LastKnownMap,
}

/// Time-windowed RF sample cache with best-effort prefix lookup.
///
/// Safe to share: `ingest` runs on the RF subscription path while
/// lookups come from message handling. One exclusive lock covers the
/// window and the last-known map; nothing awaits while holding it.
pub struct TelemetryCorrelator {
    window_span: Duration,
    state: Mutex<State>,
}

impl TelemetryCorrelator {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            window_span: config.correlation_window(),
            state: Mutex::new(State {
                window: VecDeque::new(),
                last_known: LastKnownMap::new(config.last_known_capacity),
            }),
        }
    }

    /// Ingest one RF event. Never fails; an undecodable frame just
    /// leaves `routing` empty.
    pub fn ingest(&self, event: &RfSampleEvent) {
        self.ingest_at(event, Instant::now());
    }

    /// Ingest with an explicit timestamp. Exists so tests can control
    /// the clock; production code uses [`ingest`](Self::ingest).
    pub fn ingest_at(&self, event: &RfSampleEvent, at: Instant) {
        let raw_hex = event.raw_hex.trim().to_lowercase();
        let routing = hex::decode(&raw_hex)
            .ok()
            .and_then(|raw| packet::decode(&raw).ok());
        let prefix = extract_prefix(event, &raw_hex);

        if let Some(summary) = routing.as_ref().map(DecodedPacket::summary) {
            tracing::debug!(%summary, snr = event.snr, rssi = event.rssi, "rf sample");
        } else {
            tracing::trace!(snr = event.snr, rssi = event.rssi, "rf sample (undecodable frame)");
        }

        let mut state = self.lock();
        if let Some(prefix) = &prefix {
            state.last_known.touch(
                prefix.clone(),
                SignalQuality {
                    snr: event.snr,
                    rssi: event.rssi,
                },
            );
        }
        state.window.push_back(TelemetrySample {
            at,
            pubkey_prefix: prefix,
            snr: event.snr,
            rssi: event.rssi,
            raw_hex,
            payload_hex: event.payload_hex.trim().to_lowercase(),
            payload_len: event.payload_len,
            routing,
        });

        let span = self.window_span;
        while state
            .window
            .front()
            .is_some_and(|sample| at.duration_since(sample.at) > span)
        {
            state.window.pop_front();
        }
    }

    /// Find the sample that best describes `prefix`, looking at most
    /// `max_age` into the past.
    ///
    /// With a prefix, the oldest in-window sample whose prefix equals,
    /// contains, or is contained by the query wins. Without one, or
    /// when nothing matches, the newest in-window sample is returned as
    /// a [`MatchKind::Fallback`]. `None` only when the window is empty.
    pub fn lookup(&self, prefix: Option<&str>, max_age: Duration) -> Option<Correlation> {
        self.lookup_at(prefix, max_age, Instant::now())
    }

    /// Lookup against an explicit clock. Test hook, as with
    /// [`ingest_at`](Self::ingest_at).
    pub fn lookup_at(
        &self,
        prefix: Option<&str>,
        max_age: Duration,
        now: Instant,
    ) -> Option<Correlation> {
        let state = self.lock();
        let fresh: Vec<&TelemetrySample> = state
            .window
            .iter()
            .filter(|sample| now.duration_since(sample.at) < max_age)
            .collect();

        let query = prefix
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty());
        if let Some(query) = &query {
            let hit = fresh.iter().find(|sample| {
                sample
                    .pubkey_prefix
                    .as_deref()
                    .is_some_and(|p| p.contains(query.as_str()) || query.contains(p))
            });
            if let Some(sample) = hit {
                return Some(Correlation {
                    sample: (*sample).clone(),
                    kind: MatchKind::Prefix,
                });
            }
        }

        fresh.last().map(|sample| Correlation {
            sample: (*sample).clone(),
            kind: MatchKind::Fallback,
        })
    }

    /// Last-known link quality for a prefix, regardless of sample age.
    /// Answers "how was this sender last heard" long after the window
    /// moved on.
    pub fn last_quality(&self, prefix: &str) -> Option<SignalQuality> {
        self.lock().last_known.get(&prefix.trim().to_lowercase())
    }

    pub fn stats(&self) -> TelemetryStats {
        let state = self.lock();
        TelemetryStats {
            window_len: state.window.len(),
            tracked_prefixes: state.last_known.len(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Correlation key extraction, in preference order: explicit event
/// metadata, then the leading 64 hex chars of the raw frame (a 32-byte
/// pubkey), then the leading 64 hex chars of the device-reported
/// payload. Short inputs contribute what they have.
fn extract_prefix(event: &RfSampleEvent, raw_hex: &str) -> Option<String> {
    if let Some(meta) = &event.pubkey_prefix {
        let meta = meta.trim().to_lowercase();
        if !meta.is_empty() {
            return Some(meta);
        }
    }

    leading_hex(raw_hex).or_else(|| leading_hex(&event.payload_hex.trim().to_lowercase()))
}

/// First 64 chars of a hex rendering, whole if shorter. Devices feed us
/// whatever they picked up; input where the cut lands mid-character is
/// not hex and yields no key rather than a panic.
fn leading_hex(text: &str) -> Option<String> {
    let cut = text.len().min(PUBKEY_PREFIX_HEX);
    text.get(..cut)
        .filter(|prefix| !prefix.is_empty())
        .map(str::to_owned)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
