use crate::*;

use std::time::{Duration, Instant};

use cairn_core::config::TelemetryConfig;
use cairn_core::packet::{encode, PayloadType, RouteType};
use cairn_radio::{DeviceLink, EventClass, LinkEvent, MatchKind, RfSampleEvent, TelemetryCorrelator};

const WINDOW: Duration = Duration::from_secs(5);

fn sample(prefix: &str, snr: f32, rssi: i16) -> RfSampleEvent {
    RfSampleEvent {
        snr,
        rssi,
        raw_hex: String::new(),
        payload_hex: String::new(),
        payload_len: 0,
        pubkey_prefix: Some(prefix.to_string()),
    }
}

/// An RF sample published on the link reaches a subscriber and, once
/// ingested, answers prefix lookups.
#[tokio::test]
async fn rf_sample_flows_from_link_to_lookup() {
    let rig = rig(4);
    let correlator = TelemetryCorrelator::new(&TelemetryConfig::default());
    let mut rf = rig.link.events().subscribe(EventClass::RfTelemetry);

    rig.link.emit_rf(sample("11aa22bb", 8.5, -71));

    match rf.try_recv() {
        Some(LinkEvent::Rf(event)) => correlator.ingest(&event),
        other => panic!("unexpected event: {other:?}"),
    }

    let found = correlator
        .lookup(Some("11aa22bb"), WINDOW)
        .expect("no correlation");
    assert_eq!(found.kind, MatchKind::Prefix);
    assert_eq!(found.sample.rssi, -71);
}

/// A raw frame that decodes carries its routing summary through
/// ingestion, so message annotations can name the path.
#[tokio::test]
async fn decoded_routing_travels_with_the_sample() {
    let rig = rig(4);
    let correlator = TelemetryCorrelator::new(&TelemetryConfig::default());
    let mut rf = rig.link.events().subscribe(EventClass::RfTelemetry);

    let frame = encode(
        RouteType::Flood,
        PayloadType::TextMsg,
        0,
        [0x11, 0x22],
        &[0xa1, 0xb2],
        b"hi",
    );
    let mut event = sample("ca11ab1e", 3.0, -90);
    event.raw_hex = hex::encode(&frame);
    rig.link.emit_rf(event);

    match rf.try_recv() {
        Some(LinkEvent::Rf(event)) => correlator.ingest(&event),
        other => panic!("unexpected event: {other:?}"),
    }

    let found = correlator.lookup(Some("ca11ab1e"), WINDOW).expect("no match");
    let routing = found.sample.routing.expect("frame should decode");
    assert_eq!(routing.route_type, RouteType::Flood);
    assert_eq!(routing.path_nodes(), vec!["a1", "b2"]);
    assert!(routing.summary().contains("a1,b2"));
}

/// An unknown prefix still gets an answer: the newest sample in the
/// window, marked as a fallback.
#[tokio::test]
async fn unknown_prefix_falls_back_to_newest_sample() {
    let correlator = TelemetryCorrelator::new(&TelemetryConfig::default());
    correlator.ingest(&sample("aaaa0000", 1.0, -100));
    correlator.ingest(&sample("bbbb1111", 9.0, -60));

    let found = correlator.lookup(Some("ffff2222"), WINDOW).expect("no fallback");
    assert_eq!(found.kind, MatchKind::Fallback);
    assert_eq!(found.sample.rssi, -60);
}

/// Sliding-window expiry drops samples from lookup, but the last-known
/// quality map still remembers the sender.
#[tokio::test]
async fn last_known_quality_survives_window_expiry() {
    let correlator = TelemetryCorrelator::new(&TelemetryConfig::default());
    let base = Instant::now();

    correlator.ingest_at(&sample("11aa22bb", 7.5, -80), base);

    // inside the window
    assert!(correlator
        .lookup_at(Some("11aa22bb"), WINDOW, base + Duration::from_secs(4))
        .is_some());

    // past it: no correlation at all, not even a fallback
    assert!(correlator
        .lookup_at(Some("11aa22bb"), WINDOW, base + Duration::from_secs(6))
        .is_none());

    let quality = correlator.last_quality("11aa22bb").expect("forgot sender");
    assert_eq!(quality.rssi, -80);
    assert_eq!(quality.snr, 7.5);
}
