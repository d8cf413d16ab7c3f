//! Scripted in-process device — stands in for radio hardware.
//!
//! Behaves like a real node for the command set this crate uses: it
//! keeps a slot table, answers `get_channel` probes, applies
//! `set_channel` writes, and can be told to go quiet per slot or
//! entirely. Tests script it; the demo daemon additionally lets it
//! fabricate mesh traffic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;

use cairn_core::channel::CHANNEL_KEY_LEN;
use cairn_core::packet::{self, PayloadType, RouteType};

use crate::link::{
    ChannelInfoEvent, DeviceLink, EventBus, LinkError, LinkEvent, MessageEvent, RfSampleEvent,
};

type SlotRow = (String, [u8; CHANNEL_KEY_LEN]);

/// Scripted device link.
#[derive(Default)]
pub struct SimLink {
    bus: EventBus,
    /// Device-side slot table. Raw contents, zeros and all.
    slots: DashMap<u8, SlotRow>,
    /// Remaining probe replies to swallow, per slot.
    silent: DashMap<u8, u32>,
    /// When set, the slot table answers with these instead of the
    /// truth. Lets tests fake a device that mangles writes.
    echo_override: DashMap<u8, SlotRow>,
    muted: AtomicBool,
    detached: AtomicBool,
    commands: Mutex<Vec<Vec<String>>>,
    reply_delay: Mutex<Duration>,
}

impl SimLink {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Scripting ────────────────────────────────────────────────────

    /// Put a channel into the device-side table without any protocol.
    pub fn preload_slot(&self, idx: u8, name: &str, key: [u8; CHANNEL_KEY_LEN]) {
        self.slots.insert(idx, (name.to_string(), key));
    }

    /// What the device actually holds for a slot.
    pub fn slot(&self, idx: u8) -> Option<SlotRow> {
        self.slots.get(&idx).map(|row| row.value().clone())
    }

    /// Swallow the next `count` probe replies for a slot. Pass
    /// `u32::MAX` for a slot that never answers.
    pub fn silence(&self, idx: u8, count: u32) {
        self.silent.insert(idx, count);
    }

    /// Stop answering probes on every slot.
    pub fn mute_all(&self, on: bool) {
        self.muted.store(on, Ordering::Release);
    }

    /// Answer future probes of a slot with a lie.
    pub fn override_echo(&self, idx: u8, name: &str, key: [u8; CHANNEL_KEY_LEN]) {
        self.echo_override.insert(idx, (name.to_string(), key));
    }

    /// Sever the transport. Commands fail from here on.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }

    /// Delay between a command and its reply. Zero (the default)
    /// replies synchronously, which keeps unit tests deterministic.
    pub fn set_reply_delay(&self, delay: Duration) {
        *self.reply_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    // ── Inspection ───────────────────────────────────────────────────

    /// Every command sent so far, in order.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many commands with the given verb were sent.
    pub fn command_count(&self, verb: &str) -> usize {
        self.commands()
            .iter()
            .filter(|tokens| tokens.first().map(String::as_str) == Some(verb))
            .count()
    }

    // ── Traffic fabrication ──────────────────────────────────────────

    /// Publish a fabricated RF sample, as the radio would.
    pub fn emit_rf(&self, event: RfSampleEvent) {
        self.bus.publish(&LinkEvent::Rf(event));
    }

    /// Publish a fabricated inbound message.
    pub fn emit_message(&self, event: MessageEvent) {
        self.bus.publish(&LinkEvent::Message(event));
    }

    /// Spawn a task that fabricates mesh traffic until the link is
    /// detached: jittered RF samples from a small roster of fake
    /// senders, with an inbound message every few samples. Drives the
    /// demo daemon; tests publish events directly instead.
    pub fn spawn_traffic(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let link = Arc::clone(self);
        tokio::spawn(async move {
            let roster: Vec<String> = (1u8..=4)
                .map(|n| hex::encode([n.wrapping_mul(0x3b); 32]))
                .collect();
            let mut counter = 0u64;
            loop {
                if link.detached.load(Ordering::Acquire) {
                    return;
                }

                let (who, snr, rssi, hops, wait) = {
                    let mut rng = rand::thread_rng();
                    (
                        roster[rng.gen_range(0..roster.len())].clone(),
                        rng.gen_range(-4.0f32..12.0),
                        rng.gen_range(-120i16..-60),
                        rng.gen_range(0usize..3),
                        period.mul_f32(rng.gen_range(0.5f32..1.5)),
                    )
                };
                tokio::time::sleep(wait).await;

                let path: Vec<u8> = (0..hops).map(|h| 0xa0 + h as u8).collect();
                let pubkey = hex::decode(&who).unwrap_or_default();
                let frame = packet::encode(
                    RouteType::Flood,
                    PayloadType::Advert,
                    1,
                    [0x11, 0x22],
                    &path,
                    &pubkey,
                );
                link.emit_rf(RfSampleEvent {
                    snr,
                    rssi,
                    raw_hex: hex::encode(&frame),
                    payload_hex: who.clone(),
                    payload_len: pubkey.len(),
                    pubkey_prefix: Some(who[..16].to_string()),
                });

                counter += 1;
                if counter % 4 == 0 {
                    link.emit_message(MessageEvent {
                        channel_idx: Some(0),
                        text: format!("status ping {counter}"),
                        sender_prefix: Some(who[..16].to_string()),
                    });
                }
            }
        })
    }

    // ── Command handling ─────────────────────────────────────────────

    fn handle_get(&self, tokens: &[String]) -> Result<(), LinkError> {
        let idx = parse_idx(tokens)?;

        if self.muted.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Some(mut remaining) = self.silent.get_mut(&idx) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(());
            }
        }

        let (name, key) = self
            .echo_override
            .get(&idx)
            .map(|row| row.value().clone())
            .or_else(|| self.slots.get(&idx).map(|row| row.value().clone()))
            .unwrap_or_default();

        self.publish(LinkEvent::ChannelInfo(ChannelInfoEvent {
            channel_idx: idx,
            channel_name: name,
            channel_secret: key,
        }));
        Ok(())
    }

    fn handle_set(&self, tokens: &[String]) -> Result<(), LinkError> {
        let idx = parse_idx(tokens)?;
        let name = tokens.get(2).cloned().unwrap_or_default();
        let key: [u8; CHANNEL_KEY_LEN] = tokens
            .get(3)
            .and_then(|hex_key| hex::decode(hex_key).ok())
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| {
                LinkError::Rejected("set_channel needs a 32-char hex secret".to_string())
            })?;

        self.slots.insert(idx, (name, key));
        Ok(())
    }

    fn publish(&self, event: LinkEvent) {
        let delay = *self.reply_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if delay.is_zero() {
            self.bus.publish(&event);
        } else {
            let bus = self.bus.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                bus.publish(&event);
            });
        }
    }
}

fn parse_idx(tokens: &[String]) -> Result<u8, LinkError> {
    tokens
        .get(1)
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| LinkError::Rejected("command needs a slot index".to_string()))
}

impl DeviceLink for SimLink {
    fn events(&self) -> &EventBus {
        &self.bus
    }

    fn send_command(&self, tokens: Vec<String>) -> Result<(), LinkError> {
        if self.detached.load(Ordering::Acquire) {
            return Err(LinkError::Closed);
        }
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tokens.clone());

        match tokens.first().map(String::as_str) {
            Some("get_channel") => self.handle_get(&tokens),
            Some("set_channel") => self.handle_set(&tokens),
            Some(other) => Err(LinkError::Rejected(format!("unknown command {other:?}"))),
            None => Err(LinkError::Rejected("empty command".to_string())),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
