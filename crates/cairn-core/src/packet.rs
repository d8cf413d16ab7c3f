//! MeshCore frame format — decoding of raw radio packets.
//!
//! A frame is one header byte, two transport-code bytes, a one-byte path
//! length, `path_len` single-byte relay node ids, and the payload as the
//! remainder. The header byte packs three fields:
//!
//!   bits 0-1: route type
//!   bits 2-5: payload type
//!   bits 6-7: payload version
//!
//! Decoding is pure and bounds-checked. Adversarial or truncated input
//! yields a [`DecodeError`], never a panic or an out-of-bounds read.

use bytes::Bytes;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Size in bytes of the transport-code field.
///
/// Every route type carries transport codes in the current protocol
/// revision. The documented format hints at per-route-type sizing, but
/// observed traffic uses two bytes everywhere; keep this fixed until a
/// device proves otherwise.
pub const TRANSPORT_CODE_SIZE: usize = 2;

/// Offset of the path-length byte: header plus transport codes.
pub const PATH_LEN_OFFSET: usize = 1 + TRANSPORT_CODE_SIZE;

/// Smallest decodable frame: header, transport codes, path-length byte.
pub const MIN_FRAME_LEN: usize = PATH_LEN_OFFSET + 1;

// ── Header fields ─────────────────────────────────────────────────────────────

/// How a packet was (or should be) forwarded — low 2 bits of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RouteType {
    /// Flooded, with transport-layer addressing attached.
    TransportFlood = 0x00,
    /// Flooded to every node in range.
    Flood = 0x01,
    /// Sent along a known path.
    Direct = 0x02,
    /// Direct, with transport-layer addressing attached.
    TransportDirect = 0x03,
}

impl RouteType {
    /// Extract the route type from a raw header byte.
    pub fn from_header(header: u8) -> Self {
        match header & 0x03 {
            0x00 => RouteType::TransportFlood,
            0x01 => RouteType::Flood,
            0x02 => RouteType::Direct,
            _ => RouteType::TransportDirect,
        }
    }

    /// Name as it appears in logs.
    pub fn label(&self) -> &'static str {
        match self {
            RouteType::TransportFlood => "transport flood",
            RouteType::Flood => "flood",
            RouteType::Direct => "direct",
            RouteType::TransportDirect => "transport direct",
        }
    }
}

/// What the payload contains — bits 2-5 of the header.
///
/// The table is fixed at sixteen entries; every 4-bit code maps to a
/// name. Codes the firmware has not assigned yet decode as their
/// positional entry, not as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadType {
    Unknown = 0x00,
    Hello = 0x01,
    TextMsg = 0x02,
    Ack = 0x03,
    Advert = 0x04,
    GroupText = 0x05,
    GroupJoin = 0x06,
    GroupLeave = 0x07,
    Path = 0x08,
    ChannelJoin = 0x09,
    ChannelLeave = 0x0A,
    ChannelMsg = 0x0B,
    ChannelAck = 0x0C,
    ChannelNack = 0x0D,
    ChannelInvite = 0x0E,
    ChannelKick = 0x0F,
}

impl PayloadType {
    /// Map a 4-bit code to its table entry. Input is masked to 4 bits.
    pub fn from_code(code: u8) -> Self {
        match code & 0x0F {
            0x00 => PayloadType::Unknown,
            0x01 => PayloadType::Hello,
            0x02 => PayloadType::TextMsg,
            0x03 => PayloadType::Ack,
            0x04 => PayloadType::Advert,
            0x05 => PayloadType::GroupText,
            0x06 => PayloadType::GroupJoin,
            0x07 => PayloadType::GroupLeave,
            0x08 => PayloadType::Path,
            0x09 => PayloadType::ChannelJoin,
            0x0A => PayloadType::ChannelLeave,
            0x0B => PayloadType::ChannelMsg,
            0x0C => PayloadType::ChannelAck,
            0x0D => PayloadType::ChannelNack,
            0x0E => PayloadType::ChannelInvite,
            _ => PayloadType::ChannelKick,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadType::Unknown => "Unknown",
            PayloadType::Hello => "Hello",
            PayloadType::TextMsg => "TextMsg",
            PayloadType::Ack => "Ack",
            PayloadType::Advert => "Advert",
            PayloadType::GroupText => "GroupText",
            PayloadType::GroupJoin => "GroupJoin",
            PayloadType::GroupLeave => "GroupLeave",
            PayloadType::Path => "Path",
            PayloadType::ChannelJoin => "ChannelJoin",
            PayloadType::ChannelLeave => "ChannelLeave",
            PayloadType::ChannelMsg => "ChannelMsg",
            PayloadType::ChannelAck => "ChannelAck",
            PayloadType::ChannelNack => "ChannelNack",
            PayloadType::ChannelInvite => "ChannelInvite",
            PayloadType::ChannelKick => "ChannelKick",
        }
    }
}

// ── Decoded frame ─────────────────────────────────────────────────────────────

/// One decoded radio frame. Immutable; produced by [`decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    /// The raw header byte, as received.
    pub header: u8,
    pub route_type: RouteType,
    pub payload_type: PayloadType,
    /// Payload format revision — bits 6-7 of the header.
    pub payload_version: u8,
    /// Transport-layer addressing bytes following the header.
    /// Always present in the current revision.
    pub transport_codes: Option<[u8; TRANSPORT_CODE_SIZE]>,
    /// Relay node ids, one byte per hop, in traversal order.
    pub path: Bytes,
    /// Everything after the path. Opaque at this layer.
    pub payload: Bytes,
}

impl DecodedPacket {
    /// Number of transport-code bytes present (0 or 2).
    pub fn transport_size(&self) -> usize {
        self.transport_codes.map_or(0, |codes| codes.len())
    }

    pub fn transport_codes_present(&self) -> bool {
        self.transport_codes.is_some()
    }

    /// Number of relay hops recorded in the path.
    pub fn path_len(&self) -> u8 {
        self.path.len() as u8
    }

    /// Path rendered as two-hex-digit node ids, in traversal order.
    pub fn path_nodes(&self) -> Vec<String> {
        self.path.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Full path as one lowercase hex string.
    pub fn path_hex(&self) -> String {
        hex::encode(&self.path)
    }

    /// Payload as a lowercase hex string.
    pub fn payload_hex(&self) -> String {
        hex::encode(&self.payload)
    }

    /// Compact route description for logs.
    pub fn summary(&self) -> String {
        if self.path.is_empty() {
            format!(
                "{} | direct | {}",
                self.route_type.label(),
                self.payload_type.as_str()
            )
        } else {
            format!(
                "{} | path {} ({} hops) | {}",
                self.route_type.label(),
                self.path_nodes().join(","),
                self.path.len(),
                self.payload_type.as_str()
            )
        }
    }
}

// ── Decode / encode ───────────────────────────────────────────────────────────

/// Decode one raw frame.
///
/// Checks run in order: the frame must hold a header and at least one
/// more byte, then the full fixed prelude, then the declared path. The
/// payload is whatever remains and may be empty.
pub fn decode(raw: &[u8]) -> Result<DecodedPacket, DecodeError> {
    if raw.len() < 2 {
        return Err(DecodeError::TooShort {
            got: raw.len(),
            need: 2,
        });
    }

    let header = raw[0];
    let route_type = RouteType::from_header(header);

    if raw.len() < MIN_FRAME_LEN {
        return Err(DecodeError::TooShort {
            got: raw.len(),
            need: MIN_FRAME_LEN,
        });
    }

    let path_len = raw[PATH_LEN_OFFSET] as usize;
    let path_start = PATH_LEN_OFFSET + 1;
    if raw.len() < path_start + path_len {
        return Err(DecodeError::PathOverflow {
            path_len,
            got: raw.len(),
            need: path_start + path_len,
        });
    }

    let mut transport_codes = [0u8; TRANSPORT_CODE_SIZE];
    transport_codes.copy_from_slice(&raw[1..1 + TRANSPORT_CODE_SIZE]);

    Ok(DecodedPacket {
        header,
        route_type,
        payload_type: PayloadType::from_code(header >> 2),
        payload_version: (header >> 6) & 0x03,
        transport_codes: Some(transport_codes),
        path: Bytes::copy_from_slice(&raw[path_start..path_start + path_len]),
        payload: Bytes::copy_from_slice(&raw[path_start + path_len..]),
    })
}

/// Assemble a frame from its parts — the inverse of [`decode`].
///
/// Real traffic is produced by the device; this exists for the simulated
/// link and for tests. Panics if `path` exceeds 255 bytes, the most the
/// one-byte length field can declare.
pub fn encode(
    route_type: RouteType,
    payload_type: PayloadType,
    payload_version: u8,
    transport_codes: [u8; TRANSPORT_CODE_SIZE],
    path: &[u8],
    payload: &[u8],
) -> Vec<u8> {
    assert!(
        path.len() <= u8::MAX as usize,
        "path of {} nodes cannot fit one frame",
        path.len()
    );

    let header = ((payload_version & 0x03) << 6) | ((payload_type as u8) << 2) | route_type as u8;
    let mut frame = Vec::with_capacity(MIN_FRAME_LEN + path.len() + payload.len());
    frame.push(header);
    frame.extend_from_slice(&transport_codes);
    frame.push(path.len() as u8);
    frame.extend_from_slice(path);
    frame.extend_from_slice(payload);
    frame
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Decode failures. Always returned, never panicked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The frame ends before the fixed prelude does.
    #[error("frame too short: {got} bytes, need at least {need}")]
    TooShort { got: usize, need: usize },

    /// The declared path runs past the end of the frame.
    #[error("path of {path_len} bytes overruns frame: {got} bytes, need {need}")]
    PathOverflow {
        path_len: usize,
        got: usize,
        need: usize,
    },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
