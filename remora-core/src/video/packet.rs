//! `VideoPacket`, the unit sent on the video channel.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::video::types::{Rect, Size};

// ── PacketFlags ──────────────────────────────────────────────────

bitflags! {
    /// Per-packet framing flags.
    ///
    /// | Bit | Name             | Meaning                                        |
    /// |-----|------------------|------------------------------------------------|
    /// | 0   | `FIRST_PACKET`   | Opens a rectangle; carries its bounds.         |
    /// | 1   | `LAST_PACKET`    | Closes the rectangle currently being streamed. |
    /// | 2   | `LAST_PARTITION` | The closed rectangle is the last of its frame. |
    ///
    /// Binary encodings carry the raw bits, so unknown bits survive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct PacketFlags: u8 {
        const FIRST_PACKET   = 0b0000_0001;
        const LAST_PACKET    = 0b0000_0010;
        const LAST_PARTITION = 0b0000_0100;
    }
}

// ── Encoding ─────────────────────────────────────────────────────

/// Payload encoding of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Encoding {
    #[default]
    Verbatim,
    Zlib,
    /// Produced and consumed by an external codec only.
    Vp8,
}

impl Encoding {
    pub const fn as_str(self) -> &'static str {
        match self {
            Encoding::Verbatim => "verbatim",
            Encoding::Zlib => "zlib",
            Encoding::Vp8 => "vp8",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── VideoPacket ──────────────────────────────────────────────────

/// Format block sent on the first packet of each rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketFormat {
    /// Absolute screen rectangle that the following rows fill.
    pub rect: Rect,
    /// Current screen size; lets the decoder (re)allocate its shadow buffer.
    pub screen_size: Option<Size>,
    pub encoding: Encoding,
}

/// A single chunk of a rectangle's compressed row stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoPacket {
    pub flags: PacketFlags,
    /// Present on `FIRST_PACKET` packets only.
    pub format: Option<PacketFormat>,
    /// Capture timestamp of the frame in microseconds since the Unix
    /// epoch, stamped on the `LAST_PARTITION` packet.
    pub capture_time_us: Option<u64>,
    pub data: Vec<u8>,
}

impl VideoPacket {
    pub fn new(flags: PacketFlags) -> Self {
        Self {
            flags,
            format: None,
            capture_time_us: None,
            data: Vec::new(),
        }
    }

    pub fn is_first(&self) -> bool {
        self.flags.contains(PacketFlags::FIRST_PACKET)
    }

    pub fn is_last(&self) -> bool {
        self.flags.contains(PacketFlags::LAST_PACKET)
    }

    pub fn is_last_partition(&self) -> bool {
        self.flags.contains(PacketFlags::LAST_PARTITION)
    }

    /// Wire size estimate used for bandwidth accounting.
    pub fn wire_len(&self) -> usize {
        self.data.len() + 32
    }
}

/// Current wall-clock time in microseconds, for packet timestamps.
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}
