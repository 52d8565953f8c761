//! Row-based encoder.
//!
//! Streams each dirty rectangle, row by row, through a [`Compressor`] into
//! packets of at most `packet_size` payload bytes:
//!
//! ```text
//!   rect 0: FIRST ─ data ─ data ─ LAST
//!   rect 1: FIRST ─ LAST
//!   rect 2: FIRST ─ data ─ LAST|LAST_PARTITION
//! ```
//!
//! The compressor is reset per rectangle so every rectangle decodes on its
//! own. A rectangle that fits in a single packet carries
//! `FIRST_PACKET | LAST_PACKET` on the same packet.

use tracing::trace;

use crate::error::CodecError;
use crate::video::compressor::{Compressor, Flush};
use crate::video::packet::{Encoding, PacketFlags, PacketFormat, VideoPacket};
use crate::video::types::{CaptureData, Rect};

/// Default payload budget per packet.
pub const DEFAULT_PACKET_SIZE: usize = 1024 * 1024;

/// Smallest budget accepted; keeps the compressor able to make progress.
const MIN_PACKET_SIZE: usize = 64;

pub struct Encoder {
    encoding: Encoding,
    compressor: Compressor,
    packet_size: usize,
    frames: u64,
}

impl Encoder {
    pub fn new(encoding: Encoding, packet_size: usize) -> Result<Self, CodecError> {
        Ok(Self {
            encoding,
            compressor: Compressor::for_encoding(encoding)?,
            packet_size: packet_size.max(MIN_PACKET_SIZE),
            frames: 0,
        })
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Frames encoded so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Encode every dirty rectangle of `data`, handing packets to `sink`
    /// in wire order. Rectangles are clipped to the screen; an empty dirty
    /// region produces no packets.
    ///
    /// `sink` may fail (e.g. the consumer went away); encoding then stops
    /// and the sink's error is returned.
    pub fn encode<E, F>(&mut self, data: &CaptureData, mut sink: F) -> Result<(), E>
    where
        E: From<CodecError>,
        F: FnMut(VideoPacket) -> Result<(), E>,
    {
        let mut dirty = data.dirty.clone();
        dirty.clip_to(Rect::from_size(data.size()));
        let rects = dirty.rects();

        for (index, rect) in rects.iter().enumerate() {
            let last = index + 1 == rects.len();
            self.encode_rect(data, rect, last, &mut sink)?;
        }
        if !rects.is_empty() {
            self.frames += 1;
        }
        Ok(())
    }

    fn encode_rect<E, F>(
        &mut self,
        data: &CaptureData,
        rect: &Rect,
        last_rect: bool,
        sink: &mut F,
    ) -> Result<(), E>
    where
        E: From<CodecError>,
        F: FnMut(VideoPacket) -> Result<(), E>,
    {
        self.compressor.reset();

        let buffer = &data.buffer;
        let last_row = rect.height - 1;
        let mut row_y = 0u32;
        let mut row_x = 0usize;

        let mut packet = self.first_packet(data, rect);
        let mut out = vec![0u8; self.packet_size];
        let mut filled = 0usize;

        loop {
            let row = buffer.rect_row(rect, rect.y + row_y);
            let flush = if row_y == last_row {
                Flush::Finish
            } else {
                Flush::None
            };
            let progress = self
                .compressor
                .process(&row[row_x..], &mut out[filled..], flush)?;
            row_x += progress.consumed;
            filled += progress.written;

            if !progress.more {
                packet.flags |= PacketFlags::LAST_PACKET;
                if last_rect {
                    packet.flags |= PacketFlags::LAST_PARTITION;
                    packet.capture_time_us = Some(data.capture_time_us);
                }
            }

            if filled == self.packet_size || !progress.more {
                packet.data = out[..filled].to_vec();
                trace!(
                    rect = %rect,
                    flags = packet.flags.bits(),
                    bytes = filled,
                    "video packet"
                );
                sink(packet)?;
                if !progress.more {
                    return Ok(());
                }
                packet = VideoPacket::new(PacketFlags::empty());
                filled = 0;
            }

            if row_x == row.len() && row_y < last_row {
                row_x = 0;
                row_y += 1;
            }
        }
    }

    fn first_packet(&self, data: &CaptureData, rect: &Rect) -> VideoPacket {
        let mut packet = VideoPacket::new(PacketFlags::FIRST_PACKET);
        packet.format = Some(PacketFormat {
            rect: *rect,
            screen_size: Some(data.size()),
            encoding: self.encoding,
        });
        packet
    }
}
