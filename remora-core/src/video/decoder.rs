//! Row-based decoder.
//!
//! Reconstructs rectangles into a persistent screen-shadow buffer from the
//! packet stream produced by [`Encoder`](crate::video::encoder::Encoder).
//!
//! ```text
//!  Uninitialized ──initialize──▶ Ready ──FIRST──▶ Processing
//!                                  ▲                 │ LAST
//!                                  │                 ▼
//!            Done ◀──LAST_PARTITION┴──────────── PartitionDone
//! ```
//!
//! Any malformed input moves the decoder to the absorbing `Error` state;
//! only [`initialize`](Decoder::initialize) leaves it.

use tracing::warn;

use crate::error::CodecError;
use crate::video::compressor::Decompressor;
use crate::video::packet::{Encoding, PacketFlags, VideoPacket};
use crate::video::types::{FrameBuffer, MAX_SCREEN_DIMENSION, Rect, Region, Size};

/// Scratch window used to detect data past the end of a rectangle.
const TRAILER_SCRATCH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Uninitialized,
    Ready,
    Processing,
    PartitionDone,
    Done,
    Error,
}

/// Result of feeding one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// More packets are needed to finish the frame.
    InProgress,
    /// A `LAST_PARTITION` packet completed the frame.
    Done,
}

pub struct Decoder {
    state: DecoderState,
    screen: Option<FrameBuffer>,
    decompressor: Option<(Encoding, Decompressor)>,
    rect: Rect,
    row_y: u32,
    row_pos: usize,
    /// The decompressor reported the end of the current stream.
    stream_ended: bool,
    updated: Region,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Uninitialized,
            screen: None,
            decompressor: None,
            rect: Rect::default(),
            row_y: 0,
            row_pos: 0,
            stream_ended: false,
            updated: Region::new(),
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn screen_size(&self) -> Option<Size> {
        self.screen.as_ref().map(FrameBuffer::size)
    }

    /// Whether a screen of `size` may be allocated.
    pub fn check_screen_size(size: Size) -> Result<(), CodecError> {
        let fits = !size.is_empty()
            && size.width <= MAX_SCREEN_DIMENSION
            && size.height <= MAX_SCREEN_DIMENSION
            && size.byte_len().is_some();
        if fits {
            Ok(())
        } else {
            Err(CodecError::ScreenTooLarge(size.to_string()))
        }
    }

    /// True while a rectangle is only partly received.
    pub fn mid_rect(&self) -> bool {
        self.state == DecoderState::Processing
    }

    /// Allocate a fresh shadow buffer. Clears any previous error.
    pub fn initialize(&mut self, size: Size) {
        self.screen = Some(FrameBuffer::new(size));
        self.updated.clear();
        self.row_y = 0;
        self.row_pos = 0;
        self.state = DecoderState::Ready;
    }

    /// Feed one packet. Packets must arrive in wire order.
    pub fn decode_packet(&mut self, packet: &VideoPacket) -> Result<DecodeStatus, CodecError> {
        match self.decode_inner(packet) {
            Ok(status) => Ok(status),
            Err(e) => {
                warn!(error = %e, "video stream rejected");
                self.state = DecoderState::Error;
                Err(e)
            }
        }
    }

    fn decode_inner(&mut self, packet: &VideoPacket) -> Result<DecodeStatus, CodecError> {
        match self.state {
            DecoderState::Uninitialized => return Err(CodecError::Uninitialized),
            DecoderState::Error => return Err(CodecError::OutOfOrder("decoder is in error state")),
            _ => {}
        }

        if packet.flags.contains(PacketFlags::FIRST_PACKET) {
            self.begin_rect(packet)?;
        } else if self.state != DecoderState::Processing {
            return Err(CodecError::OutOfOrder("data packet without a rectangle"));
        }

        self.write_rows(&packet.data)?;

        if packet.flags.contains(PacketFlags::LAST_PACKET) {
            self.finish_rect()?;
            if packet.flags.contains(PacketFlags::LAST_PARTITION) {
                self.state = DecoderState::Done;
                return Ok(DecodeStatus::Done);
            }
            self.state = DecoderState::PartitionDone;
        }
        Ok(DecodeStatus::InProgress)
    }

    fn begin_rect(&mut self, packet: &VideoPacket) -> Result<(), CodecError> {
        if !matches!(
            self.state,
            DecoderState::Ready | DecoderState::Done | DecoderState::PartitionDone
        ) {
            return Err(CodecError::OutOfOrder("FIRST_PACKET inside a rectangle"));
        }
        let format = packet
            .format
            .ok_or(CodecError::OutOfOrder("FIRST_PACKET without format"))?;
        let screen = self.screen_size().ok_or(CodecError::Uninitialized)?;
        if format.rect.is_empty() || !format.rect.fits_within(screen) {
            return Err(CodecError::OutOfBounds(
                format.rect.to_string(),
                screen.to_string(),
            ));
        }

        match &mut self.decompressor {
            Some((encoding, d)) if *encoding == format.encoding => d.reset(),
            other => *other = Some((format.encoding, Decompressor::for_encoding(format.encoding)?)),
        }

        self.rect = format.rect;
        self.row_y = 0;
        self.row_pos = 0;
        self.stream_ended = false;
        self.state = DecoderState::Processing;
        Ok(())
    }

    fn write_rows(&mut self, data: &[u8]) -> Result<(), CodecError> {
        let Some((_, decompressor)) = self.decompressor.as_mut() else {
            return Err(CodecError::Uninitialized);
        };
        let Some(screen) = self.screen.as_mut() else {
            return Err(CodecError::Uninitialized);
        };
        let rect = self.rect;
        let row_bytes = rect.size().row_bytes();

        let mut used = 0usize;
        // A full output window may leave output buffered inside the
        // decompressor even once the input is exhausted.
        let mut pending = false;

        while used < data.len() || pending {
            if self.row_y >= rect.height {
                if used == data.len() && !pending {
                    break;
                }
                // Rows are full: anything still decoding is excess.
                let mut scratch = [0u8; TRAILER_SCRATCH];
                let p = decompressor.process(&data[used..], &mut scratch)?;
                if p.written > 0 || (p.consumed == 0 && used < data.len()) {
                    return Err(CodecError::Overflow);
                }
                used += p.consumed;
                pending = false;
                self.stream_ended |= !p.more;
                if p.consumed == 0 {
                    break;
                }
                continue;
            }

            let row = screen.rect_row_mut(&rect, rect.y + self.row_y);
            let window = &mut row[self.row_pos..];
            let window_len = window.len();
            let p = decompressor.process(&data[used..], window)?;
            used += p.consumed;
            self.row_pos += p.written;
            pending = p.written == window_len && p.more;
            self.stream_ended |= !p.more;

            if p.consumed == 0 && p.written == 0 {
                if used < data.len() {
                    return Err(CodecError::Compression("decompressor made no progress".into()));
                }
                break;
            }
            if self.row_pos == row_bytes {
                self.row_y += 1;
                self.row_pos = 0;
            }
        }
        Ok(())
    }

    fn finish_rect(&mut self) -> Result<(), CodecError> {
        let row_bytes = self.rect.size().row_bytes();
        let expected = row_bytes * self.rect.height as usize;
        let filled = row_bytes * self.row_y as usize + self.row_pos;
        if filled != expected {
            return Err(CodecError::Underflow { filled, expected });
        }
        if matches!(self.decompressor, Some((Encoding::Zlib, _))) && !self.stream_ended {
            return Err(CodecError::Truncated);
        }
        self.updated.add_rect(self.rect);
        Ok(())
    }

    /// Rectangles completed since the last call; clears the set.
    pub fn take_updated_region(&mut self) -> Region {
        self.updated.take()
    }

    /// Copy the pixels of `rect` out of the shadow buffer.
    pub fn copy_rect(&self, rect: &Rect) -> Option<Vec<u8>> {
        let screen = self.screen.as_ref()?;
        rect.fits_within(screen.size()).then(|| screen.copy_out(rect))
    }

    /// Read access to the whole shadow buffer.
    pub fn screen(&self) -> Option<&FrameBuffer> {
        self.screen.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemotingError;
    use crate::video::compressor::{Compressor, Flush};
    use crate::video::encoder::{DEFAULT_PACKET_SIZE, Encoder};
    use crate::video::packet::PacketFormat;
    use crate::video::types::CaptureData;
    use std::sync::Arc;
    use std::time::Instant;

    fn source(size: Size) -> Arc<FrameBuffer> {
        let mut fb = FrameBuffer::new(size);
        for (i, b) in fb.data_mut().iter_mut().enumerate() {
            *b = ((i * 31) ^ (i >> 5)) as u8;
        }
        Arc::new(fb)
    }

    fn encode(encoding: Encoding, packet_size: usize, buffer: Arc<FrameBuffer>, rects: &[Rect]) -> Vec<VideoPacket> {
        let mut enc = Encoder::new(encoding, packet_size).unwrap();
        let data = CaptureData {
            buffer,
            dirty: rects.iter().copied().collect(),
            captured_at: Instant::now(),
            capture_time_us: 0,
        };
        let mut out = Vec::new();
        enc.encode::<RemotingError, _>(&data, |p| {
            out.push(p);
            Ok(())
        })
        .unwrap();
        out
    }

    fn first(rect: Rect, flags: PacketFlags, data: Vec<u8>) -> VideoPacket {
        first_with(Encoding::Verbatim, rect, flags, data)
    }

    fn first_with(encoding: Encoding, rect: Rect, flags: PacketFlags, data: Vec<u8>) -> VideoPacket {
        let mut p = VideoPacket::new(PacketFlags::FIRST_PACKET | flags);
        p.format = Some(PacketFormat {
            rect,
            screen_size: None,
            encoding,
        });
        p.data = data;
        p
    }

    fn deflate(raw: &[u8]) -> Vec<u8> {
        let mut c = Compressor::for_encoding(Encoding::Zlib).unwrap();
        let mut out = vec![0u8; raw.len() + 64];
        let p = c.process(raw, &mut out, Flush::Finish).unwrap();
        assert!(!p.more);
        out.truncate(p.written);
        out
    }

    #[test]
    fn reconstructs_encoder_output_for_both_codecs() {
        let size = Size::new(48, 40);
        let rects = [Rect::new(0, 0, 16, 8), Rect::new(20, 10, 28, 30)];
        for encoding in [Encoding::Verbatim, Encoding::Zlib] {
            for packet_size in [64, 333, DEFAULT_PACKET_SIZE] {
                let buffer = source(size);
                let packets = encode(encoding, packet_size, buffer.clone(), &rects);

                let mut dec = Decoder::new();
                dec.initialize(size);
                let mut status = DecodeStatus::InProgress;
                for p in &packets {
                    status = dec.decode_packet(p).unwrap();
                }
                assert_eq!(status, DecodeStatus::Done);
                assert_eq!(dec.state(), DecoderState::Done);

                for rect in &rects {
                    assert_eq!(
                        dec.copy_rect(rect).unwrap(),
                        buffer.copy_out(rect),
                        "{encoding} / {packet_size}"
                    );
                }
                assert_eq!(dec.take_updated_region().len(), 2);
                assert!(dec.take_updated_region().is_empty());
            }
        }
    }

    #[test]
    fn short_rectangle_is_an_underflow() {
        let mut dec = Decoder::new();
        dec.initialize(Size::new(32, 32));
        let rect = Rect::new(0, 0, 10, 10);

        assert_eq!(
            dec.decode_packet(&first(rect, PacketFlags::empty(), vec![0; 30])),
            Ok(DecodeStatus::InProgress)
        );
        let mut last = VideoPacket::new(PacketFlags::LAST_PACKET);
        last.data = vec![0; 30];
        assert_eq!(
            dec.decode_packet(&last),
            Err(CodecError::Underflow {
                filled: 60,
                expected: 400
            })
        );
        assert_eq!(dec.state(), DecoderState::Error);
        assert!(dec.decode_packet(&first(rect, PacketFlags::LAST_PACKET, vec![0; 400])).is_err());
    }

    #[test]
    fn excess_data_is_an_overflow() {
        let mut dec = Decoder::new();
        dec.initialize(Size::new(8, 8));
        let rect = Rect::new(0, 0, 2, 2);
        let result = dec.decode_packet(&first(rect, PacketFlags::LAST_PACKET, vec![1; 17]));
        assert_eq!(result, Err(CodecError::Overflow));
        assert_eq!(dec.state(), DecoderState::Error);
    }

    #[test]
    fn excess_zlib_output_is_an_overflow() {
        let mut dec = Decoder::new();
        dec.initialize(Size::new(8, 8));
        let rect = Rect::new(0, 0, 2, 2);
        let flags = PacketFlags::LAST_PACKET | PacketFlags::LAST_PARTITION;
        let result = dec.decode_packet(&first_with(Encoding::Zlib, rect, flags, deflate(&[5; 17])));
        assert_eq!(result, Err(CodecError::Overflow));
        assert_eq!(dec.state(), DecoderState::Error);
    }

    #[test]
    fn zlib_stream_must_end_with_the_rectangle() {
        let rect = Rect::new(0, 0, 2, 2);
        let flags = PacketFlags::LAST_PACKET | PacketFlags::LAST_PARTITION;
        let mut stream = deflate(&[5; 16]);

        let mut dec = Decoder::new();
        dec.initialize(Size::new(8, 8));
        let whole = dec.decode_packet(&first_with(Encoding::Zlib, rect, flags, stream.clone()));
        assert_eq!(whole, Ok(DecodeStatus::Done));
        assert_eq!(dec.copy_rect(&rect), Some(vec![5; 16]));

        // Drop the checksum trailer: every row decodes but the stream is open.
        stream.truncate(stream.len() - 4);
        dec.initialize(Size::new(8, 8));
        let cut = dec.decode_packet(&first_with(Encoding::Zlib, rect, flags, stream));
        assert_eq!(cut, Err(CodecError::Truncated));
        assert_eq!(dec.state(), DecoderState::Error);
    }

    #[test]
    fn screen_size_limits() {
        assert!(Decoder::check_screen_size(Size::new(1920, 1080)).is_ok());
        for size in [
            Size::new(0, 10),
            Size::new(MAX_SCREEN_DIMENSION + 1, 1),
            Size::new(u32::MAX, u32::MAX),
        ] {
            assert_eq!(
                Decoder::check_screen_size(size),
                Err(CodecError::ScreenTooLarge(size.to_string()))
            );
        }
    }

    #[test]
    fn rect_outside_screen_is_rejected() {
        let mut dec = Decoder::new();
        dec.initialize(Size::new(8, 8));
        let result = dec.decode_packet(&first(Rect::new(4, 4, 8, 8), PacketFlags::LAST_PACKET, vec![]));
        assert!(matches!(result, Err(CodecError::OutOfBounds(_, _))));
    }

    #[test]
    fn first_packet_inside_rectangle_is_out_of_order() {
        let mut dec = Decoder::new();
        dec.initialize(Size::new(8, 8));
        let rect = Rect::new(0, 0, 4, 4);
        dec.decode_packet(&first(rect, PacketFlags::empty(), vec![0; 16]))
            .unwrap();
        assert!(matches!(
            dec.decode_packet(&first(rect, PacketFlags::empty(), vec![])),
            Err(CodecError::OutOfOrder(_))
        ));
    }

    #[test]
    fn data_before_first_packet_is_out_of_order() {
        let mut dec = Decoder::new();
        dec.initialize(Size::new(8, 8));
        let p = VideoPacket::new(PacketFlags::LAST_PACKET);
        assert!(matches!(dec.decode_packet(&p), Err(CodecError::OutOfOrder(_))));
    }

    #[test]
    fn uninitialized_decoder_rejects_packets() {
        let mut dec = Decoder::new();
        let p = first(Rect::new(0, 0, 1, 1), PacketFlags::LAST_PACKET, vec![0; 4]);
        assert_eq!(dec.decode_packet(&p), Err(CodecError::Uninitialized));
    }

    #[test]
    fn partition_done_between_rectangles() {
        let mut dec = Decoder::new();
        dec.initialize(Size::new(8, 8));
        dec.decode_packet(&first(Rect::new(0, 0, 1, 1), PacketFlags::LAST_PACKET, vec![0; 4]))
            .unwrap();
        assert_eq!(dec.state(), DecoderState::PartitionDone);
        let status = dec
            .decode_packet(&first(
                Rect::new(1, 1, 1, 1),
                PacketFlags::LAST_PACKET | PacketFlags::LAST_PARTITION,
                vec![0; 4],
            ))
            .unwrap();
        assert_eq!(status, DecodeStatus::Done);
    }

    #[test]
    fn initialize_recovers_from_error() {
        let mut dec = Decoder::new();
        dec.initialize(Size::new(4, 4));
        let _ = dec.decode_packet(&VideoPacket::new(PacketFlags::LAST_PACKET));
        assert_eq!(dec.state(), DecoderState::Error);
        dec.initialize(Size::new(4, 4));
        assert_eq!(dec.state(), DecoderState::Ready);
    }
}
