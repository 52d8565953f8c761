//! Shared geometry and pixel types for the capture/encode/decode pipeline.
//!
//! These are **internal** representations used between pipeline stages.
//! The serialisable wire type is [`crate::video::packet::VideoPacket`].

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Every buffer in the pipeline is 32-bit BGRA.
pub const BYTES_PER_PIXEL: usize = 4;

/// Largest width or height a screen may declare.
pub const MAX_SCREEN_DIMENSION: u32 = 16_384;

// ── Size ─────────────────────────────────────────────────────────

/// Screen or rectangle dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Bytes in one tightly packed row.
    pub const fn row_bytes(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// Bytes in a buffer of this size, or `None` if that overflows `usize`.
    pub fn byte_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(BYTES_PER_PIXEL)?
            .checked_mul(self.height as usize)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ── Rect ─────────────────────────────────────────────────────────

/// An axis-aligned rectangle in absolute screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The rectangle covering a whole screen of `size`.
    pub const fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub const fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    pub const fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub const fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// `true` when `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// `true` when the rectangle fits inside a screen of `size`.
    pub fn fits_within(&self, size: Size) -> bool {
        Rect::from_size(size).contains(self)
    }

    /// Overlapping part of two rectangles, if any.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left as u64 || bottom <= top as u64 {
            return None;
        }
        Some(Rect::new(
            left,
            top,
            (right - left as u64) as u32,
            (bottom - top as u64) as u32,
        ))
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{} {}x{})", self.x, self.y, self.width, self.height)
    }
}

// ── Region ───────────────────────────────────────────────────────

/// A set of rectangles.
///
/// Union keeps the set free of rectangles wholly contained in another;
/// partially overlapping rectangles are kept as-is, which at worst
/// re-sends a few pixels.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(rect: Rect) -> Self {
        let mut region = Self::new();
        region.add_rect(rect);
        region
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn len(&self) -> usize {
        self.rects.len()
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    /// Merge one rectangle into the set.
    pub fn add_rect(&mut self, rect: Rect) {
        if rect.is_empty() || self.rects.iter().any(|r| r.contains(&rect)) {
            return;
        }
        self.rects.retain(|r| !rect.contains(r));
        self.rects.push(rect);
    }

    /// Set union with another region.
    pub fn union_with(&mut self, other: &Region) {
        for rect in &other.rects {
            self.add_rect(*rect);
        }
    }

    /// Clip every rectangle to `bounds`, dropping those entirely outside.
    pub fn clip_to(&mut self, bounds: Rect) {
        let clipped: Vec<Rect> = self
            .rects
            .iter()
            .filter_map(|r| r.intersect(&bounds))
            .collect();
        self.rects.clear();
        for rect in clipped {
            self.add_rect(rect);
        }
    }

    /// Total pixel area (overlaps counted twice).
    pub fn area(&self) -> u64 {
        self.rects.iter().map(Rect::area).sum()
    }

    /// Move the rectangles out, leaving the region empty.
    pub fn take(&mut self) -> Region {
        std::mem::take(self)
    }
}

impl FromIterator<Rect> for Region {
    fn from_iter<I: IntoIterator<Item = Rect>>(iter: I) -> Self {
        let mut region = Region::new();
        for rect in iter {
            region.add_rect(rect);
        }
        region
    }
}

// ── FrameBuffer ──────────────────────────────────────────────────

/// A full-screen BGRA pixel buffer.
///
/// The buffer holds `height` rows of `stride` bytes each; `stride` is
/// always `width * 4` here, the capture backends repack any GPU padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    size: Size,
    stride: usize,
    data: Vec<u8>,
}

impl FrameBuffer {
    /// A zero-filled buffer.
    pub fn new(size: Size) -> Self {
        let stride = size.row_bytes();
        Self {
            size,
            stride,
            data: vec![0; stride * size.height as usize],
        }
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// Row pitch in bytes.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Byte offset of pixel `(x, y)`.
    pub fn offset(&self, x: u32, y: u32) -> usize {
        y as usize * self.stride + x as usize * BYTES_PER_PIXEL
    }

    /// The bytes of row `y` restricted to the columns of `rect`.
    ///
    /// # Panics
    ///
    /// Panics if `rect` is outside the buffer; callers clip first.
    pub fn rect_row(&self, rect: &Rect, y: u32) -> &[u8] {
        let start = self.offset(rect.x, y);
        &self.data[start..start + rect.width as usize * BYTES_PER_PIXEL]
    }

    pub fn rect_row_mut(&mut self, rect: &Rect, y: u32) -> &mut [u8] {
        let start = self.offset(rect.x, y);
        &mut self.data[start..start + rect.width as usize * BYTES_PER_PIXEL]
    }

    /// Copy `rect` from `other` (which must have the same size).
    pub fn copy_rect_from(&mut self, other: &FrameBuffer, rect: &Rect) {
        debug_assert_eq!(self.size, other.size);
        let Some(rect) = rect.intersect(&Rect::from_size(self.size)) else {
            return;
        };
        for y in rect.y..rect.y + rect.height {
            let start = self.offset(rect.x, y);
            let end = start + rect.width as usize * BYTES_PER_PIXEL;
            self.data[start..end].copy_from_slice(&other.data[start..end]);
        }
    }

    /// Tightly packed copy of the pixels inside `rect`.
    pub fn copy_out(&self, rect: &Rect) -> Vec<u8> {
        let mut out = Vec::with_capacity(rect.area() as usize * BYTES_PER_PIXEL);
        for y in rect.y..rect.y + rect.height {
            out.extend_from_slice(self.rect_row(rect, y));
        }
        out
    }

    /// Fill `rect` with a single BGRA colour.
    pub fn fill_rect(&mut self, rect: &Rect, bgra: [u8; 4]) {
        let Some(rect) = rect.intersect(&Rect::from_size(self.size)) else {
            return;
        };
        for y in rect.y..rect.y + rect.height {
            for px in self.rect_row_mut(&rect, y).chunks_exact_mut(BYTES_PER_PIXEL) {
                px.copy_from_slice(&bgra);
            }
        }
    }
}

// ── CaptureData ──────────────────────────────────────────────────

/// Immutable result of one capture cycle.
///
/// The buffer is shared with the capturer's rotation slot; holding a
/// `CaptureData` keeps the capturer from writing into that slot in place.
#[derive(Debug, Clone)]
pub struct CaptureData {
    pub buffer: Arc<FrameBuffer>,
    pub dirty: Region,
    pub captured_at: Instant,
    /// Wall-clock capture time in microseconds, carried on the wire.
    pub capture_time_us: u64,
}

impl CaptureData {
    pub fn size(&self) -> Size {
        self.buffer.size()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_containment_and_bounds() {
        let screen = Size::new(100, 50);
        assert!(Rect::new(0, 0, 100, 50).fits_within(screen));
        assert!(Rect::new(90, 40, 10, 10).fits_within(screen));
        assert!(!Rect::new(91, 40, 10, 10).fits_within(screen));
        assert!(!Rect::new(u32::MAX, 0, 2, 2).fits_within(screen));
    }

    #[test]
    fn rect_intersection() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 5, 10, 10);
        assert_eq!(a.intersect(&b), Some(Rect::new(5, 5, 5, 5)));
        assert_eq!(a.intersect(&Rect::new(10, 0, 5, 5)), None);
    }

    #[test]
    fn region_union_drops_contained_rects() {
        let mut region = Region::new();
        region.add_rect(Rect::new(10, 10, 5, 5));
        region.add_rect(Rect::new(20, 20, 5, 5));
        region.add_rect(Rect::new(0, 0, 16, 16));
        assert_eq!(region.len(), 2);

        region.add_rect(Rect::new(1, 1, 2, 2));
        assert_eq!(region.len(), 2);

        region.add_rect(Rect::new(0, 0, 0, 10));
        assert_eq!(region.len(), 2);
    }

    #[test]
    fn region_clip_discards_outside() {
        let mut region: Region = [Rect::new(0, 0, 10, 10), Rect::new(200, 200, 5, 5)]
            .into_iter()
            .collect();
        region.clip_to(Rect::new(0, 0, 8, 8));
        assert_eq!(region.rects(), &[Rect::new(0, 0, 8, 8)]);
    }

    #[test]
    fn frame_buffer_copy_rect() {
        let mut src = FrameBuffer::new(Size::new(8, 8));
        src.fill_rect(&Rect::new(2, 2, 3, 3), [1, 2, 3, 4]);
        let mut dst = FrameBuffer::new(Size::new(8, 8));
        dst.copy_rect_from(&src, &Rect::new(0, 0, 4, 4));

        let off = dst.offset(2, 2);
        assert_eq!(&dst.data()[off..off + 4], &[1, 2, 3, 4]);
        let off = dst.offset(4, 4);
        assert_eq!(&dst.data()[off..off + 4], &[0, 0, 0, 0]);
    }

    #[test]
    fn copy_out_is_tightly_packed() {
        let mut fb = FrameBuffer::new(Size::new(4, 4));
        fb.fill_rect(&Rect::new(1, 1, 2, 2), [9, 9, 9, 9]);
        let pixels = fb.copy_out(&Rect::new(1, 1, 2, 2));
        assert_eq!(pixels.len(), 2 * 2 * BYTES_PER_PIXEL);
        assert!(pixels.iter().all(|&b| b == 9));
    }
}
