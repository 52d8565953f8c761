//! Block-level change detection between consecutive frame buffers.
//!
//! Used by the capturer when the capture source does not report which
//! parts of the screen changed. The screen is cut into square tiles that
//! are compared byte-for-byte; changed tiles on the same tile row are
//! merged into runs so a moving window produces a handful of rectangles
//! rather than dozens.

use std::cmp;

use crate::video::types::{BYTES_PER_PIXEL, FrameBuffer, Rect, Region};

/// Default tile edge in pixels.
pub const DEFAULT_BLOCK_SIZE: u32 = 32;

/// Above this share of changed tiles the whole screen is reported.
const FULL_SCREEN_RATIO: f64 = 0.80;

pub struct Differ {
    block_size: u32,
}

impl Default for Differ {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

impl Differ {
    pub fn new(block_size: u32) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Rectangles where `current` differs from `previous`.
    ///
    /// Buffers of different sizes are reported as a full-screen change.
    pub fn diff(&self, previous: &FrameBuffer, current: &FrameBuffer) -> Region {
        let size = current.size();
        if previous.size() != size {
            return Region::from_rect(Rect::from_size(size));
        }

        let bs = self.block_size;
        let blocks_x = size.width.div_ceil(bs);
        let blocks_y = size.height.div_ceil(bs);
        let total_blocks = blocks_x as usize * blocks_y as usize;

        let mut region = Region::new();
        let mut changed_blocks = 0usize;

        for by in 0..blocks_y {
            let y = by * bs;
            let height = cmp::min(bs, size.height - y);
            let mut run: Option<(u32, u32)> = None;

            for bx in 0..blocks_x {
                let x = bx * bs;
                let width = cmp::min(bs, size.width - x);
                let tile = Rect::new(x, y, width, height);

                if tile_differs(previous, current, &tile) {
                    changed_blocks += 1;
                    run = Some(match run {
                        Some((start, w)) => (start, w + width),
                        None => (x, width),
                    });
                } else if let Some((start, w)) = run.take() {
                    region.add_rect(Rect::new(start, y, w, height));
                }
            }
            if let Some((start, w)) = run {
                region.add_rect(Rect::new(start, y, w, height));
            }
        }

        if total_blocks > 0 && changed_blocks as f64 / total_blocks as f64 > FULL_SCREEN_RATIO {
            return Region::from_rect(Rect::from_size(size));
        }
        region
    }
}

fn tile_differs(previous: &FrameBuffer, current: &FrameBuffer, tile: &Rect) -> bool {
    let row_bytes = tile.width as usize * BYTES_PER_PIXEL;
    (tile.y..tile.y + tile.height).any(|y| {
        let off = current.offset(tile.x, y);
        previous.data()[off..off + row_bytes] != current.data()[off..off + row_bytes]
    })
}
