//! Synthetic capture source: a box bouncing over a gradient.

use crate::error::RemotingError;
use crate::host::capturer::CaptureSource;
use crate::video::{FrameBuffer, Rect, Region, Size};

const BOX_SIZE: u32 = 48;
const BOX_COLOUR: [u8; 4] = [40, 200, 250, 255];

pub struct PatternSource {
    size: Size,
    step: u32,
    frame: u64,
    position: (u32, u32),
    velocity: (i64, i64),
    drawn: Option<Rect>,
}

impl PatternSource {
    pub fn new(size: Size) -> Self {
        Self::with_step(size, 8)
    }

    /// `step` is the box movement per frame in pixels.
    pub fn with_step(size: Size, step: u32) -> Self {
        Self {
            size,
            step,
            frame: 0,
            position: (0, 0),
            velocity: (i64::from(step), i64::from(step) / 2),
            drawn: None,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frame
    }

    fn box_rect(&self) -> Rect {
        Rect::new(
            self.position.0,
            self.position.1,
            BOX_SIZE.min(self.size.width),
            BOX_SIZE.min(self.size.height),
        )
    }

    fn advance(&mut self) {
        let max_x = i64::from(self.size.width.saturating_sub(BOX_SIZE));
        let max_y = i64::from(self.size.height.saturating_sub(BOX_SIZE));
        let mut x = i64::from(self.position.0) + self.velocity.0;
        let mut y = i64::from(self.position.1) + self.velocity.1;
        if x < 0 || x > max_x {
            self.velocity.0 = -self.velocity.0;
            x = x.clamp(0, max_x);
        }
        if y < 0 || y > max_y {
            self.velocity.1 = -self.velocity.1;
            y = y.clamp(0, max_y);
        }
        self.position = (x as u32, y as u32);
    }
}

/// Background colour of pixel `(x, y)`.
pub fn gradient(x: u32, y: u32) -> [u8; 4] {
    [(x & 0xff) as u8, (y & 0xff) as u8, (((x + y) >> 2) & 0xff) as u8, 255]
}

fn paint_background(buffer: &mut FrameBuffer, rect: &Rect) {
    for y in rect.y..rect.y + rect.height {
        let row = buffer.rect_row_mut(rect, y);
        for (i, px) in row.chunks_exact_mut(4).enumerate() {
            px.copy_from_slice(&gradient(rect.x + i as u32, y));
        }
    }
}

impl CaptureSource for PatternSource {
    fn size(&self) -> Size {
        self.size
    }

    fn grab(&mut self, buffer: &mut FrameBuffer) -> Result<Option<Region>, RemotingError> {
        if buffer.size() != self.size {
            return Err(RemotingError::Capture(format!(
                "buffer is {} but screen is {}",
                buffer.size(),
                self.size
            )));
        }
        let mut changed = Region::new();

        match self.drawn {
            None => {
                let full = Rect::from_size(self.size);
                paint_background(buffer, &full);
                changed.add_rect(full);
            }
            Some(old) => {
                if self.step > 0 {
                    paint_background(buffer, &old);
                    changed.add_rect(old);
                    self.advance();
                }
            }
        }

        let rect = self.box_rect();
        if self.step > 0 || self.drawn.is_none() {
            buffer.fill_rect(&rect, BOX_COLOUR);
            changed.add_rect(rect);
        }
        self.drawn = Some(rect);
        self.frame += 1;
        Ok(Some(changed))
    }
}
