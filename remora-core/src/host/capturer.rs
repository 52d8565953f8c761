//! Double-buffered screen capturer.
//!
//! Two full-screen buffers rotate: each capture writes into the buffer not
//! handed out last time. Before the source draws, the rectangles that
//! changed in the previous cycle are copied forward, so a source that only
//! repaints what it reports as changed always leaves a complete frame.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use crate::error::RemotingError;
use crate::video::packet::now_micros;
use crate::video::{CaptureData, Differ, FrameBuffer, Rect, Region, Size};

/// A platform (or synthetic) screen backend.
pub trait CaptureSource: Send + 'static {
    /// Current screen size. A change reallocates the capture buffers.
    fn size(&self) -> Size;

    /// Draw the current screen into `buffer`.
    ///
    /// `buffer` already holds the previous frame. Returns the changed
    /// rectangles when the backend knows them; `None` makes the capturer
    /// diff the buffer against the previous frame.
    fn grab(&mut self, buffer: &mut FrameBuffer) -> Result<Option<Region>, RemotingError>;
}

pub struct Capturer {
    source: Box<dyn CaptureSource>,
    buffers: [Arc<FrameBuffer>; 2],
    /// Index of the buffer returned by the last capture.
    current: usize,
    /// What changed in `buffers[current]` relative to the other buffer.
    last_changed: Region,
    /// Invalidated but not yet captured.
    pending: Region,
    differ: Differ,
    size: Size,
}

impl Capturer {
    pub fn new(source: Box<dyn CaptureSource>) -> Self {
        Self::with_differ(source, Differ::default())
    }

    pub fn with_differ(source: Box<dyn CaptureSource>, differ: Differ) -> Self {
        let size = source.size();
        Self {
            source,
            buffers: [Arc::new(FrameBuffer::new(size)), Arc::new(FrameBuffer::new(size))],
            current: 0,
            last_changed: Region::new(),
            pending: Region::from_rect(Rect::from_size(size)),
            differ,
            size,
        }
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn invalidate_region(&mut self, rects: impl IntoIterator<Item = Rect>) {
        for rect in rects {
            self.pending.add_rect(rect);
        }
    }

    pub fn invalidate_full_screen(&mut self) {
        self.pending = Region::from_rect(Rect::from_size(self.size));
    }

    /// Capture one frame. The result is produced even when nothing
    /// changed; its `dirty` region is then empty.
    ///
    /// Taking `&mut self` keeps at most one capture in flight.
    pub fn capture(&mut self) -> Result<CaptureData, RemotingError> {
        let size = self.source.size();
        if size != self.size {
            debug!(from = %self.size, to = %size, "screen size changed");
            self.size = size;
            self.buffers = [Arc::new(FrameBuffer::new(size)), Arc::new(FrameBuffer::new(size))];
            self.last_changed.clear();
            self.invalidate_full_screen();
        }

        let next = 1 - self.current;
        let [first, second] = &mut self.buffers;
        let (target, previous) = if next == 0 {
            (first, &*second)
        } else {
            (second, &*first)
        };
        // Copies only if an encoder still holds this slot.
        let target = Arc::make_mut(target);

        for rect in self.last_changed.rects() {
            target.copy_rect_from(previous, rect);
        }

        let captured_at = Instant::now();
        let capture_time_us = now_micros();
        let mut changed = match self.source.grab(target)? {
            Some(hints) => hints,
            None => self.differ.diff(previous, target),
        };
        let bounds = Rect::from_size(size);
        changed.clip_to(bounds);

        let mut dirty = changed.clone();
        dirty.union_with(&self.pending.take());
        dirty.clip_to(bounds);

        self.last_changed = changed;
        self.current = next;
        trace!(rects = dirty.len(), area = dirty.area(), "captured frame");

        Ok(CaptureData {
            buffer: Arc::clone(&self.buffers[next]),
            dirty,
            captured_at,
            capture_time_us,
        })
    }
}
