//! Client-side video pipeline: packet queue → decoder → frame consumer.
//!
//! Packets are queued in arrival order and decoded one at a time on a
//! dedicated blocking thread. After every `LAST_PARTITION` packet the
//! rectangles updated since the previous frame are copied out of the
//! decoder's shadow buffer and handed to the [`FrameConsumer`]. A slow
//! consumer fills the queue, and a full queue blocks [`push`], which in
//! turn stops reads from the video channel.
//!
//! [`push`]: RectangleUpdateDecoder::push

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::stats::{StatsSnapshot, VideoStats};
use crate::error::{CodecError, RemotingError};
use crate::video::packet::now_micros;
use crate::video::{DecodeStatus, Decoder, DecoderState, FrameBuffer, Rect, Size, VideoPacket};

/// Packets that may wait for the decoder.
pub const DECODE_QUEUE: usize = 32;

/// The rectangles of one completed frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameUpdate {
    /// Each rectangle with its tightly packed BGRA pixels.
    pub rects: Vec<(Rect, Vec<u8>)>,
    /// Host capture time, microseconds since the Unix epoch.
    pub capture_time_us: Option<u64>,
}

/// Renders decoded frames. Called on the decode thread.
pub trait FrameConsumer: Send {
    fn on_desktop_size(&mut self, size: Size);
    fn on_frame(&mut self, update: FrameUpdate);
}

/// Consumer that keeps a local copy of the screen.
#[derive(Clone, Default)]
pub struct ScreenBuffer {
    screen: Arc<Mutex<Option<FrameBuffer>>>,
    frames: Arc<AtomicUsize>,
}

impl ScreenBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the screen as last rendered.
    pub fn snapshot(&self) -> Option<FrameBuffer> {
        self.screen.lock().ok().and_then(|s| s.clone())
    }

    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }
}

impl FrameConsumer for ScreenBuffer {
    fn on_desktop_size(&mut self, size: Size) {
        if let Ok(mut screen) = self.screen.lock() {
            *screen = Some(FrameBuffer::new(size));
        }
    }

    fn on_frame(&mut self, update: FrameUpdate) {
        if let Ok(mut screen) = self.screen.lock() {
            if let Some(screen) = screen.as_mut() {
                for (rect, pixels) in &update.rects {
                    let row_bytes = rect.size().row_bytes();
                    for (row, y) in pixels.chunks_exact(row_bytes).zip(rect.y..) {
                        screen.rect_row_mut(rect, y).copy_from_slice(row);
                    }
                }
            }
        }
        self.frames.fetch_add(1, Ordering::SeqCst);
    }
}

/// Read side of the decoder's statistics; cheap to clone.
#[derive(Clone, Default)]
pub struct DecoderStats {
    stats: Arc<Mutex<VideoStats>>,
    depth: Arc<AtomicUsize>,
}

impl DecoderStats {
    /// Packets received but not yet decoded.
    pub fn queue_depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mut snapshot = self
            .stats
            .lock()
            .map(|s| s.snapshot())
            .unwrap_or_default();
        snapshot.queue_depth = self.queue_depth();
        snapshot
    }

    fn update(&self, f: impl FnOnce(&mut VideoStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }
}

pub struct RectangleUpdateDecoder {
    packets: mpsc::Sender<VideoPacket>,
    stats: DecoderStats,
    task: JoinHandle<()>,
}

impl RectangleUpdateDecoder {
    /// Start the decode thread. Stream errors are reported on the returned
    /// receiver; the decoder recovers on the next rectangle that carries a
    /// screen size.
    pub fn start(consumer: Box<dyn FrameConsumer>) -> (Self, mpsc::UnboundedReceiver<CodecError>) {
        let (packets, queue) = mpsc::channel(DECODE_QUEUE);
        let (errors_tx, errors) = mpsc::unbounded_channel();
        let stats = DecoderStats::default();

        let worker = DecodeWorker {
            decoder: Decoder::new(),
            consumer,
            stats: stats.clone(),
            errors: errors_tx,
        };
        let task = tokio::task::spawn_blocking(move || worker.run(queue));

        (
            Self {
                packets,
                stats,
                task,
            },
            errors,
        )
    }

    /// Queue one packet; waits while the queue is full. Cancel-safe.
    pub async fn push(&self, packet: VideoPacket) -> Result<(), RemotingError> {
        let permit = self
            .packets
            .reserve()
            .await
            .map_err(|_| RemotingError::ChannelClosed)?;
        self.stats.depth.fetch_add(1, Ordering::SeqCst);
        permit.send(packet);
        Ok(())
    }

    pub fn queue_depth(&self) -> usize {
        self.stats.queue_depth()
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats.clone()
    }

    /// Decode what is queued, then stop the thread.
    pub async fn close(self) {
        drop(self.packets);
        if let Err(e) = self.task.await {
            warn!(error = %e, "decode thread failed");
        }
    }
}

struct DecodeWorker {
    decoder: Decoder,
    consumer: Box<dyn FrameConsumer>,
    stats: DecoderStats,
    errors: mpsc::UnboundedSender<CodecError>,
}

impl DecodeWorker {
    fn run(mut self, mut queue: mpsc::Receiver<VideoPacket>) {
        while let Some(packet) = queue.blocking_recv() {
            let depth = self.stats.depth.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
            self.process(&packet);
            self.stats.update(|s| s.set_queue_depth(depth));
        }
        debug!("decode thread finished");
    }

    fn process(&mut self, packet: &VideoPacket) {
        let declared = packet.format.and_then(|f| f.screen_size);
        if let Some(size) = declared.filter(|_| !self.decoder.mid_rect()) {
            let stale = self.decoder.screen_size() != Some(size);
            if stale || self.decoder.state() == DecoderState::Error {
                if let Err(e) = Decoder::check_screen_size(size) {
                    warn!(%size, "refusing screen size");
                    self.report(e);
                    return;
                }
                debug!(%size, "decoder (re)initialized");
                self.decoder.initialize(size);
                self.consumer.on_desktop_size(size);
            }
        }

        let started = Instant::now();
        let result = self.decoder.decode_packet(packet);
        let decode_time = started.elapsed();
        self.stats.update(|s| s.record_packet(packet.wire_len(), decode_time));

        match result {
            Ok(DecodeStatus::InProgress) => {}
            Ok(DecodeStatus::Done) => self.render(packet.capture_time_us),
            Err(e) => self.report(e),
        }
    }

    fn report(&self, e: CodecError) {
        self.stats.update(VideoStats::record_error);
        let _ = self.errors.send(e);
    }

    fn render(&mut self, capture_time_us: Option<u64>) {
        let updated = self.decoder.take_updated_region();
        let rects = updated
            .rects()
            .iter()
            .filter_map(|rect| self.decoder.copy_rect(rect).map(|pixels| (*rect, pixels)))
            .collect();
        self.consumer.on_frame(FrameUpdate { rects, capture_time_us });

        let latency = capture_time_us
            .map(|t| Duration::from_micros(now_micros().saturating_sub(t)));
        self.stats.update(|s| s.record_frame(latency));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::video::{CaptureData, Encoder, Encoding, PacketFlags, PacketFormat, Region};

    fn frame(size: Size, fill: &[(Rect, [u8; 4])], dirty: &[Rect]) -> CaptureData {
        let mut buffer = FrameBuffer::new(size);
        for (rect, colour) in fill {
            buffer.fill_rect(rect, *colour);
        }
        CaptureData {
            buffer: Arc::new(buffer),
            dirty: dirty.iter().copied().collect::<Region>(),
            captured_at: Instant::now(),
            capture_time_us: now_micros(),
        }
    }

    fn encode(data: &CaptureData) -> Vec<VideoPacket> {
        let mut encoder = Encoder::new(Encoding::Zlib, 256).unwrap();
        let mut packets = Vec::new();
        encoder
            .encode::<CodecError, _>(data, |p| {
                packets.push(p);
                Ok(())
            })
            .unwrap();
        packets
    }

    #[tokio::test]
    async fn decoded_frames_reach_the_consumer() {
        let size = Size::new(40, 30);
        let screen = ScreenBuffer::new();
        let (decoder, _errors) = RectangleUpdateDecoder::start(Box::new(screen.clone()));

        let data = frame(
            size,
            &[(Rect::new(0, 0, 40, 30), [1, 2, 3, 255]), (Rect::new(5, 5, 10, 10), [9, 9, 9, 255])],
            &[Rect::from_size(size)],
        );
        for packet in encode(&data) {
            decoder.push(packet).await.unwrap();
        }
        decoder.close().await;

        assert_eq!(screen.frames(), 1);
        assert_eq!(screen.snapshot().unwrap(), *data.buffer);
    }

    #[tokio::test]
    async fn short_rectangle_is_reported_and_recovered() {
        let size = Size::new(10, 10);
        let screen = ScreenBuffer::new();
        let (decoder, mut errors) = RectangleUpdateDecoder::start(Box::new(screen.clone()));

        let mut first = VideoPacket::new(PacketFlags::FIRST_PACKET | PacketFlags::LAST_PACKET);
        first.format = Some(PacketFormat {
            rect: Rect::new(0, 0, 10, 10),
            screen_size: Some(size),
            encoding: Encoding::Verbatim,
        });
        first.data = vec![7; 60];
        decoder.push(first).await.unwrap();
        assert!(matches!(
            errors.recv().await,
            Some(CodecError::Underflow { filled: 60, expected: 400 })
        ));

        let data = frame(size, &[(Rect::new(0, 0, 10, 10), [4, 4, 4, 255])], &[Rect::from_size(size)]);
        for packet in encode(&data) {
            decoder.push(packet).await.unwrap();
        }
        let stats = decoder.stats();
        decoder.close().await;
        assert_eq!(stats.snapshot().decode_errors, 1);
        assert_eq!(stats.snapshot().frames, 1);
        assert_eq!(screen.snapshot().unwrap(), *data.buffer);
    }

    fn opening(rect: Rect, screen_size: Size, flags: PacketFlags, data: Vec<u8>) -> VideoPacket {
        let mut packet = VideoPacket::new(PacketFlags::FIRST_PACKET | flags);
        packet.format = Some(PacketFormat {
            rect,
            screen_size: Some(screen_size),
            encoding: Encoding::Verbatim,
        });
        packet.data = data;
        packet
    }

    #[tokio::test]
    async fn oversized_screen_is_refused_without_allocating() {
        let screen = ScreenBuffer::new();
        let (decoder, mut errors) = RectangleUpdateDecoder::start(Box::new(screen.clone()));

        let huge = Size::new(u32::MAX, u32::MAX);
        decoder
            .push(opening(Rect::new(0, 0, 1, 1), huge, PacketFlags::LAST_PACKET, vec![0; 4]))
            .await
            .unwrap();
        assert_eq!(errors.recv().await, Some(CodecError::ScreenTooLarge(huge.to_string())));
        assert!(screen.snapshot().is_none());

        let size = Size::new(12, 6);
        let data = frame(size, &[(Rect::new(0, 0, 12, 6), [8, 7, 6, 255])], &[Rect::from_size(size)]);
        for packet in encode(&data) {
            decoder.push(packet).await.unwrap();
        }
        let stats = decoder.stats();
        decoder.close().await;
        assert_eq!(stats.snapshot().decode_errors, 1);
        assert_eq!(screen.snapshot().unwrap(), *data.buffer);
    }

    #[tokio::test]
    async fn new_screen_size_inside_a_rectangle_is_out_of_order() {
        let screen = ScreenBuffer::new();
        let (decoder, mut errors) = RectangleUpdateDecoder::start(Box::new(screen.clone()));

        let rect = Rect::new(0, 0, 4, 4);
        decoder
            .push(opening(rect, Size::new(8, 8), PacketFlags::empty(), vec![1; 16]))
            .await
            .unwrap();
        decoder
            .push(opening(rect, Size::new(16, 16), PacketFlags::LAST_PACKET, vec![2; 64]))
            .await
            .unwrap();
        assert!(matches!(errors.recv().await, Some(CodecError::OutOfOrder(_))));
        assert_eq!(screen.snapshot().map(|s| s.size()), Some(Size::new(8, 8)));

        let size = Size::new(16, 16);
        let data = frame(size, &[(Rect::new(0, 0, 16, 16), [3, 3, 3, 255])], &[Rect::from_size(size)]);
        for packet in encode(&data) {
            decoder.push(packet).await.unwrap();
        }
        decoder.close().await;
        assert_eq!(screen.frames(), 1);
        assert_eq!(screen.snapshot().unwrap(), *data.buffer);
    }

    #[tokio::test]
    async fn slow_consumer_backs_up_the_queue() {
        struct Slow {
            entered: mpsc::UnboundedSender<()>,
            release: Arc<std::sync::Barrier>,
        }
        impl FrameConsumer for Slow {
            fn on_desktop_size(&mut self, _: Size) {}
            fn on_frame(&mut self, _: FrameUpdate) {
                let _ = self.entered.send(());
                self.release.wait();
            }
        }

        let (entered_tx, mut entered) = mpsc::unbounded_channel();
        let barrier = Arc::new(std::sync::Barrier::new(2));
        let slow = Slow {
            entered: entered_tx,
            release: Arc::clone(&barrier),
        };
        let (decoder, _errors) = RectangleUpdateDecoder::start(Box::new(slow));

        let size = Size::new(8, 8);
        let packets = encode(&frame(size, &[], &[Rect::new(0, 0, 8, 8)]));
        assert_eq!(packets.len(), 1);
        let packet = packets[0].clone();

        // One frame parked in the consumer, then a full queue.
        decoder.push(packet.clone()).await.unwrap();
        entered.recv().await.unwrap();
        for _ in 0..DECODE_QUEUE {
            decoder.push(packet.clone()).await.unwrap();
        }
        assert_eq!(decoder.queue_depth(), DECODE_QUEUE);

        let mut blocked = tokio_test::task::spawn(decoder.push(packet.clone()));
        tokio_test::assert_pending!(blocked.poll());
        drop(blocked);
        assert_eq!(decoder.queue_depth(), DECODE_QUEUE);

        let release = tokio::task::spawn_blocking(move || {
            for _ in 0..=DECODE_QUEUE {
                barrier.wait();
            }
        });
        let stats = decoder.stats();
        decoder.close().await;
        release.await.unwrap();
        assert_eq!(stats.queue_depth(), 0);
        assert_eq!(stats.snapshot().frames, DECODE_QUEUE as u64 + 1);
    }
}
