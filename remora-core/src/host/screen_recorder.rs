//! Host-side capture → encode → send loop.
//!
//! The recorder runs as one task that owns the [`Capturer`], the
//! [`Encoder`] and the attached video channels. A cycle captures a frame
//! on the blocking pool, streams the encoder's packets back to the task
//! and sends each packet to every enabled connection, waiting until the
//! socket write completes. The next capture starts only after the last
//! packet of the frame was written, so a slow network slows capture down.
//!
//! # Stopping
//!
//! [`request_stop`](ScreenRecorder::request_stop) only sets a flag and is
//! safe from anywhere, including a [`FrameObserver`] callback. The task
//! notices the flag at the next packet or cycle boundary, cancels the
//! frame in flight and exits; [`stop`](ScreenRecorder::stop) resolves
//! after that.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::error::RemotingError;
use crate::host::capturer::Capturer;
use crate::protocol::channel::ChannelWriter;
use crate::video::encoder::DEFAULT_PACKET_SIZE;
use crate::video::{CaptureData, Encoder, Encoding, VideoPacket};

/// Packets buffered between the encoder thread and the sender.
const ENCODE_QUEUE: usize = 4;

// ── ScreenRecorderConfig ─────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ScreenRecorderConfig {
    /// Upper bound on the capture rate.
    pub max_fps: u32,
    pub packet_size: usize,
    pub encoding: Encoding,
}

impl Default for ScreenRecorderConfig {
    fn default() -> Self {
        Self {
            max_fps: 30,
            packet_size: DEFAULT_PACKET_SIZE,
            encoding: Encoding::Zlib,
        }
    }
}

// ── FrameObserver ────────────────────────────────────────────────

/// Per-frame numbers reported after every packet of a frame was sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Sequence number of the frame, starting at 1.
    pub frame: u64,
    pub rects: usize,
    pub packets: usize,
    pub bytes: usize,
    /// Connections the frame was sent to.
    pub connections: usize,
    pub capture_time: Duration,
    pub encode_time: Duration,
}

pub trait FrameObserver: Send + Sync {
    fn on_frame_sent(&self, stats: &FrameStats);
}

// ── ScreenRecorder ───────────────────────────────────────────────

enum Command {
    AddConnection {
        id: String,
        video: ChannelWriter<VideoPacket>,
    },
    RemoveConnection {
        id: String,
    },
    SetEnabled {
        id: String,
        enabled: bool,
    },
    InvalidateFullScreen,
    Stop {
        done: oneshot::Sender<()>,
    },
}

/// Handle to a running recorder. Clones share the same task.
#[derive(Clone)]
pub struct ScreenRecorder {
    commands: mpsc::UnboundedSender<Command>,
    stop_requested: Arc<AtomicBool>,
}

impl ScreenRecorder {
    /// Spawn the recorder task. Capturing starts immediately, with or
    /// without connections.
    pub fn start(
        capturer: Capturer,
        config: ScreenRecorderConfig,
        observer: Option<Arc<dyn FrameObserver>>,
    ) -> Result<Self, RemotingError> {
        let encoder = Encoder::new(config.encoding, config.packet_size)?;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let stop_requested = Arc::new(AtomicBool::new(false));

        let recorder = Recorder {
            capturer: Some(capturer),
            encoder: Some(encoder),
            connections: HashMap::new(),
            frame_interval: Duration::from_secs_f64(1.0 / f64::from(config.max_fps.max(1))),
            frames: 0,
            observer,
            stop_requested: Arc::clone(&stop_requested),
            stop_waiters: Vec::new(),
        };
        info!(encoding = %config.encoding, max_fps = config.max_fps, "screen recorder started");
        tokio::spawn(recorder.run(command_rx));

        Ok(Self {
            commands,
            stop_requested,
        })
    }

    /// Start sending frames to `id`. The next frame is a full screen.
    pub fn add_connection(&self, id: &str, video: ChannelWriter<VideoPacket>) {
        let _ = self.commands.send(Command::AddConnection {
            id: id.to_string(),
            video,
        });
    }

    pub fn remove_connection(&self, id: &str) {
        let _ = self.commands.send(Command::RemoveConnection { id: id.to_string() });
    }

    /// Pause or resume video for one connection.
    pub fn set_video_enabled(&self, id: &str, enabled: bool) {
        let _ = self.commands.send(Command::SetEnabled {
            id: id.to_string(),
            enabled,
        });
    }

    pub fn invalidate_full_screen(&self) {
        let _ = self.commands.send(Command::InvalidateFullScreen);
    }

    /// First phase of shutdown; never blocks.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Stop the recorder. The request is queued immediately; the returned
    /// future resolves once the frame in flight was finished or cancelled
    /// and the task is gone. Dropping the future does not cancel the stop.
    pub fn stop(&self) -> impl Future<Output = ()> + Send + 'static {
        self.request_stop();
        let (done, finished) = oneshot::channel();
        let _ = self.commands.send(Command::Stop { done });
        async move {
            let _ = finished.await;
        }
    }
}

// ── Recorder task ────────────────────────────────────────────────

struct Attached {
    video: ChannelWriter<VideoPacket>,
    enabled: bool,
}

struct Recorder {
    // Both are moved to the blocking pool during a cycle.
    capturer: Option<Capturer>,
    encoder: Option<Encoder>,
    connections: HashMap<String, Attached>,
    frame_interval: Duration,
    frames: u64,
    observer: Option<Arc<dyn FrameObserver>>,
    stop_requested: Arc<AtomicBool>,
    stop_waiters: Vec<oneshot::Sender<()>>,
}

impl Recorder {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let reason = self.cycle_loop(&mut commands).await;
        debug!(reason, frames = self.frames, "screen recorder stopped");

        // Late Stop commands queued before the receiver goes away.
        commands.close();
        while let Ok(command) = commands.try_recv() {
            if let Command::Stop { done } = command {
                self.stop_waiters.push(done);
            }
        }
        for done in self.stop_waiters.drain(..) {
            let _ = done.send(());
        }
    }

    async fn cycle_loop(&mut self, commands: &mut mpsc::UnboundedReceiver<Command>) -> &'static str {
        loop {
            while let Ok(command) = commands.try_recv() {
                self.apply(command);
            }
            if self.stopping() {
                return "stop requested";
            }

            let started = Instant::now();
            match self.capture().await {
                Ok(Some(frame)) => {
                    if let Err(e) = self.encode_and_send(frame, started).await {
                        return e;
                    }
                }
                Ok(None) => {}
                Err(e) => return e,
            }
            if self.stopping() {
                return "stop requested";
            }

            // Pace, while staying responsive to commands.
            let next = tokio::time::Instant::from_std(started + self.frame_interval);
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(next) => break,
                    command = commands.recv() => match command {
                        Some(command) => {
                            self.apply(command);
                            if self.stopping() {
                                return "stop requested";
                            }
                        }
                        None => return "all handles dropped",
                    },
                }
            }
        }
    }

    fn stopping(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::AddConnection { id, video } => {
                debug!(%id, "video connection added");
                self.connections.insert(id, Attached { video, enabled: true });
                self.invalidate_full_screen();
            }
            Command::RemoveConnection { id } => {
                if self.connections.remove(&id).is_some() {
                    debug!(%id, "video connection removed");
                }
            }
            Command::SetEnabled { id, enabled } => {
                let Some(attached) = self.connections.get_mut(&id) else {
                    return;
                };
                let resumed = enabled && !attached.enabled;
                attached.enabled = enabled;
                debug!(%id, enabled, "video toggled");
                if resumed {
                    self.invalidate_full_screen();
                }
            }
            Command::InvalidateFullScreen => self.invalidate_full_screen(),
            Command::Stop { done } => {
                self.stop_requested.store(true, Ordering::SeqCst);
                self.stop_waiters.push(done);
            }
        }
    }

    fn invalidate_full_screen(&mut self) {
        if let Some(capturer) = self.capturer.as_mut() {
            capturer.invalidate_full_screen();
        }
    }

    fn has_receivers(&self) -> bool {
        self.connections.values().any(|c| c.enabled)
    }

    /// Capture one frame on the blocking pool. `Ok(None)` means the frame
    /// is not worth encoding (capture failed transiently or nobody is
    /// listening).
    async fn capture(&mut self) -> Result<Option<CaptureData>, &'static str> {
        let Some(mut capturer) = self.capturer.take() else {
            return Err("capturer lost");
        };
        let joined = tokio::task::spawn_blocking(move || {
            let result = capturer.capture();
            (capturer, result)
        })
        .await;
        let (capturer, result) = match joined {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "capture task failed");
                return Err("capture task failed");
            }
        };
        self.capturer = Some(capturer);

        match result {
            Ok(frame) if self.has_receivers() => Ok(Some(frame)),
            Ok(_) => Ok(None),
            Err(e) => {
                // The next cycle retries.
                warn!(error = %e, "capture failed");
                Ok(None)
            }
        }
    }

    async fn encode_and_send(&mut self, frame: CaptureData, started: Instant) -> Result<(), &'static str> {
        let Some(mut encoder) = self.encoder.take() else {
            return Err("encoder lost");
        };
        let capture_time = started.elapsed();
        let rects = frame.dirty.len();

        let (packet_tx, mut packets) = mpsc::channel::<VideoPacket>(ENCODE_QUEUE);
        let encoding = tokio::task::spawn_blocking(move || {
            let begun = Instant::now();
            let result = encoder.encode::<RemotingError, _>(&frame, |packet| {
                packet_tx.blocking_send(packet).map_err(|_| RemotingError::ChannelClosed)
            });
            (encoder, result, begun.elapsed())
        });

        let mut stats = FrameStats {
            rects,
            capture_time,
            ..FrameStats::default()
        };
        let mut cancelled = false;
        while let Some(packet) = packets.recv().await {
            if self.stopping() {
                cancelled = true;
                break;
            }
            stats.packets += 1;
            stats.bytes += packet.wire_len();
            stats.connections = self.send_to_all(packet).await;
        }
        // Unblocks the encoder if the frame was cancelled.
        drop(packets);

        let (encoder, result, encode_time) = match encoding.await {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "encode task failed");
                return Err("encode task failed");
            }
        };
        self.encoder = Some(encoder);
        stats.encode_time = encode_time;

        if cancelled {
            debug!("frame cancelled by stop");
            return Ok(());
        }
        if let Err(e) = result {
            warn!(error = %e, "encoding failed");
            return Ok(());
        }
        if stats.packets == 0 {
            return Ok(());
        }

        self.frames += 1;
        stats.frame = self.frames;
        trace!(
            frame = stats.frame,
            rects = stats.rects,
            packets = stats.packets,
            bytes = stats.bytes,
            "frame sent"
        );
        if let Some(observer) = &self.observer {
            observer.on_frame_sent(&stats);
        }
        Ok(())
    }

    /// Send one packet to every enabled connection and wait for all
    /// writes. Connections whose channel failed are dropped.
    async fn send_to_all(&mut self, packet: VideoPacket) -> usize {
        let targets: Vec<(String, ChannelWriter<VideoPacket>)> = self
            .connections
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(id, c)| (id.clone(), c.video.clone()))
            .collect();

        let results = join_all(
            targets
                .iter()
                .map(|(_, video)| video.send_and_wait(packet.clone())),
        )
        .await;

        let mut delivered = 0;
        for ((id, _), result) in targets.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(%id, error = %e, "video channel failed, detaching");
                    self.connections.remove(id);
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::error::RemotingError;
    use crate::host::capturer::CaptureSource;
    use crate::host::pattern::PatternSource;
    use crate::protocol::channel::spawn_channel;
    use crate::protocol::transport::connected_pair;
    use crate::video::{Decoder, FrameBuffer, Region, Size};

    struct Counter(mpsc::UnboundedSender<FrameStats>);

    impl FrameObserver for Counter {
        fn on_frame_sent(&self, stats: &FrameStats) {
            let _ = self.0.send(*stats);
        }
    }

    fn counter() -> (Arc<Counter>, mpsc::UnboundedReceiver<FrameStats>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Counter(tx)), rx)
    }

    fn fast() -> ScreenRecorderConfig {
        ScreenRecorderConfig {
            max_fps: 200,
            ..ScreenRecorderConfig::default()
        }
    }

    #[tokio::test]
    async fn frames_reach_an_attached_connection() {
        let size = Size::new(96, 64);
        let capturer = Capturer::new(Box::new(PatternSource::new(size)));
        let (observer, mut sent) = counter();
        let recorder = ScreenRecorder::start(capturer, fast(), Some(observer)).unwrap();

        let (host_end, client_end) = connected_pair("video").await;
        let (video_tx, _video_rx, _host_guard) = spawn_channel::<VideoPacket, VideoPacket>(host_end);
        let (_client_tx, mut packets, _client_guard) = spawn_channel::<VideoPacket, VideoPacket>(client_end);
        recorder.add_connection("c1", video_tx);

        let mut decoder = Decoder::new();
        decoder.initialize(size);
        let mut complete = 0;
        while complete < 3 {
            let packet = packets.recv().await.unwrap();
            if decoder.decode_packet(&packet).unwrap() == crate::video::DecodeStatus::Done {
                complete += 1;
            }
        }
        let first = sent.recv().await.unwrap();
        assert_eq!(first.frame, 1);
        assert_eq!(first.connections, 1);
        assert!(first.packets >= 1);

        recorder.stop().await;
        assert!(recorder.is_stopping());
    }

    #[tokio::test]
    async fn stop_from_a_frame_callback_ends_capturing() {
        struct StopOnSecond {
            recorder: std::sync::OnceLock<ScreenRecorder>,
            seen: AtomicUsize,
            stopped: Mutex<Option<oneshot::Sender<()>>>,
        }
        impl FrameObserver for StopOnSecond {
            fn on_frame_sent(&self, stats: &FrameStats) {
                self.seen.fetch_add(1, Ordering::SeqCst);
                if stats.frame == 2 {
                    if let Some(recorder) = self.recorder.get() {
                        let stopped = recorder.stop();
                        let notify = self.stopped.lock().ok().and_then(|mut s| s.take());
                        tokio::spawn(async move {
                            stopped.await;
                            if let Some(notify) = notify {
                                let _ = notify.send(());
                            }
                        });
                    }
                }
            }
        }

        let (stopped_tx, stopped_rx) = oneshot::channel();
        let observer = Arc::new(StopOnSecond {
            recorder: std::sync::OnceLock::new(),
            seen: AtomicUsize::new(0),
            stopped: Mutex::new(Some(stopped_tx)),
        });
        let capturer = Capturer::new(Box::new(PatternSource::new(Size::new(64, 64))));
        let recorder = ScreenRecorder::start(capturer, fast(), Some(observer.clone())).unwrap();
        let _ = observer.recorder.set(recorder.clone());

        let (host_end, client_end) = connected_pair("video").await;
        let (video_tx, _rx, _g1) = spawn_channel::<VideoPacket, VideoPacket>(host_end);
        let (_tx, mut packets, _g2) = spawn_channel::<VideoPacket, VideoPacket>(client_end);
        recorder.add_connection("c1", video_tx);
        tokio::spawn(async move { while packets.recv().await.is_some() {} });

        tokio::time::timeout(Duration::from_secs(5), stopped_rx)
            .await
            .expect("stop completed")
            .unwrap();
        let seen = observer.seen.load(Ordering::SeqCst);
        assert_eq!(seen, 2);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(observer.seen.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn captures_never_overlap() {
        struct Guarded {
            inside: Arc<AtomicUsize>,
            grabs: Arc<AtomicUsize>,
            inner: PatternSource,
        }
        impl CaptureSource for Guarded {
            fn size(&self) -> Size {
                self.inner.size()
            }
            fn grab(&mut self, buffer: &mut FrameBuffer) -> Result<Option<Region>, RemotingError> {
                assert_eq!(self.inside.fetch_add(1, Ordering::SeqCst), 0, "overlapping capture");
                std::thread::sleep(Duration::from_millis(2));
                let result = self.inner.grab(buffer);
                self.inside.fetch_sub(1, Ordering::SeqCst);
                self.grabs.fetch_add(1, Ordering::SeqCst);
                result
            }
        }

        let inside = Arc::new(AtomicUsize::new(0));
        let grabs = Arc::new(AtomicUsize::new(0));
        let capturer = Capturer::new(Box::new(Guarded {
            inside: inside.clone(),
            grabs: grabs.clone(),
            inner: PatternSource::new(Size::new(64, 64)),
        }));
        let recorder = ScreenRecorder::start(capturer, fast(), None).unwrap();
        for _ in 0..10 {
            recorder.invalidate_full_screen();
            tokio::time::sleep(Duration::from_millis(3)).await;
        }
        recorder.stop().await;
        assert!(grabs.load(Ordering::SeqCst) > 1);
        assert_eq!(inside.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn paused_connections_get_nothing() {
        let capturer = Capturer::new(Box::new(PatternSource::new(Size::new(64, 64))));
        let (observer, mut sent) = counter();
        let recorder = ScreenRecorder::start(capturer, fast(), Some(observer)).unwrap();

        let (host_end, client_end) = connected_pair("video").await;
        let (video_tx, _rx, _g1) = spawn_channel::<VideoPacket, VideoPacket>(host_end);
        let (_tx, mut packets, _g2) = spawn_channel::<VideoPacket, VideoPacket>(client_end);
        recorder.add_connection("c1", video_tx);
        assert!(sent.recv().await.is_some());

        recorder.set_video_enabled("c1", false);
        // Drain whatever was in flight, then expect silence.
        tokio::time::sleep(Duration::from_millis(50)).await;
        while packets.try_recv().is_ok() {}
        assert!(
            tokio::time::timeout(Duration::from_millis(100), packets.recv())
                .await
                .is_err()
        );

        recorder.set_video_enabled("c1", true);
        let packet = packets.recv().await.unwrap();
        assert!(packet.is_first());
        recorder.stop().await;
    }

    #[tokio::test]
    async fn vp8_is_not_accepted() {
        let capturer = Capturer::new(Box::new(PatternSource::new(Size::new(8, 8))));
        let config = ScreenRecorderConfig {
            encoding: Encoding::Vp8,
            ..ScreenRecorderConfig::default()
        };
        assert!(ScreenRecorder::start(capturer, config, None).is_err());
    }
}
