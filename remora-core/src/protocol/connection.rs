//! One logical host/client connection on top of a session.
//!
//! A [`Connection`] waits for its session to authenticate, then opens the
//! control, event and video channels concurrently. Only when all three are
//! connected are the typed stubs published and `Connected` reported. When
//! the session ends the stubs are withdrawn, the channels dropped and a
//! single `Closed` event is emitted.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ErrorCode;
use crate::protocol::channel::{CHANNEL_QUEUE, ChannelGuard, ChannelWriter, spawn_channel};
use crate::protocol::message::{ControlMessage, EventMessage};
use crate::protocol::session_config::{CONTROL_CHANNEL, EVENT_CHANNEL, VIDEO_CHANNEL};
use crate::protocol::session_manager::SessionHandle;
use crate::video::VideoPacket;

/// What a connection reports to its owner, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The session passed authentication; channels are being opened.
    Authenticated,
    /// All three channels are up; the stubs are usable.
    Connected,
    Control(ControlMessage),
    Input(EventMessage),
    Video(VideoPacket),
    /// Emitted exactly once, last.
    Closed(ErrorCode),
}

struct Stubs {
    control: ChannelWriter<ControlMessage>,
    event: ChannelWriter<EventMessage>,
    video: ChannelWriter<VideoPacket>,
    _guards: [ChannelGuard; 3],
}

pub struct Connection {
    session: SessionHandle,
    stubs: watch::Receiver<Option<Stubs>>,
    task: JoinHandle<()>,
}

impl Connection {
    /// Start driving `session`. Events arrive on the returned receiver.
    pub fn new(session: SessionHandle) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (events_tx, events) = mpsc::channel(CHANNEL_QUEUE);
        let (stubs_tx, stubs) = watch::channel(None);
        let task = tokio::spawn(drive(session.clone(), events_tx, stubs_tx));
        (
            Self {
                session,
                stubs,
                task,
            },
            events,
        )
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// True between `Connected` and teardown.
    pub fn is_connected(&self) -> bool {
        self.stubs.borrow().is_some()
    }

    pub fn control_stub(&self) -> Option<ChannelWriter<ControlMessage>> {
        self.stubs.borrow().as_ref().map(|s| s.control.clone())
    }

    pub fn event_stub(&self) -> Option<ChannelWriter<EventMessage>> {
        self.stubs.borrow().as_ref().map(|s| s.event.clone())
    }

    pub fn video_stub(&self) -> Option<ChannelWriter<VideoPacket>> {
        self.stubs.borrow().as_ref().map(|s| s.video.clone())
    }

    pub async fn disconnect(&self) {
        self.session.close().await;
    }

    /// Non-blocking close; safe from inside event handlers.
    pub fn request_disconnect(&self, code: ErrorCode) {
        self.session.request_close(code);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drive(
    session: SessionHandle,
    events: mpsc::Sender<ConnectionEvent>,
    stubs: watch::Sender<Option<Stubs>>,
) {
    let code = run(&session, &events, &stubs).await;
    stubs.send_replace(None);
    debug!(sid = session.id(), reason = %code, "connection closed");
    let _ = events.send(ConnectionEvent::Closed(code)).await;
}

async fn run(
    session: &SessionHandle,
    events: &mpsc::Sender<ConnectionEvent>,
    stubs: &watch::Sender<Option<Stubs>>,
) -> ErrorCode {
    if session.authenticated().await.is_err() {
        return session.status().error;
    }
    if events.send(ConnectionEvent::Authenticated).await.is_err() {
        session.close().await;
        return ErrorCode::Ok;
    }

    let opened = tokio::try_join!(
        session.create_channel(CONTROL_CHANNEL),
        session.create_channel(EVENT_CHANNEL),
        session.create_channel(VIDEO_CHANNEL),
    );
    let (control, event, video) = match opened {
        Ok(streams) => streams,
        Err(e) => {
            let status = session.status();
            if status.state.is_terminal() {
                return status.error;
            }
            warn!(sid = session.id(), error = %e, "failed to open channels");
            for name in [CONTROL_CHANNEL, EVENT_CHANNEL, VIDEO_CHANNEL] {
                session.cancel_channel(name).await;
            }
            session.close_with(ErrorCode::ChannelConnectionError).await;
            return ErrorCode::ChannelConnectionError;
        }
    };

    let (control_tx, mut control_rx, control_guard) = spawn_channel::<ControlMessage, ControlMessage>(control);
    let (event_tx, mut event_rx, event_guard) = spawn_channel::<EventMessage, EventMessage>(event);
    let (video_tx, mut video_rx, video_guard) = spawn_channel::<VideoPacket, VideoPacket>(video);
    stubs.send_replace(Some(Stubs {
        control: control_tx,
        event: event_tx,
        video: video_tx,
        _guards: [control_guard, event_guard, video_guard],
    }));
    info!(sid = session.id(), peer = session.peer_jid(), "connection established");
    if events.send(ConnectionEvent::Connected).await.is_err() {
        session.close().await;
        return ErrorCode::Ok;
    }

    let closed = session.closed();
    tokio::pin!(closed);
    let (mut control_open, mut event_open, mut video_open) = (true, true, true);

    loop {
        let event = tokio::select! {
            code = &mut closed => return code,
            message = control_rx.recv(), if control_open => match message {
                Some(message) => ConnectionEvent::Control(message),
                None => {
                    control_open = false;
                    warn!(sid = session.id(), channel = CONTROL_CHANNEL, "channel closed by peer");
                    continue;
                }
            },
            message = event_rx.recv(), if event_open => match message {
                Some(message) => ConnectionEvent::Input(message),
                None => {
                    event_open = false;
                    debug!(sid = session.id(), channel = EVENT_CHANNEL, "channel closed by peer");
                    continue;
                }
            },
            packet = video_rx.recv(), if video_open => match packet {
                Some(packet) => ConnectionEvent::Video(packet),
                None => {
                    video_open = false;
                    debug!(sid = session.id(), channel = VIDEO_CHANNEL, "channel closed by peer");
                    continue;
                }
            },
        };
        if events.send(event).await.is_err() {
            session.close().await;
            return ErrorCode::Ok;
        }
    }
}
