//! Host-side state of one connected client.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ErrorCode;
use crate::host::input::{InputStub, InputTracker};
use crate::host::screen_recorder::ScreenRecorder;
use crate::host::status::HostStatusObserver;
use crate::protocol::connection::{Connection, ConnectionEvent};
use crate::protocol::message::ControlMessage;
use crate::protocol::session_manager::SessionHandle;

/// Capability names the host announces on the control channel.
pub const HOST_CAPABILITIES: &[&str] = &["video-control", "client-resolution"];

pub struct ClientSession {
    id: String,
    jid: String,
    connection: Connection,
    events: mpsc::Receiver<ConnectionEvent>,
    recorder: ScreenRecorder,
    input: InputTracker,
    observers: Arc<[Arc<dyn HostStatusObserver>]>,
    authenticated: bool,
}

impl ClientSession {
    pub fn new(
        session: SessionHandle,
        recorder: ScreenRecorder,
        input: Arc<dyn InputStub>,
        observers: Arc<[Arc<dyn HostStatusObserver>]>,
    ) -> Self {
        let id = session.id().to_string();
        let jid = session.peer_jid().to_string();
        let (connection, events) = Connection::new(session);
        Self {
            id,
            jid,
            connection,
            events,
            recorder,
            input: InputTracker::new(input),
            observers,
            authenticated: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client_jid(&self) -> &str {
        &self.jid
    }

    /// Drive the client until its connection closes; returns the reason.
    pub async fn run(mut self) -> ErrorCode {
        while let Some(event) = self.events.recv().await {
            if let Some(code) = self.handle(event).await {
                return code;
            }
        }
        ErrorCode::Ok
    }

    async fn handle(&mut self, event: ConnectionEvent) -> Option<ErrorCode> {
        match event {
            ConnectionEvent::Authenticated => {
                self.authenticated = true;
                info!(sid = %self.id, client = %self.jid, "client authenticated");
                for observer in self.observers.iter() {
                    observer.on_client_authenticated(&self.jid);
                }
            }
            ConnectionEvent::Connected => {
                if let Some(control) = self.connection.control_stub() {
                    let names = HOST_CAPABILITIES.iter().map(|s| s.to_string()).collect();
                    if let Err(e) = control.send(ControlMessage::Capabilities { names }).await {
                        warn!(sid = %self.id, error = %e, "failed to announce capabilities");
                    }
                }
                if let Some(video) = self.connection.video_stub() {
                    self.recorder.add_connection(&self.id, video);
                }
            }
            ConnectionEvent::Control(ControlMessage::VideoControl { enable }) => {
                self.recorder.set_video_enabled(&self.id, enable);
            }
            ConnectionEvent::Control(ControlMessage::ClientResolution { width, height }) => {
                debug!(sid = %self.id, width, height, "client resolution");
            }
            ConnectionEvent::Control(ControlMessage::Capabilities { names }) => {
                debug!(sid = %self.id, ?names, "client capabilities");
            }
            ConnectionEvent::Input(event) => self.input.inject(&event),
            ConnectionEvent::Video(_) => {
                debug!(sid = %self.id, "ignoring video from client");
            }
            ConnectionEvent::Closed(code) => {
                self.recorder.remove_connection(&self.id);
                self.input.release_all();
                for observer in self.observers.iter() {
                    if self.authenticated {
                        observer.on_client_disconnected(&self.jid);
                    } else if code == ErrorCode::AuthenticationFailed {
                        observer.on_access_denied(&self.jid);
                    }
                }
                info!(sid = %self.id, client = %self.jid, reason = %code, "client session ended");
                return Some(code);
            }
        }
        None
    }
}
