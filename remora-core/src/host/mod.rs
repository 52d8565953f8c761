//! Host side: screen capture, the recorder loop and client sessions.

pub mod capturer;
pub mod client_session;
pub mod input;
pub mod pattern;
pub mod screen_recorder;
pub mod service;
pub mod status;

pub use capturer::{CaptureSource, Capturer};
pub use client_session::ClientSession;
pub use input::{InputStub, InputTracker, LoggingInputStub};
pub use pattern::PatternSource;
pub use screen_recorder::{FrameObserver, FrameStats, ScreenRecorder, ScreenRecorderConfig};
pub use service::{Host, HostConfig};
pub use status::{HostState, HostStatusMonitor, HostStatusObserver};
