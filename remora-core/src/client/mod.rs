//! Client side: the viewer's connection, video decoding and statistics.

pub mod rectangle_update_decoder;
pub mod service;
pub mod stats;

pub use rectangle_update_decoder::{
    DecoderStats, FrameConsumer, FrameUpdate, RectangleUpdateDecoder, ScreenBuffer,
};
pub use service::{Client, ClientConfig, ClientUserInterface, ConnectionState};
pub use stats::{RateCounter, StatsSnapshot, VideoStats};
