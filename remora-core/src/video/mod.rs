//! Screen-update pipeline primitives: geometry, frame buffers, the
//! row-based codec and change detection.

pub mod compressor;
pub mod decoder;
pub mod differ;
pub mod encoder;
pub mod packet;
pub mod types;

pub use decoder::{DecodeStatus, Decoder, DecoderState};
pub use differ::Differ;
pub use encoder::Encoder;
pub use packet::{Encoding, PacketFlags, PacketFormat, VideoPacket};
pub use types::{CaptureData, FrameBuffer, Rect, Region, Size};
