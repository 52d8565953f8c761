//! # remora-client: Headless Remote Desktop Viewer
//!
//! Dials a host's signaling port, authenticates with the shared secret,
//! decodes the video stream into a local screen buffer and reports frame
//! statistics. The last frame can be written out as an image on exit.

pub mod config;
pub mod output;
