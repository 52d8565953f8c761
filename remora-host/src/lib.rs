//! # remora-host: Remote Desktop Host Service
//!
//! Accepts viewers over a TCP signaling link, authenticates them with a
//! shared secret and streams a synthetic animated screen to them.
//! Input from viewers is logged; platform injection is not wired up.

pub mod config;
pub mod service;
