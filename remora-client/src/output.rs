//! Console output: connection state, statistics and frame dumps.

use std::io::{self, Write};
use std::path::Path;

use tracing::{info, warn};

use remora_core::client::{ClientUserInterface, ConnectionState, StatsSnapshot};
use remora_core::error::ErrorCode;
use remora_core::video::FrameBuffer;

/// Logs connection progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleUi;

impl ClientUserInterface for ConsoleUi {
    fn on_connection_state(&self, state: ConnectionState, error: ErrorCode) {
        match state {
            ConnectionState::Failed => warn!("connection failed: {error}"),
            _ => info!("connection {state}"),
        }
    }

    fn on_capabilities(&self, names: &[String]) {
        info!("host capabilities: {}", names.join(", "));
    }
}

/// Print one statistics report.
pub fn report_stats(stats: &StatsSnapshot, json: bool) {
    if json {
        match serde_json::to_string(stats) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("failed to serialize stats: {e}"),
        }
        return;
    }
    info!(
        "{} frames, {:.1} fps, {:.1} KiB/s, latency {:.1} ms, decode {:.2} ms, queue {}, errors {}",
        stats.frames,
        stats.frames_per_second,
        stats.bytes_per_second / 1024.0,
        stats.latency_ms,
        stats.decode_ms,
        stats.queue_depth,
        stats.decode_errors,
    );
}

/// Write `frame` as a binary PPM image.
pub fn write_ppm(frame: &FrameBuffer, out: &mut impl Write) -> io::Result<()> {
    let size = frame.size();
    write!(out, "P6\n{} {}\n255\n", size.width, size.height)?;
    let mut rgb = Vec::with_capacity(size.width as usize * size.height as usize * 3);
    for bgra in frame.data().chunks_exact(4) {
        rgb.extend_from_slice(&[bgra[2], bgra[1], bgra[0]]);
    }
    out.write_all(&rgb)
}

pub fn dump_frame(frame: &FrameBuffer, path: &Path) -> io::Result<()> {
    let mut file = io::BufWriter::new(std::fs::File::create(path)?);
    write_ppm(frame, &mut file)?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use remora_core::video::{Rect, Size};

    #[test]
    fn ppm_is_rgb() {
        let mut frame = FrameBuffer::new(Size::new(2, 1));
        frame.fill_rect(&Rect::new(0, 0, 1, 1), [1, 2, 3, 255]);
        let mut out = Vec::new();
        write_ppm(&frame, &mut out).unwrap();
        assert_eq!(out, b"P6\n2 1\n255\n\x03\x02\x01\x00\x00\x00");
    }

    #[test]
    fn stats_serialize_as_json() {
        let text = serde_json::to_string(&StatsSnapshot::default()).unwrap();
        assert!(text.contains("\"frames_per_second\":0.0"));
    }
}
