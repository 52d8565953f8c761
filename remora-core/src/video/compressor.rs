//! Streaming compressors used by the row-based codec.
//!
//! Both sides expose the same incremental shape: feed some input, offer an
//! output window, learn how much was consumed and written. That lets the
//! encoder fill fixed-size packets and the decoder fill exact row budgets
//! without ever buffering a whole rectangle.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::CodecError;
use crate::video::packet::Encoding;

/// Whether the caller is handing over the final bytes of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    None,
    Finish,
}

/// Outcome of one incremental step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub consumed: usize,
    pub written: usize,
    /// More output can be produced by calling again.
    pub more: bool,
}

// ── Compressor ───────────────────────────────────────────────────

pub enum Compressor {
    Verbatim,
    Zlib(Box<Compress>),
}

impl Compressor {
    pub fn for_encoding(encoding: Encoding) -> Result<Self, CodecError> {
        match encoding {
            Encoding::Verbatim => Ok(Compressor::Verbatim),
            Encoding::Zlib => Ok(Compressor::Zlib(Box::new(Compress::new(
                Compression::fast(),
                true,
            )))),
            Encoding::Vp8 => Err(CodecError::UnsupportedEncoding(encoding.to_string())),
        }
    }

    /// Start a fresh stream. Called once per rectangle.
    pub fn reset(&mut self) {
        if let Compressor::Zlib(z) = self {
            z.reset();
        }
    }

    pub fn process(
        &mut self,
        input: &[u8],
        output: &mut [u8],
        flush: Flush,
    ) -> Result<Progress, CodecError> {
        match self {
            Compressor::Verbatim => {
                let n = input.len().min(output.len());
                output[..n].copy_from_slice(&input[..n]);
                Ok(Progress {
                    consumed: n,
                    written: n,
                    more: !(flush == Flush::Finish && n == input.len()),
                })
            }
            Compressor::Zlib(z) => {
                let before_in = z.total_in();
                let before_out = z.total_out();
                let mode = match flush {
                    Flush::None => FlushCompress::None,
                    Flush::Finish => FlushCompress::Finish,
                };
                let status = z
                    .compress(input, output, mode)
                    .map_err(|e| CodecError::Compression(e.to_string()))?;
                Ok(Progress {
                    consumed: (z.total_in() - before_in) as usize,
                    written: (z.total_out() - before_out) as usize,
                    more: !(flush == Flush::Finish && status == Status::StreamEnd),
                })
            }
        }
    }
}

// ── Decompressor ─────────────────────────────────────────────────

pub enum Decompressor {
    Verbatim,
    Zlib(Box<Decompress>),
}

impl Decompressor {
    pub fn for_encoding(encoding: Encoding) -> Result<Self, CodecError> {
        match encoding {
            Encoding::Verbatim => Ok(Decompressor::Verbatim),
            Encoding::Zlib => Ok(Decompressor::Zlib(Box::new(Decompress::new(true)))),
            Encoding::Vp8 => Err(CodecError::UnsupportedEncoding(encoding.to_string())),
        }
    }

    pub fn reset(&mut self) {
        if let Decompressor::Zlib(z) = self {
            z.reset(true);
        }
    }

    /// `more` is false once the compressed stream has ended.
    pub fn process(&mut self, input: &[u8], output: &mut [u8]) -> Result<Progress, CodecError> {
        match self {
            Decompressor::Verbatim => {
                let n = input.len().min(output.len());
                output[..n].copy_from_slice(&input[..n]);
                Ok(Progress {
                    consumed: n,
                    written: n,
                    more: true,
                })
            }
            Decompressor::Zlib(z) => {
                let before_in = z.total_in();
                let before_out = z.total_out();
                let status = z
                    .decompress(input, output, FlushDecompress::None)
                    .map_err(|e| CodecError::Compression(e.to_string()))?;
                Ok(Progress {
                    consumed: (z.total_in() - before_in) as usize,
                    written: (z.total_out() - before_out) as usize,
                    more: status != Status::StreamEnd,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squeeze(c: &mut Compressor, input: &[u8], window: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; window];
        let mut pos = 0;
        loop {
            let p = c.process(&input[pos..], &mut buf, Flush::Finish).unwrap();
            pos += p.consumed;
            out.extend_from_slice(&buf[..p.written]);
            if !p.more {
                return out;
            }
        }
    }

    #[test]
    fn verbatim_copies_through_small_windows() {
        let mut c = Compressor::for_encoding(Encoding::Verbatim).unwrap();
        let input: Vec<u8> = (0..=255).collect();
        assert_eq!(squeeze(&mut c, &input, 7), input);
    }

    #[test]
    fn zlib_stream_inflates_back() {
        let mut c = Compressor::for_encoding(Encoding::Zlib).unwrap();
        let input: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let compressed = squeeze(&mut c, &input, 64);
        assert!(compressed.len() < input.len());

        let mut d = Decompressor::for_encoding(Encoding::Zlib).unwrap();
        let mut out = vec![0u8; input.len()];
        let p = d.process(&compressed, &mut out).unwrap();
        assert_eq!(p.written, input.len());
        assert!(!p.more);
        assert_eq!(out, input);
    }

    #[test]
    fn reset_starts_a_new_stream() {
        let mut c = Compressor::for_encoding(Encoding::Zlib).unwrap();
        let first = squeeze(&mut c, b"hello hello hello", 256);
        c.reset();
        let second = squeeze(&mut c, b"hello hello hello", 256);
        assert_eq!(first, second);
    }

    #[test]
    fn vp8_is_not_row_based() {
        assert!(matches!(
            Compressor::for_encoding(Encoding::Vp8),
            Err(CodecError::UnsupportedEncoding(_))
        ));
        assert!(Decompressor::for_encoding(Encoding::Vp8).is_err());
    }
}
