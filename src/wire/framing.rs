//! Byte-stuffed message framing
//!
//! `0xFF` ends a message. Literal `0xFE` and `0xFF` inside a payload are sent
//! as `0xFE 0x00` and `0xFE 0x01`.

use crate::{Result, TicklineError};

/// End-of-message sentinel
pub const FRAME_END: u8 = 0xFF;
/// Escape prefix
pub const FRAME_ESCAPE: u8 = 0xFE;

/// Escape `payload` and terminate it
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    for &byte in payload {
        match byte {
            FRAME_ESCAPE => out.extend_from_slice(&[FRAME_ESCAPE, 0x00]),
            FRAME_END => out.extend_from_slice(&[FRAME_ESCAPE, 0x01]),
            other => out.push(other),
        }
    }
    out.push(FRAME_END);
    out
}

/// Incremental decoder reassembling frames split across reads
#[derive(Debug, Default)]
pub struct FrameDecoder {
    current: Vec<u8>,
    escaped: bool,
}

impl FrameDecoder {
    /// Fresh decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes; returns every payload completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut frames = Vec::new();
        for &byte in bytes {
            if self.escaped {
                self.escaped = false;
                match byte {
                    0x00 => self.current.push(FRAME_ESCAPE),
                    0x01 => self.current.push(FRAME_END),
                    other => {
                        self.current.clear();
                        return Err(TicklineError::Protocol(format!(
                            "Invalid escape sequence 0xFE 0x{other:02X}"
                        )));
                    }
                }
                continue;
            }
            match byte {
                FRAME_ESCAPE => self.escaped = true,
                FRAME_END => frames.push(std::mem::take(&mut self.current)),
                other => self.current.push(other),
            }
        }
        Ok(frames)
    }

    /// Whether a partial frame is buffered
    pub fn has_partial(&self) -> bool {
        self.escaped || !self.current.is_empty()
    }
}
