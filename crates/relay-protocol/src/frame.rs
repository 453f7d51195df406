//! Line framing.
//!
//! One envelope per `\n`-terminated line. Bytes arrive in arbitrary
//! chunks from non-blocking reads, so a [`FrameBuffer`] accumulates them
//! and hands back complete frames.

use crate::parse::DecodeError;

/// Maximum frame size (64 KiB), terminator excluded.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Accumulates raw bytes and splits them into frames.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    max_frame: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(MAX_FRAME_BYTES)
    }
}

impl FrameBuffer {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame,
        }
    }

    /// Appends bytes read from the peer.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet returned as frames.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pops the next complete frame, without its terminator.
    ///
    /// Blank lines are skipped. Returns `Ok(None)` when no complete frame
    /// is buffered yet. Once a frame exceeds the limit the buffer is
    /// cleared and [`DecodeError::FrameTooLarge`] is returned; the stream
    /// cannot be resynchronised after that.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, DecodeError> {
        loop {
            let Some(pos) = self.buf.iter().position(|b| *b == b'\n') else {
                if self.buf.len() > self.max_frame {
                    return Err(self.overflow(self.buf.len()));
                }
                return Ok(None);
            };

            if pos > self.max_frame {
                return Err(self.overflow(pos));
            }

            let mut frame: Vec<u8> = self.buf.drain(..=pos).collect();
            frame.pop();
            if frame.last() == Some(&b'\r') {
                frame.pop();
            }

            if frame.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(frame));
        }
    }

    fn overflow(&mut self, size: usize) -> DecodeError {
        self.buf.clear();
        DecodeError::FrameTooLarge {
            size,
            max: self.max_frame,
        }
    }
}
