//! APRS-IS line framing
//!
//! Server lines end with LF, usually preceded by CR. NUL bytes are escaped
//! as `<0x00>` so the text form carries them through to the packet parser.

use std::collections::VecDeque;

use tracing::warn;

/// Longest line the server may send, including CR LF
pub const MAX_LINE_LEN: usize = 512;

/// Most bytes kept for one incoming line, NUL escapes included. The rest
/// of an overlong line is dropped.
pub const MAX_PENDING_LEN: usize = 1000;

const NUL_ESCAPE: &[u8] = b"<0x00>";

/// Accumulates server bytes and yields complete lines
#[derive(Debug, Default)]
pub struct LineDecoder {
    lines: VecDeque<Vec<u8>>,
    pending: Vec<u8>,
    overflow: bool,
}

impl LineDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self {
            lines: VecDeque::new(),
            pending: Vec::with_capacity(MAX_LINE_LEN),
            overflow: false,
        }
    }

    /// Add bytes read from the socket
    pub fn push_bytes(&mut self, data: &[u8]) {
        for &b in data {
            match b {
                b'\n' => {
                    self.lines.push_back(std::mem::take(&mut self.pending));
                    self.overflow = false;
                }
                b'\r' => {}
                0 => self.append(NUL_ESCAPE),
                _ => self.append(&[b]),
            }
        }
    }

    fn append(&mut self, bytes: &[u8]) {
        if self.pending.len() + bytes.len() <= MAX_PENDING_LEN {
            self.pending.extend_from_slice(bytes);
        } else if !self.overflow {
            self.overflow = true;
            warn!(
                "Line from IGate server longer than {} bytes, discarding the rest",
                MAX_PENDING_LEN
            );
        }
    }

    /// Next complete line without its terminator
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        self.lines.pop_front()
    }

    /// Discard any partial line
    pub fn clear(&mut self) {
        self.lines.clear();
        self.pending.clear();
        self.overflow = false;
    }
}

/// Frame an outgoing line: at most 510 bytes of text plus CR LF
pub fn encode_line(text: &[u8]) -> Vec<u8> {
    let len = text.len().min(MAX_LINE_LEN - 2);
    let mut out = Vec::with_capacity(len + 2);
    out.extend_from_slice(&text[..len]);
    out.extend_from_slice(b"\r\n");
    out
}
