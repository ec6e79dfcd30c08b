//! Frame reassembly
//!
//! Balances print one reading per line terminated by CR LF. Bytes arrive in
//! arbitrary chunks, so they are buffered until a full delimiter is seen.

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio_util::codec::Decoder;
use tracing::warn;

/// Line delimiter used by the balance protocol
pub const DELIMITER: &[u8; 2] = b"\r\n";

/// Default cap on undelimited bytes held in the buffer
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Errors raised while splitting the byte stream
#[derive(Error, Debug)]
pub enum FrameError {
    /// Too many bytes without a delimiter
    #[error("Receive buffer overflow: discarded {discarded} bytes without a line delimiter")]
    Overflow {
        /// Bytes dropped from the buffer
        discarded: usize,
    },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Decode bytes as ASCII, replacing anything outside it with U+FFFD
pub fn decode_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { char::REPLACEMENT_CHARACTER })
        .collect()
}

/// CR LF line codec with a bounded buffer
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_len: usize,
    /// Where the next delimiter search starts, so partial feeds are not rescanned
    next_index: usize,
    /// Set after an overflow; input is dropped up to the next delimiter
    is_discarding: bool,
}

impl LineCodec {
    /// Codec that gives up on a line after `max_len` bytes
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            next_index: 0,
            is_discarding: false,
        }
    }

    /// Buffer cap in bytes
    pub fn max_len(&self) -> usize {
        self.max_len
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

/// Length of `src` that can be dropped while keeping a trailing CR, which may
/// be the first half of a delimiter split across reads
fn droppable(src: &BytesMut) -> usize {
    match src.last() {
        Some(&b'\r') => src.len() - 1,
        _ => src.len(),
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, FrameError> {
        loop {
            // Back up one byte in case the CR of a split delimiter ended the last feed
            let start = self.next_index.saturating_sub(1).min(src.len());
            let found = src[start..]
                .windows(DELIMITER.len())
                .position(|w| w == DELIMITER)
                .map(|offset| start + offset);

            match (self.is_discarding, found) {
                (true, Some(pos)) => {
                    // Tail of the oversized line; resume at the next line
                    src.advance(pos + DELIMITER.len());
                    self.is_discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    src.advance(droppable(src));
                    self.next_index = src.len();
                    return Ok(None);
                }
                (false, Some(pos)) => {
                    let line = src.split_to(pos);
                    src.advance(DELIMITER.len());
                    self.next_index = 0;
                    return Ok(Some(decode_ascii(&line).trim().to_string()));
                }
                (false, None) if src.len() > self.max_len => {
                    let discarded = droppable(src);
                    src.advance(discarded);
                    self.is_discarding = true;
                    self.next_index = src.len();
                    return Err(FrameError::Overflow { discarded });
                }
                (false, None) => {
                    self.next_index = src.len();
                    return Ok(None);
                }
            }
        }
    }
}

/// Lines recovered from one chunk of input
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Frames {
    /// Trimmed lines in arrival order
    pub lines: Vec<String>,
    /// Bytes dropped by the overflow policy, if it fired
    pub discarded: Option<usize>,
}

/// Per-session buffer feeding [`LineCodec`]
#[derive(Debug, Default)]
pub struct FrameReassembler {
    codec: LineCodec,
    buffer: BytesMut,
}

impl FrameReassembler {
    /// Empty reassembler with the given buffer cap
    pub fn new(max_len: usize) -> Self {
        Self {
            codec: LineCodec::new(max_len),
            buffer: BytesMut::new(),
        }
    }

    /// Append a chunk and drain every completed line
    pub fn push(&mut self, chunk: &[u8]) -> Frames {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Frames::default();
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(line)) => frames.lines.push(line),
                Ok(None) => break,
                Err(FrameError::Overflow { discarded }) => {
                    warn!(discarded, limit = self.codec.max_len(), "frame buffer overflow");
                    frames.discarded = Some(discarded);
                    break;
                }
                Err(FrameError::IoError(_)) => break,
            }
        }
        frames
    }

    /// Bytes waiting for a delimiter
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const STREAM: &[u8] = b"  +012.345 g ST\r\n\r\nERROR\r\n-1.200kg\r\nS S     5.000 g\r\npartial";

    #[test]
    fn test_single_chunk() {
        let mut frames = FrameReassembler::default();
        let out = frames.push(STREAM);
        assert_eq!(
            out.lines,
            vec!["+012.345 g ST", "", "ERROR", "-1.200kg", "S S     5.000 g"]
        );
        assert_eq!(out.discarded, None);
        assert_eq!(frames.pending(), b"partial".len());
    }

    #[test]
    fn test_chunking_invariance() {
        let expected = FrameReassembler::default().push(STREAM).lines;

        for size in 1..=STREAM.len() {
            let mut frames = FrameReassembler::default();
            let mut lines = Vec::new();
            for chunk in STREAM.chunks(size) {
                lines.extend(frames.push(chunk).lines);
            }
            assert_eq!(lines, expected, "chunk size {}", size);
        }
    }

    #[test]
    fn test_split_delimiter() {
        let mut frames = FrameReassembler::default();
        assert!(frames.push(b"+5.000 g\r").lines.is_empty());
        assert_eq!(frames.push(b"\n").lines, vec!["+5.000 g"]);
        assert_eq!(frames.pending(), 0);
    }

    #[test]
    fn test_lone_lf_is_not_a_delimiter() {
        let mut frames = FrameReassembler::default();
        assert!(frames.push(b"+1.000 g\n+2.000 g\r").lines.is_empty());
        assert_eq!(frames.push(b"\n").lines, vec!["+1.000 g\n+2.000 g"]);
    }

    #[test]
    fn test_non_ascii_is_replaced() {
        let mut frames = FrameReassembler::default();
        let out = frames.push(b"\xff+1.5\xc3\xa9g\r\n");
        assert_eq!(out.lines, vec!["\u{FFFD}+1.5\u{FFFD}\u{FFFD}g"]);
    }

    #[test]
    fn test_overflow_discards_buffer() {
        let mut frames = FrameReassembler::new(8);
        let out = frames.push(b"ok\r\n0123456789");
        assert_eq!(out.lines, vec!["ok"]);
        assert_eq!(out.discarded, Some(10));
        assert_eq!(frames.pending(), 0);

        // The end of the oversized line is dropped, the next line is kept
        assert!(frames.push(b"+1.0 g\r\n").lines.is_empty());
        assert_eq!(frames.push(b"+2.0 g\r\n").lines, vec!["+2.0 g"]);
    }

    #[test]
    fn test_overflow_tail_is_not_a_line() {
        let mut frames = FrameReassembler::new(16);
        let out = frames.push(b"garbage-garbage-garbage +1");
        assert!(out.lines.is_empty());
        assert_eq!(out.discarded, Some(26));

        // "2.345 g" is the end of a cut-off "+12.345 g" and must not surface
        let out = frames.push(b"2.345 g\r\n+3.000 g\r\n");
        assert_eq!(out.lines, vec!["+3.000 g"]);
        assert_eq!(out.discarded, None);
    }

    #[test]
    fn test_overflow_discarding_spans_reads() {
        let mut frames = FrameReassembler::new(4);
        assert_eq!(frames.push(b"0123456").discarded, Some(7));
        assert!(frames.push(b"789").lines.is_empty());
        // Delimiter split across reads while discarding
        assert!(frames.push(b"9\r").lines.is_empty());
        assert_eq!(frames.pending(), 1);
        assert!(frames.push(b"\n").lines.is_empty());
        assert_eq!(frames.push(b"ok\r\n").lines, vec!["ok"]);
    }

    #[test]
    fn test_codec_direct() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from(&b"abc"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\r\ndef");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("abc"));
        assert_eq!(&buf[..], b"def");
    }
}
