//! Two-mode stream framer for the upstream byte stream
//!
//! The upstream connection starts out line-delimited (the bootstrap
//! handshake) and switches to fixed-length binary chunks once
//! configured. One [`Framer`] instance drives both phases: the consumer
//! feeds raw socket bytes in and pulls whole lines or whole chunks out,
//! switching modes between pulls with [`Framer::set_mode`].

use super::ProtocolError;
use bytes::{Buf, Bytes, BytesMut};

/// Total buffer cap in either mode. Exceeding it closes the connection.
pub const MAX_BUFFERED: usize = 1024 * 1024;

const DELIMITER: u8 = b'\n';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Line,
    Binary(usize),
}

/// Incremental reader with a line mode and a fixed-length binary mode.
#[derive(Debug)]
pub struct Framer {
    buf: BytesMut,
    mode: Mode,
}

impl Framer {
    /// A new framer starts in line mode for the bootstrap phase.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            mode: Mode::Line,
        }
    }

    /// Switch modes: `0` selects line mode, `n > 0` selects binary mode
    /// emitting exactly `n`-byte chunks.
    pub fn set_mode(&mut self, size: usize) {
        self.mode = if size == 0 {
            Mode::Line
        } else {
            Mode::Binary(size)
        };
    }

    /// Append raw bytes from the socket.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if self.buf.len() + data.len() > MAX_BUFFERED {
            return Err(ProtocolError::BufferOverflow(MAX_BUFFERED));
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Pull the next complete unit under the current mode, if buffered.
    ///
    /// Line mode yields the bytes up to (not including) the next `\n`
    /// and advances exactly one byte past the delimiter. Binary mode
    /// yields the next fixed-size chunk and stays in binary mode; the
    /// consumer picks the following size.
    pub fn next_chunk(&mut self) -> Option<Bytes> {
        match self.mode {
            Mode::Line => {
                let at = self.buf.iter().position(|&b| b == DELIMITER)?;
                let line = self.buf.split_to(at).freeze();
                self.buf.advance(1);
                Some(line)
            }
            Mode::Binary(size) => {
                if self.buf.len() < size {
                    return None;
                }
                Some(self.buf.split_to(size).freeze())
            }
        }
    }

    /// Bytes currently buffered and not yet emitted.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_mode_splits_on_delimiter() {
        let mut framer = Framer::new();
        framer.feed(b"hello\nworld\n").unwrap();

        assert_eq!(framer.next_chunk().unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(framer.next_chunk().unwrap(), Bytes::from_static(b"world"));
        assert_eq!(framer.next_chunk(), None);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn line_mode_advances_one_byte_past_delimiter() {
        // The byte right after the delimiter must survive for the next
        // mode to consume.
        let mut framer = Framer::new();
        framer.feed(b"ok\nXYZ").unwrap();

        assert_eq!(framer.next_chunk().unwrap(), Bytes::from_static(b"ok"));
        framer.set_mode(3);
        assert_eq!(framer.next_chunk().unwrap(), Bytes::from_static(b"XYZ"));
    }

    #[test]
    fn empty_lines_are_emitted() {
        let mut framer = Framer::new();
        framer.feed(b"\n\na\n").unwrap();

        assert_eq!(framer.next_chunk().unwrap(), Bytes::new());
        assert_eq!(framer.next_chunk().unwrap(), Bytes::new());
        assert_eq!(framer.next_chunk().unwrap(), Bytes::from_static(b"a"));
    }

    #[test]
    fn binary_mode_emits_fixed_chunks() {
        let mut framer = Framer::new();
        framer.set_mode(4);
        framer.feed(b"abcdefgh").unwrap();

        assert_eq!(framer.next_chunk().unwrap(), Bytes::from_static(b"abcd"));
        assert_eq!(framer.next_chunk().unwrap(), Bytes::from_static(b"efgh"));
        assert_eq!(framer.next_chunk(), None);
    }

    #[test]
    fn binary_mode_waits_for_full_chunk() {
        let mut framer = Framer::new();
        framer.set_mode(8);
        framer.feed(b"1234").unwrap();
        assert_eq!(framer.next_chunk(), None);
        framer.feed(b"5678").unwrap();
        assert_eq!(framer.next_chunk().unwrap(), Bytes::from_static(b"12345678"));
    }

    #[test]
    fn chunking_is_arrival_invariant() {
        // Feeding a stream byte-by-byte must produce the same units as
        // feeding it whole.
        let stream = b"first\nsecond\nAABBCCDD";

        let mut whole = Framer::new();
        whole.feed(stream).unwrap();
        let mut expect = Vec::new();
        expect.push(whole.next_chunk().unwrap());
        expect.push(whole.next_chunk().unwrap());
        whole.set_mode(4);
        expect.push(whole.next_chunk().unwrap());
        expect.push(whole.next_chunk().unwrap());

        let mut trickle = Framer::new();
        let mut got = Vec::new();
        for &b in stream.iter() {
            trickle.feed(&[b]).unwrap();
            while let Some(chunk) = trickle.next_chunk() {
                got.push(chunk);
                if got.len() == 2 {
                    trickle.set_mode(4);
                }
            }
        }

        assert_eq!(got, expect);
    }

    #[test]
    fn buffer_cap_enforced() {
        let mut framer = Framer::new();
        framer.feed(&vec![b'x'; MAX_BUFFERED]).unwrap();
        assert!(matches!(
            framer.feed(b"y"),
            Err(ProtocolError::BufferOverflow(_))
        ));
    }

    #[test]
    fn mode_switch_back_to_line() {
        let mut framer = Framer::new();
        framer.set_mode(2);
        framer.feed(b"hiline\n").unwrap();
        assert_eq!(framer.next_chunk().unwrap(), Bytes::from_static(b"hi"));
        framer.set_mode(0);
        assert_eq!(framer.next_chunk().unwrap(), Bytes::from_static(b"line"));
    }
}
