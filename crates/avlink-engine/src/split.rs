/*!
 * Frame and line splitting.
 *
 * Inbound chunks arrive however the transport delivers them: a chunk may hold
 * no complete unit, several, or the tail of one unit and the head of the
 * next. The splitter buffers bytes across calls and hands out only complete
 * protocol units, discarding (and counting) bytes it has to skip to regain
 * frame alignment.
 */
use std::borrow::Cow;
use std::fmt;

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::encode::to_hex;

/// Initial capacity of the receive buffer
const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// One complete protocol unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ProtocolUnit {
    /// A text line without its terminator
    Line(String),
    /// A binary frame including its markers
    Frame(Vec<u8>),
}

impl ProtocolUnit {
    /// The unit as text, if it is a line or a UTF-8 frame
    pub fn text(&self) -> Option<Cow<'_, str>> {
        match self {
            ProtocolUnit::Line(s) => Some(Cow::Borrowed(s.as_str())),
            ProtocolUnit::Frame(b) => std::str::from_utf8(b).ok().map(Cow::Borrowed),
        }
    }

    /// Raw bytes of the unit
    pub fn bytes(&self) -> &[u8] {
        match self {
            ProtocolUnit::Line(s) => s.as_bytes(),
            ProtocolUnit::Frame(b) => b,
        }
    }

    /// Lowercase packed hex of the unit's bytes
    pub fn hex(&self) -> String {
        to_hex(self.bytes(), false)
    }
}

impl fmt::Display for ProtocolUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolUnit::Line(s) => write!(f, "{}", s.escape_debug()),
            ProtocolUnit::Frame(b) => write!(f, "{}", to_hex(b, true)),
        }
    }
}

/// Line terminator for text protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineTerminator {
    /// Carriage return
    Cr,
    /// Line feed
    Lf,
    /// Carriage return followed by line feed
    CrLf,
    /// Either CR or LF; empty lines between them are skipped
    Any,
}

impl LineTerminator {
    /// Find the first terminator, returning its position and length
    fn find(&self, buf: &[u8]) -> Option<(usize, usize)> {
        match self {
            LineTerminator::Cr => buf.iter().position(|&b| b == b'\r').map(|i| (i, 1)),
            LineTerminator::Lf => buf.iter().position(|&b| b == b'\n').map(|i| (i, 1)),
            LineTerminator::CrLf => buf.windows(2).position(|w| w == b"\r\n").map(|i| (i, 2)),
            LineTerminator::Any => buf
                .iter()
                .position(|&b| b == b'\r' || b == b'\n')
                .map(|i| (i, 1)),
        }
    }
}

/// A start-of-frame byte test: `byte & mask == value & mask`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteMatch {
    /// Expected bits
    pub value: u8,
    /// Bits that take part in the comparison
    pub mask: u8,
}

impl ByteMatch {
    /// Match exactly one byte value
    pub const fn exact(value: u8) -> Self {
        Self { value, mask: 0xFF }
    }

    /// Match the masked bits only
    pub const fn masked(value: u8, mask: u8) -> Self {
        Self { value, mask }
    }

    /// Whether `byte` matches
    pub fn matches(&self, byte: u8) -> bool {
        byte & self.mask == self.value & self.mask
    }
}

/// How a byte stream is cut into protocol units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Framing {
    /// Text lines
    Line {
        /// Terminator
        terminator: LineTerminator,
    },

    /// Frames of a declared total length, optionally closed by an end byte
    Fixed {
        /// Start marker
        start: ByteMatch,
        /// Total frame length, markers included
        length: usize,
        /// End marker; `None` for length-implicit frames
        end: Option<u8>,
    },

    /// Frames from a start marker to an end byte
    Terminated {
        /// Start marker
        start: ByteMatch,
        /// End byte
        end: u8,
        /// Longest frame accepted
        max_length: usize,
    },

    /// Every chunk is one unit
    Datagram {
        /// Emit frames instead of lines
        binary: bool,
    },
}

impl Framing {
    /// Line framing
    pub fn lines(terminator: LineTerminator) -> Self {
        Framing::Line { terminator }
    }

    /// Fixed-length frames with an end marker
    pub fn fixed(start: u8, length: usize, end: u8) -> Self {
        Framing::Fixed {
            start: ByteMatch::exact(start),
            length,
            end: Some(end),
        }
    }

    /// Fixed-length frames without an end marker
    pub fn length_implicit(start: u8, length: usize) -> Self {
        Framing::Fixed {
            start: ByteMatch::exact(start),
            length,
            end: None,
        }
    }

    /// Short label used in driver descriptions
    pub fn label(&self) -> &'static str {
        match self {
            Framing::Line { .. } => "line",
            Framing::Fixed { end: Some(_), .. } => "fixed",
            Framing::Fixed { end: None, .. } => "length-implicit",
            Framing::Terminated { .. } => "terminated",
            Framing::Datagram { .. } => "datagram",
        }
    }
}

/// Result of one `feed` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feed {
    /// Complete units in arrival order
    pub units: Vec<ProtocolUnit>,
    /// Bytes dropped while resynchronizing
    pub discarded: usize,
}

/// Stateful splitter for one connection
#[derive(Debug)]
pub struct Splitter {
    framing: Framing,
    buffer: BytesMut,
    max_line_length: usize,
}

impl Splitter {
    /// Create a splitter
    ///
    /// `max_line_length` bounds how much unterminated text is kept in line
    /// mode.
    pub fn new(framing: Framing, max_line_length: usize) -> Self {
        Self {
            framing,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_line_length,
        }
    }

    /// The framing in use
    pub fn framing(&self) -> &Framing {
        &self.framing
    }

    /// Bytes held back as an incomplete unit
    pub fn remainder(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop buffered bytes
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Feed a chunk and take every unit it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Feed {
        let mut feed = Feed::default();

        if let Framing::Datagram { binary } = self.framing {
            if !chunk.is_empty() {
                feed.units.push(if binary {
                    ProtocolUnit::Frame(chunk.to_vec())
                } else {
                    ProtocolUnit::Line(String::from_utf8_lossy(chunk).into_owned())
                });
            }
            return feed;
        }

        self.buffer.extend_from_slice(chunk);

        match self.framing {
            Framing::Line { terminator } => self.split_lines(terminator, &mut feed),
            Framing::Fixed { start, length, end } => {
                self.split_fixed(start, length, end, &mut feed)
            }
            Framing::Terminated {
                start,
                end,
                max_length,
            } => self.split_terminated(start, end, max_length, &mut feed),
            Framing::Datagram { .. } => {}
        }

        if feed.discarded > 0 {
            warn!(discarded = feed.discarded, "Discarded bytes while resynchronizing");
        }
        trace!(
            units = feed.units.len(),
            remainder = self.buffer.len(),
            "Split inbound chunk"
        );

        feed
    }

    fn split_lines(&mut self, terminator: LineTerminator, feed: &mut Feed) {
        while let Some((pos, len)) = terminator.find(&self.buffer) {
            let line = self.buffer.split_to(pos);
            self.buffer.advance(len);
            if !line.is_empty() {
                feed.units
                    .push(ProtocolUnit::Line(String::from_utf8_lossy(&line).into_owned()));
            }
        }

        if self.buffer.len() > self.max_line_length {
            feed.discarded += self.buffer.len();
            self.buffer.clear();
        }
    }

    fn split_fixed(&mut self, start: ByteMatch, length: usize, end: Option<u8>, feed: &mut Feed) {
        if length == 0 {
            return;
        }
        loop {
            if !self.skip_to_start(start, feed) {
                return;
            }
            if self.buffer.len() < length {
                return;
            }
            if let Some(end) = end {
                if self.buffer[length - 1] != end {
                    // Not a frame after all, resume the scan after this start byte
                    feed.discarded += 1;
                    self.buffer.advance(1);
                    continue;
                }
            }
            feed.units
                .push(ProtocolUnit::Frame(self.buffer.split_to(length).to_vec()));
        }
    }

    fn split_terminated(
        &mut self,
        start: ByteMatch,
        end: u8,
        max_length: usize,
        feed: &mut Feed,
    ) {
        loop {
            if !self.skip_to_start(start, feed) {
                return;
            }
            let limit = self.buffer.len().min(max_length).max(1);
            match self.buffer[1..limit].iter().position(|&b| b == end) {
                Some(i) => {
                    feed.units
                        .push(ProtocolUnit::Frame(self.buffer.split_to(i + 2).to_vec()));
                }
                None if self.buffer.len() >= max_length => {
                    feed.discarded += 1;
                    self.buffer.advance(1);
                }
                None => return,
            }
        }
    }

    /// Drop bytes up to the next start marker; false when none is buffered
    fn skip_to_start(&mut self, start: ByteMatch, feed: &mut Feed) -> bool {
        match self.buffer.iter().position(|&b| start.matches(b)) {
            Some(0) => true,
            Some(i) => {
                feed.discarded += i;
                self.buffer.advance(i);
                true
            }
            None => {
                feed.discarded += self.buffer.len();
                self.buffer.clear();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(s: &str) -> ProtocolUnit {
        ProtocolUnit::Line(s.to_string())
    }

    fn feed_in_chunks(splitter: &mut Splitter, stream: &[u8], size: usize) -> Vec<ProtocolUnit> {
        stream
            .chunks(size)
            .flat_map(|chunk| splitter.feed(chunk).units)
            .collect()
    }

    #[test]
    fn test_lines_with_remainder() {
        let mut splitter = Splitter::new(Framing::lines(LineTerminator::Cr), 4096);

        let feed = splitter.feed(b"#00005=00000\rLP 3\rCS 1");
        assert_eq!(feed.units, vec![line("#00005=00000"), line("LP 3")]);
        assert_eq!(splitter.remainder(), b"CS 1");

        let feed = splitter.feed(b"2 100\r");
        assert_eq!(feed.units, vec![line("CS 12 100")]);
        assert!(splitter.remainder().is_empty());
    }

    #[test]
    fn test_crlf_split_across_chunks() {
        let mut splitter = Splitter::new(Framing::lines(LineTerminator::CrLf), 4096);
        assert!(splitter.feed(b"Command OK\r").units.is_empty());
        assert_eq!(splitter.feed(b"\nCURRENT p02\r\n").units, vec![
            line("Command OK"),
            line("CURRENT p02")
        ]);
    }

    #[test]
    fn test_any_terminator_skips_empty_lines() {
        let mut splitter = Splitter::new(Framing::lines(LineTerminator::Any), 4096);
        let feed = splitter.feed(b"~01@OK\r\n\r\n~01@BTN 1,01,P\n");
        assert_eq!(feed.units, vec![line("~01@OK"), line("~01@BTN 1,01,P")]);
    }

    #[test]
    fn test_overlong_line_discarded() {
        let mut splitter = Splitter::new(Framing::lines(LineTerminator::Cr), 8);
        let feed = splitter.feed(b"0123456789");
        assert!(feed.units.is_empty());
        assert_eq!(feed.discarded, 10);
        assert_eq!(splitter.feed(b"ok\r").units, vec![line("ok")]);
    }

    #[test]
    fn test_fixed_frames_with_resync() {
        let mut splitter = Splitter::new(Framing::fixed(0xFE, 5, 0xFC), 4096);

        let feed = splitter.feed(&[0x00, 0x13, 0xFE, 0x11, 0x01, 0x02, 0xFC, 0xFE, 0xC7]);
        assert_eq!(feed.discarded, 2);
        assert_eq!(feed.units, vec![ProtocolUnit::Frame(vec![0xFE, 0x11, 0x01, 0x02, 0xFC])]);
        assert_eq!(splitter.remainder(), &[0xFE, 0xC7]);

        let feed = splitter.feed(&[0x00, 0x05, 0xFC]);
        assert_eq!(feed.units, vec![ProtocolUnit::Frame(vec![0xFE, 0xC7, 0x00, 0x05, 0xFC])]);
    }

    #[test]
    fn test_fixed_frame_bad_end_marker() {
        let mut splitter = Splitter::new(Framing::fixed(0xFE, 5, 0xFC), 4096);
        // The first FE opens a frame whose fifth byte is not FC
        let feed = splitter.feed(&[0xFE, 0x01, 0xFE, 0x11, 0x00, 0x01, 0xFC]);
        assert_eq!(feed.discarded, 2);
        assert_eq!(feed.units, vec![ProtocolUnit::Frame(vec![0xFE, 0x11, 0x00, 0x01, 0xFC])]);
    }

    #[test]
    fn test_length_implicit_frames() {
        let mut splitter = Splitter::new(Framing::length_implicit(0xB3, 4), 4096);
        let feed = splitter.feed(&[0xB3, 0x21, 0x10, 0xE0, 0xB3, 0x21]);
        assert_eq!(feed.units, vec![ProtocolUnit::Frame(vec![0xB3, 0x21, 0x10, 0xE0])]);
        assert_eq!(splitter.remainder(), &[0xB3, 0x21]);
    }

    #[test]
    fn test_terminated_frames() {
        let framing = Framing::Terminated {
            start: ByteMatch::masked(0x80, 0x8F),
            end: 0xFF,
            max_length: 16,
        };
        let mut splitter = Splitter::new(framing, 4096);

        let feed = splitter.feed(&[0xFF, 0x90, 0x41, 0xFF, 0x90, 0x51]);
        assert_eq!(feed.discarded, 1);
        assert_eq!(feed.units, vec![ProtocolUnit::Frame(vec![0x90, 0x41, 0xFF])]);

        let feed = splitter.feed(&[0xFF]);
        assert_eq!(feed.units, vec![ProtocolUnit::Frame(vec![0x90, 0x51, 0xFF])]);
    }

    #[test]
    fn test_terminated_frame_too_long() {
        let framing = Framing::Terminated {
            start: ByteMatch::exact(0x90),
            end: 0xFF,
            max_length: 4,
        };
        let mut splitter = Splitter::new(framing, 4096);
        let feed = splitter.feed(&[0x90, 0x01, 0x02, 0x03, 0x90, 0x41, 0xFF]);
        assert_eq!(feed.discarded, 4);
        assert_eq!(feed.units, vec![ProtocolUnit::Frame(vec![0x90, 0x41, 0xFF])]);
    }

    #[test]
    fn test_datagram() {
        let mut splitter = Splitter::new(Framing::Datagram { binary: true }, 4096);
        let feed = splitter.feed(&[0x01, 0x02]);
        assert_eq!(feed.units, vec![ProtocolUnit::Frame(vec![0x01, 0x02])]);
        assert!(splitter.feed(&[]).units.is_empty());
    }

    #[test]
    fn test_chunking_never_loses_or_duplicates_units() {
        let stream = b"GG 1,2A\r\x06\rGN 3,M\rGV 4,60\r";
        let expected = vec![line("GG 1,2A"), line("\x06"), line("GN 3,M"), line("GV 4,60")];

        for size in 1..=stream.len() {
            let mut splitter = Splitter::new(Framing::lines(LineTerminator::Cr), 4096);
            assert_eq!(feed_in_chunks(&mut splitter, stream, size), expected, "chunk size {}", size);
        }

        let frames: Vec<u8> = [[0xFE, 0x11, 0x01, 0x02, 0xFC], [0xFE, 0xCA, 0x00, 0x03, 0xFC]].concat();
        for size in 1..=frames.len() {
            let mut splitter = Splitter::new(Framing::fixed(0xFE, 5, 0xFC), 4096);
            assert_eq!(feed_in_chunks(&mut splitter, &frames, size).len(), 2, "chunk size {}", size);
        }
    }

    #[test]
    fn test_unit_views() {
        let unit = ProtocolUnit::Frame(vec![0x90, 0x50, 0x0A, 0xFF]);
        assert_eq!(unit.hex(), "90500aff");
        assert_eq!(unit.to_string(), "90 50 0A FF");
        assert!(unit.text().is_none());
        assert_eq!(line("LP 1").text().as_deref(), Some("LP 1"));
    }
}
