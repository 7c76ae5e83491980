//! The DATA-phase byte transforms: dot-unstuffing on the receiving side and
//! dot-stuffing on the sending side.
//!
//! SMTP ends a message body with `CRLF . CRLF`, so a line-initial `.` in the
//! body must be doubled on the way out and the doubling removed on the way
//! in. The unstuffer additionally watches for the terminator; the stuffer
//! additionally rewrites bare LF to CRLF and always appends the terminator.
//!
//! Both transforms hold ambiguous byte runs (`\r`, `\r\n`, `\r\n.`,
//! `\r\n.\r`) pending until the next byte decides their meaning, so nothing
//! is emitted that might turn out to be part of the end-of-data marker.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Bytes followed the end-of-data terminator within the same read.
    #[error("trailing data after end-of-data terminator")]
    TrailingData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnstuffState {
    /// At the beginning of a line (start of message, or a full CRLF is
    /// pending).
    Bol,
    /// Inside a line; bytes pass straight through.
    MidLine,
    /// A CR is pending.
    AfterCr,
    /// A line-initial dot is pending (preceded by a pending CRLF except at
    /// message start).
    AfterCrlfDot,
    /// Pending `CRLF . CR`: one LF away from the terminator.
    AfterCrlfDotCr,
}

/// Result of feeding bytes to the [`DotUnstuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unstuffed {
    /// The terminator has not been seen yet; feed more input.
    More,
    /// The terminator closed the message exactly at the end of the chunk.
    Done,
}

/// Streaming dot-unstuffer for the server's DATA phase.
pub struct DotUnstuffer {
    state: UnstuffState,
    pending: Vec<u8>,
}

impl Default for DotUnstuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DotUnstuffer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: UnstuffState::Bol,
            pending: Vec::with_capacity(4),
        }
    }

    /// Consume `chunk`, appending clean message bytes to `out`.
    ///
    /// # Errors
    ///
    /// [`CodecError::TrailingData`] when bytes follow the terminator inside
    /// the same chunk.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> Result<Unstuffed, CodecError> {
        for (i, &byte) in chunk.iter().enumerate() {
            match self.state {
                UnstuffState::Bol => match byte {
                    b'.' => {
                        self.pending.push(b'.');
                        self.state = UnstuffState::AfterCrlfDot;
                    }
                    b'\r' => {
                        out.append(&mut self.pending);
                        self.pending.push(b'\r');
                        self.state = UnstuffState::AfterCr;
                    }
                    _ => {
                        out.append(&mut self.pending);
                        out.push(byte);
                        self.state = UnstuffState::MidLine;
                    }
                },

                UnstuffState::MidLine => match byte {
                    b'\r' => {
                        self.pending.push(b'\r');
                        self.state = UnstuffState::AfterCr;
                    }
                    _ => out.push(byte),
                },

                UnstuffState::AfterCr => match byte {
                    b'\n' => {
                        self.pending.push(b'\n');
                        self.state = UnstuffState::Bol;
                    }
                    // Runs of CRs: emit one, keep holding one.
                    b'\r' => out.push(b'\r'),
                    _ => {
                        out.append(&mut self.pending);
                        out.push(byte);
                        self.state = UnstuffState::MidLine;
                    }
                },

                UnstuffState::AfterCrlfDot => match byte {
                    b'\r' => {
                        self.pending.push(b'\r');
                        self.state = UnstuffState::AfterCrlfDotCr;
                    }
                    _ => {
                        // Stuffing removed: the held line-initial dot is
                        // dropped, the CRLF before it (if any) goes through.
                        self.pending.pop();
                        out.append(&mut self.pending);
                        out.push(byte);
                        self.state = UnstuffState::MidLine;
                    }
                },

                UnstuffState::AfterCrlfDotCr => match byte {
                    b'\n' => {
                        self.pending.clear();
                        self.state = UnstuffState::Bol;
                        return if i + 1 == chunk.len() {
                            Ok(Unstuffed::Done)
                        } else {
                            Err(CodecError::TrailingData)
                        };
                    }
                    b'\r' => {
                        out.append(&mut self.pending);
                        self.pending.push(b'\r');
                        self.state = UnstuffState::AfterCr;
                    }
                    _ => {
                        // `.` then CR but no LF: the CR is dropped, as the
                        // dialect has always had it. A conforming peer never
                        // sends this.
                        self.pending.pop();
                        out.append(&mut self.pending);
                        out.push(byte);
                        self.state = UnstuffState::MidLine;
                    }
                },
            }
        }
        Ok(Unstuffed::More)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StuffState {
    Bol,
    MidLine,
    AfterCr,
}

/// Streaming dot-stuffer for the client's DATA phase.
pub struct DotStuffer {
    state: StuffState,
}

impl Default for DotStuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DotStuffer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: StuffState::Bol,
        }
    }

    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<u8>) {
        for &byte in chunk {
            match self.state {
                StuffState::Bol => match byte {
                    b'\n' => out.extend_from_slice(b"\r\n"),
                    b'\r' => {
                        out.push(b'\r');
                        self.state = StuffState::AfterCr;
                    }
                    b'.' => {
                        out.extend_from_slice(b"..");
                        self.state = StuffState::MidLine;
                    }
                    _ => {
                        out.push(byte);
                        self.state = StuffState::MidLine;
                    }
                },
                StuffState::MidLine => match byte {
                    b'\n' => {
                        out.extend_from_slice(b"\r\n");
                        self.state = StuffState::Bol;
                    }
                    b'\r' => {
                        out.push(b'\r');
                        self.state = StuffState::AfterCr;
                    }
                    _ => out.push(byte),
                },
                StuffState::AfterCr => {
                    out.push(byte);
                    self.state = match byte {
                        b'\n' => StuffState::Bol,
                        b'\r' => StuffState::AfterCr,
                        _ => StuffState::MidLine,
                    };
                }
            }
        }
    }

    /// Close the stream: make sure the last line is terminated, then emit
    /// the `.\r\n` end-of-data marker.
    pub fn finish(self, out: &mut Vec<u8>) {
        match self.state {
            StuffState::Bol => {}
            StuffState::MidLine => out.extend_from_slice(b"\r\n"),
            StuffState::AfterCr => out.push(b'\n'),
        }
        out.extend_from_slice(b".\r\n");
    }
}

/// Dot-stuff a complete message body, terminator included.
#[must_use]
pub fn stuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 8);
    let mut stuffer = DotStuffer::new();
    stuffer.feed(data, &mut out);
    stuffer.finish(&mut out);
    out
}

/// Unstuff a complete wire-format body (terminator included) in one call.
///
/// # Errors
///
/// [`CodecError::TrailingData`] if bytes follow the terminator.
#[cfg(test)]
fn unstuff(wire: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    let mut unstuffer = DotUnstuffer::new();
    match unstuffer.feed(wire, &mut out)? {
        Unstuffed::Done => Ok(out),
        Unstuffed::More => panic!("wire input had no terminator"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(body: &[u8]) {
        let wire = stuff(body);
        assert_eq!(unstuff(&wire).unwrap(), body, "body {body:?} via {wire:?}");
    }

    #[test]
    fn round_trips_reproduce_the_body() {
        round_trip(b"plain text with no dots");
        round_trip(b".hidden leading dot");
        round_trip(b"a\r\n.\r\nb");
        round_trip(b"lonely\rcarriage\rreturns");
        round_trip(b".");
        round_trip(b"");
        round_trip(b"multi\r\nline\r\nmessage ending mid-line");
    }

    #[test]
    fn stuffing_doubles_line_initial_dots() {
        assert_eq!(stuff(b".x"), b"..x\r\n.\r\n");
        assert_eq!(stuff(b"a\r\n.b"), b"a\r\n..b\r\n.\r\n");
    }

    #[test]
    fn stuffing_rewrites_bare_lf() {
        assert_eq!(stuff(b"a\nb"), b"a\r\nb\r\n.\r\n");
        assert_eq!(stuff(b"a\n.b"), b"a\r\n..b\r\n.\r\n");
    }

    #[test]
    fn stuffing_terminates_unconditionally() {
        assert_eq!(stuff(b""), b".\r\n");
        assert_eq!(stuff(b"a\r\n"), b"a\r\n.\r\n");
        assert_eq!(stuff(b"a"), b"a\r\n.\r\n");
        // A dangling CR still gets its LF before the terminator.
        assert_eq!(stuff(b"a\r"), b"a\r\n.\r\n");
    }

    #[test]
    fn unstuffing_removes_stuffed_dots() {
        assert_eq!(unstuff(b"..x\r\n.\r\n").unwrap(), b".x");
        assert_eq!(unstuff(b"a\r\n..\r\nb\r\n.\r\n").unwrap(), b"a\r\n.\r\nb");
    }

    #[test]
    fn lone_dot_line_terminates_immediately() {
        assert_eq!(unstuff(b".\r\n").unwrap(), b"");
    }

    #[test]
    fn trailing_bytes_after_terminator_are_rejected() {
        let mut out = Vec::new();
        let mut unstuffer = DotUnstuffer::new();
        assert_eq!(
            unstuffer.feed(b"hello\r\n.\r\ngarbage", &mut out),
            Err(CodecError::TrailingData)
        );
    }

    #[test]
    fn terminator_split_across_chunks() {
        let wire = b"hello\r\n.\r\n";
        let mut out = Vec::new();
        let mut unstuffer = DotUnstuffer::new();
        for &byte in &wire[..wire.len() - 1] {
            assert_eq!(unstuffer.feed(&[byte], &mut out), Ok(Unstuffed::More));
        }
        assert_eq!(
            unstuffer.feed(&wire[wire.len() - 1..], &mut out),
            Ok(Unstuffed::Done)
        );
        assert_eq!(out, b"hello");
    }

    #[test]
    fn crlf_runs_pass_through() {
        assert_eq!(
            unstuff(b"a\r\r\nb\r\n\r\nc\r\n.\r\n").unwrap(),
            b"a\r\r\nb\r\n\r\nc"
        );
    }

    #[test]
    fn dot_followed_by_cr_without_lf() {
        // The CR between the held dot and the next byte is dropped; the dot
        // survives.
        assert_eq!(unstuff(b"a\r\n.\rx\r\n.\r\n").unwrap(), b"a\r\n.x");
    }
}
