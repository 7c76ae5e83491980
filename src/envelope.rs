//! The delivery envelope: the sender/recipient list that travels with a
//! queued message, distinct from the header-level `From:`/`To:` fields.
//!
//! On the wire (the `queue.ctrl` link) and in `<id>.env` files an envelope is
//! a run of entries, each a direction byte (`F` or `T`) followed by the
//! address bytes and a terminating NUL. The wire blob ends with one extra
//! NUL; the on-disk copy is preceded by 8 reserved bytes (a future retry
//! counter, always zero today) and ends after the last entry's NUL.

use std::fmt;

use thiserror::Error;

/// Number of reserved bytes at the head of an `<id>.env` file.
pub const ENVELOPE_RESERVED: usize = 8;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope record is truncated")]
    Truncated,

    #[error("unexpected direction byte {0:#04x} in envelope record")]
    BadDirection(u8),

    #[error("envelope has no sender entry")]
    MissingSender,

    #[error("envelope has more than one sender entry")]
    DuplicateSender,
}

/// Whether an envelope entry names the message's sender or a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    From,
    To,
}

impl Direction {
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::From => b'F',
            Self::To => b'T',
        }
    }

    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'F' => Some(Self::From),
            b'T' => Some(Self::To),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::From => "From",
            Self::To => "To",
        })
    }
}

/// One direction-tagged mailbox. Addresses are byte-strings; quoted local
/// parts may carry bytes outside ASCII.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub direction: Direction,
    pub address: Vec<u8>,
}

impl Entry {
    /// The address with a bare local part qualified as `local@localhost`.
    #[must_use]
    pub fn qualified(&self) -> Vec<u8> {
        if self.address.contains(&b'@') {
            self.address.clone()
        } else {
            let mut address = self.address.clone();
            address.extend_from_slice(b"@localhost");
            address
        }
    }
}

/// An ordered sequence of envelope entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    entries: Vec<Entry>,
}

impl Envelope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, direction: Direction, address: Vec<u8>) {
        self.entries.push(Entry { direction, address });
    }

    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode the wire blob sent over `queue.ctrl`: every entry as
    /// `direction address NUL`, closed by one extra NUL.
    #[must_use]
    pub fn encode_blob(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(
            self.entries.iter().map(|e| e.address.len() + 2).sum::<usize>() + 1,
        );
        for entry in &self.entries {
            blob.push(entry.direction.as_byte());
            blob.extend_from_slice(&entry.address);
            blob.push(0);
        }
        blob.push(0);
        blob
    }

    /// Decode the contents of an `<id>.env` file: 8 reserved bytes, then
    /// NUL-terminated entries up to end of file.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] when the reserved header is missing, an
    /// entry lacks its NUL terminator, or a direction byte is unknown.
    pub fn decode_record(record: &[u8]) -> Result<Self, EnvelopeError> {
        let body = record
            .get(ENVELOPE_RESERVED..)
            .ok_or(EnvelopeError::Truncated)?;

        let mut envelope = Self::new();
        let mut rest = body;
        while !rest.is_empty() {
            let nul = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or(EnvelopeError::Truncated)?;
            let entry = &rest[..nul];
            rest = &rest[nul + 1..];

            let (&tag, address) = entry.split_first().ok_or(EnvelopeError::Truncated)?;
            let direction =
                Direction::from_byte(tag).ok_or(EnvelopeError::BadDirection(tag))?;
            envelope.push(direction, address.to_vec());
        }

        Ok(envelope)
    }

    /// Split into the sender and the recipients, qualifying bare local parts
    /// with `@localhost`. Exactly one `From` entry is permitted.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::MissingSender`] or
    /// [`EnvelopeError::DuplicateSender`] accordingly.
    pub fn split(&self) -> Result<(Vec<u8>, Vec<Vec<u8>>), EnvelopeError> {
        let mut sender = None;
        let mut recipients = Vec::new();

        for entry in &self.entries {
            match entry.direction {
                Direction::From => {
                    if sender.replace(entry.qualified()).is_some() {
                        return Err(EnvelopeError::DuplicateSender);
                    }
                }
                Direction::To => recipients.push(entry.qualified()),
            }
        }

        let sender = sender.ok_or(EnvelopeError::MissingSender)?;
        Ok((sender, recipients))
    }
}
