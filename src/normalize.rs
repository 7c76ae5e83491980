//! Header normalization for locally injected mail.
//!
//! The injection path takes a complete message, rewrites its header, and
//! produces the envelope alongside the rewritten bytes. Address headers
//! (`From`, `To`, `Cc`, `Bcc`) run through the RFC 822 parser, which feeds
//! the envelope and yields the canonical spelling for the output header —
//! original quoting, comments, and folding do not survive. `Bcc` recipients
//! enter the envelope but never the header; `Return-Path` and
//! `Content-Length` are dropped; anything unrecognized is copied through
//! with its folding preserved (bare LF becomes CRLF). A missing
//! `Message-Id` and `Date` are synthesized after the header.

use chrono::Local;
use thiserror::Error;

use crate::address::{self, AddressError, Lexer};
use crate::envelope::{Direction, Envelope};

#[derive(Debug, Error)]
pub enum NormalizeError {
    /// More than one `From:` address across the whole header.
    #[error("only one From: entry allowed")]
    DuplicateFrom,

    #[error("non-printable ASCII character in header field name")]
    BadFieldName,

    #[error(transparent)]
    Address(#[from] AddressError),
}

/// The result of normalization: the envelope and the message as queued.
#[derive(Debug)]
pub struct NormalizedMessage {
    pub envelope: Envelope,
    pub data: Vec<u8>,
}

/// Rewrite one message.
///
/// # Errors
///
/// [`NormalizeError`] — all of them are unrecoverable input errors for this
/// message, per the injection tool's contract.
pub fn normalize(input: &[u8]) -> Result<NormalizedMessage, NormalizeError> {
    let mut pos = 0;
    let mut header: Vec<u8> = Vec::new();
    let mut from_list: Vec<Vec<u8>> = Vec::new();
    let mut to_list: Vec<Vec<u8>> = Vec::new();
    let mut has_date = false;
    let mut has_message_id = false;
    let mut body_start = input.len();

    while pos < input.len() {
        // A blank line ends the header.
        if input[pos] == b'\n' {
            body_start = pos + 1;
            break;
        }
        if input[pos] == b'\r' {
            if input.get(pos + 1) == Some(&b'\n') {
                body_start = pos + 2;
                break;
            }
            return Err(NormalizeError::BadFieldName);
        }

        let name_start = pos;
        let mut colon = None;
        while pos < input.len() {
            let byte = input[pos];
            if byte == b':' {
                colon = Some(pos);
                break;
            }
            if byte <= 32 || byte >= 126 {
                return Err(NormalizeError::BadFieldName);
            }
            pos += 1;
        }
        let Some(colon) = colon else {
            // Input ended inside a field name; nothing left to keep.
            break;
        };
        let name = &input[name_start..colon];
        let lower = name.to_ascii_lowercase();
        pos = colon + 1;

        match lower.as_slice() {
            b"from" | b"to" | b"cc" | b"bcc" => {
                let is_from = lower == b"from";
                let is_bcc = lower == b"bcc";
                let direction = if is_from {
                    Direction::From
                } else {
                    Direction::To
                };

                let mut lexer = Lexer::new(&input[pos..]);
                let mut parsed: Vec<Vec<u8>> = Vec::new();
                let count = address::parse(&mut lexer, direction, |_, addr| parsed.push(addr))?;
                pos += lexer.consumed();

                if is_from {
                    if count > 1 || !from_list.is_empty() {
                        return Err(NormalizeError::DuplicateFrom);
                    }
                    from_list.extend(parsed.iter().cloned());
                } else {
                    to_list.extend(parsed.iter().cloned());
                }

                if !is_bcc && !parsed.is_empty() {
                    header.extend_from_slice(name);
                    header.extend_from_slice(b": ");
                    for (i, address) in parsed.iter().enumerate() {
                        if i > 0 {
                            header.extend_from_slice(b", ");
                        }
                        header.extend_from_slice(address);
                    }
                    header.extend_from_slice(b"\r\n");
                }
            }
            b"date" => {
                has_date = true;
                pos = copy_value(input, pos, name, &mut header);
            }
            b"message-id" => {
                has_message_id = true;
                pos = copy_value(input, pos, name, &mut header);
            }
            b"return-path" | b"content-length" => {
                pos = skip_value(input, pos);
            }
            _ => {
                pos = copy_value(input, pos, name, &mut header);
            }
        }
    }

    let mut data = header;
    if !has_message_id {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".into());
        data.extend_from_slice(
            format!(
                "Message-Id: <{}.{}.gravesend@{host}>\r\n",
                Local::now().timestamp(),
                std::process::id()
            )
            .as_bytes(),
        );
    }
    if !has_date {
        data.extend_from_slice(
            format!("Date: {}\r\n", Local::now().format("%a, %d %b %Y %H:%M:%S %z")).as_bytes(),
        );
    }
    data.extend_from_slice(b"\r\n");
    data.extend_from_slice(&input[body_start..]);

    let mut envelope = Envelope::new();
    for address in from_list {
        envelope.push(Direction::From, address);
    }
    for address in to_list {
        envelope.push(Direction::To, address);
    }

    Ok(NormalizedMessage { envelope, data })
}

/// Copy `name` and its (possibly folded) value into `header`, normalizing
/// line endings to CRLF. Returns the position after the value.
fn copy_value(input: &[u8], mut pos: usize, name: &[u8], header: &mut Vec<u8>) -> usize {
    header.extend_from_slice(name);
    header.push(b':');
    loop {
        let Some(newline) = input[pos..].iter().position(|&b| b == b'\n') else {
            header.extend_from_slice(&input[pos..]);
            return input.len();
        };
        let line_end = pos + newline;
        let value_end = if line_end > pos && input[line_end - 1] == b'\r' {
            line_end - 1
        } else {
            line_end
        };
        header.extend_from_slice(&input[pos..value_end]);
        header.extend_from_slice(b"\r\n");
        pos = line_end + 1;

        match input.get(pos) {
            Some(&fold) if fold == b' ' || fold == b'\t' => {
                header.push(fold);
                pos += 1;
            }
            _ => return pos,
        }
    }
}

/// Consume a (possibly folded) header value without emitting anything.
fn skip_value(input: &[u8], mut pos: usize) -> usize {
    loop {
        let Some(newline) = input[pos..].iter().position(|&b| b == b'\n') else {
            return input.len();
        };
        pos += newline + 1;
        match input.get(pos) {
            Some(&(b' ' | b'\t')) => pos += 1,
            _ => return pos,
        }
    }
}
