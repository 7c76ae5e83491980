//! Parsing of SMTP server replies.
//!
//! A reply line is exactly three digits, then a space (final line), a dash
//! (continuation — only legal where the caller expects a multi-line reply),
//! or CR for a text-less reply, then text running to CRLF. A CR inside the
//! text that is not followed by LF is text; a bare LF anywhere is a
//! protocol violation.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
    #[error("expected digit in reply code")]
    BadCode,

    #[error("expected ' ', '-' or CR after reply code")]
    BadSeparator,

    #[error("unexpected continuation line")]
    UnexpectedContinuation,

    #[error("bare LF in reply line")]
    BareLineFeed,

    #[error("reply line ended before CRLF")]
    Truncated,

    #[error("reply line too long")]
    TooLong,
}

/// One parsed reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
    /// Another line of the same reply follows.
    pub more: bool,
}

impl Reply {
    /// Parse one reply line including its CRLF terminator.
    ///
    /// `allow_continuation` corresponds to the caller expecting a multi-line
    /// reply (EHLO capabilities); elsewhere a `-` separator is a violation.
    ///
    /// # Errors
    ///
    /// See [`ReplyError`].
    pub fn parse_line(line: &[u8], allow_continuation: bool) -> Result<Self, ReplyError> {
        let Some(body) = line.strip_suffix(b"\r\n") else {
            return if line.ends_with(b"\n") {
                Err(ReplyError::BareLineFeed)
            } else {
                Err(ReplyError::Truncated)
            };
        };

        if body.len() < 3 {
            return Err(ReplyError::BadCode);
        }
        let mut code = 0u16;
        for &digit in &body[..3] {
            if !digit.is_ascii_digit() {
                return Err(ReplyError::BadCode);
            }
            code = code * 10 + u16::from(digit - b'0');
        }

        let (more, text) = match body.get(3) {
            None => (false, &body[3..]),
            Some(&b' ') => (false, &body[4..]),
            Some(&b'-') => {
                if !allow_continuation {
                    return Err(ReplyError::UnexpectedContinuation);
                }
                (true, &body[4..])
            }
            Some(_) => return Err(ReplyError::BadSeparator),
        };

        if text.contains(&b'\n') {
            return Err(ReplyError::BareLineFeed);
        }

        Ok(Self {
            code,
            text: String::from_utf8_lossy(text).into_owned(),
            more,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_reply() {
        let reply = Reply::parse_line(b"250 ok\r\n", false).unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.text, "ok");
        assert!(!reply.more);
    }

    #[test]
    fn multi_line_reply_sets_more_until_the_final_line() {
        let first = Reply::parse_line(b"250-first\r\n", true).unwrap();
        assert_eq!((first.code, first.more), (250, true));
        assert_eq!(first.text, "first");

        let second = Reply::parse_line(b"250 second\r\n", true).unwrap();
        assert_eq!((second.code, second.more), (250, false));
        assert_eq!(second.text, "second");
    }

    #[test]
    fn continuation_is_a_violation_where_single_line_is_expected() {
        assert_eq!(
            Reply::parse_line(b"250-surprise\r\n", false),
            Err(ReplyError::UnexpectedContinuation)
        );
    }

    #[test]
    fn non_digit_in_code_is_rejected() {
        assert_eq!(
            Reply::parse_line(b"25a ok\r\n", false),
            Err(ReplyError::BadCode)
        );
        assert_eq!(
            Reply::parse_line(b"x50 ok\r\n", false),
            Err(ReplyError::BadCode)
        );
    }

    #[test]
    fn code_only_reply_is_accepted() {
        let reply = Reply::parse_line(b"250\r\n", false).unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.text, "");
    }

    #[test]
    fn bad_separator_is_rejected() {
        assert_eq!(
            Reply::parse_line(b"250#ok\r\n", false),
            Err(ReplyError::BadSeparator)
        );
    }

    #[test]
    fn bare_lf_is_rejected() {
        assert_eq!(
            Reply::parse_line(b"250 ok\n", false),
            Err(ReplyError::BareLineFeed)
        );
    }

    #[test]
    fn cr_inside_text_is_text() {
        let reply = Reply::parse_line(b"250 odd\rtext\r\n", false).unwrap();
        assert_eq!(reply.text, "odd\rtext");
    }

    #[test]
    fn truncated_line_is_rejected() {
        assert_eq!(
            Reply::parse_line(b"250 ok", false),
            Err(ReplyError::Truncated)
        );
    }
}
