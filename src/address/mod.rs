//! RFC 822/2822 address-header lexing and parsing.
//!
//! Header values like `To:` carry a comma-separated list of mailboxes and
//! groups, with folding whitespace, parenthesized comments, quoted strings,
//! routed angle addresses, and domain literals. [`lexer::Lexer`] folds all
//! of that into a flat token stream; [`parser::parse`] recognizes the
//! simplified grammar
//!
//! ```text
//! mailbox := local-part "@" domain
//!         |  phrase "<" [route ":"] addr-spec ">"
//! group   := phrase ":" [mailbox-list] ";"
//! ```
//!
//! and emits each mailbox, in input order, as a direction-tagged byte
//! string. A bare word with no `@` is qualified as `word@localhost`.
//!
//! Any syntactic violation is fatal for the message being parsed; there is
//! no partial-success mode.

pub mod lexer;
pub mod parser;

pub use lexer::{Lexer, Token};
pub use parser::parse;

use thiserror::Error;

/// Errors raised while lexing or parsing an address header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("unexpected character {0:?} in address list")]
    UnexpectedChar(char),

    #[error("expected text after dot '.' or colon ':'")]
    ExpectedWordAfterDot,

    #[error("expected '@' or '.' after word")]
    ExpectedAtOrDot,

    #[error("expected atom or domain-literal after '@' or '.'")]
    ExpectedDomain,

    #[error("expected '.' after domain part")]
    ExpectedDotAfterDomain,

    #[error("unexpected end of group")]
    UnexpectedGroupEnd,

    #[error("group inside group")]
    NestedGroup,

    #[error("malformed angle-bracketed address")]
    MalformedAngleAddress,

    #[error("unexpected end of header")]
    UnexpectedEndOfHeader,

    #[error("unterminated comment")]
    UnterminatedComment,

    #[error("unterminated quoted string")]
    UnterminatedQuotedString,

    #[error("unterminated domain literal")]
    UnterminatedDomainLiteral,

    #[error("'[' inside domain literal")]
    NestedDomainLiteral,
}
