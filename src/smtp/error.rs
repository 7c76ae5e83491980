//! Error taxonomy for the outbound SMTP client.
//!
//! Every failure here means "this delivery attempt is over"; the scheduler
//! leaves the ticket in place and retries on a later pass. Nothing in this
//! module is fatal for the process.

use std::fmt;
use std::io;

use thiserror::Error;

use super::reply::ReplyError;

/// The dialogue stage a failure occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Greeting,
    Ehlo,
    Auth,
    MailFrom,
    RcptTo,
    DataInit,
    DataBlock,
    DataTermination,
    Quit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Greeting => "greeting",
            Self::Ehlo => "EHLO",
            Self::Auth => "AUTH",
            Self::MailFrom => "MAIL FROM",
            Self::RcptTo => "RCPT TO",
            Self::DataInit => "DATA",
            Self::DataBlock => "data block",
            Self::DataTermination => "end of data",
            Self::Quit => "QUIT",
        })
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to connect to {relay}: {source}")]
    Connect {
        relay: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O during {stage}: {source}")]
    Io {
        stage: Stage,
        #[source]
        source: io::Error,
    },

    #[error("{0} exceeded its deadline")]
    Timeout(Stage),

    #[error("malformed reply during {stage}: {source}")]
    Reply {
        stage: Stage,
        #[source]
        source: ReplyError,
    },

    #[error("{stage} rejected with {code} {text}")]
    Rejected {
        stage: Stage,
        code: u16,
        text: String,
    },

    #[error("connection closed by relay during {0}")]
    Closed(Stage),

    #[error("no relay configured")]
    NoRelay,
}
