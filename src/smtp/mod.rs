//! The SMTP protocol machinery, both directions.
//!
//! Server side: [`command`] parsing, the [`state`] machine for command
//! sequencing, and the per-connection [`server`] session. Client side:
//! [`reply`] parsing and the [`client`] dialogue. [`codec`] holds the
//! DATA-phase dot-stuffing transforms both sides share.

pub mod client;
pub mod codec;
pub mod command;
pub mod error;
pub mod reply;
pub mod server;
pub mod state;

pub use client::{Capabilities, RemoteDispatcher};
pub use codec::{CodecError, DotStuffer, DotUnstuffer};
pub use command::Command;
pub use error::{DispatchError, Stage};
pub use reply::{Reply, ReplyError};
pub use server::{serve, IngestConfig};
pub use state::{Action, SessionState};
