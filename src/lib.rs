//! A small mail-transfer pipeline influenced by qmail.
//!
//! Messages enter through the SMTP listener (`gravesend-smtpd`) or the local
//! injection tool (`gravesend-inject`), are normalized and durably queued by
//! the queue daemon (`gravesend-queue`), and are drained by the delivery
//! scheduler (`gravesend-send`), which hands each queued message to the SMTP
//! client daemon (`gravesend-remote`) for relay delivery.
//!
//! The processes coordinate exclusively through the filesystem and local
//! Unix sockets: an advisory lock on the queue status file, exclusive ticket
//! file creation, and the `queue.ctrl` / `send.ctrl` / `remote.ctrl` links.

pub use tracing;

pub mod address;
pub mod config;
pub mod control;
pub mod envelope;
pub mod logging;
pub mod normalize;
pub mod queue;
pub mod scheduler;
pub mod smtp;

pub use envelope::{Direction, Envelope};
pub use queue::{QueueError, QueueStatus, QueueWriter, Ticket};

/// Broadcast from a daemon's signal handler to its serving loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
