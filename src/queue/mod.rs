//! The durable, crash-safe message queue shared by all pipeline stages.
//!
//! A queue directory holds a `status` file — the ring descriptor with the
//! `head`/`tail` ticket counters — and, per pending message, a ticket file
//! pair `<id>.env` / `<id>.dat`. Processes coordinate through an advisory
//! lock on the status file and exclusive ticket-file creation; there is no
//! other cross-process synchronization.

pub mod status;
pub mod ticket;
pub mod writer;

pub use status::QueueStatus;
pub use ticket::Ticket;
pub use writer::QueueWriter;

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The ring allocator is exhausted: handing out another ticket would
    /// make `head == tail`. Recoverable backpressure for library callers;
    /// the daemons treat it as fatal and leave the rest to the operator.
    #[error("queue is full")]
    Full,

    /// The status file could not be locked or unlocked. Nothing can safely
    /// touch queue metadata without the lock.
    #[error("failed to lock queue status file")]
    Lock(#[source] io::Error),

    #[error("queue status file is corrupt: {0}")]
    CorruptStatus(String),

    /// A ticket file already existed. Tickets are written exactly once;
    /// exclusive creation failing means an id collision.
    #[error("ticket file {0} already exists")]
    TicketExists(String),

    /// The envelope blob ended before its terminating NUL.
    #[error("envelope ended before its terminator")]
    TruncatedEnvelope,

    #[error(transparent)]
    Io(#[from] io::Error),
}
