//! The delivery scheduler: drains the open ticket range, hands each ticket
//! to a dispatcher, and advances the queue head past the contiguous prefix
//! of successes.
//!
//! The scheduler owns a local mirror of `head`, initialized from a startup
//! snapshot. Each pass scans `[start, tail)`: a timeout-triggered pass
//! starts at `head` (full retry sweep), a wake-triggered pass at the
//! previously seen `tail` (only the new arrivals — tickets already tried
//! this cycle are not re-attempted until the next sweep). The first failed
//! ticket blocks head advancement for the pass; later successes still
//! delete their files. There is no retry counter and no cutoff: a failing
//! ticket is retried until an operator intervenes.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::net::UnixListener;
use tokio::time::timeout;

use crate::control::{self, DispatchRequest};
use crate::envelope::Envelope;
use crate::internal;
use crate::queue::status::pending;
use crate::queue::{QueueError, QueueStatus, Ticket};

/// Deadline for a full retry sweep when no wake arrives.
pub const SCAN_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Where the scheduler sends a ticket's delivery job.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Attempt one delivery; `true` means confirmed success.
    async fn dispatch(&self, request: DispatchRequest) -> bool;
}

/// Ships jobs to the SMTP client daemon over its control socket.
pub struct ControlDispatcher {
    path: PathBuf,
}

impl ControlDispatcher {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Dispatcher for ControlDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> bool {
        match control::dispatch(&self.path, &request).await {
            Ok(delivered) => delivered,
            Err(err) => {
                internal!(level = ERROR, "dispatch link failed: {err}");
                false
            }
        }
    }
}

pub struct Scheduler<D> {
    dir: PathBuf,
    dispatcher: D,
}

impl<D: Dispatcher> Scheduler<D> {
    pub fn new(dir: impl Into<PathBuf>, dispatcher: D) -> Self {
        Self {
            dir: dir.into(),
            dispatcher,
        }
    }

    #[must_use]
    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// Serve forever: scan, persist progress, block on wake or deadline.
    ///
    /// # Errors
    ///
    /// Only status-file failures escape; everything per-ticket is a retry.
    pub async fn run(
        &self,
        status: &QueueStatus,
        listener: UnixListener,
        cycle: Duration,
    ) -> Result<(), QueueError> {
        let (mut head, tail) = status.snapshot()?;
        internal!(
            level = INFO,
            "scheduler started: head {head}, tail {tail}, {} pending",
            pending(head, tail)
        );

        let mut old_tail = tail;
        let mut timeout_pass = true;
        loop {
            let (_, tail) = status.snapshot()?;

            let start = if timeout_pass { head } else { old_tail };
            head = self.scan(head, start, tail).await;

            let seen_tail = status.commit_head(head)?;
            internal!(
                level = DEBUG,
                "pass complete: head {head}, tail {seen_tail}, {} pending",
                pending(head, seen_tail)
            );

            timeout_pass = match timeout(cycle, listener.accept()).await {
                Err(_) => {
                    internal!(level = DEBUG, "awoke on deadline, full sweep");
                    true
                }
                Ok(Ok((conn, _))) => {
                    drop(conn);
                    internal!(level = DEBUG, "awoke on wake signal");
                    false
                }
                Ok(Err(err)) => {
                    internal!(level = ERROR, "wake socket: {err}");
                    false
                }
            };
            old_tail = tail;
        }
    }

    /// Attempt every ticket in `[start, tail)`; returns the new head.
    ///
    /// `head` only moves past a ticket when every ticket from the old head
    /// up to and including it succeeded.
    pub async fn scan(&self, head: u64, start: u64, tail: u64) -> u64 {
        let mut head = head;
        let mut blocked = false;
        let mut id = start;
        while id != tail {
            if self.deliver_ticket(Ticket::new(id)).await {
                if !blocked {
                    head = id.wrapping_add(1);
                }
            } else {
                blocked = true;
            }
            id = id.wrapping_add(1);
        }
        head
    }

    /// Deliver one ticket. `true` means the ticket is gone from the queue —
    /// either delivered now, or its files were already removed.
    async fn deliver_ticket(&self, ticket: Ticket) -> bool {
        let env_path = ticket.env_path(&self.dir);
        let dat_path = ticket.dat_path(&self.dir);

        let env = fs::read(&env_path).await;
        let dat = fs::read(&dat_path).await;
        let (env, dat) = match (env, dat) {
            (Ok(env), Ok(dat)) => (env, dat),
            (Err(env_err), Err(dat_err))
                if env_err.kind() == std::io::ErrorKind::NotFound
                    && dat_err.kind() == std::io::ErrorKind::NotFound =>
            {
                internal!(level = DEBUG, "skip {ticket}, already sent");
                return true;
            }
            (env, dat) => {
                let err = env.err().or_else(|| dat.err()).expect("one side failed");
                internal!(level = ERROR, "ticket {ticket} unreadable: {err}");
                return false;
            }
        };

        let envelope = match Envelope::decode_record(&env) {
            Ok(envelope) => envelope,
            Err(err) => {
                internal!(level = ERROR, "ticket {ticket} envelope: {err}");
                return false;
            }
        };
        let (sender, recipients) = match envelope.split() {
            Ok(split) => split,
            Err(err) => {
                internal!(level = ERROR, "ticket {ticket} envelope: {err}");
                return false;
            }
        };

        internal!(level = INFO, "transmit {ticket}");
        let request = DispatchRequest {
            host: Vec::new(),
            sender,
            recipients,
            data: dat,
        };
        if !self.dispatcher.dispatch(request).await {
            internal!(level = INFO, "delivery of {ticket} failed, will retry");
            return false;
        }

        for path in [&dat_path, &env_path] {
            if let Err(err) = fs::remove_file(path).await {
                internal!(level = ERROR, "failed to remove {}: {err}", path.display());
            }
        }
        true
    }
}
