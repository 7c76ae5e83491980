//! Ticket persistence: turning one submitted message into a durable
//! `<id>.env` / `<id>.dat` file pair.
//!
//! The submission protocol (shared by the SMTP listener and the injection
//! tool) is an envelope blob — direction-tagged, NUL-terminated entries,
//! closed by an extra NUL — followed by the raw message bytes until EOF.
//! Exclusive file creation is the sole guard against ticket-id collision;
//! independent accept loops may enqueue concurrently with no coordination
//! beyond the status-file lock.

use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};

use crate::envelope::ENVELOPE_RESERVED;
use crate::internal;

use super::{QueueError, QueueStatus, Ticket};

/// Writes queued messages into a queue directory.
pub struct QueueWriter {
    status: QueueStatus,
    dir: PathBuf,
}

impl QueueWriter {
    /// Open (or initialize) the queue in `dir`.
    ///
    /// # Errors
    ///
    /// Fails when the status file cannot be opened or created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let dir = dir.into();
        let status = QueueStatus::open(&dir)?;
        Ok(Self { status, dir })
    }

    #[must_use]
    pub fn status(&self) -> &QueueStatus {
        &self.status
    }

    /// Durably queue one message from `source`.
    ///
    /// Allocates a ticket, creates both ticket files exclusively, copies the
    /// envelope up to its terminator into `<id>.env` (behind 8 reserved
    /// bytes), then the synthesized `Received:` line and the remaining bytes
    /// into `<id>.dat`. On success both files are left for the scheduler.
    ///
    /// # Errors
    ///
    /// On any failure, files created here are deleted (best effort) and the
    /// error is returned; a pre-existing colliding file is never touched.
    pub async fn enqueue<R>(&self, source: &mut R) -> Result<Ticket, QueueError>
    where
        R: AsyncBufRead + Unpin,
    {
        let ticket = self.status.allocate()?;
        let dat_path = ticket.dat_path(&self.dir);
        let env_path = ticket.env_path(&self.dir);

        let mut dat = create_exclusive(&dat_path).await?;
        let mut env = match create_exclusive(&env_path).await {
            Ok(file) => file,
            Err(err) => {
                drop(dat);
                let _ = fs::remove_file(&dat_path).await;
                return Err(err);
            }
        };

        let result = async {
            env.write_all(&[0u8; ENVELOPE_RESERVED]).await?;
            copy_envelope(source, &mut env).await?;
            env.flush().await?;
            env.sync_all().await?;

            dat.write_all(received_line().as_bytes()).await?;
            tokio::io::copy(source, &mut dat).await?;
            dat.flush().await?;
            dat.sync_all().await?;
            Ok::<(), QueueError>(())
        }
        .await;

        drop(env);
        drop(dat);

        if let Err(err) = result {
            let _ = fs::remove_file(&env_path).await;
            let _ = fs::remove_file(&dat_path).await;
            return Err(err);
        }

        internal!(level = DEBUG, "queued ticket {ticket}");
        Ok(ticket)
    }
}

async fn create_exclusive(path: &Path) -> Result<File, QueueError> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|err| {
            if err.kind() == std::io::ErrorKind::AlreadyExists {
                QueueError::TicketExists(path.display().to_string())
            } else {
                QueueError::Io(err)
            }
        })
}

/// Copy envelope bytes until the blob terminator: a NUL immediately
/// following a NUL. Entry terminators are written through; the closing NUL
/// is consumed but not written.
async fn copy_envelope<R>(source: &mut R, out: &mut File) -> Result<(), QueueError>
where
    R: AsyncBufRead + Unpin,
{
    let mut prev_nul = false;
    loop {
        let buf = source.fill_buf().await?;
        if buf.is_empty() {
            return Err(QueueError::TruncatedEnvelope);
        }

        let mut terminator = None;
        for (i, &byte) in buf.iter().enumerate() {
            if byte == 0 {
                if prev_nul {
                    terminator = Some(i);
                    break;
                }
                prev_nul = true;
            } else {
                prev_nul = false;
            }
        }

        match terminator {
            Some(i) => {
                out.write_all(&buf[..i]).await?;
                source.consume(i + 1);
                return Ok(());
            }
            None => {
                let len = buf.len();
                out.write_all(buf).await?;
                source.consume(len);
            }
        }
    }
}

/// The `Received:` header line prepended to every queued message.
fn received_line() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".into());
    let date = Local::now().format("%a, %d %b %Y %H:%M:%S %z");
    format!(
        "Received: (gravesend-queue {} invoked on {host});\r\n     {date}\r\n",
        std::process::id()
    )
}
