//! The inbound SMTP listener: accepts connections, validates command
//! sequencing, collects the envelope, unstuffs the DATA stream, and submits
//! the result to the queue daemon.
//!
//! One task per connection, bounded by a semaphore; a connection is handled
//! to completion within its task. The unstuffed message is buffered and
//! only submitted once the end-of-data marker arrived, so a protocol error
//! can never enqueue a truncated message.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};
use tokio::time::timeout;

use crate::config::ServerTimeouts;
use crate::control;
use crate::envelope::{Direction, Envelope};
use crate::Signal;
use crate::{incoming, internal, outgoing};

use super::codec::{CodecError, DotUnstuffer, Unstuffed};
use super::command::Command;
use super::state::{Action, SessionState};

/// RFC 2821 4.5.3.1: command lines are at most 512 octets with CRLF.
const COMMAND_LINE_MAX: usize = 512;

pub struct IngestConfig {
    /// Hostname announced in the greeting banner.
    pub banner_host: String,
    /// Path of the queue daemon's control socket.
    pub queue_ctrl: PathBuf,
    pub timeouts: ServerTimeouts,
    /// Upper bound on concurrently served connections.
    pub max_connections: usize,
}

/// Accept loop: one task per connection until shutdown.
///
/// # Errors
///
/// Only accept-level I/O errors are fatal; per-session errors are logged
/// and end that session alone.
pub async fn serve(
    listener: TcpListener,
    config: Arc<IngestConfig>,
    mut shutdown: broadcast::Receiver<Signal>,
) -> std::io::Result<()> {
    let permits = Arc::new(Semaphore::new(config.max_connections));
    let mut sessions = Vec::new();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                internal!(level = INFO, "listener shutting down, finishing sessions");
                for session in sessions {
                    let _ = session.await;
                }
                return Ok(());
            }

            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let permit = Arc::clone(&permits).acquire_owned().await.expect("semaphore closed");
                let config = Arc::clone(&config);
                sessions.retain(|handle: &tokio::task::JoinHandle<()>| !handle.is_finished());
                sessions.push(tokio::spawn(async move {
                    internal!(level = DEBUG, "connection from {peer}");
                    if let Err(err) = Session::new(stream, config).run().await {
                        internal!(level = DEBUG, "session with {peer} ended: {err}");
                    }
                    drop(permit);
                }));
            }
        }
    }
}

struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    config: Arc<IngestConfig>,
}

impl Session {
    fn new(stream: TcpStream, config: Arc<IngestConfig>) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            config,
        }
    }

    async fn run(mut self) -> std::io::Result<()> {
        self.reply(&format!("220 {} ESMTP gravesend", self.config.banner_host))
            .await?;

        let mut state = SessionState::default();
        let mut envelope = Envelope::new();

        loop {
            let Some(line) = self.read_command_line().await? else {
                return Ok(()); // peer went away
            };

            let command = Command::parse(&line);
            incoming!("{}", String::from_utf8_lossy(&line));

            let (next, action) = state.transition(command);
            state = next;

            match action {
                Action::Greet => self.reply("250 welcome").await?,
                Action::Sender(address) => {
                    envelope.push(Direction::From, address);
                    self.reply("250 ok").await?;
                }
                Action::Recipient(address) => {
                    envelope.push(Direction::To, address);
                    self.reply("250 ok").await?;
                }
                Action::BeginData => {
                    self.reply("354 Start mail input; end with <CRLF>.<CRLF>")
                        .await?;
                    self.receive_and_queue(&envelope).await?;
                    envelope = Envelope::new();
                }
                Action::Quit => {
                    self.reply("221 Bye").await?;
                    return Ok(());
                }
                Action::Malformed => {
                    self.reply("501 missing or malformed local part").await?;
                }
                Action::BadSequence => {
                    self.reply("503 bad sequence of commands").await?;
                }
                Action::Unknown(line) => {
                    self.reply("500 unknown command").await?;
                    internal!(
                        level = DEBUG,
                        "unknown command: {}",
                        String::from_utf8_lossy(&line)
                    );
                }
            }
        }
    }

    /// Read the message body, unstuffing as it arrives, and submit the
    /// clean message to the queue daemon.
    async fn receive_and_queue(&mut self, envelope: &Envelope) -> std::io::Result<()> {
        let message = match self.read_data().await {
            Ok(message) => message,
            Err(DataError::Codec(CodecError::TrailingData)) => {
                return self.reply("554 trailing data after data").await;
            }
            Err(DataError::Io(err)) => return Err(err),
        };

        let queued = match control::submit(
            &self.config.queue_ctrl,
            &envelope.encode_blob(),
            &message,
        )
        .await
        {
            Ok(queued) => queued,
            Err(err) => {
                internal!(level = ERROR, "queue submission failed: {err}");
                false
            }
        };

        if queued {
            self.reply("250 queued").await
        } else {
            self.reply("451 Requested action aborted: local error in processing")
                .await
        }
    }

    async fn read_data(&mut self) -> Result<Vec<u8>, DataError> {
        let deadline = self.config.timeouts.data_block();
        let mut unstuffer = DotUnstuffer::new();
        let mut message = Vec::new();

        loop {
            let chunk = timeout(deadline, self.reader.fill_buf())
                .await
                .map_err(|_| {
                    DataError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "timed out waiting for message data",
                    ))
                })?
                .map_err(DataError::Io)?;

            if chunk.is_empty() {
                return Err(DataError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before end-of-data",
                )));
            }

            let done = unstuffer.feed(chunk, &mut message);
            let consumed = chunk.len();
            self.reader.consume(consumed);

            match done {
                Ok(Unstuffed::More) => {}
                Ok(Unstuffed::Done) => return Ok(message),
                Err(err) => return Err(DataError::Codec(err)),
            }
        }
    }

    /// Read one CRLF-terminated command line, or `None` when the peer hung
    /// up. Overlong lines end the session after a `500`.
    async fn read_command_line(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let deadline = self.config.timeouts.command();
        let mut line = Vec::new();

        let read = timeout(deadline, self.reader.read_until(b'\n', &mut line))
            .await
            .map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::TimedOut, "command timeout")
            })??;

        if read == 0 {
            internal!(level = DEBUG, "lost connection to client");
            return Ok(None);
        }
        if line.len() > COMMAND_LINE_MAX {
            self.reply("500 Line too long.").await?;
            return Ok(None);
        }

        if line.ends_with(b"\r\n") {
            line.truncate(line.len() - 2);
        } else if line.ends_with(b"\n") {
            line.truncate(line.len() - 1);
        }
        Ok(Some(line))
    }

    async fn reply(&mut self, text: &str) -> std::io::Result<()> {
        outgoing!("{text}");
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await
    }
}

enum DataError {
    Io(std::io::Error),
    Codec(CodecError),
}
