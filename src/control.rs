//! The Unix-socket links between adjacent pipeline stages.
//!
//! Three links, all with trusted local peers:
//!
//! - `queue.ctrl` — smtpd/inject submit one message (envelope blob, NUL,
//!   message bytes, then a write shutdown); the queue daemon answers one
//!   byte, `1` for queued, `0` for failure.
//! - `send.ctrl` — the queue daemon wakes the scheduler by connecting and
//!   closing; no payload.
//! - `remote.ctrl` — the scheduler ships a delivery job
//!   (`host NUL sender NUL recipient NUL … NUL data`) and reads the same
//!   one-byte verdict.

use std::io;
use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// The one-byte verdicts on the submit and dispatch links.
pub const ACCEPTED: u8 = 1;
pub const REFUSED: u8 = 0;

/// Submit one message to the queue daemon. Returns whether it was queued.
///
/// # Errors
///
/// I/O errors on the control socket. A peer that closes without a verdict
/// counts as a refusal, not an error.
pub async fn submit(path: &Path, envelope_blob: &[u8], data: &[u8]) -> io::Result<bool> {
    let mut stream = UnixStream::connect(path).await?;
    stream.write_all(envelope_blob).await?;
    stream.write_all(data).await?;
    stream.shutdown().await?;
    read_verdict(&mut stream).await
}

/// Wake the delivery scheduler: connect and immediately close.
///
/// # Errors
///
/// I/O errors reaching the wake socket.
pub async fn wake(path: &Path) -> io::Result<()> {
    UnixStream::connect(path).await.map(drop)
}

/// One delivery job on the `remote.ctrl` link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    /// Destination hint; empty means "use the configured relay".
    pub host: Vec<u8>,
    pub sender: Vec<u8>,
    pub recipients: Vec<Vec<u8>>,
    pub data: Vec<u8>,
}

impl DispatchRequest {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(
            self.host.len() + self.sender.len() + self.data.len() + 16,
        );
        wire.extend_from_slice(&self.host);
        wire.push(0);
        wire.extend_from_slice(&self.sender);
        wire.push(0);
        for recipient in &self.recipients {
            wire.extend_from_slice(recipient);
            wire.push(0);
        }
        wire.push(0);
        wire.extend_from_slice(&self.data);
        wire
    }

    /// Decode a complete job as read off the socket (data runs to EOF).
    ///
    /// # Errors
    ///
    /// `InvalidData` when a NUL-terminated field is missing or a recipient
    /// entry is empty where one was announced.
    pub fn decode(wire: &[u8]) -> io::Result<Self> {
        fn field(rest: &mut &[u8]) -> io::Result<Vec<u8>> {
            let nul = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "truncated job"))?;
            let value = rest[..nul].to_vec();
            *rest = &rest[nul + 1..];
            Ok(value)
        }

        let mut rest = wire;
        let host = field(&mut rest)?;
        let sender = field(&mut rest)?;

        let mut recipients = Vec::new();
        loop {
            let recipient = field(&mut rest)?;
            if recipient.is_empty() {
                break;
            }
            recipients.push(recipient);
        }

        Ok(Self {
            host,
            sender,
            recipients,
            data: rest.to_vec(),
        })
    }
}

/// Ship a delivery job to the SMTP client daemon and await its verdict.
///
/// # Errors
///
/// I/O errors on the control socket; a closed peer counts as a refusal.
pub async fn dispatch(path: &Path, request: &DispatchRequest) -> io::Result<bool> {
    let mut stream = UnixStream::connect(path).await?;
    stream.write_all(&request.encode()).await?;
    stream.shutdown().await?;
    read_verdict(&mut stream).await
}

async fn read_verdict(stream: &mut UnixStream) -> io::Result<bool> {
    let mut verdict = [0u8; 1];
    match stream.read_exact(&mut verdict).await {
        Ok(_) => Ok(verdict[0] == ACCEPTED),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err),
    }
}
