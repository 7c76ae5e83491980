//! The inbound SMTP listener end-to-end: a scripted client speaks SMTP, a
//! fake queue daemon on `queue.ctrl` records what would be enqueued.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream, UnixListener};
use tokio::sync::{broadcast, oneshot};

use gravesend::config::ServerTimeouts;
use gravesend::smtp::{self, IngestConfig};

struct Harness {
    addr: std::net::SocketAddr,
    submissions: oneshot::Receiver<Vec<u8>>,
    _shutdown: broadcast::Sender<gravesend::Signal>,
    _dir: tempfile::TempDir,
}

/// Start the listener plus a one-shot fake queue daemon.
async fn start(accept_submission: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let queue_ctrl = dir.path().join("queue.ctrl");

    let queue = UnixListener::bind(&queue_ctrl).unwrap();
    let (sender, submissions) = oneshot::channel();
    tokio::spawn(async move {
        let (mut stream, _) = queue.accept().await.unwrap();
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes).await.unwrap();
        let verdict = if accept_submission { 1u8 } else { 0u8 };
        stream.write_all(&[verdict]).await.unwrap();
        let _ = sender.send(bytes);
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = Arc::new(IngestConfig {
        banner_host: "testhost".to_string(),
        queue_ctrl,
        timeouts: ServerTimeouts::default(),
        max_connections: 4,
    });
    let (shutdown, receiver) = broadcast::channel(1);
    tokio::spawn(smtp::serve(listener, config, receiver));

    Harness {
        addr,
        submissions,
        _shutdown: shutdown,
        _dir: dir,
    }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    async fn recv(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\r\n").await.unwrap();
    }

    async fn roundtrip(&mut self, line: &str) -> String {
        self.send(line).await;
        self.recv().await
    }
}

#[tokio::test]
async fn a_full_transaction_is_queued() {
    let harness = start(true).await;
    let mut client = Client::connect(harness.addr).await;

    assert_eq!(client.recv().await, "220 testhost ESMTP gravesend");
    assert_eq!(client.roundtrip("EHLO tester").await, "250 welcome");
    assert_eq!(client.roundtrip("MAIL FROM:<a@b>").await, "250 ok");
    assert_eq!(client.roundtrip("RCPT TO:<c@d>").await, "250 ok");
    assert_eq!(client.roundtrip("RCPT TO:<e@f>").await, "250 ok");
    assert_eq!(
        client.roundtrip("DATA").await,
        "354 Start mail input; end with <CRLF>.<CRLF>"
    );

    client.send("hello").await;
    client.send("..stuffed").await;
    assert_eq!(client.roundtrip(".").await, "250 queued");
    assert_eq!(client.roundtrip("QUIT").await, "221 Bye");

    let submission = harness.submissions.await.unwrap();
    assert_eq!(
        submission,
        b"Fa@b\0Tc@d\0Te@f\0\0hello\r\n.stuffed"
    );
}

#[tokio::test]
async fn sequencing_violations_get_503() {
    let harness = start(true).await;
    let mut client = Client::connect(harness.addr).await;

    client.recv().await;
    assert_eq!(
        client.roundtrip("MAIL FROM:<a@b>").await,
        "503 bad sequence of commands"
    );
    assert_eq!(client.roundtrip("EHLO x").await, "250 welcome");
    assert_eq!(
        client.roundtrip("DATA").await,
        "503 bad sequence of commands"
    );
    assert_eq!(
        client.roundtrip("RCPT TO:<c@d>").await,
        "503 bad sequence of commands"
    );
}

#[tokio::test]
async fn malformed_and_unknown_commands() {
    let harness = start(true).await;
    let mut client = Client::connect(harness.addr).await;

    client.recv().await;
    client.roundtrip("HELO x").await;
    assert_eq!(
        client.roundtrip("MAIL FROM:a@b").await,
        "501 missing or malformed local part"
    );
    assert_eq!(client.roundtrip("NOOP").await, "500 unknown command");
    // The 501 left the state untouched.
    assert_eq!(client.roundtrip("MAIL FROM:<a@b>").await, "250 ok");
}

#[tokio::test]
async fn trailing_bytes_after_the_terminator_get_554() {
    let harness = start(true).await;
    let mut client = Client::connect(harness.addr).await;

    client.recv().await;
    client.roundtrip("EHLO x").await;
    client.roundtrip("MAIL FROM:<a@b>").await;
    client.roundtrip("RCPT TO:<c@d>").await;
    client.roundtrip("DATA").await;

    client
        .writer
        .write_all(b"body\r\n.\r\ntrailing garbage")
        .await
        .unwrap();
    assert_eq!(client.recv().await, "554 trailing data after data");
}

#[tokio::test]
async fn queue_refusal_yields_451_and_keeps_the_session() {
    let harness = start(false).await;
    let mut client = Client::connect(harness.addr).await;

    client.recv().await;
    client.roundtrip("EHLO x").await;
    client.roundtrip("MAIL FROM:<a@b>").await;
    client.roundtrip("RCPT TO:<c@d>").await;
    client.roundtrip("DATA").await;
    assert_eq!(
        client.roundtrip(".").await,
        "451 Requested action aborted: local error in processing"
    );
    // The connection survives; a new transaction may start.
    assert_eq!(client.roundtrip("MAIL FROM:<x@y>").await, "250 ok");
}
