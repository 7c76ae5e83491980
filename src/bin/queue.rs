//! The queue daemon: accepts message submissions on a Unix control socket
//! and stores them durably in the queue directory, waking the delivery
//! scheduler after every accepted message.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::Semaphore;

use gravesend::control;
use gravesend::internal;
use gravesend::{QueueError, QueueWriter};

#[derive(Debug, Parser)]
#[command(
    name = "gravesend-queue",
    about = "Accept mail from gravesend-smtpd and gravesend-inject and store it in the mail queue"
)]
struct Args {
    /// Unix domain socket to listen on.
    #[arg(long = "in", default_value = "queue.ctrl")]
    input: PathBuf,

    /// Scheduler wake socket, opened and closed after each queued mail.
    #[arg(long = "out", default_value = "send.ctrl")]
    output: PathBuf,

    /// Queue directory holding the status file and ticket files.
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Upper bound on concurrently handled submissions.
    #[arg(long, default_value_t = 64)]
    max_connections: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gravesend::logging::init();
    let args = Args::parse();

    let writer = Arc::new(QueueWriter::open(&args.dir)?);
    let _ = std::fs::remove_file(&args.input);
    let listener = UnixListener::bind(&args.input)?;
    let permits = Arc::new(Semaphore::new(args.max_connections));
    let wake_path = Arc::new(args.output);

    internal!(level = INFO, "gravesend-queue started");

    let mut sessions: Vec<tokio::task::JoinHandle<()>> = Vec::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                internal!(level = INFO, "shutting down, finishing submissions");
                for session in sessions {
                    let _ = session.await;
                }
                return Ok(());
            }

            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let permit = Arc::clone(&permits).acquire_owned().await.expect("semaphore closed");
                let writer = Arc::clone(&writer);
                let wake_path = Arc::clone(&wake_path);
                sessions.retain(|handle| !handle.is_finished());
                sessions.push(tokio::spawn(async move {
                    handle_submission(&writer, &wake_path, stream).await;
                    drop(permit);
                }));
            }
        }
    }
}

async fn handle_submission(
    writer: &QueueWriter,
    wake_path: &std::path::Path,
    stream: tokio::net::UnixStream,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut source = BufReader::new(read_half);

    let verdict = match writer.enqueue(&mut source).await {
        Ok(ticket) => {
            internal!(level = INFO, "queued {ticket}");
            control::ACCEPTED
        }
        Err(QueueError::Full) => {
            // Ring exhaustion is fatal for the daemon.
            internal!(level = ERROR, "queue is full");
            let _ = write_half.write_all(&[control::REFUSED]).await;
            std::process::exit(1);
        }
        Err(err) => {
            internal!(level = ERROR, "push queue failed: {err}");
            control::REFUSED
        }
    };

    if write_half.write_all(&[verdict]).await.is_err() {
        internal!(level = DEBUG, "submitter went away before the verdict");
    }

    if verdict == control::ACCEPTED {
        if let Err(err) = control::wake(wake_path).await {
            internal!(
                level = WARN,
                "failed to trigger gravesend-send via {}: {err}",
                wake_path.display()
            );
        }
    }
}
