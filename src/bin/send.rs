//! The delivery scheduler daemon: drains the queue, handing each pending
//! ticket to gravesend-remote, and retries failures forever.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::UnixListener;

use gravesend::internal;
use gravesend::scheduler::{ControlDispatcher, Scheduler};
use gravesend::QueueStatus;

#[derive(Debug, Parser)]
#[command(
    name = "gravesend-send",
    about = "Drain the mail queue and hand each message to gravesend-remote"
)]
struct Args {
    /// Unix domain socket to listen on for wake signals.
    #[arg(long = "in", default_value = "send.ctrl")]
    input: PathBuf,

    /// Unix domain socket of gravesend-remote.
    #[arg(long = "out", default_value = "remote.ctrl")]
    output: PathBuf,

    /// Queue directory holding the status file and ticket files.
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Seconds between full retry sweeps when no wake arrives.
    #[arg(long, default_value_t = 30 * 60)]
    interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gravesend::logging::init();
    let args = Args::parse();

    let status = QueueStatus::open(&args.dir)?;
    let _ = std::fs::remove_file(&args.input);
    let listener = UnixListener::bind(&args.input)?;

    let scheduler = Scheduler::new(&args.dir, ControlDispatcher::new(&args.output));

    tokio::select! {
        result = scheduler.run(&status, listener, Duration::from_secs(args.interval_secs)) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "gravesend-send shutting down");
        }
    }
    Ok(())
}
