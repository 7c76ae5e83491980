//! The local injection tool: takes a mail from stdin (or a file), rewrites
//! its header, and places it into the mail queue.

use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use gravesend::control;
use gravesend::normalize::normalize;

#[derive(Debug, Parser)]
#[command(
    name = "gravesend-inject",
    about = "Take a mail from stdin and place it into the mail queue"
)]
struct Args {
    /// Read the message from a file instead of stdin.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Unix domain socket of gravesend-queue.
    #[arg(long = "out", default_value = "queue.ctrl")]
    output: PathBuf,

    /// Print the rewritten message and envelope instead of queueing.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gravesend::logging::init();
    let args = Args::parse();

    let mut input = Vec::new();
    match &args.file {
        Some(path) => {
            std::fs::File::open(path)
                .and_then(|mut file| file.read_to_end(&mut input))
                .with_context(|| format!("failed to open {}", path.display()))?;
        }
        None => {
            std::io::stdin()
                .read_to_end(&mut input)
                .context("failed to read stdin")?;
        }
    }

    let message = normalize(&input).context("failed to rewrite message header")?;

    if args.dry_run {
        use std::io::Write;
        std::io::stdout().lock().write_all(&message.data)?;
        for entry in message.envelope.entries() {
            println!(
                "{} {}",
                entry.direction,
                String::from_utf8_lossy(&entry.address)
            );
        }
        return Ok(());
    }

    let queued = control::submit(
        &args.output,
        &message.envelope.encode_blob(),
        &message.data,
    )
    .await
    .with_context(|| format!("failed to reach the queue via {}", args.output.display()))?;

    anyhow::ensure!(queued, "delivery to queue failed");
    Ok(())
}
