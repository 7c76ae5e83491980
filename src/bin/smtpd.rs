//! The inbound SMTP listener: takes mail via SMTP and places it into the
//! mail queue.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use gravesend::config::ServerTimeouts;
use gravesend::internal;
use gravesend::smtp::{self, IngestConfig};
use gravesend::Signal;

#[derive(Debug, Parser)]
#[command(
    name = "gravesend-smtpd",
    about = "Take mail via SMTP and place it into the mail queue"
)]
struct Args {
    /// IP address to bind to.
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// TCP port to listen on.
    #[arg(long, default_value_t = 25)]
    port: u16,

    /// Unix domain socket of gravesend-queue.
    #[arg(long = "out", default_value = "queue.ctrl")]
    output: PathBuf,

    /// Upper bound on concurrently served connections.
    #[arg(long, default_value_t = 64)]
    max_connections: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gravesend::logging::init();
    let args = Args::parse();

    let banner_host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".into());

    let listener = TcpListener::bind((args.bind, args.port)).await?;
    let config = Arc::new(IngestConfig {
        banner_host,
        queue_ctrl: args.output,
        timeouts: ServerTimeouts::default(),
        max_connections: args.max_connections,
    });

    let (shutdown, receiver) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown.send(Signal::Shutdown);
        }
    });

    internal!(
        level = INFO,
        "gravesend-smtpd listening on {}:{}",
        args.bind,
        args.port
    );
    smtp::serve(listener, config, receiver).await?;
    Ok(())
}
