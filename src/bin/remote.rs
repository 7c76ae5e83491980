//! The SMTP client daemon: accepts delivery jobs on a Unix control socket
//! and copies each message to the configured relay server.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;

use gravesend::config::RemoteConfig;
use gravesend::control::{self, DispatchRequest};
use gravesend::internal;
use gravesend::smtp::RemoteDispatcher;

#[derive(Debug, Parser)]
#[command(
    name = "gravesend-remote",
    about = "Copy queued mail to an SMTP relay server"
)]
struct Args {
    /// Unix domain socket to listen on.
    #[arg(long = "in", default_value = "remote.ctrl")]
    input: PathBuf,

    /// TOML configuration file (relay, credentials, timeouts).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Relay server to deliver through (overrides the config file).
    #[arg(long)]
    relay: Option<String>,

    /// SMTP port of the relay server.
    #[arg(long)]
    port: Option<u16>,

    /// Login for ESMTP AUTH.
    #[arg(long)]
    login: Option<String>,

    /// Password for ESMTP AUTH; prefer the environment variable, command
    /// lines are visible to other users.
    #[arg(long, env = "SMTP_AUTH_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Upper bound on concurrently handled jobs.
    #[arg(long, default_value_t = 16)]
    max_connections: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gravesend::logging::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RemoteConfig::load(path)?,
        None => RemoteConfig::default(),
    };
    if args.relay.is_some() {
        config.relay = args.relay.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.login.is_some() {
        config.login = args.login.clone();
    }
    if args.password.is_some() {
        config.password = args.password.clone();
    }

    let dispatcher = Arc::new(RemoteDispatcher::from_config(&config)?);

    let _ = std::fs::remove_file(&args.input);
    let listener = UnixListener::bind(&args.input)?;
    let permits = Arc::new(Semaphore::new(args.max_connections));

    internal!(level = INFO, "gravesend-remote started");

    let mut jobs: Vec<tokio::task::JoinHandle<()>> = Vec::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                internal!(level = INFO, "shutting down, finishing deliveries");
                for job in jobs {
                    let _ = job.await;
                }
                return Ok(());
            }

            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let permit = Arc::clone(&permits).acquire_owned().await.expect("semaphore closed");
                let dispatcher = Arc::clone(&dispatcher);
                jobs.retain(|handle| !handle.is_finished());
                jobs.push(tokio::spawn(async move {
                    handle_job(&dispatcher, stream).await;
                    drop(permit);
                }));
            }
        }
    }
}

async fn handle_job(dispatcher: &RemoteDispatcher, mut stream: UnixStream) {
    let mut wire = Vec::new();
    if let Err(err) = stream.read_to_end(&mut wire).await {
        internal!(level = ERROR, "failed to read job: {err}");
        return;
    }
    let request = match DispatchRequest::decode(&wire) {
        Ok(request) => request,
        Err(err) => {
            internal!(level = ERROR, "malformed job: {err}");
            let _ = stream.write_all(&[control::REFUSED]).await;
            return;
        }
    };

    let verdict = match dispatcher
        .deliver(&request.sender, &request.recipients, &request.data)
        .await
    {
        Ok(()) => control::ACCEPTED,
        Err(err) => {
            internal!(level = WARN, "delivery failed: {err}");
            control::REFUSED
        }
    };
    if stream.write_all(&[verdict]).await.is_err() {
        internal!(level = DEBUG, "scheduler went away before the verdict");
    }
}
