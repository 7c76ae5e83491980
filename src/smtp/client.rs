//! The outbound SMTP client: one complete relay dialogue per delivery.
//!
//! `Connect → 220 → EHLO → 250 capabilities → [AUTH LOGIN] → MAIL FROM →
//! RCPT TO × N → DATA → 354 → dot-stuffed body → 250 → QUIT → 221`. Any
//! unexpected reply aborts the attempt (the scheduler retries later); where
//! the dialogue allows it a graceful QUIT is still sent. Every stage runs
//! under its own deadline.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::{DispatchTimeouts, RemoteConfig};
use crate::{incoming, internal, outgoing};

use super::codec;
use super::error::{DispatchError, Stage};
use super::reply::{Reply, ReplyError};

/// Longest reply line the client will buffer.
const MAX_REPLY_LINE: usize = 4096;

/// Write granularity for the message body; each block gets its own
/// deadline.
const DATA_CHUNK: usize = 4096;

/// What the relay's EHLO reply advertised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// STARTTLS is discovery-only; the connection is never upgraded.
    pub starttls: bool,
    pub auth_plain: bool,
    pub auth_login: bool,
}

/// An SMTP client bound to one relay.
pub struct RemoteDispatcher {
    relay: String,
    port: u16,
    login: Option<String>,
    password: Option<String>,
    timeouts: DispatchTimeouts,
    helo_name: String,
}

impl RemoteDispatcher {
    /// Build a dispatcher from the daemon configuration.
    ///
    /// # Errors
    ///
    /// [`DispatchError::NoRelay`] when no relay host is configured.
    pub fn from_config(config: &RemoteConfig) -> Result<Self, DispatchError> {
        let relay = config.relay.clone().ok_or(DispatchError::NoRelay)?;
        let helo_name = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".into());
        Ok(Self {
            relay,
            port: config.port,
            login: config.login.clone(),
            password: config.password.clone(),
            timeouts: config.timeouts.clone(),
            helo_name,
        })
    }

    /// Deliver one message to the relay.
    ///
    /// # Errors
    ///
    /// Any [`DispatchError`]; the attempt is over either way and the caller
    /// reports failure to the scheduler.
    pub async fn deliver(
        &self,
        sender: &[u8],
        recipients: &[Vec<u8>],
        data: &[u8],
    ) -> Result<(), DispatchError> {
        let timeouts = &self.timeouts;
        let address = format!("{}:{}", self.relay, self.port);

        let stream = timeout(timeouts.initial(), TcpStream::connect(&address))
            .await
            .map_err(|_| DispatchError::Timeout(Stage::Greeting))?
            .map_err(|source| DispatchError::Connect {
                relay: address.clone(),
                source,
            })?;
        let (read_half, write_half) = stream.into_split();
        let mut conn = Connection {
            reader: BufReader::new(read_half),
            writer: write_half,
        };

        conn.expect(Stage::Greeting, timeouts.initial(), 220).await?;

        let mut ehlo = b"EHLO ".to_vec();
        ehlo.extend_from_slice(self.helo_name.as_bytes());
        conn.send(Stage::Ehlo, timeouts.helo(), &ehlo).await?;
        let capabilities = self.read_capabilities(&mut conn).await?;

        if let (Some(login), Some(password)) = (&self.login, &self.password) {
            if capabilities.auth_login {
                self.authenticate(&mut conn, login, password).await?;
            }
        }

        let mut mail = b"MAIL FROM:<".to_vec();
        mail.extend_from_slice(sender);
        mail.push(b'>');
        conn.send(Stage::MailFrom, timeouts.mail(), &mail).await?;
        if let Err(err) = conn.expect(Stage::MailFrom, timeouts.mail(), 250).await {
            self.graceful_quit(&mut conn, false).await;
            return Err(err);
        }

        for recipient in recipients {
            let mut rcpt = b"RCPT TO:<".to_vec();
            rcpt.extend_from_slice(recipient);
            rcpt.push(b'>');
            conn.send(Stage::RcptTo, timeouts.rcpt(), &rcpt).await?;
            if let Err(err) = conn.expect(Stage::RcptTo, timeouts.rcpt(), 250).await {
                self.graceful_quit(&mut conn, true).await;
                return Err(err);
            }
        }

        conn.send(Stage::DataInit, timeouts.data_init(), b"DATA")
            .await?;
        conn.expect(Stage::DataInit, timeouts.data_init(), 354)
            .await?;

        let body = codec::stuff(data);
        for chunk in body.chunks(DATA_CHUNK) {
            conn.write_block(Stage::DataBlock, timeouts.data_block(), chunk)
                .await?;
        }

        conn.expect(Stage::DataTermination, timeouts.data_term(), 250)
            .await?;

        // The message is delivered; a misbehaving QUIT only gets logged.
        let quit = match conn.send(Stage::Quit, timeouts.quit(), b"QUIT").await {
            Ok(()) => conn.read_reply(Stage::Quit, timeouts.quit(), false).await,
            Err(err) => Err(err),
        };
        match quit {
            Ok(reply) if reply.code == 221 => {}
            Ok(reply) => internal!(
                level = WARN,
                "mail sent but QUIT was rejected with {} {}",
                reply.code,
                reply.text
            ),
            Err(err) => internal!(level = DEBUG, "QUIT after delivery failed: {err}"),
        }

        internal!(
            level = INFO,
            "delivered message for {} recipient(s) via {address}",
            recipients.len()
        );
        Ok(())
    }

    async fn read_capabilities(
        &self,
        conn: &mut Connection,
    ) -> Result<Capabilities, DispatchError> {
        let mut capabilities = Capabilities::default();
        loop {
            let reply = conn
                .read_reply(Stage::Ehlo, self.timeouts.helo(), true)
                .await?;
            if reply.code != 250 {
                return Err(DispatchError::Rejected {
                    stage: Stage::Ehlo,
                    code: reply.code,
                    text: reply.text,
                });
            }

            if reply.text == "STARTTLS" {
                capabilities.starttls = true;
            } else if let Some(mechanisms) = reply.text.strip_prefix("AUTH ") {
                for mechanism in mechanisms.split(' ') {
                    match mechanism {
                        "PLAIN" => capabilities.auth_plain = true,
                        "LOGIN" => capabilities.auth_login = true,
                        _ => {}
                    }
                }
            }

            if !reply.more {
                break;
            }
        }

        if capabilities.starttls {
            internal!(level = DEBUG, "relay advertises STARTTLS (not negotiated)");
        }
        Ok(capabilities)
    }

    async fn authenticate(
        &self,
        conn: &mut Connection,
        login: &str,
        password: &str,
    ) -> Result<(), DispatchError> {
        let deadline = self.timeouts.auth();

        conn.send(Stage::Auth, deadline, b"AUTH LOGIN").await?;
        self.expect_auth(conn, deadline, 334).await?;

        conn.send(Stage::Auth, deadline, STANDARD.encode(login).as_bytes())
            .await?;
        self.expect_auth(conn, deadline, 334).await?;

        conn.send(Stage::Auth, deadline, STANDARD.encode(password).as_bytes())
            .await?;
        self.expect_auth(conn, deadline, 235).await?;

        Ok(())
    }

    async fn expect_auth(
        &self,
        conn: &mut Connection,
        deadline: Duration,
        code: u16,
    ) -> Result<(), DispatchError> {
        match conn.expect(Stage::Auth, deadline, code).await {
            Ok(_) => Ok(()),
            Err(err) => {
                self.graceful_quit(conn, false).await;
                Err(err)
            }
        }
    }

    /// Best-effort QUIT on the way out of a failed attempt.
    async fn graceful_quit(&self, conn: &mut Connection, await_reply: bool) {
        let deadline = self.timeouts.quit();
        if conn.send(Stage::Quit, deadline, b"QUIT").await.is_err() {
            return;
        }
        if await_reply {
            match conn.read_reply(Stage::Quit, deadline, false).await {
                Ok(reply) if reply.code == 221 => {}
                Ok(reply) => internal!(
                    level = DEBUG,
                    "QUIT was rejected with {} {} (ignored)",
                    reply.code,
                    reply.text
                ),
                Err(err) => internal!(level = DEBUG, "QUIT reply failed: {err} (ignored)"),
            }
        }
    }
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn send(
        &mut self,
        stage: Stage,
        deadline: Duration,
        line: &[u8],
    ) -> Result<(), DispatchError> {
        outgoing!("{}", String::from_utf8_lossy(line));
        let io = async {
            self.writer.write_all(line).await?;
            self.writer.write_all(b"\r\n").await
        };
        timeout(deadline, io)
            .await
            .map_err(|_| DispatchError::Timeout(stage))?
            .map_err(|source| DispatchError::Io { stage, source })
    }

    async fn write_block(
        &mut self,
        stage: Stage,
        deadline: Duration,
        block: &[u8],
    ) -> Result<(), DispatchError> {
        timeout(deadline, self.writer.write_all(block))
            .await
            .map_err(|_| DispatchError::Timeout(stage))?
            .map_err(|source| DispatchError::Io { stage, source })
    }

    async fn read_reply(
        &mut self,
        stage: Stage,
        deadline: Duration,
        allow_continuation: bool,
    ) -> Result<Reply, DispatchError> {
        let mut line = Vec::new();
        let read = timeout(deadline, self.reader.read_until(b'\n', &mut line))
            .await
            .map_err(|_| DispatchError::Timeout(stage))?
            .map_err(|source| DispatchError::Io { stage, source })?;
        if read == 0 {
            return Err(DispatchError::Closed(stage));
        }
        if line.len() > MAX_REPLY_LINE {
            return Err(DispatchError::Reply {
                stage,
                source: ReplyError::TooLong,
            });
        }

        let reply = Reply::parse_line(&line, allow_continuation)
            .map_err(|source| DispatchError::Reply { stage, source })?;
        incoming!("{}{}{}", reply.code, if reply.more { "-" } else { " " }, reply.text);
        Ok(reply)
    }

    async fn expect(
        &mut self,
        stage: Stage,
        deadline: Duration,
        code: u16,
    ) -> Result<Reply, DispatchError> {
        let reply = self.read_reply(stage, deadline, false).await?;
        if reply.code == code {
            Ok(reply)
        } else {
            Err(DispatchError::Rejected {
                stage,
                code: reply.code,
                text: reply.text,
            })
        }
    }
}
