//! Configuration types shared by the daemons.
//!
//! Timeout values follow RFC 2821 section 4.5.3.2's suggested minimums and
//! are plain seconds in serialized form.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Per-stage deadlines for the outbound SMTP client.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchTimeouts {
    /// Waiting for the `220` greeting (includes connect).
    #[serde(default = "defaults::initial_secs")]
    pub initial_secs: u64,

    /// Each line of the EHLO reply.
    #[serde(default = "defaults::helo_secs")]
    pub helo_secs: u64,

    /// Each step of the AUTH LOGIN exchange.
    #[serde(default = "defaults::auth_secs")]
    pub auth_secs: u64,

    /// The MAIL FROM reply.
    #[serde(default = "defaults::mail_secs")]
    pub mail_secs: u64,

    /// Each RCPT TO reply.
    #[serde(default = "defaults::rcpt_secs")]
    pub rcpt_secs: u64,

    /// The `354` answer to DATA.
    #[serde(default = "defaults::data_init_secs")]
    pub data_init_secs: u64,

    /// Each written block of the message body.
    #[serde(default = "defaults::data_block_secs")]
    pub data_block_secs: u64,

    /// The final status after the end-of-data marker.
    #[serde(default = "defaults::data_term_secs")]
    pub data_term_secs: u64,

    /// The `221` answer to QUIT.
    #[serde(default = "defaults::quit_secs")]
    pub quit_secs: u64,
}

impl Default for DispatchTimeouts {
    fn default() -> Self {
        Self {
            initial_secs: defaults::initial_secs(),
            helo_secs: defaults::helo_secs(),
            auth_secs: defaults::auth_secs(),
            mail_secs: defaults::mail_secs(),
            rcpt_secs: defaults::rcpt_secs(),
            data_init_secs: defaults::data_init_secs(),
            data_block_secs: defaults::data_block_secs(),
            data_term_secs: defaults::data_term_secs(),
            quit_secs: defaults::quit_secs(),
        }
    }
}

impl DispatchTimeouts {
    #[must_use]
    pub const fn initial(&self) -> Duration {
        Duration::from_secs(self.initial_secs)
    }
    #[must_use]
    pub const fn helo(&self) -> Duration {
        Duration::from_secs(self.helo_secs)
    }
    #[must_use]
    pub const fn auth(&self) -> Duration {
        Duration::from_secs(self.auth_secs)
    }
    #[must_use]
    pub const fn mail(&self) -> Duration {
        Duration::from_secs(self.mail_secs)
    }
    #[must_use]
    pub const fn rcpt(&self) -> Duration {
        Duration::from_secs(self.rcpt_secs)
    }
    #[must_use]
    pub const fn data_init(&self) -> Duration {
        Duration::from_secs(self.data_init_secs)
    }
    #[must_use]
    pub const fn data_block(&self) -> Duration {
        Duration::from_secs(self.data_block_secs)
    }
    #[must_use]
    pub const fn data_term(&self) -> Duration {
        Duration::from_secs(self.data_term_secs)
    }
    #[must_use]
    pub const fn quit(&self) -> Duration {
        Duration::from_secs(self.quit_secs)
    }
}

/// Read deadlines for the inbound SMTP listener.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerTimeouts {
    /// Waiting for the next command line.
    #[serde(default = "defaults::server_command_secs")]
    pub command_secs: u64,

    /// Waiting for each block of message data.
    #[serde(default = "defaults::server_data_block_secs")]
    pub data_block_secs: u64,
}

impl Default for ServerTimeouts {
    fn default() -> Self {
        Self {
            command_secs: defaults::server_command_secs(),
            data_block_secs: defaults::server_data_block_secs(),
        }
    }
}

impl ServerTimeouts {
    #[must_use]
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }
    #[must_use]
    pub const fn data_block(&self) -> Duration {
        Duration::from_secs(self.data_block_secs)
    }
}

/// Configuration of the SMTP client daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// The relay host to deliver through.
    pub relay: Option<String>,

    /// SMTP port of the relay.
    #[serde(default = "defaults::smtp_port")]
    pub port: u16,

    /// AUTH LOGIN credentials. Both must be set (and the relay must
    /// advertise LOGIN) for authentication to happen.
    pub login: Option<String>,
    pub password: Option<String>,

    #[serde(default)]
    pub timeouts: DispatchTimeouts,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            relay: None,
            port: defaults::smtp_port(),
            login: None,
            password: None,
            timeouts: DispatchTimeouts::default(),
        }
    }
}

impl RemoteConfig {
    /// Load from a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] on unreadable or malformed files.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

mod defaults {
    // RFC 2821 4.5.3.2 suggested minimums.
    pub const fn initial_secs() -> u64 {
        300
    }
    pub const fn helo_secs() -> u64 {
        300
    }
    pub const fn auth_secs() -> u64 {
        300
    }
    pub const fn mail_secs() -> u64 {
        300
    }
    pub const fn rcpt_secs() -> u64 {
        300
    }
    pub const fn data_init_secs() -> u64 {
        120
    }
    pub const fn data_block_secs() -> u64 {
        180
    }
    pub const fn data_term_secs() -> u64 {
        600
    }
    pub const fn quit_secs() -> u64 {
        300
    }

    pub const fn server_command_secs() -> u64 {
        300
    }
    pub const fn server_data_block_secs() -> u64 {
        180
    }

    pub const fn smtp_port() -> u16 {
        25
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_timeouts_default_to_rfc_minimums() {
        let timeouts = DispatchTimeouts::default();
        assert_eq!(timeouts.initial(), Duration::from_secs(300));
        assert_eq!(timeouts.data_init(), Duration::from_secs(120));
        assert_eq!(timeouts.data_block(), Duration::from_secs(180));
        assert_eq!(timeouts.data_term(), Duration::from_secs(600));
        assert_eq!(timeouts.quit(), Duration::from_secs(300));
    }

    #[test]
    fn remote_config_parses_with_partial_fields() {
        let config: RemoteConfig = toml::from_str(
            r#"
            relay = "relay.example.org"
            login = "postmaster"

            [timeouts]
            data_term_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.relay.as_deref(), Some("relay.example.org"));
        assert_eq!(config.port, 25);
        assert_eq!(config.password, None);
        assert_eq!(config.timeouts.data_term_secs, 60);
        assert_eq!(config.timeouts.mail_secs, 300);
    }

    #[test]
    fn empty_remote_config_is_valid() {
        let config: RemoteConfig = toml::from_str("").unwrap();
        assert_eq!(config.relay, None);
        assert_eq!(config.port, 25);
    }
}
