use crate::hash::{xm_hash, DEFAULT_PASSWORD_HASH};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default DVR-IP TCP port.
pub const DEFAULT_PORT: u16 = 34567;

/// Factory default account name.
pub const DEFAULT_USER: &str = "admin";

/// Keep-alive interval used when the device reports 0 at login.
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 20;

/// Deadline applied independently to the send and to the receive half of one
/// command round trip.
pub const SEND_RECEIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long an unclaimed frame is retained before being discarded.
pub const FRAME_RETENTION: Duration = Duration::from_secs(5);

/// Default cooldown between reconnect attempts.
pub const DEFAULT_RECONNECT_COOLDOWN: Duration = Duration::from_secs(15);

/// Connection options for one DVR/NVR device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DvrOptions {
    /// Device host name or IP.
    pub host: String,
    /// Device port; defaults to 34567.
    #[serde(default = "DvrOptions::default_port")]
    pub port: u16,
    /// Account name; defaults to the factory "admin" account.
    #[serde(default)]
    pub user: Option<String>,
    /// Plain-text password; hashed with the XM transform before use.
    /// Empty or absent means the factory default (empty) password.
    #[serde(default)]
    pub password: Option<String>,
    /// TCP connect timeout in milliseconds.
    #[serde(default = "DvrOptions::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "DvrOptions::default_tcp_nodelay")]
    pub tcp_nodelay: bool,
}

impl DvrOptions {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: Self::default_port(),
            user: None,
            password: None,
            connect_timeout_ms: Self::default_connect_timeout_ms(),
            tcp_nodelay: Self::default_tcp_nodelay(),
        }
    }

    fn default_port() -> u16 {
        DEFAULT_PORT
    }

    fn default_connect_timeout_ms() -> u64 {
        10_000
    }

    fn default_tcp_nodelay() -> bool {
        true
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Effective account name sent at login.
    pub fn user_name(&self) -> &str {
        self.user.as_deref().unwrap_or(DEFAULT_USER)
    }

    /// Effective password sent at login: the XM hash of the configured
    /// password, or the precomputed empty-password hash.
    pub fn pass_word(&self) -> String {
        match self.password.as_deref() {
            None | Some("") => DEFAULT_PASSWORD_HASH.to_string(),
            Some(plain) => xm_hash(plain),
        }
    }
}
