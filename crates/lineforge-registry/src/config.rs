//! Registry configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Texts and timings the registry uses on its own behalf.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Sent to a session that is replaced by a newer login of the same user.
    pub takeover_notice: String,

    /// Sent to a session the idle sweep is about to close.
    pub idle_notice: String,

    /// Broadcast when an authenticated user leaves. `{name}` is replaced
    /// with the username.
    pub departure_notice: String,

    /// Delay between the idle notice and the actual close.
    pub idle_grace: Duration,

    /// Whether loopback peers are classed as the local console.
    pub loopback_is_local: bool,
}

impl RegistryConfig {
    /// The departure broadcast for `name`.
    pub fn departure_for(&self, name: &str) -> String {
        self.departure_notice.replace("{name}", name)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            takeover_notice: "\r\nYou have logged in elsewhere. Goodbye.\r\n".into(),
            idle_notice: "\r\nYou have been idle too long. Goodbye.\r\n".into(),
            departure_notice: "{name} has left.".into(),
            idle_grace: Duration::from_secs(2),
            loopback_is_local: true,
        }
    }
}
