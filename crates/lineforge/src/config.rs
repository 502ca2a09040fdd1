//! Server configuration.
//!
//! Every field has a default; [`ServerConfig::from_env`] overrides them
//! from `LINEFORGE_*` environment variables.
//!
//! | variable | default | meaning |
//! |----------|---------|---------|
//! | `LINEFORGE_TELNET_BIND` | `127.0.0.1:4000` | telnet listener |
//! | `LINEFORGE_WS_BIND` | `127.0.0.1:4001` | WebSocket listener; empty disables it |
//! | `LINEFORGE_IDLE_MINUTES` | `30` | idle timeout; `0` disables the sweep |
//! | `LINEFORGE_MAINTENANCE_SECS` | `5` | how often the sweep runs |

use std::str::FromStr;
use std::time::Duration;

use lineforge_registry::RegistryConfig;
use serde::{Deserialize, Serialize};

pub const ENV_TELNET_BIND: &str = "LINEFORGE_TELNET_BIND";
pub const ENV_WS_BIND: &str = "LINEFORGE_WS_BIND";
pub const ENV_IDLE_MINUTES: &str = "LINEFORGE_IDLE_MINUTES";
pub const ENV_MAINTENANCE_SECS: &str = "LINEFORGE_MAINTENANCE_SECS";

/// Settings for a [`LineforgeServer`](crate::LineforgeServer).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address of the telnet listener.
    pub telnet_bind: String,

    /// Address of the WebSocket listener, if any.
    pub websocket_bind: Option<String>,

    /// Authenticated sessions idle longer than this are closed. Zero disables
    /// the sweep.
    pub idle_timeout: Duration,

    /// Interval of the maintenance tick (idle sweep and scheduled closes).
    pub maintenance_interval: Duration,

    /// Written to every session when the server shuts down.
    pub shutdown_notice: String,

    /// Settings handed to the session registry.
    pub registry: RegistryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            telnet_bind: "127.0.0.1:4000".into(),
            websocket_bind: Some("127.0.0.1:4001".into()),
            idle_timeout: Duration::from_secs(30 * 60),
            maintenance_interval: Duration::from_secs(5),
            shutdown_notice: "\r\nThe server is shutting down. Goodbye.\r\n".into(),
            registry: RegistryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads overrides through `lookup`, which maps a variable name to its
    /// value. Unparseable values keep the default and log a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup(ENV_TELNET_BIND) {
            let addr = addr.trim();
            if addr.is_empty() {
                tracing::warn!(var = ENV_TELNET_BIND, "empty telnet address, using default");
            } else {
                config.telnet_bind = addr.to_string();
            }
        }

        if let Some(addr) = lookup(ENV_WS_BIND) {
            let addr = addr.trim();
            config.websocket_bind = (!addr.is_empty()).then(|| addr.to_string());
        }

        if let Some(minutes) = parse(&lookup, ENV_IDLE_MINUTES, |_: &u64| true) {
            config.idle_timeout = Duration::from_secs(minutes.saturating_mul(60));
        }

        if let Some(secs) = parse(&lookup, ENV_MAINTENANCE_SECS, |s: &u64| *s > 0) {
            config.maintenance_interval = Duration::from_secs(secs);
        }

        config
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    valid: impl Fn(&T) -> bool,
) -> Option<T> {
    let raw = lookup(var)?;
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => Some(value),
        _ => {
            tracing::warn!(var, value = %raw, "invalid value, using default");
            None
        }
    }
}
