//! Audit mirror of everything a connection sends and receives.
//!
//! Records are emitted as `tracing` events on the [`AUDIT_TARGET`] target,
//! so operators decide where they go (or silence them) with the usual
//! `EnvFilter` directives.
//!
//! While password mode is on, received keystrokes are never recorded.
//! The first masked keystroke produces a single [`AuditRecord::MaskStarted`]
//! sentinel and clearing the mode produces [`AuditRecord::MaskEnded`].

use std::fmt;

use crate::{ConnectionId, Key};

/// `tracing` target used for audit records.
pub const AUDIT_TARGET: &str = "lineforge::audit";

/// One line of the audit mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditRecord {
    /// Text written to the peer.
    Sent(String),
    /// Input received from the peer.
    Received(String),
    /// Password input began; literal keystrokes are withheld.
    MaskStarted,
    /// Password input ended.
    MaskEnded,
}

impl fmt::Display for AuditRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent(text) => write!(f, "> {}", text.escape_debug()),
            Self::Received(text) => write!(f, "< {}", text.escape_debug()),
            Self::MaskStarted => f.write_str("< [password input]"),
            Self::MaskEnded => f.write_str("< [password input ended]"),
        }
    }
}

/// Per-connection audit state.
#[derive(Debug)]
pub struct AuditLog {
    conn_id: ConnectionId,
    enabled: bool,
    masked: bool,
    /// Whether the `MaskStarted` sentinel has been emitted for the
    /// current masked stretch.
    sentinel_sent: bool,
}

impl AuditLog {
    /// Creates an audit log for `conn_id`, initially enabled or not.
    pub fn new(conn_id: ConnectionId, enabled: bool) -> Self {
        Self {
            conn_id,
            enabled,
            masked: false,
            sentinel_sent: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_masked(&self) -> bool {
        self.masked
    }

    /// Records outbound text.
    pub fn sent(&mut self, text: &str) {
        if let Some(record) = self.record_sent(text) {
            self.emit(&record);
        }
    }

    /// Records one inbound keystroke.
    pub fn received_key(&mut self, key: &Key) {
        if let Some(record) = self.record_received(&describe_key(key)) {
            self.emit(&record);
        }
    }

    /// Records inbound text (e.g. a whole line from the push transport).
    pub fn received(&mut self, text: &str) {
        if let Some(record) = self.record_received(text) {
            self.emit(&record);
        }
    }

    /// Switches password mode on or off.
    pub fn set_masked(&mut self, masked: bool) {
        if let Some(record) = self.record_mask(masked) {
            self.emit(&record);
        }
    }

    /// Computes the record for outbound text without emitting it.
    pub fn record_sent(&self, text: &str) -> Option<AuditRecord> {
        self.enabled.then(|| AuditRecord::Sent(text.to_string()))
    }

    /// Computes the record for inbound text without emitting it, updating
    /// the sentinel bookkeeping.
    pub fn record_received(&mut self, text: &str) -> Option<AuditRecord> {
        if !self.enabled {
            return None;
        }
        if self.masked {
            if self.sentinel_sent {
                return None;
            }
            self.sentinel_sent = true;
            return Some(AuditRecord::MaskStarted);
        }
        Some(AuditRecord::Received(text.to_string()))
    }

    /// Computes the record for a mask toggle without emitting it.
    pub fn record_mask(&mut self, masked: bool) -> Option<AuditRecord> {
        if masked == self.masked {
            return None;
        }
        self.masked = masked;
        if masked {
            self.sentinel_sent = false;
            return None;
        }
        self.enabled.then_some(AuditRecord::MaskEnded)
    }

    fn emit(&self, record: &AuditRecord) {
        tracing::info!(target: AUDIT_TARGET, conn_id = %self.conn_id, "{record}");
    }
}

fn describe_key(key: &Key) -> String {
    match key {
        Key::Char(c) => c.to_string(),
        Key::CarriageReturn => "\r".into(),
        Key::LineFeed => "\n".into(),
        other => format!("<{other:?}>"),
    }
}
