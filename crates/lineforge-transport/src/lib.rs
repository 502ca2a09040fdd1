//! Transport abstraction layer for Lineforge.
//!
//! Every wire protocol Lineforge speaks is normalized into the same two
//! things:
//!
//! - an inbound stream of [`ConnectionEvent`]s (canonical [`Key`] input,
//!   end-of-stream, or a transport error), and
//! - an outbound [`Connection`] handle with canonical `write`, `end`, and
//!   `set_mask` operations.
//!
//! Code above this layer never sees telnet negotiation bytes, WebSocket
//! frames, or JSON. Keys come in, text goes out.
//!
//! # Adapters
//!
//! - [`TelnetTransport`]: raw TCP with inline telnet negotiation (`telnet` feature)
//! - [`WebSocketTransport`]: browser push transport with JSON frames (`websocket` feature)
//! - [`TestConnection`]: in-memory double for tests; never touches the network
//!
//! # Feature Flags
//!
//! - `telnet` (default): raw TCP adapter
//! - `websocket` (default): WebSocket adapter via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

#[cfg(feature = "websocket")]
mod ansi;
mod audit;
mod error;
mod keys;
mod memory;
#[cfg(feature = "telnet")]
mod telnet;
#[cfg(feature = "websocket")]
mod websocket;

#[cfg(feature = "websocket")]
pub use ansi::AnsiRenderer;
pub use audit::{AUDIT_TARGET, AuditLog, AuditRecord};
pub use error::TransportError;
pub use keys::{Key, KeyDecoder};
pub use memory::{TestConnection, TestHandle};
#[cfg(feature = "telnet")]
pub use telnet::{IacFilter, TelnetConnection, TelnetTransport, negotiation_preamble};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport, keys_for_frame};

use std::fmt;
use std::net::SocketAddr;

use tokio::sync::mpsc;

/// Opaque identifier for a connection, unique within the registry.
///
/// Sessions share the identity of the connection they own, so this is
/// also the session key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Creates a new `ConnectionId` from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which wire protocol a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// Raw TCP with telnet negotiation.
    Telnet,
    /// Browser push transport (WebSocket + JSON frames).
    Push,
    /// In-memory test double.
    Test,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Telnet => "telnet",
            Self::Push => "push",
            Self::Test => "test",
        };
        f.write_str(name)
    }
}

/// The canonical, protocol-independent event set every adapter produces.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// One canonical keystroke.
    Input(Key),
    /// The peer closed the stream cleanly.
    End,
    /// The stream failed. Always terminal: no events follow it.
    Error(TransportError),
}

impl ConnectionEvent {
    /// Returns `true` for `End` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End | Self::Error(_))
    }
}

/// Where adapters deliver inbound events. The registry's event loop owns
/// the receiving half, which serializes delivery from every connection.
pub type EventSender = mpsc::UnboundedSender<(ConnectionId, ConnectionEvent)>;

/// Receiving half of an [`EventSender`].
pub type EventReceiver = mpsc::UnboundedReceiver<(ConnectionId, ConnectionEvent)>;

/// Creates the event channel shared by every adapter and the registry.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// The outbound half of a connection, owned exclusively by its session.
///
/// Every method is synchronous and non-blocking: networked adapters hand
/// bytes to a writer task and return immediately, so the registry never
/// performs I/O inside its per-event path.
///
/// Once [`end`](Self::end) has been called, further writes are dropped.
pub trait Connection: Send + 'static {
    /// Returns the unique identifier for this connection.
    fn id(&self) -> &ConnectionId;

    /// Returns which wire protocol this connection speaks.
    fn kind(&self) -> ConnectionKind;

    /// Returns the remote peer's address, if it has one.
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Queues text for delivery. No-op after `end()`.
    fn write(&mut self, text: &str);

    /// Closes the connection. Idempotent.
    fn end(&mut self);

    /// Returns `true` once `end()` has been called or observed.
    fn is_ended(&self) -> bool;

    /// Toggles password mode: the audit mirror records sentinels instead
    /// of keystrokes while it is on.
    fn set_mask(&mut self, masked: bool);

    /// Enables or disables the audit mirror.
    fn set_audit(&mut self, enabled: bool);

    /// Mirrors one received keystroke into the audit log.
    fn audit_input(&mut self, key: &Key);

    /// The control sequence that moves the remote cursor `delta` columns
    /// (negative is left). Empty for a zero delta.
    fn cursor_sequence(&self, delta: isize) -> String {
        match delta {
            0 => String::new(),
            d if d < 0 => format!("\x1b[{}D", d.unsigned_abs()),
            d => format!("\x1b[{d}C"),
        }
    }
}

impl Connection for Box<dyn Connection> {
    fn id(&self) -> &ConnectionId {
        (**self).id()
    }

    fn kind(&self) -> ConnectionKind {
        (**self).kind()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        (**self).remote_addr()
    }

    fn write(&mut self, text: &str) {
        (**self).write(text)
    }

    fn end(&mut self) {
        (**self).end()
    }

    fn is_ended(&self) -> bool {
        (**self).is_ended()
    }

    fn set_mask(&mut self, masked: bool) {
        (**self).set_mask(masked)
    }

    fn set_audit(&mut self, enabled: bool) {
        (**self).set_audit(enabled)
    }

    fn audit_input(&mut self, key: &Key) {
        (**self).audit_input(key)
    }

    fn cursor_sequence(&self, delta: isize) -> String {
        (**self).cursor_sequence(delta)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// Waits for the next incoming connection.
    ///
    /// The adapter spawns whatever tasks it needs to read from the peer
    /// and delivers that connection's events through `events`, ending
    /// with exactly one terminal event.
    async fn accept(&mut self, events: &EventSender) -> Result<Self::Connection, TransportError>;

    /// Returns the local address the transport is bound to.
    fn local_addr(&self) -> std::io::Result<SocketAddr>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display_is_inner_string() {
        let id = ConnectionId::new("telnet-7");
        assert_eq!(id.to_string(), "telnet-7");
        assert_eq!(id.as_str(), "telnet-7");
    }

    #[test]
    fn test_connection_id_hash_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ConnectionId::new("a"), 1);
        map.insert(ConnectionId::new("b"), 2);
        assert_eq!(map[&ConnectionId::new("a")], 1);
    }

    #[test]
    fn test_event_is_terminal() {
        assert!(ConnectionEvent::End.is_terminal());
        assert!(ConnectionEvent::Error(TransportError::Shutdown).is_terminal());
        assert!(!ConnectionEvent::Input(Key::Char('x')).is_terminal());
    }

    #[test]
    fn test_default_cursor_sequence_uses_ansi_relative_moves() {
        let (conn, _handle) = TestConnection::new("t");
        assert_eq!(conn.cursor_sequence(0), "");
        assert_eq!(conn.cursor_sequence(-3), "\x1b[3D");
        assert_eq!(conn.cursor_sequence(2), "\x1b[2C");
    }
}
