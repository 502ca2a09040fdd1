//! In-memory test double.
//!
//! A [`TestConnection`] has no network step: `write` appends to a buffer
//! that the paired [`TestHandle`] can inspect after the connection has
//! been handed to a session. Input is injected synchronously by turning
//! text into canonical events with [`TestHandle::input_events`] and
//! dispatching them.
//!
//! The test adapter never echoes on its own and its audit mirror is off
//! by default.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{AuditLog, Connection, ConnectionEvent, ConnectionId, ConnectionKind, Key, KeyDecoder};

#[derive(Debug, Default)]
struct Shared {
    output: String,
    ended: bool,
    masked: bool,
    end_calls: usize,
}

/// The connection half, handed to the registry.
#[derive(Debug)]
pub struct TestConnection {
    id: ConnectionId,
    addr: Option<SocketAddr>,
    shared: Arc<Mutex<Shared>>,
    audit: AuditLog,
}

/// The inspection half, kept by the test.
#[derive(Debug, Clone)]
pub struct TestHandle {
    id: ConnectionId,
    shared: Arc<Mutex<Shared>>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    // A panicking test thread can't leave `Shared` half-updated.
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TestConnection {
    /// Creates a connection with no remote address.
    pub fn new(id: impl Into<String>) -> (Self, TestHandle) {
        Self::build(ConnectionId::new(id), None)
    }

    /// Creates a connection that reports `addr` as its peer.
    pub fn with_addr(id: impl Into<String>, addr: SocketAddr) -> (Self, TestHandle) {
        Self::build(ConnectionId::new(id), Some(addr))
    }

    fn build(id: ConnectionId, addr: Option<SocketAddr>) -> (Self, TestHandle) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let handle = TestHandle {
            id: id.clone(),
            shared: Arc::clone(&shared),
        };
        let conn = Self {
            audit: AuditLog::new(id.clone(), false),
            id,
            addr,
            shared,
        };
        (conn, handle)
    }
}

impl Connection for TestConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Test
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    fn write(&mut self, text: &str) {
        let mut shared = lock(&self.shared);
        if shared.ended {
            return;
        }
        shared.output.push_str(text);
        drop(shared);
        self.audit.sent(text);
    }

    fn end(&mut self) {
        let mut shared = lock(&self.shared);
        shared.end_calls += 1;
        shared.ended = true;
    }

    fn is_ended(&self) -> bool {
        lock(&self.shared).ended
    }

    fn set_mask(&mut self, masked: bool) {
        lock(&self.shared).masked = masked;
        self.audit.set_masked(masked);
    }

    fn set_audit(&mut self, enabled: bool) {
        self.audit.set_enabled(enabled);
    }

    fn audit_input(&mut self, key: &Key) {
        self.audit.received_key(key);
    }
}

impl TestHandle {
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Everything written so far.
    pub fn output(&self) -> String {
        lock(&self.shared).output.clone()
    }

    /// Returns everything written so far and clears the buffer.
    pub fn take_output(&self) -> String {
        std::mem::take(&mut lock(&self.shared).output)
    }

    pub fn is_ended(&self) -> bool {
        lock(&self.shared).ended
    }

    pub fn is_masked(&self) -> bool {
        lock(&self.shared).masked
    }

    /// How many times `end()` was called on the connection half.
    pub fn end_calls(&self) -> usize {
        lock(&self.shared).end_calls
    }

    /// Canonicalizes `text` with the same rules raw telnet input follows
    /// (`"\r"` is Enter, `"\x7f"` is Backspace, `"\x1b[A"` is Up, ...).
    pub fn input_events(text: &str) -> Vec<ConnectionEvent> {
        KeyDecoder::new()
            .decode_str(text)
            .into_iter()
            .map(ConnectionEvent::Input)
            .collect()
    }
}
