//! Raw TCP transport with inline telnet negotiation.
//!
//! On connect the server immediately announces that it will echo
//! characters itself, asks the client not to use line mode, and turns off
//! go-ahead signalling in both directions. None of this waits for the
//! client to answer: many real clients never do, and the session must
//! work either way.
//!
//! Inbound bytes pass through [`IacFilter`] (which strips every telnet
//! command) and then through [`KeyDecoder`](crate::KeyDecoder).

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::{
    AuditLog, Connection, ConnectionEvent, ConnectionId, ConnectionKind, EventSender, Key,
    KeyDecoder, Transport, TransportError,
};

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

pub const OPT_ECHO: u8 = 1;
pub const OPT_SGA: u8 = 3;
pub const OPT_LINEMODE: u8 = 34;

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// The negotiation sent unconditionally on every new connection:
/// `WILL ECHO`, `DONT LINEMODE`, `WILL SGA`, `DO SGA`.
pub fn negotiation_preamble() -> [u8; 12] {
    [
        IAC, WILL, OPT_ECHO, //
        IAC, DONT, OPT_LINEMODE, //
        IAC, WILL, OPT_SGA, //
        IAC, DO, OPT_SGA,
    ]
}

// ---------------------------------------------------------------------------
// IacFilter
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
enum IacState {
    #[default]
    Data,
    Iac,
    Negotiate,
    Subneg {
        iac_seen: bool,
    },
}

/// Strips telnet command sequences from a byte stream.
///
/// Handles `IAC <cmd>`, `IAC <WILL|WONT|DO|DONT> <opt>`, and
/// `IAC SB ... IAC SE`, with sequences split across chunks. `IAC IAC` is
/// a literal 255. Peer negotiation is absorbed without replying.
#[derive(Debug, Default)]
pub struct IacFilter {
    state: IacState,
}

impl IacFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the data bytes of `chunk` (commands removed) to `out`.
    pub fn filter(&mut self, chunk: &[u8], out: &mut Vec<u8>) {
        for &b in chunk {
            self.state = match std::mem::take(&mut self.state) {
                IacState::Data if b == IAC => IacState::Iac,
                IacState::Data => {
                    out.push(b);
                    IacState::Data
                }
                IacState::Iac => match b {
                    IAC => {
                        out.push(IAC);
                        IacState::Data
                    }
                    WILL | WONT | DO | DONT => IacState::Negotiate,
                    SB => IacState::Subneg { iac_seen: false },
                    // NOP, GA, AYT and friends carry no option byte.
                    _ => IacState::Data,
                },
                IacState::Negotiate => IacState::Data,
                IacState::Subneg { iac_seen: true } if b == SE => IacState::Data,
                IacState::Subneg { iac_seen: true } => IacState::Subneg { iac_seen: false },
                IacState::Subneg { iac_seen: false } => IacState::Subneg {
                    iac_seen: b == IAC,
                },
            };
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// A telnet [`Transport`] listening on a TCP socket.
pub struct TelnetTransport {
    listener: TcpListener,
}

impl TelnetTransport {
    /// Binds a new telnet transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "telnet transport listening");
        Ok(Self { listener })
    }
}

impl Transport for TelnetTransport {
    type Connection = TelnetConnection;

    async fn accept(&mut self, events: &EventSender) -> Result<TelnetConnection, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%addr, error = %e, "could not disable Nagle");
        }

        let id = ConnectionId::new(format!(
            "telnet-{}",
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
        ));
        tracing::debug!(conn_id = %id, %addr, "accepted telnet connection");

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        // Sent ahead of anything else, without waiting for replies.
        let _ = tx.send(Outbound::Data(negotiation_preamble().to_vec()));

        let terminal = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(
            id.clone(),
            read_half,
            events.clone(),
            Arc::clone(&terminal),
        ));
        tokio::spawn(write_loop(
            id.clone(),
            write_half,
            rx,
            events.clone(),
            terminal,
            reader.abort_handle(),
        ));

        Ok(TelnetConnection {
            audit: AuditLog::new(id.clone(), true),
            id,
            addr,
            tx,
            ended: false,
            masked: false,
            last_was_cr: false,
        })
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

enum Outbound {
    Data(Vec<u8>),
    Close,
}

/// Sends `event` unless a terminal event was already sent for this
/// connection.
fn send_terminal(
    id: ConnectionId,
    events: &EventSender,
    terminal: &AtomicBool,
    event: ConnectionEvent,
) {
    if !terminal.swap(true, Ordering::AcqRel) {
        let _ = events.send((id, event));
    }
}

async fn read_loop(
    id: ConnectionId,
    mut reader: OwnedReadHalf,
    events: EventSender,
    terminal: Arc<AtomicBool>,
) {
    let mut iac = IacFilter::new();
    let mut decoder = KeyDecoder::new();
    let mut buf = vec![0u8; 4096];
    let mut data = Vec::with_capacity(4096);
    let mut keys: Vec<Key> = Vec::new();

    let event = loop {
        match reader.read(&mut buf).await {
            Ok(0) => break ConnectionEvent::End,
            Ok(n) => {
                data.clear();
                iac.filter(&buf[..n], &mut data);
                decoder.feed(&data, &mut keys);
                for key in keys.drain(..) {
                    if events.send((id.clone(), ConnectionEvent::Input(key))).is_err() {
                        // Registry is gone; nobody is listening any more.
                        return;
                    }
                }
            }
            Err(e) => break ConnectionEvent::Error(TransportError::ReceiveFailed(e)),
        }
    };
    tracing::debug!(conn_id = %id, "telnet reader finished");
    send_terminal(id, &events, &terminal, event);
}

async fn write_loop(
    id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    events: EventSender,
    terminal: Arc<AtomicBool>,
    reader: AbortHandle,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            Outbound::Data(bytes) => {
                if let Err(e) = writer.write_all(&bytes).await {
                    tracing::warn!(conn_id = %id, error = %e, "telnet write failed");
                    send_terminal(
                        id.clone(),
                        &events,
                        &terminal,
                        ConnectionEvent::Error(TransportError::SendFailed(e)),
                    );
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = writer.shutdown().await;
    reader.abort();
    tracing::debug!(conn_id = %id, "telnet writer finished");
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A single telnet connection.
pub struct TelnetConnection {
    id: ConnectionId,
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<Outbound>,
    ended: bool,
    masked: bool,
    /// Whether the last byte written was CR, so a LF at the start of the
    /// next write isn't doubled.
    last_was_cr: bool,
    audit: AuditLog,
}

impl TelnetConnection {
    /// Converts text to NVT line endings (every LF preceded by CR).
    fn to_wire(&mut self, text: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(text.len() + 8);
        for &b in text.as_bytes() {
            if b == b'\n' && !self.last_was_cr {
                out.push(b'\r');
            }
            out.push(b);
            self.last_was_cr = b == b'\r';
        }
        out
    }

    pub fn is_masked(&self) -> bool {
        self.masked
    }
}

impl Connection for TelnetConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Telnet
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.addr)
    }

    fn write(&mut self, text: &str) {
        if self.ended || text.is_empty() {
            return;
        }
        self.audit.sent(text);
        let bytes = self.to_wire(text);
        let _ = self.tx.send(Outbound::Data(bytes));
    }

    fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        let _ = self.tx.send(Outbound::Close);
    }

    fn is_ended(&self) -> bool {
        self.ended
    }

    fn set_mask(&mut self, masked: bool) {
        // Echo is already server-side, so masking needs nothing on the
        // wire; the line discipline renders `*` itself.
        self.masked = masked;
        self.audit.set_masked(masked);
    }

    fn set_audit(&mut self, enabled: bool) {
        self.audit.set_enabled(enabled);
    }

    fn audit_input(&mut self, key: &Key) {
        self.audit.received_key(key);
    }
}
