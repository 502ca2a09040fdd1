//! Browser push transport: WebSocket carrying JSON frames.
//!
//! Inbound frames arrive at three granularities (whole line, single key,
//! named special key) and are mapped onto the same [`Key`]s a telnet
//! client would have produced. Outbound text is re-encoded by an
//! [`AnsiRenderer`] into styled [`PushOutbound`] frames; that conversion
//! never leaks above this module.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use lineforge_protocol::{Codec, JsonCodec, PushInbound, PushOutbound, SpecialKey};
use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use crate::{
    AnsiRenderer, AuditLog, Connection, ConnectionEvent, ConnectionId, ConnectionKind,
    EventSender, Key, KeyDecoder, Transport, TransportError,
};

type WsStream = WebSocketStream<TcpStream>;

/// A WebSocket-based [`Transport`] that listens for browser clients.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;

    async fn accept(
        &mut self,
        events: &EventSender,
    ) -> Result<WebSocketConnection, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let id = ConnectionId::new(format!("push-{:016x}", rand::rng().random::<u64>()));
        tracing::debug!(conn_id = %id, %addr, "accepted WebSocket connection");

        let (sink, stream) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let terminal = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_loop(
            id.clone(),
            stream,
            events.clone(),
            Arc::clone(&terminal),
        ));
        tokio::spawn(write_loop(
            id.clone(),
            sink,
            rx,
            events.clone(),
            terminal,
            reader.abort_handle(),
        ));

        Ok(WebSocketConnection {
            audit: AuditLog::new(id.clone(), true),
            id,
            addr,
            tx,
            ended: false,
        })
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// Maps one inbound frame to canonical keys.
///
/// A `line` frame becomes its characters followed by `CarriageReturn`, so
/// it edits and submits exactly as if it had been typed.
pub fn keys_for_frame(frame: PushInbound) -> Vec<Key> {
    match frame {
        PushInbound::Line { text } => {
            let mut keys = KeyDecoder::new().decode_str(&text);
            keys.push(Key::CarriageReturn);
            keys
        }
        PushInbound::Key { key } => KeyDecoder::new().decode_str(&key),
        PushInbound::Special { key } => vec![special_key(key)],
    }
}

fn special_key(key: SpecialKey) -> Key {
    match key {
        SpecialKey::Up => Key::Up,
        SpecialKey::Down => Key::Down,
        SpecialKey::Left => Key::Left,
        SpecialKey::Right => Key::Right,
        SpecialKey::ShiftUp => Key::ShiftUp,
        SpecialKey::ShiftDown => Key::ShiftDown,
        SpecialKey::ShiftLeft => Key::ShiftLeft,
        SpecialKey::ShiftRight => Key::ShiftRight,
        SpecialKey::Backspace => Key::Backspace,
        SpecialKey::Enter => Key::CarriageReturn,
        SpecialKey::KillLine => Key::KillLine,
        SpecialKey::Interrupt => Key::Interrupt,
    }
}

enum Outbound {
    Text(String),
    Mask(bool),
    Close,
}

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
    mut stream: SplitStream<WsStream>,
    events: EventSender,
    terminal: Arc<AtomicBool>,
) {
    let codec = JsonCodec;
    let mut raw = KeyDecoder::new();

    let event = loop {
        let keys = match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                match codec.decode::<PushInbound>(text.as_bytes()) {
                    Ok(frame) => keys_for_frame(frame),
                    Err(e) => {
                        tracing::debug!(conn_id = %id, error = %e, "ignoring malformed push frame");
                        continue;
                    }
                }
            }
            Some(Ok(Message::Binary(data))) => {
                // Raw bytes from clients that skip the JSON framing.
                let mut keys = Vec::new();
                raw.feed(&data, &mut keys);
                keys
            }
            Some(Ok(Message::Close(_))) | None => break ConnectionEvent::End,
            Some(Ok(_)) => continue, // ping/pong/frame
            Some(Err(e)) => {
                break ConnectionEvent::Error(TransportError::ReceiveFailed(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    e,
                )));
            }
        };
        for key in keys {
            if events.send((id.clone(), ConnectionEvent::Input(key))).is_err() {
                return;
            }
        }
    };
    tracing::debug!(conn_id = %id, "push reader finished");
    send_terminal(id, &events, &terminal, event);
}

async fn write_loop(
    id: ConnectionId,
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    events: EventSender,
    terminal: Arc<AtomicBool>,
    reader: AbortHandle,
) {
    let codec = JsonCodec;
    let mut renderer = AnsiRenderer::new();

    'outer: while let Some(msg) = rx.recv().await {
        let frames = match msg {
            Outbound::Text(text) => renderer.render(&text),
            Outbound::Mask(enabled) => vec![PushOutbound::Mask { enabled }],
            Outbound::Close => break,
        };
        for frame in frames {
            let json = match codec.encode(&frame).map(String::from_utf8) {
                Ok(Ok(json)) => json,
                Ok(Err(e)) => {
                    tracing::debug!(conn_id = %id, error = %e, "encoded frame was not UTF-8");
                    continue;
                }
                Err(e) => {
                    tracing::debug!(conn_id = %id, error = %e, "failed to encode push frame");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(json.into())).await {
                tracing::warn!(conn_id = %id, error = %e, "push write failed");
                send_terminal(
                    id.clone(),
                    &events,
                    &terminal,
                    ConnectionEvent::Error(TransportError::SendFailed(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        e,
                    ))),
                );
                break 'outer;
            }
        }
    }
    let _ = sink.send(Message::Close(None)).await;
    reader.abort();
    tracing::debug!(conn_id = %id, "push writer finished");
}

/// A single browser connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<Outbound>,
    ended: bool,
    audit: AuditLog,
}

impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Push
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.addr)
    }

    fn write(&mut self, text: &str) {
        if self.ended || text.is_empty() {
            return;
        }
        self.audit.sent(text);
        let _ = self.tx.send(Outbound::Text(text.to_string()));
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
        if self.audit.is_masked() == masked {
            return;
        }
        self.audit.set_masked(masked);
        if !self.ended {
            let _ = self.tx.send(Outbound::Mask(masked));
        }
    }

    fn set_audit(&mut self, enabled: bool) {
        self.audit.set_enabled(enabled);
    }

    fn audit_input(&mut self, key: &Key) {
        self.audit.received_key(key);
    }
}
