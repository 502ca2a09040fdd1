//! `LineforgeServer` builder and the registry event loop.
//!
//! This ties the layers together: transports accept connections on their
//! own tasks, and everything they produce is funnelled into one channel
//! that a single task drains into the [`SessionRegistry`].
//!
//! ```text
//!  telnet accept task ─┐
//!  websocket accept ───┼──→ inbox ──→ registry loop ──→ SessionRegistry
//!  ServerHandle ───────┘                  ↑
//!                              maintenance tick, ctrl-c
//! ```
//!
//! Each accepted connection reports itself on the inbox *before* any of
//! its events, so the registry never sees input for a session it hasn't
//! created yet.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use lineforge_registry::{RegistryError, SessionInfo, SessionRegistry};
use lineforge_transport::{
    Connection, ConnectionEvent, ConnectionId, TelnetTransport, Transport, TransportError,
    WebSocketTransport, event_channel,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::{LineforgeError, ServerConfig};

/// Requests a [`ServerHandle`] can make of the registry loop.
#[derive(Debug)]
enum Command {
    Broadcast {
        message: String,
        exclude: Option<ConnectionId>,
    },
    Kick {
        id: ConnectionId,
        reason: String,
    },
    Sessions {
        reply: oneshot::Sender<Vec<SessionInfo>>,
    },
    Shutdown {
        notice: Option<String>,
    },
}

/// Everything the registry loop consumes, in arrival order.
enum Inbound {
    Accepted(Box<dyn Connection>),
    Event(ConnectionId, ConnectionEvent),
    Command(Command),
}

type Inbox = mpsc::UnboundedSender<Inbound>;

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring and starting a Lineforge server.
///
/// # Example
///
/// ```rust,ignore
/// use lineforge::prelude::*;
///
/// let config = ServerConfig::from_env();
/// let mut registry = SessionRegistry::new(config.registry.clone(), MemoryUserStore::new(), NullWorld);
/// registry.install(MyLogin, MyCommands);
///
/// let server = LineforgeServer::builder()
///     .config(config)
///     .build(registry)
///     .await?;
/// server.run().await
/// ```
pub struct LineforgeServerBuilder {
    config: ServerConfig,
}

impl LineforgeServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the telnet listener address.
    pub fn telnet_bind(mut self, addr: &str) -> Self {
        self.config.telnet_bind = addr.to_string();
        self
    }

    /// Sets (or, with `None`, disables) the WebSocket listener.
    pub fn websocket_bind(mut self, addr: Option<&str>) -> Self {
        self.config.websocket_bind = addr.map(str::to_string);
        self
    }

    /// Sets the idle timeout. Zero disables the idle sweep.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Sets how often the maintenance tick runs.
    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.config.maintenance_interval = interval;
        self
    }

    /// Sets the notice written to every session on shutdown.
    pub fn shutdown_notice(mut self, notice: &str) -> Self {
        self.config.shutdown_notice = notice.to_string();
        self
    }

    /// Binds the listeners and returns a server ready to [`run`](LineforgeServer::run).
    ///
    /// # Errors
    /// - [`RegistryError::NotReady`] if the registry's handlers have not
    ///   been installed
    /// - [`TransportError::AcceptFailed`] if a listener can't bind
    pub async fn build(self, registry: SessionRegistry) -> Result<LineforgeServer, LineforgeError> {
        if !registry.is_ready() {
            return Err(RegistryError::NotReady.into());
        }

        let mut config = self.config;
        if config.maintenance_interval.is_zero() {
            tracing::warn!("zero maintenance interval, using default");
            config.maintenance_interval = ServerConfig::default().maintenance_interval;
        }

        let telnet = TelnetTransport::bind(&config.telnet_bind).await?;
        let websocket = match config.websocket_bind.as_deref() {
            Some(addr) if !addr.is_empty() => Some(WebSocketTransport::bind(addr).await?),
            _ => None,
        };

        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        Ok(LineforgeServer {
            config,
            registry,
            telnet,
            websocket,
            inbox,
            inbox_rx,
        })
    }
}

impl Default for LineforgeServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A bound Lineforge server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct LineforgeServer {
    config: ServerConfig,
    registry: SessionRegistry,
    telnet: TelnetTransport,
    websocket: Option<WebSocketTransport>,
    inbox: Inbox,
    inbox_rx: mpsc::UnboundedReceiver<Inbound>,
}

impl LineforgeServer {
    /// Creates a new builder.
    pub fn builder() -> LineforgeServerBuilder {
        LineforgeServerBuilder::new()
    }

    pub fn telnet_addr(&self) -> std::io::Result<SocketAddr> {
        self.telnet.local_addr()
    }

    pub fn websocket_addr(&self) -> Option<std::io::Result<SocketAddr>> {
        self.websocket.as_ref().map(|ws| ws.local_addr())
    }

    /// A handle for talking to the registry once the server is running.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            inbox: self.inbox.clone(),
        }
    }

    /// Runs the server until it is shut down through a [`ServerHandle`]
    /// or by ctrl-c.
    pub async fn run(self) -> Result<(), LineforgeError> {
        let Self {
            config,
            mut registry,
            telnet,
            websocket,
            inbox,
            mut inbox_rx,
        } = self;

        tokio::spawn(accept_loop(telnet, inbox.clone()));
        if let Some(ws) = websocket {
            tokio::spawn(accept_loop(ws, inbox.clone()));
        }
        drop(inbox);

        let mut maintenance = tokio::time::interval(config.maintenance_interval);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        tracing::info!(
            idle_timeout_secs = config.idle_timeout.as_secs(),
            "Lineforge server running"
        );

        loop {
            tokio::select! {
                inbound = inbox_rx.recv() => {
                    let Some(inbound) = inbound else { break };
                    match inbound {
                        Inbound::Accepted(conn) => {
                            if let Err(e) = registry.create(conn) {
                                tracing::warn!(error = %e, "could not create session");
                            }
                        }
                        Inbound::Event(id, event) => registry.dispatch(id, event),
                        Inbound::Command(Command::Shutdown { notice }) => {
                            let notice = notice.unwrap_or_else(|| config.shutdown_notice.clone());
                            registry.shutdown(&notice);
                            break;
                        }
                        Inbound::Command(command) => apply(&mut registry, command),
                    }
                }
                _ = maintenance.tick() => {
                    let now = Instant::now();
                    let flagged = registry.idle_sweep_at(config.idle_timeout, now);
                    let closed = registry.reap_scheduled_closes(now);
                    if flagged + closed > 0 {
                        tracing::debug!(flagged, closed, "maintenance tick");
                    }
                }
                result = &mut ctrl_c => {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "ctrl-c listener failed");
                    }
                    registry.shutdown(&config.shutdown_notice);
                    break;
                }
            }
        }

        tracing::info!("Lineforge server stopped");
        Ok(())
    }
}

fn apply(registry: &mut SessionRegistry, command: Command) {
    match command {
        Command::Broadcast { message, exclude } => {
            registry.broadcast(&message, exclude.as_ref());
        }
        Command::Kick { id, reason } => {
            if let Err(e) = registry.kick(&id, &reason) {
                tracing::debug!(conn_id = %id, error = %e, "kick failed");
            }
        }
        Command::Sessions { reply } => {
            let _ = reply.send(registry.session_infos());
        }
        // Handled by the loop, which stops afterwards.
        Command::Shutdown { .. } => {}
    }
}

/// Accepts connections forever, announcing each one on the inbox before
/// forwarding its events.
async fn accept_loop<T: Transport>(mut transport: T, inbox: Inbox) {
    loop {
        let (events, mut events_rx) = event_channel();
        match transport.accept(&events).await {
            Ok(conn) => {
                drop(events);
                if inbox.send(Inbound::Accepted(Box::new(conn))).is_err() {
                    break;
                }
                let inbox = inbox.clone();
                tokio::spawn(async move {
                    while let Some((id, event)) = events_rx.recv().await {
                        if inbox.send(Inbound::Event(id, event)).is_err() {
                            break;
                        }
                    }
                });
            }
            Err(TransportError::Handshake(reason)) => {
                tracing::debug!(%reason, "handshake failed");
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                if inbox.is_closed() {
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable handle into a running server's registry loop.
///
/// Collaborators that live on other tasks use this instead of touching the
/// registry directly.
#[derive(Clone, Debug)]
pub struct ServerHandle {
    inbox: Inbox,
}

impl ServerHandle {
    fn send(&self, command: Command) -> Result<(), LineforgeError> {
        self.inbox
            .send(Inbound::Command(command))
            .map_err(|_| TransportError::Shutdown.into())
    }

    /// Broadcasts `message` to every authenticated session except `exclude`.
    pub fn broadcast(
        &self,
        message: impl Into<String>,
        exclude: Option<ConnectionId>,
    ) -> Result<(), LineforgeError> {
        self.send(Command::Broadcast {
            message: message.into(),
            exclude,
        })
    }

    /// Kicks a session with `reason`.
    pub fn kick(&self, id: ConnectionId, reason: impl Into<String>) -> Result<(), LineforgeError> {
        self.send(Command::Kick {
            id,
            reason: reason.into(),
        })
    }

    /// Stops the server after disconnecting every session. `None` uses the
    /// configured shutdown notice.
    pub fn shutdown(&self, notice: Option<String>) -> Result<(), LineforgeError> {
        self.send(Command::Shutdown { notice })
    }

    /// A snapshot of every live session.
    pub async fn session_infos(&self) -> Result<Vec<SessionInfo>, LineforgeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Sessions { reply })?;
        rx.await.map_err(|_| TransportError::Shutdown.into())
    }
}

impl std::fmt::Debug for Inbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted(conn) => f.debug_tuple("Accepted").field(conn.id()).finish(),
            Self::Event(id, event) => f.debug_tuple("Event").field(id).field(event).finish(),
            Self::Command(command) => f.debug_tuple("Command").field(command).finish(),
        }
    }
}
