//! The session record: everything the server tracks for one connection.

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use lineforge_transport::{Connection, ConnectionId, ConnectionKind};
use tokio::sync::mpsc;

use crate::SessionError;
use crate::line::{HistoryCursor, LineBuffer};

// ---------------------------------------------------------------------------
// ConnectionClass
// ---------------------------------------------------------------------------

/// Where a connection comes from, decided once when the session is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionClass {
    /// The operator's own console (a loopback peer, by default).
    LocalConsole,
    /// Anyone else.
    Remote,
}

impl fmt::Display for ConnectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalConsole => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle state of a session.
///
/// ```text
///   Connecting ──→ Authenticating ──→ Authenticated ⇄ Modal
///        │               │                  │          │
///        └───────────────┴──────────────────┴──────────┴──→ Disconnected
/// ```
///
/// The line discipline only cares about one distinction: in `Modal`, keys
/// bypass the line buffer and go straight to the modal handler. Everything
/// else about the states (what login looks like, which modal screens
/// exist) belongs to the external state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, nothing exchanged yet.
    Connecting,
    /// The login dialogue is running.
    Authenticating,
    /// Logged in; completed lines are commands.
    Authenticated,
    /// A full-screen sub-mode (an editor, a pager) owns the keyboard.
    Modal {
        /// Name of the sub-mode, for logs and admin views.
        name: String,
    },
    /// The disconnect protocol has run.
    Disconnected,
}

impl SessionState {
    /// Returns `true` if keys should bypass the line discipline.
    pub fn is_modal(&self) -> bool {
        matches!(self, Self::Modal { .. })
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Authenticating => f.write_str("authenticating"),
            Self::Authenticated => f.write_str("authenticated"),
            Self::Modal { name } => write!(f, "modal:{name}"),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Named transient flags the state machine and the line discipline share.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransientFlags {
    /// Typed lines are queued instead of submitted, and nothing is echoed.
    pub movement_mode: bool,
    /// Echo `*` instead of the typed characters.
    pub masked: bool,
    /// A world transfer in flight for this session's user, by destination.
    pub pending_transfer: Option<String>,
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// What an observing admin is told about the session they watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    /// A copy of text written to the observed session.
    Output(String),
    /// A human-readable message about the observation itself.
    Notice(String),
    /// The observed session has gone.
    Ended {
        id: ConnectionId,
        username: Option<String>,
    },
}

/// Receiving end of an observation link.
pub trait ObserverSink: Send + 'static {
    /// Delivers one event. Returns `false` once the observer is gone.
    fn deliver(&self, event: ObserverEvent) -> bool;
}

impl ObserverSink for mpsc::UnboundedSender<ObserverEvent> {
    fn deliver(&self, event: ObserverEvent) -> bool {
        self.send(event).is_ok()
    }
}

/// An admin watching a session.
pub struct Observer {
    name: String,
    sink: Box<dyn ObserverSink>,
}

impl Observer {
    pub fn new(name: impl Into<String>, sink: impl ObserverSink) -> Self {
        Self {
            name: name.into(),
            sink: Box::new(sink),
        }
    }

    /// The observing admin's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn deliver(&self, event: ObserverEvent) -> bool {
        self.sink.deliver(event)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer").field("name", &self.name).finish()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One live connection and everything known about it.
///
/// The session owns its connection outright and shares its identity.
/// The user is held by name only; the user record itself lives in the
/// external user store.
pub struct Session {
    id: ConnectionId,
    connection: Box<dyn Connection>,
    class: ConnectionClass,
    origin: Option<SocketAddr>,
    state: SessionState,
    user: Option<String>,
    authenticated: bool,
    pub(crate) line: LineBuffer,
    pub(crate) typing: bool,
    pub(crate) history: HistoryCursor,
    prompt: String,
    flags: TransientFlags,
    pending_commands: VecDeque<String>,
    observer: Option<Observer>,
    input_blocked: bool,
    connected_at: Instant,
    last_activity: Instant,
    close_at: Option<Instant>,
}

impl Session {
    /// Wraps a freshly accepted connection. The session starts in
    /// [`SessionState::Connecting`].
    pub fn new(connection: Box<dyn Connection>, class: ConnectionClass) -> Self {
        let now = Instant::now();
        Self {
            id: connection.id().clone(),
            origin: connection.remote_addr(),
            connection,
            class,
            state: SessionState::Connecting,
            user: None,
            authenticated: false,
            line: LineBuffer::new(),
            typing: false,
            history: HistoryCursor::default(),
            prompt: String::new(),
            flags: TransientFlags::default(),
            pending_commands: VecDeque::new(),
            observer: None,
            input_blocked: false,
            connected_at: now,
            last_activity: now,
            close_at: None,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn kind(&self) -> ConnectionKind {
        self.connection.kind()
    }

    pub fn class(&self) -> ConnectionClass {
        self.class
    }

    /// The peer's address, if the transport has one.
    pub fn origin(&self) -> Option<SocketAddr> {
        self.origin
    }

    pub fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }

    pub fn connection_mut(&mut self) -> &mut dyn Connection {
        self.connection.as_mut()
    }

    // -- lifecycle --------------------------------------------------------

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// The logged-in username, once authenticated.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Marks the session as logged in as `username`.
    pub fn mark_authenticated(&mut self, username: impl Into<String>) {
        self.user = Some(username.into());
        self.authenticated = true;
        self.state = SessionState::Authenticated;
    }

    /// Case-insensitive match against the logged-in username.
    pub fn is_user(&self, username: &str) -> bool {
        self.authenticated
            && self
                .user
                .as_deref()
                .is_some_and(|u| u.eq_ignore_ascii_case(username))
    }

    // -- line state -------------------------------------------------------

    /// The not-yet-submitted line.
    pub fn line(&self) -> &LineBuffer {
        &self.line
    }

    /// `true` while the line buffer is non-empty.
    pub fn is_typing(&self) -> bool {
        self.typing
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
    }

    pub fn flags(&self) -> &TransientFlags {
        &self.flags
    }

    pub fn flags_mut(&mut self) -> &mut TransientFlags {
        &mut self.flags
    }

    /// Turns password masking on or off, for the echo and for the
    /// connection's audit mirror.
    pub fn set_masked(&mut self, masked: bool) {
        self.flags.masked = masked;
        self.connection.set_mask(masked);
    }

    pub(crate) fn queue_command(&mut self, line: String) {
        self.pending_commands.push_back(line);
    }

    /// Lines typed during movement mode, oldest first.
    pub fn pending_commands(&self) -> impl Iterator<Item = &str> {
        self.pending_commands.iter().map(String::as_str)
    }

    /// Drains the movement-mode queue.
    pub fn take_pending_commands(&mut self) -> Vec<String> {
        self.pending_commands.drain(..).collect()
    }

    // -- observation ------------------------------------------------------

    pub fn is_observed(&self) -> bool {
        self.observer.is_some()
    }

    pub fn observer(&self) -> Option<&Observer> {
        self.observer.as_ref()
    }

    pub fn attach_observer(&mut self, observer: Observer) -> Result<(), SessionError> {
        if self.observer.is_some() {
            return Err(SessionError::AlreadyObserved);
        }
        tracing::info!(conn_id = %self.id, observer = observer.name(), "observer attached");
        self.observer = Some(observer);
        Ok(())
    }

    /// Removes the observer. An observer's input block goes with it.
    pub fn detach_observer(&mut self) -> Result<Observer, SessionError> {
        let observer = self.observer.take().ok_or(SessionError::NotObserved)?;
        self.input_blocked = false;
        tracing::info!(conn_id = %self.id, observer = observer.name(), "observer detached");
        Ok(observer)
    }

    /// Sends `event` to the observer, if any. An observer that has gone
    /// away is detached.
    pub fn notify_observer(&mut self, event: ObserverEvent) {
        let gone = self
            .observer
            .as_ref()
            .is_some_and(|observer| !observer.deliver(event));
        if gone {
            tracing::debug!(conn_id = %self.id, "observer went away");
            self.observer = None;
            self.input_blocked = false;
        }
    }

    pub fn is_input_blocked(&self) -> bool {
        self.input_blocked
    }

    pub fn set_input_blocked(&mut self, blocked: bool) {
        self.input_blocked = blocked;
    }

    // -- timing -----------------------------------------------------------

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Records input activity at `now`. Activity cancels a scheduled idle
    /// close.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
        self.close_at = None;
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Flags the session to be closed once `at` has passed.
    pub fn schedule_close(&mut self, at: Instant) {
        self.close_at = Some(at);
    }

    pub fn is_close_scheduled(&self) -> bool {
        self.close_at.is_some()
    }

    pub fn close_due(&self, now: Instant) -> bool {
        self.close_at.is_some_and(|at| now >= at)
    }

    // -- output -----------------------------------------------------------

    /// Writes to the connection and mirrors the text to the observer.
    pub fn write(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.connection.write(text);
        if self.observer.is_some() {
            self.notify_observer(ObserverEvent::Output(text.to_string()));
        }
    }

    /// Closes the connection. Idempotent.
    pub fn end(&mut self) {
        self.connection.end();
    }

    pub fn is_ended(&self) -> bool {
        self.connection.is_ended()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("state", &self.state)
            .field("user", &self.user)
            .field("line", &self.line)
            .field("observer", &self.observer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use lineforge_transport::{TestConnection, TestHandle};

    use super::*;

    fn session() -> (Session, TestHandle) {
        let (conn, handle) = TestConnection::new("t-1");
        (Session::new(Box::new(conn), ConnectionClass::Remote), handle)
    }

    #[test]
    fn test_new_session_shares_connection_identity() {
        let (s, handle) = session();
        assert_eq!(s.id(), handle.id());
        assert_eq!(s.state(), &SessionState::Connecting);
        assert!(!s.is_authenticated());
        assert!(s.user().is_none());
    }

    #[test]
    fn test_mark_authenticated_sets_user_and_state() {
        let (mut s, _h) = session();
        s.mark_authenticated("Alice");
        assert!(s.is_authenticated());
        assert_eq!(s.state(), &SessionState::Authenticated);
        assert!(s.is_user("alice"));
        assert!(!s.is_user("bob"));
    }

    #[test]
    fn test_write_mirrors_to_observer() {
        let (mut s, handle) = session();
        let (tx, mut rx) = mpsc::unbounded_channel();
        s.attach_observer(Observer::new("admin", tx)).expect("attach");

        s.write("hello");
        assert_eq!(handle.output(), "hello");
        assert_eq!(rx.try_recv().ok(), Some(ObserverEvent::Output("hello".into())));
    }

    #[test]
    fn test_attach_observer_twice_returns_error() {
        let (mut s, _h) = session();
        let (tx, _rx) = mpsc::unbounded_channel();
        s.attach_observer(Observer::new("a", tx.clone())).expect("attach");
        let err = s.attach_observer(Observer::new("b", tx));
        assert!(matches!(err, Err(SessionError::AlreadyObserved)));
    }

    #[test]
    fn test_detach_observer_clears_input_block() {
        let (mut s, _h) = session();
        let (tx, _rx) = mpsc::unbounded_channel();
        s.attach_observer(Observer::new("a", tx)).expect("attach");
        s.set_input_blocked(true);

        s.detach_observer().expect("detach");
        assert!(!s.is_input_blocked());
        assert!(matches!(s.detach_observer(), Err(SessionError::NotObserved)));
    }

    #[test]
    fn test_dropped_observer_is_detached_on_write() {
        let (mut s, _h) = session();
        let (tx, rx) = mpsc::unbounded_channel();
        s.attach_observer(Observer::new("a", tx)).expect("attach");
        s.set_input_blocked(true);
        drop(rx);

        s.write("x");
        assert!(!s.is_observed());
        assert!(!s.is_input_blocked());
    }

    #[test]
    fn test_set_masked_forwards_to_connection() {
        let (mut s, handle) = session();
        s.set_masked(true);
        assert!(s.flags().masked);
        assert!(handle.is_masked());
    }

    #[test]
    fn test_close_due_only_after_deadline() {
        let (mut s, _h) = session();
        let now = Instant::now();
        assert!(!s.close_due(now));
        s.schedule_close(now + Duration::from_secs(2));
        assert!(!s.close_due(now));
        assert!(s.close_due(now + Duration::from_secs(2)));
    }

    #[test]
    fn test_touch_cancels_scheduled_close() {
        let (mut s, _h) = session();
        let now = Instant::now();
        s.schedule_close(now + Duration::from_secs(2));
        s.touch(now + Duration::from_secs(1));
        assert!(!s.is_close_scheduled());
        assert!(!s.close_due(now + Duration::from_secs(5)));
    }

    #[test]
    fn test_take_pending_commands_drains_in_order() {
        let (mut s, _h) = session();
        s.queue_command("north".into());
        s.queue_command("look".into());
        assert_eq!(s.take_pending_commands(), vec!["north", "look"]);
        assert_eq!(s.pending_commands().count(), 0);
    }
}
