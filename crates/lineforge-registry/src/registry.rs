//! The session registry: the single owner of every live session.
//!
//! # Construction
//!
//! The registry is built in two phases. [`SessionRegistry::new`] takes the
//! collaborators that never call back in (user store, world). The lifecycle
//! and line handlers are injected afterwards with
//! [`install`](SessionRegistry::install), because they need the registry
//! to do anything useful. Until then [`create`](SessionRegistry::create)
//! refuses connections.
//!
//! # Threading
//!
//! Not thread-safe and not meant to be: one task owns the registry and
//! feeds it every connection's events in order (see the `lineforge` crate's
//! server loop). That is what keeps buffer and cursor edits lock-free.
//!
//! # Re-entrancy
//!
//! Handlers receive `&mut SessionRegistry`. While one is running it is
//! taken out of the registry, so a nested call that would invoke the same
//! handler again skips it instead.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use lineforge_session::{
    CommandHistory, ConnectionClass, Observer, Outcome, Session, SessionError, SessionState, line,
};
use lineforge_transport::{Connection, ConnectionEvent, ConnectionId, ConnectionKind, Key, TestHandle};

use crate::{HookError, Lifecycle, LineHandler, RegistryConfig, RegistryError, UserStore, World};

const CLEAR_LINE: &str = "\r\x1b[K";

/// Plain-data view of one session, for admin screens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: ConnectionId,
    pub kind: ConnectionKind,
    pub class: ConnectionClass,
    pub origin: Option<SocketAddr>,
    pub username: Option<String>,
    pub state: SessionState,
    pub connected_for: Duration,
    pub idle: Duration,
    pub observed: bool,
    pub input_blocked: bool,
}

/// Owns every active session and the collaborators they talk to.
pub struct SessionRegistry {
    pub(crate) sessions: HashMap<ConnectionId, Session>,
    pub(crate) config: RegistryConfig,
    pub(crate) users: Box<dyn UserStore>,
    pub(crate) world: Box<dyn World>,
    lifecycle: Option<Box<dyn Lifecycle>>,
    lines: Option<Box<dyn LineHandler>>,
    installed: bool,
}

/// Lends the user store to the line discipline as a history source.
struct History<'a>(&'a dyn UserStore);

impl CommandHistory for History<'_> {
    fn entries(&self, username: &str) -> Vec<String> {
        self.0.entries(username)
    }
}

impl SessionRegistry {
    /// Creates an empty registry. Call [`install`](Self::install) before
    /// creating sessions.
    pub fn new(config: RegistryConfig, users: impl UserStore, world: impl World) -> Self {
        Self {
            sessions: HashMap::new(),
            config,
            users: Box::new(users),
            world: Box::new(world),
            lifecycle: None,
            lines: None,
            installed: false,
        }
    }

    /// Injects the handlers. Calling it again replaces them.
    pub fn install(&mut self, lifecycle: impl Lifecycle, lines: impl LineHandler) {
        self.lifecycle = Some(Box::new(lifecycle));
        self.lines = Some(Box::new(lines));
        self.installed = true;
    }

    /// Whether [`install`](Self::install) has been called.
    pub fn is_ready(&self) -> bool {
        self.installed
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn users(&self) -> &dyn UserStore {
        self.users.as_ref()
    }

    // -- creation ---------------------------------------------------------

    /// Registers a new connection and starts its lifecycle.
    ///
    /// # Errors
    /// - [`RegistryError::NotReady`] before [`install`](Self::install)
    /// - [`RegistryError::DuplicateConnection`] if the id is taken
    pub fn create(&mut self, connection: Box<dyn Connection>) -> Result<ConnectionId, RegistryError> {
        if !self.installed {
            return Err(RegistryError::NotReady);
        }
        let id = connection.id().clone();
        if self.sessions.contains_key(&id) {
            return Err(RegistryError::DuplicateConnection(id));
        }

        let class = self.classify(connection.remote_addr());
        let session = Session::new(connection, class);
        tracing::info!(
            conn_id = %id,
            kind = %session.kind(),
            %class,
            origin = ?session.origin(),
            "session created"
        );
        self.sessions.insert(id.clone(), session);

        let state = SessionState::Connecting;
        self.with_lifecycle(&id, |lifecycle, registry| {
            lifecycle.transition(registry, &id, &state)
        });
        Ok(id)
    }

    fn classify(&self, origin: Option<SocketAddr>) -> ConnectionClass {
        let loopback = origin.is_some_and(|addr| addr.ip().is_loopback());
        if loopback && self.config.loopback_is_local {
            ConnectionClass::LocalConsole
        } else {
            ConnectionClass::Remote
        }
    }

    // -- dispatch ---------------------------------------------------------

    /// Delivers one canonical event. Events for unknown connections are
    /// dropped.
    pub fn dispatch(&mut self, id: ConnectionId, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Input(key) => self.handle_key(&id, key),
            ConnectionEvent::End => {
                tracing::debug!(conn_id = %id, "connection ended");
                self.disconnect(&id, true);
            }
            ConnectionEvent::Error(e) => {
                tracing::warn!(conn_id = %id, error = %e, "connection error");
                self.disconnect(&id, false);
            }
        }
    }

    /// Feeds `text` to a session as if it had been typed on a telnet
    /// client, synchronously.
    pub fn simulate_input(&mut self, id: &ConnectionId, text: &str) {
        for event in TestHandle::input_events(text) {
            self.dispatch(id.clone(), event);
        }
    }

    fn handle_key(&mut self, id: &ConnectionId, key: Key) {
        let Some(session) = self.sessions.get_mut(id) else {
            tracing::trace!(conn_id = %id, "input for unknown session");
            return;
        };
        session.touch(Instant::now());
        session.connection_mut().audit_input(&key);
        let masked = session.flags().masked;

        let outcome = line::handle(session, key, &History(self.users.as_ref()));
        match outcome {
            Outcome::Line(text) => {
                if let Some(user) = session.user() {
                    // Masked lines are secrets and never enter the history.
                    if session.is_authenticated() && !masked && !text.trim().is_empty() {
                        self.users.record_command(user, &text);
                    }
                }
                self.with_lines(id, |lines, registry| lines.on_line(registry, id, &text));
            }
            Outcome::Modal(key) => {
                self.with_lifecycle(id, |lifecycle, registry| {
                    lifecycle.handle_modal_input(registry, id, key)
                });
            }
            Outcome::Interrupt => {
                self.with_lines(id, |lines, registry| lines.on_interrupt(registry, id));
            }
            Outcome::Queued(text) => {
                tracing::debug!(conn_id = %id, line = %text, "command queued during movement");
            }
            Outcome::Handled | Outcome::Discarded | Outcome::Ignored => {}
        }
    }

    fn with_lines(
        &mut self,
        id: &ConnectionId,
        f: impl FnOnce(&mut dyn LineHandler, &mut Self) -> Result<(), HookError>,
    ) {
        let Some(mut lines) = self.lines.take() else {
            tracing::debug!(conn_id = %id, "line handler unavailable");
            return;
        };
        if let Err(e) = f(lines.as_mut(), self) {
            tracing::warn!(conn_id = %id, error = %e, "line handler failed");
        }
        self.lines = Some(lines);
    }

    fn with_lifecycle(
        &mut self,
        id: &ConnectionId,
        f: impl FnOnce(&mut dyn Lifecycle, &mut Self) -> Result<(), HookError>,
    ) {
        let Some(mut lifecycle) = self.lifecycle.take() else {
            tracing::debug!(conn_id = %id, "lifecycle handler unavailable");
            return;
        };
        if let Err(e) = f(lifecycle.as_mut(), self) {
            tracing::warn!(conn_id = %id, error = %e, "lifecycle handler failed");
        }
        self.lifecycle = Some(lifecycle);
    }

    // -- lookup -----------------------------------------------------------

    pub fn get(&self, id: &ConnectionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &ConnectionId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    fn session_mut(&mut self, id: &ConnectionId) -> Result<&mut Session, RegistryError> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()).into())
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Ids of every live session, sorted.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Finds the authenticated session for `username` (case-insensitive).
    pub fn lookup_by_username(&self, username: &str) -> Option<ConnectionId> {
        self.sessions
            .values()
            .find(|session| session.is_user(username))
            .map(|session| session.id().clone())
    }

    /// Usernames of every authenticated session, sorted.
    pub fn online_users(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.is_authenticated())
            .filter_map(|s| s.user().map(str::to_owned))
            .collect();
        names.sort_by_key(|name| name.to_ascii_lowercase());
        names
    }

    pub fn session_infos(&self) -> Vec<SessionInfo> {
        let now = Instant::now();
        let mut infos: Vec<SessionInfo> = self
            .sessions
            .values()
            .map(|s| SessionInfo {
                id: s.id().clone(),
                kind: s.kind(),
                class: s.class(),
                origin: s.origin(),
                username: s.user().map(str::to_owned),
                state: s.state().clone(),
                connected_for: now.saturating_duration_since(s.connected_at()),
                idle: s.idle_for(now),
                observed: s.is_observed(),
                input_blocked: s.is_input_blocked(),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    // -- per-session operations -------------------------------------------

    pub fn write(&mut self, id: &ConnectionId, text: &str) -> Result<(), RegistryError> {
        self.session_mut(id)?.write(text);
        Ok(())
    }

    /// Repaints the prompt and the in-progress line.
    pub fn redraw(&mut self, id: &ConnectionId) -> Result<(), RegistryError> {
        line::redraw(self.session_mut(id)?);
        Ok(())
    }

    pub fn set_prompt(&mut self, id: &ConnectionId, prompt: &str) -> Result<(), RegistryError> {
        self.session_mut(id)?.set_prompt(prompt);
        Ok(())
    }

    /// Moves a session to `state` and tells the lifecycle handler (unless
    /// the handler itself is the caller).
    pub fn transition(
        &mut self,
        id: &ConnectionId,
        state: SessionState,
    ) -> Result<(), RegistryError> {
        self.session_mut(id)?.set_state(state.clone());
        tracing::debug!(conn_id = %id, %state, "session state changed");
        if self.lifecycle.is_some() {
            self.with_lifecycle(id, |lifecycle, registry| {
                lifecycle.transition(registry, id, &state)
            });
        }
        Ok(())
    }

    /// Logs a session in as `username`, first evicting every other
    /// session of that user.
    pub fn authenticate(&mut self, id: &ConnectionId, username: &str) -> Result<(), RegistryError> {
        if !self.sessions.contains_key(id) {
            return Err(SessionError::NotFound(id.clone()).into());
        }

        let stale: Vec<ConnectionId> = self
            .sessions
            .values()
            .filter(|s| s.id() != id && s.is_user(username))
            .map(|s| s.id().clone())
            .collect();
        for other in &stale {
            tracing::info!(conn_id = %other, username, replaced_by = %id, "session taken over");
            self.evict(other);
        }

        self.session_mut(id)?.mark_authenticated(username);
        self.users.register(username, id);
        tracing::info!(conn_id = %id, username, "session authenticated");
        Ok(())
    }

    /// Sends the takeover notice, closes the connection and runs the
    /// disconnect protocol without a departure broadcast.
    pub(crate) fn evict(&mut self, id: &ConnectionId) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.write(&self.config.takeover_notice);
            session.end();
        }
        self.disconnect(id, false);
    }

    pub fn set_input_blocked(&mut self, id: &ConnectionId, blocked: bool) -> Result<(), RegistryError> {
        self.session_mut(id)?.set_input_blocked(blocked);
        tracing::info!(conn_id = %id, blocked, "input block changed");
        Ok(())
    }

    pub fn attach_observer(
        &mut self,
        id: &ConnectionId,
        observer: Observer,
    ) -> Result<(), RegistryError> {
        self.session_mut(id)?.attach_observer(observer)?;
        Ok(())
    }

    pub fn detach_observer(&mut self, id: &ConnectionId) -> Result<Observer, RegistryError> {
        Ok(self.session_mut(id)?.detach_observer()?)
    }

    /// Starts or stops password masking.
    pub fn set_masked(&mut self, id: &ConnectionId, masked: bool) -> Result<(), RegistryError> {
        self.session_mut(id)?.set_masked(masked);
        Ok(())
    }

    /// Starts or stops movement mode.
    pub fn set_movement_mode(&mut self, id: &ConnectionId, on: bool) -> Result<(), RegistryError> {
        self.session_mut(id)?.flags_mut().movement_mode = on;
        Ok(())
    }

    /// Drains the lines queued during movement mode, oldest first.
    pub fn take_pending_commands(&mut self, id: &ConnectionId) -> Result<Vec<String>, RegistryError> {
        Ok(self.session_mut(id)?.take_pending_commands())
    }

    /// Records (or clears) an in-flight world transfer.
    pub fn set_pending_transfer(
        &mut self,
        id: &ConnectionId,
        destination: Option<String>,
    ) -> Result<(), RegistryError> {
        self.session_mut(id)?.flags_mut().pending_transfer = destination;
        Ok(())
    }

    // -- cross-session operations -----------------------------------------

    /// Writes `message` to every authenticated session except `exclude`,
    /// then repaints each recipient's prompt and pending input. Returns the
    /// number of recipients.
    pub fn broadcast(&mut self, message: &str, exclude: Option<&ConnectionId>) -> usize {
        let message = message.trim_end_matches(['\r', '\n']);
        let targets: Vec<ConnectionId> = self
            .sessions
            .values()
            .filter(|s| s.is_authenticated() && Some(s.id()) != exclude)
            .map(|s| s.id().clone())
            .collect();

        let mut sent = 0;
        for id in &targets {
            // A write can't remove a session today, but a missing one is
            // simply skipped.
            let Some(session) = self.sessions.get_mut(id) else {
                continue;
            };
            session.write(&format!("{CLEAR_LINE}{message}\r\n"));
            line::redraw(session);
            sent += 1;
        }
        sent
    }

    /// Writes `reason`, closes the connection, and disconnects with a
    /// departure broadcast.
    pub fn kick(&mut self, id: &ConnectionId, reason: &str) -> Result<(), RegistryError> {
        let session = self.session_mut(id)?;
        if !reason.is_empty() {
            session.write(&format!("{CLEAR_LINE}{}\r\n", reason.trim_end_matches(['\r', '\n'])));
        }
        session.end();
        tracing::info!(conn_id = %id, reason, "session kicked");
        self.disconnect(id, true);
        Ok(())
    }

    /// Warns and schedules the close of every authenticated, unobserved
    /// session idle for longer than `timeout`. A zero timeout disables the
    /// sweep. Returns how many sessions were flagged.
    pub fn idle_sweep(&mut self, timeout: Duration) -> usize {
        self.idle_sweep_at(timeout, Instant::now())
    }

    /// [`idle_sweep`](Self::idle_sweep) against an explicit clock.
    pub fn idle_sweep_at(&mut self, timeout: Duration, now: Instant) -> usize {
        if timeout.is_zero() {
            return 0;
        }
        let close_at = now
            .checked_add(self.config.idle_grace)
            .unwrap_or_else(|| now + RegistryConfig::default().idle_grace);
        let mut flagged = 0;
        for session in self.sessions.values_mut() {
            if !session.is_authenticated()
                || session.is_observed()
                || session.is_close_scheduled()
                || session.idle_for(now) <= timeout
            {
                continue;
            }
            tracing::info!(
                conn_id = %session.id(),
                idle_secs = session.idle_for(now).as_secs(),
                "closing idle session"
            );
            session.write(&self.config.idle_notice);
            session.schedule_close(close_at);
            flagged += 1;
        }
        flagged
    }

    /// Closes every session whose scheduled close is due. Returns how many
    /// were closed.
    pub fn reap_scheduled_closes(&mut self, now: Instant) -> usize {
        let due: Vec<ConnectionId> = self
            .sessions
            .values()
            .filter(|s| s.close_due(now))
            .map(|s| s.id().clone())
            .collect();
        for id in &due {
            if let Some(session) = self.sessions.get_mut(id) {
                session.end();
            }
            self.disconnect(id, true);
        }
        due.len()
    }

    /// Writes `notice` to every session and disconnects each one, without
    /// departure broadcasts.
    pub fn shutdown(&mut self, notice: &str) {
        let ids = self.ids();
        tracing::info!(sessions = ids.len(), "shutting down all sessions");
        for id in &ids {
            if let Some(session) = self.sessions.get_mut(id) {
                if !notice.is_empty() {
                    session.write(notice);
                }
                session.end();
            }
            self.disconnect(id, false);
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .field("installed", &self.installed)
            .finish_non_exhaustive()
    }
}
