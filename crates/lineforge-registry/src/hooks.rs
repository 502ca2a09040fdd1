//! Contracts the registry needs from the rest of the server.
//!
//! The registry never reaches into game logic. Everything it needs from
//! outside (login flow, command dispatch, user directory, world cleanup)
//! comes in through these traits.
//!
//! [`Lifecycle`] and [`LineHandler`] receive `&mut SessionRegistry` so they
//! can act on what they're told: write a reply, authenticate the session,
//! kick someone. [`UserStore`] and [`World`] are pure collaborators and
//! never see the registry.

use std::collections::{HashMap, VecDeque};

use lineforge_session::{CommandHistory, SessionState};
use lineforge_transport::{ConnectionId, Key};

use crate::{HookError, SessionRegistry};

/// The external lifecycle state machine.
pub trait Lifecycle: Send + 'static {
    /// Called when a session enters `state`. Sessions start in
    /// [`SessionState::Connecting`], reported straight after creation.
    fn transition(
        &mut self,
        registry: &mut SessionRegistry,
        id: &ConnectionId,
        state: &SessionState,
    ) -> Result<(), HookError>;

    /// Receives every key while the session is modal.
    fn handle_modal_input(
        &mut self,
        registry: &mut SessionRegistry,
        id: &ConnectionId,
        key: Key,
    ) -> Result<(), HookError>;
}

/// The line-completion callback.
pub trait LineHandler: Send + 'static {
    /// Called for every submitted line that wasn't queued by movement mode.
    fn on_line(
        &mut self,
        registry: &mut SessionRegistry,
        id: &ConnectionId,
        line: &str,
    ) -> Result<(), HookError>;

    /// Called when the emergency key gets through. Default: nothing.
    fn on_interrupt(
        &mut self,
        _registry: &mut SessionRegistry,
        _id: &ConnectionId,
    ) -> Result<(), HookError> {
        Ok(())
    }
}

/// The user directory and per-user command history.
pub trait UserStore: CommandHistory + Send + 'static {
    /// The session currently registered for `username`, if any.
    fn active_session_for(&self, username: &str) -> Option<ConnectionId>;

    /// Records `id` as the live session for `username`.
    fn register(&mut self, username: &str, id: &ConnectionId);

    /// Removes `username` from the directory.
    fn unregister(&mut self, username: &str) -> Result<(), HookError>;

    /// Abandons an in-flight world transfer for `username`.
    fn cancel_pending_transfer(&mut self, username: &str) -> Result<(), HookError>;

    /// Appends a submitted command to the user's history. Default: nothing.
    fn record_command(&mut self, _username: &str, _line: &str) {}
}

/// World and combat cleanup.
pub trait World: Send + 'static {
    fn resolve_combat_on_disconnect(
        &mut self,
        id: &ConnectionId,
        username: &str,
    ) -> Result<(), HookError>;

    fn remove_from_all_locations(&mut self, username: &str) -> Result<(), HookError>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

/// A [`UserStore`] that keeps everything in memory.
///
/// Usernames are compared case-insensitively. Each user's history is a
/// ring of the last `limit` distinct-from-previous commands.
#[derive(Debug)]
pub struct MemoryUserStore {
    directory: HashMap<String, ConnectionId>,
    history: HashMap<String, VecDeque<String>>,
    limit: usize,
}

impl MemoryUserStore {
    pub const DEFAULT_HISTORY: usize = 50;

    pub fn new() -> Self {
        Self::with_history_limit(Self::DEFAULT_HISTORY)
    }

    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            directory: HashMap::new(),
            history: HashMap::new(),
            limit,
        }
    }

    /// Number of users currently in the directory.
    pub fn online(&self) -> usize {
        self.directory.len()
    }
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

fn key(username: &str) -> String {
    username.to_ascii_lowercase()
}

impl CommandHistory for MemoryUserStore {
    fn entries(&self, username: &str) -> Vec<String> {
        self.history
            .get(&key(username))
            .map(|ring| ring.iter().rev().cloned().collect())
            .unwrap_or_default()
    }
}

impl UserStore for MemoryUserStore {
    fn active_session_for(&self, username: &str) -> Option<ConnectionId> {
        self.directory.get(&key(username)).cloned()
    }

    fn register(&mut self, username: &str, id: &ConnectionId) {
        self.directory.insert(key(username), id.clone());
    }

    fn unregister(&mut self, username: &str) -> Result<(), HookError> {
        self.directory.remove(&key(username));
        Ok(())
    }

    fn cancel_pending_transfer(&mut self, username: &str) -> Result<(), HookError> {
        tracing::debug!(username, "pending transfer cancelled");
        Ok(())
    }

    fn record_command(&mut self, username: &str, line: &str) {
        if self.limit == 0 {
            return;
        }
        let ring = self.history.entry(key(username)).or_default();
        if ring.back().is_some_and(|last| last == line) {
            return;
        }
        if ring.len() == self.limit {
            ring.pop_front();
        }
        ring.push_back(line.to_string());
    }
}

/// A [`World`] with nothing in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullWorld;

impl World for NullWorld {
    fn resolve_combat_on_disconnect(
        &mut self,
        _id: &ConnectionId,
        _username: &str,
    ) -> Result<(), HookError> {
        Ok(())
    }

    fn remove_from_all_locations(&mut self, _username: &str) -> Result<(), HookError> {
        Ok(())
    }
}
