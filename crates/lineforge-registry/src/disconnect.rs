//! The disconnect and takeover protocol.
//!
//! Every way a session can end (peer close, transport error, kick, idle
//! close, takeover, shutdown) arrives here. The steps:
//!
//! 1. the session leaves the map, so a second disconnect finds nothing
//! 2. an attached observer is told and detached, and the input block
//!    is lifted
//! 3. a pending world transfer is cancelled
//! 4. for an authenticated session: combat is resolved, the user leaves
//!    every location, any other live session of the same user is sent
//!    the takeover notice and disconnected in turn, the user is removed
//!    from the directory (unless a newer session already owns the entry),
//!    and the departure is optionally broadcast
//! 5. the connection is closed
//!
//! Collaborator failures are logged and the remaining steps still run.

use lineforge_session::{ObserverEvent, SessionState};
use lineforge_transport::ConnectionId;

use crate::{HookError, SessionRegistry};

fn log_hook(id: &ConnectionId, step: &str, result: Result<(), HookError>) {
    if let Err(e) = result {
        tracing::warn!(conn_id = %id, step, error = %e, "collaborator failed during disconnect");
    }
}

impl SessionRegistry {
    /// Runs the disconnect protocol for `id`. Returns `false` if there was
    /// no such session (it had already been disconnected).
    pub fn disconnect(&mut self, id: &ConnectionId, broadcast_leave: bool) -> bool {
        let Some(mut session) = self.sessions.remove(id) else {
            tracing::trace!(conn_id = %id, "disconnect for unknown session ignored");
            return false;
        };
        session.set_state(SessionState::Disconnected);
        let username = if session.is_authenticated() {
            session.user().map(str::to_owned)
        } else {
            None
        };

        if session.is_observed() {
            session.notify_observer(ObserverEvent::Ended {
                id: id.clone(),
                username: username.clone(),
            });
            let who = username.as_deref().unwrap_or(id.as_str());
            session.notify_observer(ObserverEvent::Notice(format!(
                "{who} has disconnected; observation ended."
            )));
            let _ = session.detach_observer();
        }
        session.set_input_blocked(false);

        if session.flags_mut().pending_transfer.take().is_some() {
            if let Some(user) = session.user() {
                log_hook(id, "cancel_pending_transfer", self.users.cancel_pending_transfer(user));
            }
        }

        if let Some(name) = username.as_deref() {
            log_hook(
                id,
                "resolve_combat_on_disconnect",
                self.world.resolve_combat_on_disconnect(id, name),
            );
            log_hook(
                id,
                "remove_from_all_locations",
                self.world.remove_from_all_locations(name),
            );

            let duplicates: Vec<ConnectionId> = self
                .sessions
                .values()
                .filter(|s| s.is_user(name))
                .map(|s| s.id().clone())
                .collect();
            for dup in &duplicates {
                tracing::info!(conn_id = %dup, username = name, "evicting duplicate session");
                self.evict(dup);
            }

            let owns_entry = match self.users.active_session_for(name) {
                None => true,
                Some(active) => active == *id,
            };
            if owns_entry {
                log_hook(id, "unregister", self.users.unregister(name));
            }

            if broadcast_leave {
                let notice = self.config.departure_for(name);
                self.broadcast(&notice, None);
            }
        }

        session.end();
        tracing::info!(
            conn_id = %id,
            username = username.as_deref().unwrap_or("-"),
            "session disconnected"
        );
        true
    }
}
