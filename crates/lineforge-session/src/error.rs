//! Error types for the session layer.

use lineforge_transport::ConnectionId;

/// Errors returned by session operations that have a precondition.
///
/// Per-key handling never fails; these come from the explicit
/// operations collaborators call (observer attach, lookups by id).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session exists for the given connection.
    #[error("session not found: {0}")]
    NotFound(ConnectionId),

    /// The operation needs an authenticated session.
    #[error("session is not authenticated")]
    NotAuthenticated,

    /// The session already has an observer attached.
    #[error("session is already observed")]
    AlreadyObserved,

    /// The session has no observer to detach.
    #[error("session is not observed")]
    NotObserved,
}
