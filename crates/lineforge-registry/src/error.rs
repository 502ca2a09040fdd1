//! Error types for the registry layer.

use lineforge_session::SessionError;
use lineforge_transport::ConnectionId;

/// Errors returned by registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The lifecycle and line handlers have not been installed yet, so
    /// connections cannot be accepted.
    #[error("registry handlers not installed")]
    NotReady,

    /// A session already exists for this connection.
    #[error("duplicate connection: {0}")]
    DuplicateConnection(ConnectionId),

    /// A session-level precondition failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// A failure reported by an external collaborator.
///
/// The registry logs these and carries on: a broken collaborator must
/// never leave a session half-disconnected.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HookError(String);

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<RegistryError> for HookError {
    fn from(e: RegistryError) -> Self {
        Self(e.to_string())
    }
}
