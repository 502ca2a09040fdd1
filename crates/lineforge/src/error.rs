//! Unified error type for Lineforge.

use lineforge_protocol::ProtocolError;
use lineforge_registry::{HookError, RegistryError};
use lineforge_session::SessionError;
use lineforge_transport::TransportError;

/// Top-level error that wraps every layer's error.
///
/// The `#[from]` conversions let `?` lift any sub-crate error into this
/// one.
#[derive(Debug, thiserror::Error)]
pub enum LineforgeError {
    /// A transport-level error (bind, accept, handshake).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A push-frame encode or decode error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session precondition failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A registry operation failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A collaborator reported a failure.
    #[error(transparent)]
    Hook(#[from] HookError),
}
