//! # Lineforge
//!
//! Multi-protocol persistent-session text server framework.
//!
//! Lineforge accepts telnet and browser (WebSocket) connections, runs a
//! line-editing discipline for each one, and hands completed lines and
//! lifecycle transitions to code you supply. Applications implement
//! [`Lifecycle`](prelude::Lifecycle) and [`LineHandler`](prelude::LineHandler),
//! plug in a [`UserStore`](prelude::UserStore) and a [`World`](prelude::World),
//! and the framework handles transport, editing, takeover, idle
//! sweeps, and disconnect cleanup.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lineforge::prelude::*;
//!
//! // Implement Lifecycle and LineHandler for your application, then:
//! // let mut registry = SessionRegistry::new(RegistryConfig::default(), MemoryUserStore::new(), NullWorld);
//! // registry.install(MyLogin, MyCommands);
//! // let server = LineforgeServer::builder()
//! //     .telnet_bind("0.0.0.0:4000")
//! //     .build(registry)
//! //     .await?;
//! // server.run().await
//! ```

mod config;
mod error;
mod logging;
mod server;

pub use config::{
    ENV_IDLE_MINUTES, ENV_MAINTENANCE_SECS, ENV_TELNET_BIND, ENV_WS_BIND, ServerConfig,
};
pub use error::LineforgeError;
pub use logging::init_tracing;
pub use server::{LineforgeServer, LineforgeServerBuilder, ServerHandle};

pub use lineforge_protocol as protocol;
pub use lineforge_registry as registry;
pub use lineforge_session as session;
pub use lineforge_transport as transport;

/// Common imports for Lineforge applications.
pub mod prelude {
    pub use crate::{
        LineforgeError, LineforgeServer, LineforgeServerBuilder, ServerConfig, ServerHandle,
        init_tracing,
    };
    pub use lineforge_registry::{
        HookError, Lifecycle, LineHandler, MemoryUserStore, NullWorld, RegistryConfig,
        RegistryError, SessionInfo, SessionRegistry, UserStore, World,
    };
    pub use lineforge_session::{
        CommandHistory, ConnectionClass, Observer, ObserverEvent, ObserverSink, Session,
        SessionError, SessionState,
    };
    pub use lineforge_transport::{ConnectionId, ConnectionKind, Key, TransportError};
}
