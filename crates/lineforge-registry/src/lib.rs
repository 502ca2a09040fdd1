//! The session registry for Lineforge.
//!
//! [`SessionRegistry`] is the one place live sessions exist. It creates
//! them for new connections, routes each connection's events through the
//! line discipline, and owns every cross-session rule: broadcast with
//! prompt repair, lookup by username, the idle sweep, and the disconnect
//! and takeover protocol that keeps each user down to one live session.
//!
//! # How it fits in the stack
//!
//! ```text
//! Server Layer (above)      event loop, timers, ServerHandle
//!     ↕
//! Registry Layer (this crate)
//!     ↕
//! Session Layer (below)     Session record, line discipline
//! ```
//!
//! Game logic plugs in through the [`Lifecycle`], [`LineHandler`],
//! [`UserStore`] and [`World`] traits.

mod config;
mod disconnect;
mod error;
mod hooks;
mod registry;

pub use config::RegistryConfig;
pub use error::{HookError, RegistryError};
pub use hooks::{Lifecycle, LineHandler, MemoryUserStore, NullWorld, UserStore, World};
pub use registry::{SessionInfo, SessionRegistry};
