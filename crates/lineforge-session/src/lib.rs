//! Per-connection session state and the line-discipline engine.
//!
//! A [`Session`] owns its [`Connection`](lineforge_transport::Connection)
//! and everything the server knows about that connection: who is logged
//! in, what is half-typed, which prompt is showing, whether an admin is
//! watching.
//!
//! [`line::handle`] is the line discipline. It consumes one canonical
//! [`Key`](lineforge_transport::Key) at a time, edits the session's
//! [`LineBuffer`], echoes through the connection, and reports what
//! happened as an [`Outcome`]. It never fails and never blocks; acting
//! on the outcome (running a command, forwarding to a modal handler) is
//! the registry's job.
//!
//! # How it fits in the stack
//!
//! ```text
//! Registry Layer (above)   owns every Session, acts on Outcomes
//!     ↕
//! Session Layer (this crate)
//!     ↕
//! Transport Layer (below)  Connection handles and canonical Keys
//! ```

mod error;
pub mod line;
mod session;

pub use error::SessionError;
pub use line::{CommandHistory, LineBuffer, NoHistory, Outcome};
pub use session::{
    ConnectionClass, Observer, ObserverEvent, ObserverSink, Session, SessionState, TransientFlags,
};
