//! Wire vocabulary for Lineforge's browser push transport.
//!
//! Telnet clients speak raw bytes, but browser clients exchange small
//! JSON frames over a WebSocket. This crate defines those frames and how
//! they are turned into bytes:
//!
//! - **Types** ([`PushInbound`], [`PushOutbound`], [`Span`], [`Style`]):
//!   what travels on the wire in each direction.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how frames are converted
//!   to/from bytes.
//! - **Errors** ([`ProtocolError`]): what can go wrong while doing so.
//!
//! ```text
//! Browser (JSON frames) → Protocol (PushInbound) → Transport (Key events)
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{Color, PushInbound, PushOutbound, Span, SpecialKey, Style};
