//! `mas-net` — the messaging substrate of the `mas` simulation framework.
//!
//! # Model
//!
//! Elements exchange [`Message`](mas_core::Message)s over *sockets*, each of
//! a fixed [`SocketRole`](mas_core::SocketRole) with a defined transmission
//! capability:
//!
//! - `Publish` fans a message out to every connected subscriber;
//!   `Subscribe` receives only messages addressed to its owner or `"ALL"`.
//! - `Request`/`Reply` exchange messages in strict send→receive alternation.
//! - `Push` delivers to a single `Pull` sink that fair-queues all pushers.
//!
//! Transport is length-prefixed frames over loopback TCP: every message
//! travels as `(destination, source, body)` with the body frame carrying the
//! JSON envelope.  Each socket serializes its send/receive paths behind an
//! async lock that is released on every exit path, including cancellation.
//!
//! Capability misuse (sending on a receive-only role, replying before a
//! request arrived, looking up an absent role) is a programming error and
//! panics with a diagnostic rather than returning `Err`.
//!
//! # Entry points
//!
//! [`SocketMap::build`] turns one plane of a
//! [`NetworkConfig`](mas_core::NetworkConfig) into live sockets, binding or
//! connecting each endpoint as its role dictates.

pub mod error;
pub mod frame;
pub mod map;
pub mod socket;

#[cfg(test)]
mod tests;

pub use error::{NetError, NetResult};
pub use frame::Frames;
pub use map::SocketMap;
pub use socket::Socket;
