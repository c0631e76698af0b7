//! TCP connection primitive for the headset perception link.
//!
//! The companion board is reached over a single client TCP connection. This
//! is the lowest layer of hmdlink: it knows how to connect with a hard
//! timeout, apply read/write timeouts and split the socket into independent
//! halves. Everything else builds on top of the [`TcpLink`] type provided here.

pub mod error;
pub mod tcp;

pub use error::{Result, TransportError};
pub use tcp::{is_idle_timeout, PeerAddress, TcpLink};
