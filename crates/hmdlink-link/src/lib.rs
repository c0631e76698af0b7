//! Perception link: stream transport, routing and transcoding.
//!
//! [`StreamTransport`] owns the TCP connection and its receive loop.
//! [`MessageRouter`] looks up each message type in the [`RouteTable`] fixed
//! for the [`OperatingMode`], transcodes the payload and either hands it to a
//! local handler or forwards it to an attached [`Link`]. [`WorkQueue`] and
//! [`Worker`] move work off the delivering thread; [`EventBus`] carries
//! cross-module notifications.

pub mod control;
pub mod error;
pub mod events;
pub mod format;
pub mod route;
pub mod router;
#[cfg(feature = "schema")]
pub mod schema;
pub mod stream;
pub mod worker;

pub use control::ControlCommand;
pub use error::{LinkError, Result};
pub use events::{EventBus, EventObserver, EventTopic, HeadsetEvent, RemoteLevel};
pub use format::Message;
pub use route::{Endpoint, OperatingMode, Route, RouteTable, WireFormat};
pub use router::{Link, LocalHandler, MessageRouter, RouterStats};
#[cfg(feature = "schema")]
pub use schema::PayloadSchemas;
pub use stream::{LinkStatus, StatusObserver, StreamTransport, TransportConfig, TransportStats};
pub use worker::{join_bounded, WorkQueue, Worker};
