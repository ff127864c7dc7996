//! `storehub-hub`: fan-out of server-pushed events to live socket connections.
//!
//! # Overview
//!
//! A [`Hub`] handle is cheap to clone and is what request handlers and the
//! upgrade endpoint hold. Structural changes to the set of live connections
//! go through a single [`HubEngine`] event loop; broadcasts take the same
//! exclusive guard the loop mutates under, so a broadcast never observes a
//! half-applied register or unregister.
//!
//! Each connection owns a bounded outbound queue drained by its own
//! [`WriteLoop`], the only task that ever writes to that transport. A client
//! whose queue is full when a broadcast arrives is disconnected rather than
//! allowed to stall the broadcaster.

pub mod connection;
pub mod error;
pub mod hub;
mod registry;

pub use connection::{FrameSink, Payload, PendingConnection, WriteLoop, WriteOutcome};
pub use error::{HubError, Result};
pub use hub::{Hub, HubEngine, Session};
pub use storehub_core::ConnId;

#[cfg(test)]
pub(crate) mod testing;
