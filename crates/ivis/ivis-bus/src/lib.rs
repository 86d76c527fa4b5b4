//! `ivis-bus`: pluggable pub/sub of JSON payloads between the pipeline
//! processes.
//!
//! The contract to the pipelines is deliberately thin: at-most-once
//! delivery, ordering only within a single publisher, no durability, and no
//! implicit reconnect (connection loss surfaces to the caller, who decides).
//! Publishers may drop a message instead of blocking the capture loop; that
//! is the backpressure policy, and drops are reported so the caller can
//! count them.
//!
//! Each logical topic ("frames", "results") is one endpoint.
//!
//! Backends:
//! - [`tcp`]: newline-delimited JSON over plain TCP, publisher-bound
//! - `zmq` (feature-gated): broadcast PUB/SUB via ZeroMQ

mod error;
pub mod tcp;
#[cfg(feature = "zmq")]
pub mod zeromq;

use std::time::Duration;

pub use error::BusError;
pub use tcp::{TcpBusPublisher, TcpBusSubscriber};

/// Outcome of a publish: delivered to the transport, or dropped under
/// backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    Sent,
    Dropped,
}

pub trait BusPublisher: Send {
    fn publish(&mut self, payload: &[u8]) -> Result<Publish, BusError>;
}

pub trait BusSubscriber: Send {
    /// Receives the next payload, or `None` when `timeout` elapses first.
    ///
    /// The short-timeout polling shape keeps consumer loops responsive to
    /// the stop flag.
    fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, BusError>;
}
