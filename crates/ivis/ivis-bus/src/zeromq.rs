//! Broadcast transport over ZeroMQ PUB/SUB.
//!
//! Intended for deployments running an XPUB/XSUB proxy: publishers connect
//! their PUB socket to the proxy's XSUB side, subscribers connect SUB to
//! the XPUB side. Direct PUB bind works too via `bind`.

use std::time::Duration;

use crate::{BusError, BusPublisher, BusSubscriber, Publish};

pub struct ZmqBusPublisher {
    socket: zmq::Socket,
}

impl ZmqBusPublisher {
    /// Connects a PUB socket to an XSUB proxy endpoint.
    pub fn connect(endpoint: &str) -> Result<Self, BusError> {
        let ctx = zmq::Context::new();
        let socket = ctx.socket(zmq::PUB)?;
        socket.connect(endpoint)?;
        Ok(Self { socket })
    }

    /// Binds a PUB socket directly (proxyless topologies).
    pub fn bind(endpoint: &str) -> Result<Self, BusError> {
        let ctx = zmq::Context::new();
        let socket = ctx.socket(zmq::PUB)?;
        socket.bind(endpoint)?;
        Ok(Self { socket })
    }
}

impl BusPublisher for ZmqBusPublisher {
    fn publish(&mut self, payload: &[u8]) -> Result<Publish, BusError> {
        match self.socket.send(payload, zmq::DONTWAIT) {
            Ok(()) => Ok(Publish::Sent),
            // High-water mark reached: drop rather than stall the capture loop.
            Err(zmq::Error::EAGAIN) => Ok(Publish::Dropped),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct ZmqBusSubscriber {
    socket: zmq::Socket,
}

impl ZmqBusSubscriber {
    pub fn connect(endpoint: &str) -> Result<Self, BusError> {
        let ctx = zmq::Context::new();
        let socket = ctx.socket(zmq::SUB)?;
        socket.connect(endpoint)?;
        socket.set_subscribe(b"")?;
        Ok(Self { socket })
    }
}

impl BusSubscriber for ZmqBusSubscriber {
    fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, BusError> {
        let ready = self
            .socket
            .poll(zmq::POLLIN, timeout.as_millis().min(i64::MAX as u128) as i64)?;
        if ready == 0 {
            return Ok(None);
        }
        Ok(Some(self.socket.recv_bytes(zmq::DONTWAIT)?))
    }
}
