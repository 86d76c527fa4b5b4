//! Newline-delimited JSON over plain TCP.
//!
//! The publisher binds a listener per topic and fans each message out to
//! every connected subscriber. Writes are non-blocking: a subscriber whose
//! socket cannot take the whole line right now is evicted and the message
//! counted as a backpressure drop for it. Subscribers connect and read
//! lines with a short receive timeout.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use tracing::{debug, warn};

use crate::{BusError, BusPublisher, BusSubscriber, Publish};

pub struct TcpBusPublisher {
    listener: TcpListener,
    clients: Vec<TcpStream>,
    endpoint: String,
}

impl TcpBusPublisher {
    /// Binds the topic endpoint and starts accepting subscribers.
    pub fn bind(endpoint: &str) -> Result<Self, BusError> {
        let listener = TcpListener::bind(endpoint).map_err(|source| BusError::Connect {
            endpoint: endpoint.to_string(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            clients: Vec::new(),
            endpoint: endpoint.to_string(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn subscriber_count(&self) -> usize {
        self.clients.len()
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if stream.set_nonblocking(true).is_err() || stream.set_nodelay(true).is_err() {
                        continue;
                    }
                    debug!(endpoint = %self.endpoint, %peer, "bus subscriber connected");
                    self.clients.push(stream);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(endpoint = %self.endpoint, %e, "bus accept failed");
                    break;
                }
            }
        }
    }
}

enum WriteOutcome {
    Delivered,
    /// The socket could not take the whole frame; framing for this
    /// subscriber can no longer be trusted.
    Backpressure,
    Gone,
}

fn write_frame(stream: &mut TcpStream, frame: &[u8]) -> WriteOutcome {
    let mut written = 0;
    while written < frame.len() {
        match stream.write(&frame[written..]) {
            Ok(0) => return WriteOutcome::Gone,
            Ok(n) => written += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                return WriteOutcome::Backpressure;
            }
            Err(_) => return WriteOutcome::Gone,
        }
    }
    WriteOutcome::Delivered
}

impl BusPublisher for TcpBusPublisher {
    fn publish(&mut self, payload: &[u8]) -> Result<Publish, BusError> {
        self.accept_pending();

        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.extend_from_slice(payload);
        frame.push(b'\n');

        let endpoint = self.endpoint.clone();
        let mut dropped = false;
        self.clients.retain_mut(|client| match write_frame(client, &frame) {
            WriteOutcome::Delivered => true,
            WriteOutcome::Backpressure => {
                warn!(endpoint = %endpoint, "evicting slow bus subscriber");
                dropped = true;
                false
            }
            WriteOutcome::Gone => {
                debug!(endpoint = %endpoint, "bus subscriber disconnected");
                false
            }
        });

        Ok(if dropped { Publish::Dropped } else { Publish::Sent })
    }
}

pub struct TcpBusSubscriber {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl TcpBusSubscriber {
    /// Connects to a topic endpoint. No implicit reconnect afterwards.
    pub fn connect(endpoint: &str) -> Result<Self, BusError> {
        let stream = TcpStream::connect(endpoint).map_err(|source| BusError::Connect {
            endpoint: endpoint.to_string(),
            source,
        })?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            buf: Vec::new(),
        })
    }

    fn pop_line(&mut self) -> Option<Vec<u8>> {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).take(pos).collect();
            if !line.is_empty() {
                return Some(line);
            }
        }
        None
    }
}

impl BusSubscriber for TcpBusSubscriber {
    fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, BusError> {
        if let Some(line) = self.pop_line() {
            return Ok(Some(line));
        }

        self.stream
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        let mut chunk = [0u8; 4096];
        match self.stream.read(&mut chunk) {
            Ok(0) => Err(BusError::Disconnected),
            Ok(n) => {
                self.buf.extend_from_slice(&chunk[..n]);
                Ok(self.pop_line())
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
