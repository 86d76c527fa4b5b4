use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to connect bus endpoint {endpoint}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// The peer went away; the caller owns the decision to reconnect.
    #[error("bus connection lost")]
    Disconnected,

    #[error("bus i/o failed")]
    Io(#[from] io::Error),

    #[cfg(feature = "zmq")]
    #[error("zmq transport failed")]
    Zmq(#[from] zmq::Error),
}
