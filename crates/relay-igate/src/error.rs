//! Error types for the IGate

use thiserror::Error;

/// Errors that can occur while talking to an APRS-IS server
#[derive(Debug, Error)]
pub enum IgateError {
    /// Host name did not resolve to any address
    #[error("can't get address for IGate server {server}: {message}")]
    Resolve {
        /// Configured host name
        server: String,
        /// Resolver diagnostic
        message: String,
    },

    /// Every resolved address refused the connection
    #[error("could not connect to IGate server {0}")]
    Connect(String),

    /// Server closed the connection
    #[error("IGate server closed the connection")]
    Closed,

    /// No connection to send on
    #[error("not connected to IGate server")]
    NotConnected,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Packet build or parse error
    #[error("packet error: {0}")]
    Packet(#[from] relay_packet::PacketError),

    /// Transmit queue refused a frame
    #[error("relay error: {0}")]
    Relay(#[from] relay_core::RelayError),
}
