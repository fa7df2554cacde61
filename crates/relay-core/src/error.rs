//! Error types for the relay core

use relay_packet::PacketError;
use thiserror::Error;

/// Errors that can occur in the digipeater engines and queues
#[derive(Debug, Error)]
pub enum RelayError {
    /// Channel number outside the configured table
    #[error("invalid channel {0}")]
    InvalidChannel(usize),

    /// Channel exists but has no medium to transmit on
    #[error("channel {0} has no transmit medium")]
    NoMedium(usize),

    /// Channel medium does not support the request
    #[error("channel {chan} is not a radio channel")]
    NotRadio {
        /// Channel requested
        chan: usize,
    },

    /// Transmit queue is over its soft limit
    #[error("transmit queue for channel {chan} is too long ({len} packets)")]
    QueueFull {
        /// Channel whose queue overflowed
        chan: usize,
        /// Items already queued at that priority
        len: usize,
    },

    /// Address or packet problem
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    /// Bad alias or wide pattern
    #[error("invalid pattern \"{pattern}\": {message}")]
    Pattern {
        /// Pattern text as configured
        pattern: String,
        /// Compiler diagnostic
        message: String,
    },

    /// Bad filter expression
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),
}

/// Errors detected while evaluating a packet filter expression
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// Token where an operand was expected
    #[error("expected filter specification, ( or ! at \"{0}\"")]
    ExpectedOperand(String),

    /// Unbalanced parenthesis
    #[error("expected \")\" at \"{0}\"")]
    ExpectedCloseParen(String),

    /// Something other than `&`, `|` or end of line after an operand
    #[error("expected logical operator or end of line at \"{0}\"")]
    ExpectedOperator(String),

    /// Specification letter not known
    #[error("unrecognized filter type '{0}'")]
    UnknownType(char),

    /// Specification not allowed for connected mode frames
    #[error("only b, d, v and u specifications are allowed for connected mode: \"{0}\"")]
    NotAllowedForConnected(String),

    /// `*` somewhere other than the end of a pattern
    #[error("any wildcard * must be at the end of pattern \"{0}\"")]
    MisplacedWildcard(String),

    /// Unknown letter in a `t/` specification
    #[error("invalid letter '{0}' in t/ filter")]
    InvalidTypeLetter(char),
}
