//! Error types for AX.25 address and packet parsing

use thiserror::Error;

/// Errors that can occur while parsing an address or monitor-format packet
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Address field is empty
    #[error("address is empty")]
    EmptyAddress,

    /// Callsign part is longer than allowed
    #[error("address \"{addr}\" has more than {max} characters")]
    AddressTooLong { addr: String, max: usize },

    /// Callsign contains something other than a letter or digit
    #[error("address \"{addr}\" contains character other than letter or digit at position {pos}")]
    InvalidCharacter { addr: String, pos: usize },

    /// Lower case letters are not allowed over the radio
    #[error("address \"{0}\" has lower case letters")]
    LowerCase(String),

    /// SSID has more than two characters
    #[error("SSID part of \"{0}\" has more than 2 characters")]
    SsidTooLong(String),

    /// Strict SSIDs must be numeric
    #[error("SSID of \"{0}\" must be digits")]
    SsidNotNumeric(String),

    /// SSID outside of 0..=15
    #[error("SSID of \"{0}\" not in range of 0 to 15")]
    SsidOutOfRange(String),

    /// Trailing garbage after the address
    #[error("invalid character {ch:?} found in address \"{addr}\"")]
    TrailingCharacter { addr: String, ch: char },

    /// No ':' separating addresses from the information part
    #[error("no address separator ':' in \"{0}\"")]
    MissingInfoSeparator(String),

    /// No '>' between source and destination
    #[error("no source/destination separator '>' in \"{0}\"")]
    MissingDestination(String),

    /// Repeater list would exceed eight entries
    #[error("too many repeater addresses (max {max})")]
    TooManyRepeaters { max: usize },

    /// Repeater index does not exist
    #[error("no repeater address at index {0}")]
    NoSuchRepeater(usize),

    /// Third party unwrap requested on a packet that is not one
    #[error("not a third party packet")]
    NotThirdParty,
}
