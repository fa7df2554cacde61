//! AX.25 Packet Library
//!
//! This crate provides the packet model shared by the relay node:
//!
//! - **Addresses**: callsign, SSID and the "has been repeated" bit
//! - **Packets**: source, destination, up to eight repeaters and an
//!   information part that may hold arbitrary bytes
//! - **Monitor text**: the `SRC>DEST,VIA*:info` form used by APRS-IS and
//!   most TNC software, with `<0xNN>` escapes for awkward bytes
//! - **Checksums**: the CRC used for duplicate suppression
//!
//! # Architecture
//!
//! Packets are plain values. Anything that rewrites a path works on a clone
//! and leaves the received frame untouched, so the same frame can be offered
//! to several destination channels.
//!
//! Two parsing modes exist. Strict mode enforces what may go over the radio.
//! Loose mode accepts what APRS-IS servers send: longer calls, lower case,
//! alphanumeric SSIDs and `qA` constructs.
//!
//! # Example
//!
//! ```rust
//! use relay_packet::{Address, Packet};
//!
//! let rx = Packet::from_text("W1ABC>APRS,WIDE2-2:>hello", true).unwrap();
//! let mut tx = rx.clone();
//! tx.set_repeater_ssid(0, 1).unwrap();
//! tx.insert_repeater(0, Address::new("WB2OSZ", 9)).unwrap();
//! tx.set_used(0).unwrap();
//!
//! assert_eq!(tx.to_text(), "W1ABC>APRS,WB2OSZ-9*,WIDE2-1:>hello");
//! assert_eq!(rx.to_text(), "W1ABC>APRS,WIDE2-2:>hello");
//! ```

pub mod address;
pub mod crc;
pub mod error;
pub mod packet;

pub use address::{Address, ParseMode, MAX_SSID};
pub use crc::{crc16, dedupe_crc};
pub use error::PacketError;
pub use packet::{
    escape_nul, Packet, MAX_ADDRS, MAX_INFO_LEN, MAX_REPEATERS, PID_NO_LAYER_3, THIRD_PARTY_DTI,
    UI_FRAME,
};
