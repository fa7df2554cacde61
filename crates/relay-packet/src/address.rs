//! AX.25 station addresses
//!
//! An address is a callsign with a 4-bit SSID and, for repeater slots, the
//! "has been repeated" bit. In monitor (TNC2) text the SSID follows a dash
//! and is omitted when zero; a trailing `*` marks the H bit.

use std::fmt;

use crate::error::PacketError;

/// Longest callsign accepted over the radio
pub const MAX_CALL_LEN_STRICT: usize = 6;

/// Longest callsign accepted from APRS-IS servers
pub const MAX_CALL_LEN_LOOSE: usize = 9;

/// Highest SSID value
pub const MAX_SSID: u8 = 15;

/// Address parsing rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Radio rules: up to 6 upper case alphanumerics, numeric SSID
    Strict,
    /// Internet server rules: up to 9 characters, SSID may contain letters
    Loose,
}

impl ParseMode {
    /// Pick a mode from a strictness flag
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            ParseMode::Strict
        } else {
            ParseMode::Loose
        }
    }

    fn max_call_len(self) -> usize {
        match self {
            ParseMode::Strict => MAX_CALL_LEN_STRICT,
            ParseMode::Loose => MAX_CALL_LEN_LOOSE,
        }
    }
}

/// A station address with SSID and H bit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Address {
    call: String,
    ssid: u8,
    heard: bool,
}

impl Address {
    /// Create an address. The SSID is masked to four bits.
    pub fn new(call: impl Into<String>, ssid: u8) -> Self {
        Self {
            call: call.into(),
            ssid: ssid & 0x0f,
            heard: false,
        }
    }

    /// Parse `CALL[-SSID][*]` using the given rules
    pub fn parse(text: &str, mode: ParseMode) -> Result<Self, PacketError> {
        if text.is_empty() {
            return Err(PacketError::EmptyAddress);
        }

        let max = mode.max_call_len();
        let bytes = text.as_bytes();
        let mut i = 0;

        while i < bytes.len() && bytes[i] != b'-' && bytes[i] != b'*' {
            if i >= max {
                return Err(PacketError::AddressTooLong {
                    addr: text.to_string(),
                    max,
                });
            }
            let c = bytes[i];
            if !c.is_ascii_alphanumeric() {
                return Err(PacketError::InvalidCharacter {
                    addr: text.to_string(),
                    pos: i + 1,
                });
            }
            if mode == ParseMode::Strict && c.is_ascii_lowercase() {
                return Err(PacketError::LowerCase(text.to_string()));
            }
            i += 1;
        }
        let call = &text[..i];

        let mut ssid = 0u8;
        if i < bytes.len() && bytes[i] == b'-' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
                if i - start >= 2 {
                    return Err(PacketError::SsidTooLong(text.to_string()));
                }
                if mode == ParseMode::Strict && !bytes[i].is_ascii_digit() {
                    return Err(PacketError::SsidNotNumeric(text.to_string()));
                }
                i += 1;
            }
            ssid = leading_number(&text[start..i]);
            if ssid > MAX_SSID {
                return Err(PacketError::SsidOutOfRange(text.to_string()));
            }
        }

        let mut heard = false;
        if i < bytes.len() && bytes[i] == b'*' {
            heard = true;
            i += 1;
        }

        if let Some(ch) = text[i..].chars().next() {
            return Err(PacketError::TrailingCharacter {
                addr: text.to_string(),
                ch,
            });
        }

        Ok(Self {
            call: call.to_string(),
            ssid,
            heard,
        })
    }

    /// Callsign without SSID
    pub fn call(&self) -> &str {
        &self.call
    }

    /// Secondary station identifier
    pub fn ssid(&self) -> u8 {
        self.ssid
    }

    /// Replace the SSID (masked to four bits)
    pub fn set_ssid(&mut self, ssid: u8) {
        self.ssid = ssid & 0x0f;
    }

    /// "Has been repeated" bit
    pub fn is_heard(&self) -> bool {
        self.heard
    }

    /// Set or clear the "has been repeated" bit
    pub fn set_heard(&mut self, heard: bool) {
        self.heard = heard;
    }

    /// Same call and SSID, ignoring the H bit
    pub fn same_station(&self, other: &Address) -> bool {
        self.ssid == other.ssid && self.call == other.call
    }

    /// `CALL-SSID` form used for matching, SSID omitted when zero
    pub fn with_ssid(&self) -> String {
        self.to_string()
    }
}

/// `atoi` style: leading digits only, letters yield zero
fn leading_number(s: &str) -> u8 {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ssid == 0 {
            write!(f, "{}", self.call)
        } else {
            write!(f, "{}-{}", self.call, self.ssid)
        }
    }
}
