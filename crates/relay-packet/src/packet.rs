//! AX.25 frame model and monitor-format text codec
//!
//! A [`Packet`] owns its addresses and information part. Duplicating a
//! packet is `Clone`; every digipeater transformation works on a clone so
//! one received frame can fan out to many channels.
//!
//! # Monitor format
//!
//! ```text
//! SRC>DEST,VIA1,VIA2*,VIA3:information
//! ```
//!
//! The `*` follows the last repeater whose "has been repeated" bit is set.
//! Non-printable bytes in the information part may be written as `<0xNN>`.

use std::fmt;

use tracing::debug;

use crate::address::{Address, ParseMode};
use crate::error::PacketError;

/// Maximum number of repeater (digipeater) addresses
pub const MAX_REPEATERS: usize = 8;

/// Maximum number of addresses including source and destination
pub const MAX_ADDRS: usize = MAX_REPEATERS + 2;

/// Largest information part we keep
pub const MAX_INFO_LEN: usize = 2048;

/// Control field value for an unnumbered information frame
pub const UI_FRAME: u8 = 0x03;

/// Protocol id meaning "no layer 3", used by APRS
pub const PID_NO_LAYER_3: u8 = 0xf0;

/// Data type indicator of a third party packet
pub const THIRD_PARTY_DTI: u8 = b'}';

/// An AX.25 frame
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Packet {
    source: Address,
    destination: Address,
    repeaters: Vec<Address>,
    control: u8,
    pid: Option<u8>,
    info: Vec<u8>,
}

impl Packet {
    /// Build an APRS style UI frame
    pub fn new_ui(
        source: Address,
        destination: Address,
        repeaters: Vec<Address>,
        info: impl Into<Vec<u8>>,
    ) -> Result<Self, PacketError> {
        Self::new_frame(
            source,
            destination,
            repeaters,
            UI_FRAME,
            Some(PID_NO_LAYER_3),
            info,
        )
    }

    /// Build a frame with arbitrary control field and protocol id
    pub fn new_frame(
        source: Address,
        destination: Address,
        repeaters: Vec<Address>,
        control: u8,
        pid: Option<u8>,
        info: impl Into<Vec<u8>>,
    ) -> Result<Self, PacketError> {
        if repeaters.len() > MAX_REPEATERS {
            return Err(PacketError::TooManyRepeaters { max: MAX_REPEATERS });
        }
        Ok(Self {
            source,
            destination,
            repeaters,
            control,
            pid,
            info: info.into(),
        })
    }

    /// Parse monitor format text.
    ///
    /// `strict` applies radio address rules; servers on the Internet send
    /// addresses that only pass the relaxed rules. Vias beyond the eighth are
    /// ignored.
    pub fn from_text(text: impl AsRef<[u8]>, strict: bool) -> Result<Self, PacketError> {
        let text = text.as_ref();
        let mode = ParseMode::from_strict(strict);

        let Some(colon) = text.iter().position(|&b| b == b':') else {
            return Err(PacketError::MissingInfoSeparator(
                String::from_utf8_lossy(text).into_owned(),
            ));
        };
        let header = String::from_utf8_lossy(&text[..colon]);
        let body = &text[colon + 1..];

        let Some((src, rest)) = header.split_once('>') else {
            return Err(PacketError::MissingDestination(header.into_owned()));
        };
        let source = Address::parse(src, mode)?;

        let mut fields = rest.split(',');
        let dest = fields.next().unwrap_or_default();
        let destination = Address::parse(dest, mode)?;

        let mut repeaters: Vec<Address> = Vec::new();
        for field in fields.take(MAX_REPEATERS) {
            let field = if mode == ParseMode::Loose && field.starts_with("qA") {
                normalize_q_construct(field)
            } else {
                field.to_string()
            };

            let addr = Address::parse(&field, mode)?;
            if addr.is_heard() {
                for earlier in repeaters.iter_mut() {
                    earlier.set_heard(true);
                }
            }
            repeaters.push(addr);
        }

        Ok(Self {
            source,
            destination,
            repeaters,
            control: UI_FRAME,
            pid: Some(PID_NO_LAYER_3),
            info: unescape_info(body),
        })
    }

    /// Source address
    pub fn source(&self) -> &Address {
        &self.source
    }

    /// Destination address
    pub fn destination(&self) -> &Address {
        &self.destination
    }

    /// All repeater addresses in path order
    pub fn repeaters(&self) -> &[Address] {
        &self.repeaters
    }

    /// Repeater address at `index` (0 is the first via)
    pub fn repeater(&self, index: usize) -> Option<&Address> {
        self.repeaters.get(index)
    }

    /// Number of repeater addresses
    pub fn num_repeaters(&self) -> usize {
        self.repeaters.len()
    }

    /// Replace the repeater at `index`, keeping its position
    pub fn set_repeater(&mut self, index: usize, addr: Address) -> Result<(), PacketError> {
        let slot = self
            .repeaters
            .get_mut(index)
            .ok_or(PacketError::NoSuchRepeater(index))?;
        *slot = addr;
        Ok(())
    }

    /// Insert a repeater before `index`, shifting the rest toward the end
    pub fn insert_repeater(&mut self, index: usize, addr: Address) -> Result<(), PacketError> {
        if self.repeaters.len() >= MAX_REPEATERS {
            return Err(PacketError::TooManyRepeaters { max: MAX_REPEATERS });
        }
        if index > self.repeaters.len() {
            return Err(PacketError::NoSuchRepeater(index));
        }
        self.repeaters.insert(index, addr);
        Ok(())
    }

    /// Remove the repeater at `index`
    pub fn remove_repeater(&mut self, index: usize) -> Result<Address, PacketError> {
        if index >= self.repeaters.len() {
            return Err(PacketError::NoSuchRepeater(index));
        }
        Ok(self.repeaters.remove(index))
    }

    /// SSID of the repeater at `index`
    pub fn repeater_ssid(&self, index: usize) -> Option<u8> {
        self.repeaters.get(index).map(Address::ssid)
    }

    /// Change the SSID of the repeater at `index`
    pub fn set_repeater_ssid(&mut self, index: usize, ssid: u8) -> Result<(), PacketError> {
        self.repeaters
            .get_mut(index)
            .ok_or(PacketError::NoSuchRepeater(index))?
            .set_ssid(ssid);
        Ok(())
    }

    /// Whether the repeater at `index` has been used
    pub fn is_used(&self, index: usize) -> bool {
        self.repeaters.get(index).is_some_and(Address::is_heard)
    }

    /// Set the "has been repeated" bit of the repeater at `index`
    pub fn set_used(&mut self, index: usize) -> Result<(), PacketError> {
        self.repeaters
            .get_mut(index)
            .ok_or(PacketError::NoSuchRepeater(index))?
            .set_heard(true);
        Ok(())
    }

    /// Index of the first repeater not yet used
    pub fn first_not_repeated(&self) -> Option<usize> {
        self.repeaters.iter().position(|a| !a.is_heard())
    }

    /// Index of the last repeater marked used.
    ///
    /// `None` means the packet was heard directly from the source.
    pub fn heard(&self) -> Option<usize> {
        self.repeaters.iter().rposition(Address::is_heard)
    }

    /// Control field
    pub fn control(&self) -> u8 {
        self.control
    }

    /// Protocol id, absent for frames that carry none
    pub fn pid(&self) -> Option<u8> {
        self.pid
    }

    /// Information part
    pub fn info(&self) -> &[u8] {
        &self.info
    }

    /// Replace the information part
    pub fn set_info(&mut self, info: impl Into<Vec<u8>>) {
        self.info = info.into();
    }

    /// Data type indicator: first byte of the information part
    pub fn dti(&self) -> Option<u8> {
        self.info.first().copied()
    }

    /// UI frame with "no layer 3" protocol id
    pub fn is_aprs(&self) -> bool {
        self.control == UI_FRAME && self.pid == Some(PID_NO_LAYER_3)
    }

    /// Information part starts with the third party header character
    pub fn is_third_party(&self) -> bool {
        self.dti() == Some(THIRD_PARTY_DTI)
    }

    /// Truncate the information part at the first CR or LF.
    ///
    /// Returns the number of bytes removed.
    pub fn cut_at_crlf(&mut self) -> usize {
        match self.info.iter().position(|&b| b == b'\r' || b == b'\n') {
            Some(pos) => {
                let removed = self.info.len() - pos;
                self.info.truncate(pos);
                removed
            }
            None => 0,
        }
    }

    /// Parse the packet carried inside a third party header
    pub fn unwrap_third_party(&self) -> Result<Packet, PacketError> {
        if !self.is_third_party() {
            return Err(PacketError::NotThirdParty);
        }
        Packet::from_text(&self.info[1..], true)
    }

    /// Number of bytes the frame occupies on the air, without FCS
    pub fn frame_len(&self) -> usize {
        let addrs = 7 * (2 + self.repeaters.len());
        let pid = usize::from(self.pid.is_some());
        addrs + 1 + pid + self.info.len()
    }

    /// Monitor format address header including the trailing ':'
    pub fn format_addrs(&self) -> String {
        let mut out = format!("{}>{}", self.source, self.destination);
        let heard = self.heard();
        for (i, via) in self.repeaters.iter().enumerate() {
            out.push(',');
            out.push_str(&via.with_ssid());
            if heard == Some(i) {
                out.push('*');
            }
        }
        out.push(':');
        out
    }

    /// Via path only, e.g. `W1ABC,WIDE2*,WIDE1-1`
    pub fn format_via_path(&self) -> String {
        let addrs = self.format_addrs();
        let header = addrs.trim_end_matches(':');
        match header.split_once(',') {
            Some((_, path)) => path.to_string(),
            None => String::new(),
        }
    }

    /// Header and raw information bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.format_addrs().into_bytes();
        out.extend_from_slice(&self.info);
        out
    }

    /// Monitor format, lossy for non UTF-8 information bytes
    pub fn to_text(&self) -> String {
        format!(
            "{}{}",
            self.format_addrs(),
            String::from_utf8_lossy(&self.info)
        )
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_addrs())?;
        for &b in &self.info {
            if b == b' ' || b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "<0x{:02x}>", b)?;
            }
        }
        Ok(())
    }
}

/// APRS-IS servers send `qAR` and friends; uppercase them so they survive
/// address parsing.
fn normalize_q_construct(field: &str) -> String {
    let mut bytes = field.as_bytes().to_vec();
    bytes[0] = b'Q';
    if let Some(third) = bytes.get_mut(2) {
        third.make_ascii_uppercase();
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Decode `<0xNN>` escapes into raw bytes
fn unescape_info(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() && out.len() < MAX_INFO_LEN {
        if let Some(byte) = hex_escape(&body[i..]) {
            out.push(byte);
            i += 6;
        } else {
            out.push(body[i]);
            i += 1;
        }
    }
    if i < body.len() {
        debug!("information part truncated to {} bytes", MAX_INFO_LEN);
    }
    out
}

fn hex_escape(s: &[u8]) -> Option<u8> {
    match s {
        [b'<', b'0', b'x', hi, lo, b'>', ..] if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
            let hex = [*hi, *lo];
            let hex = std::str::from_utf8(&hex).ok()?;
            u8::from_str_radix(hex, 16).ok()
        }
        _ => None,
    }
}

/// Replace NUL bytes with `<0x00>` so the text survives line oriented
/// transports. [`Packet::from_text`] reverses this.
pub fn escape_nul(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        if b == 0 {
            out.extend_from_slice(b"<0x00>");
        } else {
            out.push(b);
        }
    }
    out
}
