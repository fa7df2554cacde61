//! APRS message classification
//!
//! Messages addressed to a station get special treatment when gated to
//! radio: no duplicate suppression and a larger rate allowance. Telemetry
//! metadata and bulletins share the `:` format but are not messages.

/// Telemetry metadata sent in message format, checked at the text start
const TELEMETRY_METADATA: [&[u8]; 4] = [b":PARM.", b":UNIT.", b":EQNS.", b":BITS."];

/// Addressees that mark bulletins and announcements
const BULLETIN_PREFIXES: [&[u8]; 5] = [b"BLN", b"NWS", b"SKY", b"CWA", b"BOM"];

/// Is this information part an APRS message to a specific station?
///
/// The format is `:` followed by a nine character addressee, another
/// `:`, and the text.
pub fn is_message_message(info: &[u8]) -> bool {
    if info.first() != Some(&b':') || info.len() < 11 {
        return false;
    }

    if info.len() >= 16 && TELEMETRY_METADATA.contains(&&info[10..16]) {
        return false;
    }

    !BULLETIN_PREFIXES.contains(&&info[1..4])
}

/// Source station of a gated packet, for message sender tracking.
///
/// This is the raw text before `>`, preserving case and any nonstandard
/// SSID the server sent.
pub fn source_of(line: &[u8]) -> Option<&[u8]> {
    let end = line.iter().position(|&b| b == b'>')?;
    (end > 0).then(|| &line[..end])
}

/// Position report types that count against a message sender allowance
pub fn is_position(info: &[u8]) -> bool {
    matches!(info.first(), Some(b'!' | b'=' | b'/' | b'@' | b'\'' | b'`'))
}
