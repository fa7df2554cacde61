//! Duplicate detection checksum
//!
//! CRC-16/CCITT as used for the AX.25 frame check sequence (reflected
//! polynomial 0x8408), seeded with 0xFFFF and without the final inversion.

use crate::packet::Packet;

const POLY: u16 = 0x8408;

/// Feed `data` into a running CRC
pub fn crc16(data: &[u8], seed: u16) -> u16 {
    let mut crc = seed;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Checksum over source, destination and information part.
///
/// The via path is not included, so the same packet heard through different
/// digipeaters gets the same value. Trailing CR, LF and space are ignored
/// because some gateways append them.
pub fn dedupe_crc(packet: &Packet) -> u16 {
    let src = packet.source().with_ssid();
    let dest = packet.destination().with_ssid();

    let mut info = packet.info();
    while let [rest @ .., last] = info {
        if matches!(last, b'\r' | b'\n' | b' ') {
            info = rest;
        } else {
            break;
        }
    }

    let crc = crc16(src.as_bytes(), 0xffff);
    let crc = crc16(dest.as_bytes(), crc);
    crc16(info, crc)
}
