//! Badge identity
//!
//! Each station has a short printable badge ID derived from its address:
//! seven base-36 digits of `0xA5` followed by the low three address octets,
//! least significant digit first, then one checksum character.

use crate::protocol::MacAddress;

const BADGE_CHARS: &[u8; 36] = b"0123456789AbCdEfGhIjKlMnOpQrStUvWxYz";

/// Length of a badge ID including the checksum
pub const BADGE_LEN: usize = 8;

fn chip_id(address: &MacAddress) -> u32 {
    let [_, _, _, a, b, c] = address.octets();
    0xA500_0000 | u32::from(a) << 16 | u32::from(b) << 8 | u32::from(c)
}

/// Badge ID for a station address
pub fn badge_id(address: &MacAddress) -> String {
    let base = BADGE_CHARS.len() as u32;
    let mut id = chip_id(address);
    let mut checksum = 0u32;
    let mut badge = String::with_capacity(BADGE_LEN);

    loop {
        let digit = id % base;
        badge.push(BADGE_CHARS[digit as usize] as char);
        checksum += digit;
        id /= base;
        if id == 0 {
            break;
        }
    }
    badge.push(BADGE_CHARS[(checksum % base) as usize] as char);
    badge
}

fn digit_value(c: u8) -> Option<u32> {
    BADGE_CHARS.iter().position(|&b| b == c).map(|p| p as u32)
}

/// Check the length, alphabet and checksum of a badge ID
pub fn is_valid_badge_id(code: &str) -> bool {
    let bytes = code.as_bytes();
    if bytes.len() != BADGE_LEN {
        return false;
    }

    let mut sum = 0u32;
    for &c in &bytes[..BADGE_LEN - 1] {
        match digit_value(c) {
            Some(v) => sum += v,
            None => return false,
        }
    }
    digit_value(bytes[BADGE_LEN - 1]) == Some(sum % BADGE_CHARS.len() as u32)
}
