//! Key format and key prefixes.
//!
//! A position key is a fixed number of bytes, most significant bit first.
//! The configured format is a budget: the default 20 bytes (160 bits)
//! render as 27 base64url characters. A compiled space may use fewer.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const DEFAULT_KEY_BYTES: usize = 20;
pub const MAX_KEY_BYTES: usize = 64;

/// Width of encoded position keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyFormat {
    bytes: usize,
}

impl KeyFormat {
    pub fn new(bytes: usize) -> Result<Self> {
        if bytes == 0 || bytes > MAX_KEY_BYTES {
            return Err(Error::Config(format!(
                "key width must be 1..={MAX_KEY_BYTES} bytes, got {bytes}"
            )));
        }
        Ok(Self { bytes })
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn bits(&self) -> u32 {
        (self.bytes * 8) as u32
    }

    /// Rendered length in base64url characters (no padding).
    pub fn chars(&self) -> usize {
        (self.bytes * 8).div_ceil(6)
    }
}

impl Default for KeyFormat {
    fn default() -> Self {
        Self { bytes: DEFAULT_KEY_BYTES }
    }
}

pub(crate) fn get_bit(buf: &[u8], pos: u32) -> bool {
    (buf[(pos / 8) as usize] >> (7 - pos % 8)) & 1 == 1
}

pub(crate) fn set_bit(buf: &mut [u8], pos: u32) {
    buf[(pos / 8) as usize] |= 1 << (7 - pos % 8);
}

/// The leading `bits` bits of a key. Trailing bits are always zero, so two
/// prefixes over the same bits compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyPrefix {
    bytes: Vec<u8>,
    bits: u32,
}

impl KeyPrefix {
    /// The empty prefix: the whole key space.
    pub fn root() -> Self {
        Self { bytes: Vec::new(), bits: 0 }
    }

    /// Truncate a key to its first `bits` bits.
    pub fn of(key: &[u8], bits: u32) -> Self {
        let bits = bits.min((key.len() * 8) as u32);
        let len = (bits as usize).div_ceil(8);
        let mut bytes = key[..len].to_vec();
        let tail = bits % 8;
        if tail != 0 {
            if let Some(last) = bytes.last_mut() {
                *last &= 0xFFu8 << (8 - tail);
            }
        }
        Self { bytes, bits }
    }

    /// Parse a `0`/`1` string. `*` or the empty string is the root.
    pub fn parse(s: &str) -> Result<Self> {
        if s == "*" {
            return Ok(Self::root());
        }
        let mut prefix = Self::root();
        for c in s.chars() {
            match c {
                '0' => prefix = prefix.child(false),
                '1' => prefix = prefix.child(true),
                _ => return Err(Error::InvalidKey(format!("bad prefix digit '{c}' in '{s}'"))),
            }
        }
        Ok(prefix)
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn bit(&self, pos: u32) -> bool {
        pos < self.bits && get_bit(&self.bytes, pos)
    }

    pub fn is_root(&self) -> bool {
        self.bits == 0
    }

    /// Extend by one bit.
    pub fn child(&self, bit: bool) -> Self {
        let mut bytes = self.bytes.clone();
        if self.bits % 8 == 0 {
            bytes.push(0);
        }
        if bit {
            set_bit(&mut bytes, self.bits);
        }
        Self { bytes, bits: self.bits + 1 }
    }

    /// True if `key` starts with this prefix.
    pub fn covers(&self, key: &[u8]) -> bool {
        self.bits as usize <= key.len() * 8 && self.shared_bits(key) == self.bits
    }

    /// Leading bits this prefix shares with `key`, at most `self.bits()`.
    pub fn shared_bits(&self, key: &[u8]) -> u32 {
        let limit = self.bits.min((key.len() * 8) as u32);
        (0..limit)
            .take_while(|&i| get_bit(&self.bytes, i) == get_bit(key, i))
            .count() as u32
    }

    /// True if one prefix extends the other.
    pub fn overlaps(&self, other: &KeyPrefix) -> bool {
        let n = self.bits.min(other.bits);
        (0..n).all(|i| get_bit(&self.bytes, i) == get_bit(&other.bytes, i))
    }
}

impl std::fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.bits == 0 {
            return f.write_str("*");
        }
        for i in 0..self.bits {
            f.write_str(if get_bit(&self.bytes, i) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_format_is_27_chars() {
        let f = KeyFormat::default();
        assert_eq!(f.bits(), 160);
        assert_eq!(f.chars(), 27);
        assert!(KeyFormat::new(0).is_err());
        assert!(KeyFormat::new(65).is_err());
    }

    #[test]
    fn prefix_of_masks_trailing_bits() {
        let a = KeyPrefix::of(&[0b1011_0111, 0xFF], 3);
        let b = KeyPrefix::of(&[0b1010_0000, 0x00], 3);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "101");
    }

    #[test]
    fn parse_and_display_round_trip() {
        let p = KeyPrefix::parse("0110100101").unwrap();
        assert_eq!(p.bits(), 10);
        assert_eq!(p.to_string(), "0110100101");
        assert_eq!(KeyPrefix::parse("*").unwrap(), KeyPrefix::root());
        assert!(KeyPrefix::parse("012").is_err());
    }

    #[test]
    fn covers_and_overlaps() {
        let key = [0b1100_0000u8, 0];
        let p = KeyPrefix::parse("11").unwrap();
        assert!(p.covers(&key));
        assert!(!KeyPrefix::parse("10").unwrap().covers(&key));
        assert!(KeyPrefix::root().covers(&key));

        let long = KeyPrefix::parse("1101").unwrap();
        assert!(p.overlaps(&long));
        assert!(long.overlaps(&p));
        assert!(!KeyPrefix::parse("0").unwrap().overlaps(&long));
    }

    #[test]
    fn shared_bits_stops_at_first_difference() {
        let p = KeyPrefix::parse("10110").unwrap();
        assert_eq!(p.shared_bits(&[0b1010_0000]), 3);
        assert_eq!(p.shared_bits(&[0b1011_0000]), 5);
    }
}
