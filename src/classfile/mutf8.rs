//! Java strings and the modified UTF-8 encoding used by `CONSTANT_Utf8`.
//!
//! A Java `String` is a sequence of UTF-16 code units, and nothing forces those units to form
//! valid UTF-16: unpaired surrogates are legal string constants. Class files store them in
//! *modified* UTF-8, which differs from standard UTF-8 in two ways:
//!
//! - `U+0000` is encoded as the two bytes `C0 80`, so no encoded string contains a zero byte
//! - characters outside the BMP are stored as two separately encoded surrogates (3 bytes each)
//!
//! [`JavaString`] keeps the code units verbatim, so decoding and re-encoding any constant is
//! lossless. Conversion to a Rust [`String`] is only lossy for unpaired surrogates.

use std::fmt;

use crate::Result;

/// A string as the JVM sees it: a sequence of UTF-16 code units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JavaString(Vec<u16>);

impl JavaString {
    /// Create a string from raw UTF-16 code units.
    #[must_use]
    pub fn from_units(units: Vec<u16>) -> JavaString {
        JavaString(units)
    }

    /// Decode the bytes of a `CONSTANT_Utf8` entry.
    ///
    /// A raw zero byte is accepted and decoded as `U+0000`, even though compilers never emit it.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for truncated multi-byte sequences, invalid
    /// continuation bytes, or 4-byte UTF-8 forms, none of which modified UTF-8 allows.
    pub fn from_mutf8(bytes: &[u8]) -> Result<JavaString> {
        let mut units = Vec::with_capacity(bytes.len());
        let mut pos = 0;

        while pos < bytes.len() {
            let first = bytes[pos];
            if first & 0x80 == 0 {
                units.push(u16::from(first));
                pos += 1;
            } else if first & 0xE0 == 0xC0 {
                let second = continuation(bytes, pos + 1)?;
                units.push((u16::from(first & 0x1F) << 6) | second);
                pos += 2;
            } else if first & 0xF0 == 0xE0 {
                let second = continuation(bytes, pos + 1)?;
                let third = continuation(bytes, pos + 2)?;
                units.push((u16::from(first & 0x0F) << 12) | (second << 6) | third);
                pos += 3;
            } else {
                return Err(malformed_error!(
                    "Invalid modified UTF-8 lead byte 0x{:02X} at {}",
                    first,
                    pos
                ));
            }
        }

        Ok(JavaString(units))
    }

    /// Encode into the bytes of a `CONSTANT_Utf8` entry.
    #[must_use]
    pub fn to_mutf8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.mutf8_len());
        for &unit in &self.0 {
            match unit {
                0x0001..=0x007F => out.push(unit as u8),
                0x0000 | 0x0080..=0x07FF => {
                    out.push(0xC0 | (unit >> 6) as u8);
                    out.push(0x80 | (unit & 0x3F) as u8);
                }
                _ => {
                    out.push(0xE0 | (unit >> 12) as u8);
                    out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                    out.push(0x80 | (unit & 0x3F) as u8);
                }
            }
        }
        out
    }

    /// Number of bytes [`JavaString::to_mutf8`] produces.
    #[must_use]
    pub fn mutf8_len(&self) -> usize {
        self.0
            .iter()
            .map(|&unit| match unit {
                0x0001..=0x007F => 1,
                0x0000 | 0x0080..=0x07FF => 2,
                _ => 3,
            })
            .sum()
    }

    /// The UTF-16 code units.
    #[must_use]
    pub fn units(&self) -> &[u16] {
        &self.0
    }

    /// Consume the string, returning its code units.
    #[must_use]
    pub fn into_units(self) -> Vec<u16> {
        self.0
    }

    /// Length in UTF-16 code units (what `String.length()` returns).
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` for the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert to a Rust string, replacing unpaired surrogates with `U+FFFD`.
    #[must_use]
    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.0)
    }
}

fn continuation(bytes: &[u8], pos: usize) -> Result<u16> {
    match bytes.get(pos) {
        Some(&byte) if byte & 0xC0 == 0x80 => Ok(u16::from(byte & 0x3F)),
        Some(&byte) => Err(malformed_error!(
            "Invalid modified UTF-8 continuation byte 0x{:02X} at {}",
            byte,
            pos
        )),
        None => Err(malformed_error!("Truncated modified UTF-8 sequence")),
    }
}

impl From<&str> for JavaString {
    fn from(value: &str) -> Self {
        JavaString(value.encode_utf16().collect())
    }
}

impl From<String> for JavaString {
    fn from(value: String) -> Self {
        JavaString::from(value.as_str())
    }
}

impl fmt::Display for JavaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_is_plain_bytes() {
        let value = JavaString::from("hello");
        assert_eq!(value.to_mutf8(), b"hello");
        assert_eq!(JavaString::from_mutf8(b"hello").unwrap(), value);
    }

    #[test]
    fn nul_uses_two_bytes() {
        let value = JavaString::from("a\0b");
        assert_eq!(value.to_mutf8(), [b'a', 0xC0, 0x80, b'b']);
        assert_eq!(value.mutf8_len(), 4);
        assert_eq!(JavaString::from_mutf8(&value.to_mutf8()).unwrap(), value);
    }

    #[test]
    fn supplementary_characters_are_split() {
        // U+1F600 is the surrogate pair D83D DE00, each encoded in 3 bytes
        let value = JavaString::from("\u{1F600}");
        assert_eq!(value.units(), &[0xD83D, 0xDE00]);
        assert_eq!(
            value.to_mutf8(),
            [0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]
        );
        assert_eq!(value.to_string_lossy(), "\u{1F600}");
    }

    #[test]
    fn unpaired_surrogate_survives() {
        let value = JavaString::from_units(vec![0x0041, 0xD800, 0x0042]);
        let decoded = JavaString::from_mutf8(&value.to_mutf8()).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(decoded.to_string_lossy(), "A\u{FFFD}B");
    }

    #[test]
    fn two_and_three_byte_forms() {
        let value = JavaString::from("é€");
        assert_eq!(value.to_mutf8(), [0xC3, 0xA9, 0xE2, 0x82, 0xAC]);
        assert_eq!(JavaString::from_mutf8(&[0xC3, 0xA9, 0xE2, 0x82, 0xAC]).unwrap(), value);
    }

    #[test]
    fn invalid_sequences_are_malformed() {
        assert!(JavaString::from_mutf8(&[0xC3]).is_err());
        assert!(JavaString::from_mutf8(&[0xE2, 0x82]).is_err());
        assert!(JavaString::from_mutf8(&[0xC3, 0x41]).is_err());
        assert!(JavaString::from_mutf8(&[0xF0, 0x9F, 0x98, 0x80]).is_err());
    }
}
