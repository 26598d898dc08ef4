//! Literal encoding.
//!
//! Every rewritten literal gets its own 64-bit key, derived from the build seed and a name that
//! is unique to the literal:
//!
//! ```text
//! key = first 8 bytes (big-endian) of SHA-1(seed || 0x00 || class || 0x00 || identifier)
//! ```
//!
//! The cipher text is the literal XORed with a keystream from a 64-bit linear congruential
//! generator seeded with the key. The generator advances once per UTF-16 code unit and
//! contributes bits 32..48 of its state:
//!
//! ```text
//! state     = state * 6364136223846793005 + 1442695040888963407   (wrapping)
//! cipher[i] = plain[i] ^ (state >>> 32) as u16
//! ```
//!
//! Decoding is the same operation. The runtime class emitted by [`crate::runtime`] performs it
//! in bytecode; [`decode`] is the Rust equivalent.
//!
//! # Examples
//!
//! ```rust
//! use strcloak::codec::{decode, encode, LiteralKey};
//! use strcloak::classfile::JavaString;
//!
//! let key = LiteralKey::derive(b"seed", "com/example/Greeting", "0");
//! let literal = JavaString::from("hi");
//! let encoded = encode(&literal, &key)?;
//! assert_ne!(encoded.cipher, literal);
//! assert_eq!(decode(&encoded.cipher, encoded.key), literal);
//! # Ok::<(), strcloak::Error>(())
//! ```

use sha1::{Digest, Sha1};

use crate::{classfile::mutf8::JavaString, Error, Result};

/// Multiplier of the keystream generator.
pub const LCG_MULTIPLIER: u64 = 6_364_136_223_846_793_005;

/// Increment of the keystream generator.
pub const LCG_INCREMENT: u64 = 1_442_695_040_888_963_407;

/// A derived literal key together with the input it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralKey {
    /// Human readable key-derivation input, `class#identifier`
    pub input: String,
    /// The derived key
    pub value: u64,
}

impl LiteralKey {
    /// Derive the key of one literal.
    #[must_use]
    pub fn derive(seed: &[u8], class: &str, identifier: &str) -> LiteralKey {
        let mut hasher = Sha1::new();
        hasher.update(seed);
        hasher.update([0]);
        hasher.update(class.as_bytes());
        hasher.update([0]);
        hasher.update(identifier.as_bytes());
        let digest = hasher.finalize();

        let mut prefix = [0_u8; 8];
        prefix.copy_from_slice(&digest[..8]);

        LiteralKey {
            input: format!("{class}#{identifier}"),
            value: u64::from_be_bytes(prefix),
        }
    }

    /// Use a fixed key value.
    #[must_use]
    pub fn from_value(value: u64) -> LiteralKey {
        LiteralKey {
            input: String::new(),
            value,
        }
    }
}

/// The encoded form of one literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedLiteral {
    /// Length of the plaintext in UTF-16 code units
    pub original_length: usize,
    /// The cipher text, stored in the class as a string constant
    pub cipher: JavaString,
    /// The key that decodes `cipher`, stored in the class as a long constant
    pub key: u64,
    /// Where the key came from, for diagnostics
    pub key_input: String,
}

fn apply_keystream(units: &[u16], key: u64) -> Vec<u16> {
    let mut state = key;
    units
        .iter()
        .map(|unit| {
            state = state
                .wrapping_mul(LCG_MULTIPLIER)
                .wrapping_add(LCG_INCREMENT);
            unit ^ (state >> 32) as u16
        })
        .collect()
}

/// Encode a literal.
///
/// If the cipher text would equal the plaintext, the key is incremented until it does not, so
/// a non-empty literal never appears in clear. The result is checked by decoding it again.
///
/// # Errors
/// Returns [`crate::Error::EncodingInvariant`] if the result does not decode to `plain`.
pub fn encode(plain: &JavaString, key: &LiteralKey) -> Result<EncodedLiteral> {
    let mut value = key.value;
    let mut cipher = apply_keystream(plain.units(), value);
    while !plain.is_empty() && cipher == plain.units() {
        value = value.wrapping_add(1);
        cipher = apply_keystream(plain.units(), value);
    }

    let cipher = JavaString::from_units(cipher);
    if decode(&cipher, value) != *plain {
        return Err(Error::EncodingInvariant {
            length: plain.len(),
        });
    }

    Ok(EncodedLiteral {
        original_length: plain.len(),
        cipher,
        key: value,
        key_input: key.input.clone(),
    })
}

/// Decode a cipher text.
#[must_use]
pub fn decode(cipher: &JavaString, key: u64) -> JavaString {
    JavaString::from_units(apply_keystream(cipher.units(), key))
}
