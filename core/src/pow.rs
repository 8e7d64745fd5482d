//! Proof-of-Work and uint256 helpers.
//!
//! The consensus algorithm is a simplified *leading-zero* target: a hash is
//! valid if it begins with `difficulty` zero bits. `difficulty` doubles as
//! the "compact target" field referenced by the hashing/codec contract:
//! [`work_from_bits`] converts it into the arbitrary-precision work value
//! accumulated in [`crate::chain_meta::BlkMeta::cumulative_work`].
//!
//! All functions are pure and stateless so they can be used from any thread.

use num_bigint::BigUint;
use num_traits::One;

use crate::Hash;

/// Returns `true` if `hash` meets the difficulty target.
///
/// Difficulty is expressed as a **count of leading zero bits** (0-256).  For
/// example:
///
/// * `difficulty == 0` → always valid.
/// * `difficulty == 8` → hash must start with one `0x00` byte.
/// * `difficulty == 12` → first byte `0x00`, second byte's high 4 bits zero.
pub fn hash_meets_difficulty(hash: &Hash, difficulty: u32) -> bool {
    if difficulty == 0 {
        return true;
    }
    let zero_bytes = (difficulty / 8) as usize;
    let zero_bits = (difficulty % 8) as u8;

    // full bytes must be zero
    if hash.iter().take(zero_bytes).any(|&b| b != 0) {
        return false;
    }

    if zero_bits == 0 {
        return true;
    }
    if zero_bytes >= hash.len() {
        return false;
    }
    let next_byte = hash[zero_bytes];
    next_byte.leading_zeros() as u8 >= zero_bits
}

/// Converts a compact difficulty target into the work a block satisfying it
/// represents, for cumulative-work fork-choice bookkeeping. A block with a
/// harder (larger) target contributes exponentially more work, matching the
/// usual interpretation that proving `difficulty` leading zero bits costs
/// `2^difficulty` expected hash attempts.
///
/// This plays the role assigned to `uint256_from_compact(nBits)`.
pub fn work_from_bits(difficulty: u32) -> BigUint {
    BigUint::one() << difficulty
}

/// Alias kept for readers familiar with the Bitcoin-family name of this
/// conversion.
pub fn uint256_from_compact(n_bits: u32) -> BigUint {
    work_from_bits(n_bits)
}

/// Formats a 256-bit hash as the lowercase, `0x`-prefixed, no-leading-zero
/// hex string used throughout the persistent KV encodings (mirrors Python's
/// `hex(long)` applied to the big-endian integer interpretation of the
/// digest).
pub fn hex_uint256(hash: &Hash) -> String {
    match hash.iter().position(|&b| b != 0) {
        None => "0x0".to_string(),
        Some(pos) => {
            let mut s = hex::encode(&hash[pos..]);
            s = s.trim_start_matches('0').to_string();
            if s.is_empty() {
                s = "0".to_string();
            }
            format!("0x{}", s)
        },
    }
}

/// Parses the textual form produced by [`hex_uint256`] back into a 32-byte
/// big-endian hash, left-padding with zeros.
pub fn hash_from_hex(s: &str) -> crate::Result<Hash> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let padded = if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    };
    let bytes = hex::decode(&padded).map_err(|_| crate::Error::Other("invalid hex hash"))?;
    if bytes.len() > 32 {
        return Err(crate::Error::Other("hash hex too long"));
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

/// Serializes a 256-bit value as the little-endian byte string used for KV
/// store keys (`ser_uint256`).
pub fn ser_uint256(hash: &Hash) -> [u8; 32] {
    let mut out = *hash;
    out.reverse();
    out
}

/// Inverse of [`ser_uint256`].
pub fn deser_uint256(bytes: &[u8; 32]) -> Hash {
    let mut out = *bytes;
    out.reverse();
    out
}

/// Formats a [`BigUint`] the same way [`hex_uint256`] formats a raw hash:
/// lowercase, `0x`-prefixed, no leading zeros (`0x0` for zero).
pub fn hex_biguint(n: &BigUint) -> String {
    if n == &BigUint::from(0u32) {
        return "0x0".to_string();
    }
    format!("0x{}", n.to_str_radix(16))
}

/// Parses the textual form produced by [`hex_biguint`].
pub fn biguint_from_hex(s: &str) -> crate::Result<BigUint> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    BigUint::parse_bytes(s.as_bytes(), 16).ok_or(crate::Error::Other("invalid hex integer"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_difficulty_always_passes() {
        assert!(hash_meets_difficulty(&[0xAAu8; 32], 0));
    }

    #[test]
    fn difficulty_requires_leading_zero_bytes() {
        let mut hash = [0xFFu8; 32];
        assert!(!hash_meets_difficulty(&hash, 8));
        hash[0] = 0;
        assert!(hash_meets_difficulty(&hash, 8));
        assert!(!hash_meets_difficulty(&hash, 12));
        hash[1] = 0x0F;
        assert!(hash_meets_difficulty(&hash, 12));
    }

    #[test]
    fn work_doubles_per_bit() {
        assert_eq!(work_from_bits(1), BigUint::from(2u32));
        assert_eq!(work_from_bits(8), BigUint::from(256u32));
    }

    #[test]
    fn hex_uint256_round_trips() {
        let mut h = [0u8; 32];
        h[30] = 0x01;
        h[31] = 0xab;
        let s = hex_uint256(&h);
        assert_eq!(s, "0x1ab");
        assert_eq!(hash_from_hex(&s).unwrap(), h);
    }

    #[test]
    fn hex_uint256_zero() {
        assert_eq!(hex_uint256(&[0u8; 32]), "0x0");
        assert_eq!(hash_from_hex("0x0").unwrap(), [0u8; 32]);
    }

    #[test]
    fn ser_uint256_is_byte_reversal() {
        let mut h = [0u8; 32];
        h[0] = 1;
        h[31] = 2;
        let ser = ser_uint256(&h);
        assert_eq!(ser[0], 2);
        assert_eq!(ser[31], 1);
        assert_eq!(deser_uint256(&ser), h);
    }

    #[test]
    fn hex_biguint_round_trips() {
        let n = BigUint::from(4096u32);
        let s = hex_biguint(&n);
        assert_eq!(s, "0x1000");
        assert_eq!(biguint_from_hex(&s).unwrap(), n);
        assert_eq!(hex_biguint(&BigUint::from(0u32)), "0x0");
    }
}
