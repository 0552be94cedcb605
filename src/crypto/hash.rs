//! Cryptographic hashing utilities for the ledger
//!
//! Provides the SHA-256 digest used for block hashes and transaction ids,
//! and the leading-zero-bit test that defines proof of work.

use sha2::{Digest, Sha256};

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Computes SHA-256 hash and returns it as a lowercase hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Counts the leading zero bits of a digest, most significant byte first
pub fn leading_zero_bits(hash: &[u8]) -> u32 {
    let mut total = 0u32;
    for byte in hash {
        if *byte == 0 {
            total += 8;
        } else {
            total += byte.leading_zeros();
            break;
        }
    }
    total
}

/// Checks if a hash meets the difficulty target.
///
/// Difficulty is the number of leading zero bits of the full digest,
/// so a 256-bit digest can never satisfy a difficulty above 256.
pub fn meets_difficulty(hash: &[u8], difficulty: u32) -> bool {
    leading_zero_bits(hash) >= difficulty
}

/// Same check as [`meets_difficulty`] on a hex-encoded digest.
/// Malformed hex never meets any non-zero difficulty.
pub fn hex_meets_difficulty(hash_hex: &str, difficulty: u32) -> bool {
    match hex::decode(hash_hex) {
        Ok(bytes) => meets_difficulty(&bytes, difficulty),
        Err(_) => difficulty == 0,
    }
}

/// True if `value` is non-empty and made only of hex digits
pub fn is_hex(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256() {
        let data = b"hello world";
        let hash = sha256(data);
        assert_eq!(hash.len(), 32);
        assert_eq!(
            sha256_hex(data),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_leading_zero_bits() {
        let mut h = [0u8; 32];
        assert_eq!(leading_zero_bits(&h), 256);
        h[0] = 0x0F; // 00001111
        assert_eq!(leading_zero_bits(&h), 4);
        h = [0u8; 32];
        h[1] = 0x80;
        assert_eq!(leading_zero_bits(&h), 8);
        h[1] = 0x40;
        assert_eq!(leading_zero_bits(&h), 9);
    }

    #[test]
    fn test_meets_difficulty() {
        let hash = vec![0x00, 0x00, 0x0F, 0xFF, 0xFF, 0xFF];
        assert!(meets_difficulty(&hash, 16));
        assert!(meets_difficulty(&hash, 20));
        assert!(!meets_difficulty(&hash, 21));
        assert!(!meets_difficulty(&hash, 24));
    }

    #[test]
    fn test_difficulty_is_not_nibble_based() {
        // 0x10 has three leading zero bits, not a whole zero nibble
        let hash = [0x10u8; 32];
        assert!(meets_difficulty(&hash, 3));
        assert!(!meets_difficulty(&hash, 4));
    }

    #[test]
    fn test_difficulty_beyond_digest_width() {
        assert!(meets_difficulty(&[0u8; 32], 256));
        assert!(!meets_difficulty(&[0u8; 32], 257));
    }

    #[test]
    fn test_hex_helpers() {
        assert!(hex_meets_difficulty("0fff", 4));
        assert!(!hex_meets_difficulty("zz", 1));
        assert!(hex_meets_difficulty("zz", 0));
        assert!(is_hex("04aBcd"));
        assert!(!is_hex("04xy"));
        assert!(!is_hex(""));
    }
}
