//! Cryptographic utilities for the ledger
//!
//! This module provides:
//! - SHA-256 hashing and the proof-of-work bit test
//! - ECDSA key management (secp256k1)

pub mod hash;
pub mod keys;

pub use hash::{
    hex_meets_difficulty, is_hex, leading_zero_bits, meets_difficulty, sha256, sha256_hex,
};
pub use keys::{
    address_to_public_key, public_key_to_address, sign_digest, verify_digest, KeyError, KeyPair,
    ADDRESS_HEX_LEN, ADDRESS_PREFIX,
};
