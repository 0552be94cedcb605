//! ECDSA key management for the ledger
//!
//! Provides key pair generation, signing, and verification using
//! the secp256k1 elliptic curve. An address is the hex encoding of the
//! uncompressed public key (130 hex characters, `04` prefix).

use rand::rngs::OsRng;
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use thiserror::Error;

/// Length of an address in hex characters (65-byte uncompressed key)
pub const ADDRESS_HEX_LEN: usize = 130;

/// Prefix of every uncompressed public key encoding
pub const ADDRESS_PREFIX: &str = "04";

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature encoding")]
    InvalidSignature,
    #[error("Message must be a 32-byte digest")]
    InvalidMessage,
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from an existing secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPrivateKey)?;
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Get the private key as a hex string
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// The address owned by this key: hex of the uncompressed public key
    pub fn address(&self) -> String {
        public_key_to_address(&self.public_key)
    }

    /// Sign a 32-byte digest, returning the hex DER signature
    pub fn sign_hex(&self, digest: &[u8]) -> Result<String, KeyError> {
        sign_digest(&self.secret_key, digest)
    }
}

/// Convert a public key to a ledger address
pub fn public_key_to_address(public_key: &PublicKey) -> String {
    hex::encode(public_key.serialize_uncompressed())
}

/// Parse a ledger address back into a public key
pub fn address_to_public_key(address: &str) -> Result<PublicKey, KeyError> {
    let bytes = hex::decode(address).map_err(|_| KeyError::InvalidPublicKey)?;
    PublicKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPublicKey)
}

/// Sign a 32-byte digest with a secret key.
///
/// Signing is deterministic (RFC 6979 nonces); the result is the DER
/// encoding rendered as lowercase hex.
pub fn sign_digest(secret_key: &SecretKey, digest: &[u8]) -> Result<String, KeyError> {
    let secp = Secp256k1::signing_only();
    let message = Message::from_digest_slice(digest).map_err(|_| KeyError::InvalidMessage)?;
    let signature = secp.sign_ecdsa(&message, secret_key);
    Ok(hex::encode(signature.serialize_der().to_vec()))
}

/// Verify a hex DER signature over a 32-byte digest against an address
pub fn verify_digest(address: &str, digest: &[u8], signature_hex: &str) -> Result<bool, KeyError> {
    let secp = Secp256k1::verification_only();
    let public_key = address_to_public_key(address)?;
    let message = Message::from_digest_slice(digest).map_err(|_| KeyError::InvalidMessage)?;
    let sig_bytes = hex::decode(signature_hex).map_err(|_| KeyError::InvalidSignature)?;
    let signature = Signature::from_der(&sig_bytes).map_err(|_| KeyError::InvalidSignature)?;

    Ok(secp.verify_ecdsa(&message, &signature, &public_key).is_ok())
}
