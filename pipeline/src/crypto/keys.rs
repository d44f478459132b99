//! # Keys, Addresses & Signatures
//!
//! An [`Address`] is a 32-byte public key rendered in base58. Most addresses
//! are ed25519 points (wallets, members); program-derived addresses are
//! deliberately *off* the curve, which is what [`Address::is_on_curve`]
//! checks.
//!
//! [`Keypair`] wraps an ed25519 signing key and implements
//! [`TransactionSigner`], the only signing seam the pipeline depends on.
//! Hardware wallets or remote custody plug in by implementing that trait.
//!
//! Key bytes are never logged. `Debug` for [`Keypair`] prints the public half
//! only.

use std::fmt;
use std::str::FromStr;

use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::config::{ACCOUNT_KEY_LENGTH, SIGNATURE_LENGTH};

/// Errors that can occur while parsing keys, addresses or signatures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid base58 encoding")]
    InvalidBase58,

    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("invalid secret key bytes")]
    InvalidSecretKey,
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A 32-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; ACCOUNT_KEY_LENGTH]);

impl Address {
    pub const fn new(bytes: [u8; ACCOUNT_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parses a compile-time constant address.
    ///
    /// Only for literals that ship with the crate; panics on a malformed
    /// constant so a typo fails the first test that touches it.
    pub fn from_static(s: &'static str) -> Self {
        s.parse()
            .unwrap_or_else(|e| panic!("built-in address {s} is malformed: {e}"))
    }

    /// Parses an address from a byte slice.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; ACCOUNT_KEY_LENGTH] =
            slice.try_into().map_err(|_| KeyError::InvalidLength {
                expected: ACCOUNT_KEY_LENGTH,
                got: slice.len(),
            })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; ACCOUNT_KEY_LENGTH] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; ACCOUNT_KEY_LENGTH] {
        self.0
    }

    /// `true` if these bytes decompress to an ed25519 point.
    ///
    /// Wallet keys are on-curve. Program-derived addresses are required to
    /// be off-curve so nobody can hold a private key for them.
    pub fn is_on_curve(&self) -> bool {
        CompressedEdwardsY(self.0).decompress().is_some()
    }

    /// `true` for the all-zero address (system program / uninitialized).
    pub fn is_default(&self) -> bool {
        self.0 == [0u8; ACCOUNT_KEY_LENGTH]
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }
}

impl FromStr for Address {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|_| KeyError::InvalidBase58)?;
        Self::try_from_slice(&bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_base58())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// A 64-byte ed25519 signature. Its base58 form doubles as the transaction
/// id the backend reports status against.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; SIGNATURE_LENGTH]);

impl Signature {
    pub const fn new(bytes: [u8; SIGNATURE_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    /// Checks this signature over `message` against `signer`.
    pub fn verify(&self, signer: &Address, message: &[u8]) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(signer.as_bytes()) else {
            return false;
        };
        key.verify(message, &DalekSignature::from_bytes(&self.0))
            .is_ok()
    }
}

impl FromStr for Signature {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|_| KeyError::InvalidBase58)?;
        let arr: [u8; SIGNATURE_LENGTH] =
            bytes.as_slice().try_into().map_err(|_| KeyError::InvalidLength {
                expected: SIGNATURE_LENGTH,
                got: bytes.len(),
            })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_base58())
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

/// Anything that can sign a compiled transaction message.
///
/// The pipeline only ever needs the signer's address (it becomes the fee
/// payer and multisig member) and a detached signature.
pub trait TransactionSigner: Send + Sync {
    fn address(&self) -> Address;
    fn sign_message(&self, message: &[u8]) -> Signature;
}

/// An in-process ed25519 keypair.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generates a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair from a 32-byte seed. Test fixtures and key
    /// files; never a low-entropy seed in production.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Loads a keypair from a hex-encoded 32-byte secret.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    pub fn public_address(&self) -> Address {
        Address(self.signing_key.verifying_key().to_bytes())
    }
}

impl TransactionSigner for Keypair {
    fn address(&self) -> Address {
        self.public_address()
    }

    fn sign_message(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair(pub={})", self.public_address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_base58_roundtrip() {
        let kp = Keypair::from_seed(&[7u8; 32]);
        let addr = kp.address();
        let parsed: Address = addr.to_string().parse().unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn malformed_address_rejected() {
        assert_eq!("0OIl".parse::<Address>(), Err(KeyError::InvalidBase58));
        // Valid base58, wrong length.
        assert!(matches!(
            "abc".parse::<Address>(),
            Err(KeyError::InvalidLength { expected: 32, .. })
        ));
    }

    #[test]
    fn wallet_keys_are_on_curve() {
        for i in 0..8u8 {
            let kp = Keypair::from_seed(&[i; 32]);
            assert!(kp.address().is_on_curve());
        }
    }

    #[test]
    fn signature_verifies_only_for_signer_and_message() {
        let kp = Keypair::generate();
        let other = Keypair::generate();
        let sig = kp.sign_message(b"pay invoice 42");

        assert!(sig.verify(&kp.address(), b"pay invoice 42"));
        assert!(!sig.verify(&kp.address(), b"pay invoice 43"));
        assert!(!sig.verify(&other.address(), b"pay invoice 42"));
    }

    #[test]
    fn signature_string_roundtrip() {
        let kp = Keypair::generate();
        let sig = kp.sign_message(b"x");
        let parsed: Signature = sig.to_string().parse().unwrap();
        assert_eq!(parsed, sig);
    }

    #[test]
    fn keypair_debug_hides_secret() {
        let kp = Keypair::from_seed(&[9u8; 32]);
        let dbg = format!("{:?}", kp);
        assert!(dbg.contains(&kp.address().to_string()));
        assert!(!dbg.contains(&hex::encode([9u8; 32])));
    }

    #[test]
    fn address_serde_as_string() {
        let addr = Keypair::from_seed(&[3u8; 32]).address();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn from_hex_rejects_short_secret() {
        assert!(Keypair::from_hex("abcd").is_err());
        assert!(Keypair::from_hex(&hex::encode([1u8; 32])).is_ok());
    }
}
