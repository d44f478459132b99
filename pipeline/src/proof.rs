//! # Proof Envelopes
//!
//! Every payment batch carries a tamper-evident, encrypted record of what
//! was paid and why. [`ProofCodec::encode`] produces:
//!
//! - a [`ProofEnvelope`] that is safe to persist and share: AES-256-GCM
//!   ciphertext, the hex SHA-256 of the plaintext, and a version tag;
//! - a [`ProofKey`], freshly generated per envelope, that only the caller
//!   keeps.
//!
//! The on-chain annotation only carries a [`ProofReference`] (hash and
//! version). The ciphertext travels with the persisted record.
//!
//! ## Failure model
//!
//! [`ProofCodec::decode`] either returns the full payload or an error. A
//! wrong key, a flipped ciphertext bit and a hash that no longer matches the
//! plaintext are all reported as [`ProofError::IntegrityMismatch`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::{AES_KEY_LENGTH, PROOF_VERSION};
use crate::crypto::encryption::{self, EncryptionError};
use crate::crypto::hash::{constant_time_eq, sha256_hex};
use crate::invoice::{BusinessMetadata, Invoice};

/// Errors that can occur while sealing or opening a proof.
#[derive(Debug, Error)]
pub enum ProofError {
    #[error("proof payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("proof encryption failed: {0}")]
    Encryption(EncryptionError),

    #[error("proof integrity check failed")]
    IntegrityMismatch,

    #[error("unsupported proof version {0:?}")]
    UnsupportedVersion(String),

    #[error("invalid proof key: {0}")]
    InvalidKey(String),
}

/// What gets sealed: the business context plus the invoices it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofPayload {
    pub business: BusinessMetadata,
    pub invoices: Vec<Invoice>,
}

/// The persisted half of a sealed proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofEnvelope {
    /// `nonce || ciphertext || tag`, hex in JSON.
    #[serde(with = "hex_bytes")]
    pub encrypted_payload: Vec<u8>,
    /// Lower-case hex SHA-256 of the plaintext JSON.
    pub integrity_hash: String,
    pub version: String,
}

impl ProofEnvelope {
    pub fn reference(&self) -> ProofReference {
        ProofReference {
            integrity_hash: self.integrity_hash.clone(),
            version: self.version.clone(),
        }
    }
}

/// The part of an envelope that is written on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofReference {
    pub integrity_hash: String,
    pub version: String,
}

/// Symmetric key for one envelope.
///
/// Deliberately not `Serialize`, and `Debug` prints nothing of the key. The
/// only way out is [`ProofKey::to_hex`], for handing to the caller's custody.
#[derive(Clone, PartialEq, Eq)]
pub struct ProofKey([u8; AES_KEY_LENGTH]);

impl ProofKey {
    /// A fresh random key.
    pub fn generate() -> Self {
        Self(encryption::generate_key())
    }

    pub fn from_bytes(bytes: [u8; AES_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(input: &str) -> Result<Self, ProofError> {
        let bytes =
            hex::decode(input.trim()).map_err(|e| ProofError::InvalidKey(e.to_string()))?;
        let key: [u8; AES_KEY_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
            ProofError::InvalidKey(format!(
                "expected {AES_KEY_LENGTH} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn as_bytes(&self) -> &[u8; AES_KEY_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for ProofKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProofKey(<redacted>)")
    }
}

/// An envelope and the key that opens it.
#[derive(Debug, Clone)]
pub struct SealedProof {
    pub envelope: ProofEnvelope,
    pub key: ProofKey,
}

/// Seals and opens proof envelopes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProofCodec;

impl ProofCodec {
    pub fn new() -> Self {
        Self
    }

    /// Seals `business` and `invoices` under a fresh key.
    pub fn encode(
        &self,
        business: &BusinessMetadata,
        invoices: &[Invoice],
    ) -> Result<SealedProof, ProofError> {
        let payload = ProofPayload {
            business: business.clone(),
            invoices: invoices.to_vec(),
        };
        self.seal(&payload)
    }

    /// Seals an already-built payload.
    pub fn seal(&self, payload: &ProofPayload) -> Result<SealedProof, ProofError> {
        let plaintext = serde_json::to_vec(payload)?;
        let integrity_hash = sha256_hex(&plaintext);
        let key = ProofKey::generate();

        let encrypted_payload =
            encryption::encrypt(key.as_bytes(), &plaintext, PROOF_VERSION.as_bytes())
                .map_err(ProofError::Encryption)?;

        debug!(
            invoices = payload.invoices.len(),
            plaintext_bytes = plaintext.len(),
            hash = %integrity_hash,
            "sealed proof envelope"
        );

        Ok(SealedProof {
            envelope: ProofEnvelope {
                encrypted_payload,
                integrity_hash,
                version: PROOF_VERSION.to_string(),
            },
            key,
        })
    }

    /// Opens `envelope` with `key`, verifying the integrity hash.
    pub fn decode(&self, envelope: &ProofEnvelope, key: &ProofKey) -> Result<ProofPayload, ProofError> {
        if envelope.version != PROOF_VERSION {
            return Err(ProofError::UnsupportedVersion(envelope.version.clone()));
        }

        let plaintext = encryption::decrypt(
            key.as_bytes(),
            &envelope.encrypted_payload,
            envelope.version.as_bytes(),
        )
        .map_err(|_| ProofError::IntegrityMismatch)?;

        let actual = sha256_hex(&plaintext);
        if !constant_time_eq(actual.as_bytes(), envelope.integrity_hash.as_bytes()) {
            return Err(ProofError::IntegrityMismatch);
        }

        Ok(serde_json::from_slice(&plaintext)?)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::Address;
    use crate::invoice::PaymentMethod;

    fn business() -> BusinessMetadata {
        BusinessMetadata {
            vendor_id: "VENDOR-17".into(),
            payment_method: PaymentMethod::Ach,
            timestamp: 1_717_000_000_000,
            originating_account_id: "ACCT-88".into(),
        }
    }

    fn invoices() -> Vec<Invoice> {
        vec![
            Invoice::new("INV-001", "150.00", Address::new([1u8; 32])),
            Invoice::new("INV-002", "20.5", Address::new([2u8; 32])),
        ]
    }

    #[test]
    fn roundtrip_returns_original_payload() {
        let codec = ProofCodec::new();
        let sealed = codec.encode(&business(), &invoices()).unwrap();
        let payload = codec.decode(&sealed.envelope, &sealed.key).unwrap();
        assert_eq!(payload.business, business());
        assert_eq!(payload.invoices, invoices());
        assert_eq!(sealed.envelope.version, "1.0");
    }

    #[test]
    fn integrity_hash_is_hash_of_canonical_json() {
        let codec = ProofCodec::new();
        let sealed = codec.encode(&business(), &invoices()).unwrap();
        let expected = sha256_hex(
            &serde_json::to_vec(&ProofPayload {
                business: business(),
                invoices: invoices(),
            })
            .unwrap(),
        );
        assert_eq!(sealed.envelope.integrity_hash, expected);
    }

    #[test]
    fn keys_are_fresh_per_envelope() {
        let codec = ProofCodec::new();
        let a = codec.encode(&business(), &invoices()).unwrap();
        let b = codec.encode(&business(), &invoices()).unwrap();
        assert_ne!(a.key, b.key);
        assert_ne!(a.envelope.encrypted_payload, b.envelope.encrypted_payload);
        assert_eq!(a.envelope.integrity_hash, b.envelope.integrity_hash);
    }

    #[test]
    fn wrong_key_is_integrity_mismatch() {
        let codec = ProofCodec::new();
        let sealed = codec.encode(&business(), &invoices()).unwrap();
        let result = codec.decode(&sealed.envelope, &ProofKey::generate());
        assert!(matches!(result, Err(ProofError::IntegrityMismatch)));
    }

    #[test]
    fn tampered_ciphertext_is_integrity_mismatch() {
        let codec = ProofCodec::new();
        let mut sealed = codec.encode(&business(), &invoices()).unwrap();
        let last = sealed.envelope.encrypted_payload.len() - 1;
        sealed.envelope.encrypted_payload[last] ^= 0x80;
        assert!(matches!(
            codec.decode(&sealed.envelope, &sealed.key),
            Err(ProofError::IntegrityMismatch)
        ));
    }

    #[test]
    fn tampered_hash_is_integrity_mismatch() {
        let codec = ProofCodec::new();
        let mut sealed = codec.encode(&business(), &invoices()).unwrap();
        sealed.envelope.integrity_hash = sha256_hex(b"something else");
        assert!(matches!(
            codec.decode(&sealed.envelope, &sealed.key),
            Err(ProofError::IntegrityMismatch)
        ));
    }

    #[test]
    fn unknown_version_rejected() {
        let codec = ProofCodec::new();
        let mut sealed = codec.encode(&business(), &invoices()).unwrap();
        sealed.envelope.version = "2.0".into();
        assert!(matches!(
            codec.decode(&sealed.envelope, &sealed.key),
            Err(ProofError::UnsupportedVersion(v)) if v == "2.0"
        ));
    }

    #[test]
    fn key_debug_is_redacted_and_hex_roundtrips() {
        let key = ProofKey::from_bytes([0xAB; 32]);
        let dbg = format!("{key:?}");
        assert!(!dbg.to_lowercase().contains("abab"));

        let restored = ProofKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(restored, key);
        assert!(matches!(ProofKey::from_hex("abcd"), Err(ProofError::InvalidKey(_))));
    }

    #[test]
    fn envelope_json_roundtrip_still_decodes() {
        let codec = ProofCodec::new();
        let sealed = codec.encode(&business(), &invoices()).unwrap();
        let json = serde_json::to_string(&sealed.envelope).unwrap();
        assert!(json.contains("integrityHash"));
        let restored: ProofEnvelope = serde_json::from_str(&json).unwrap();
        assert!(codec.decode(&restored, &sealed.key).is_ok());
    }
}
