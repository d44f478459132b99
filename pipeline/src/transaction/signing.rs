//! Transaction signing.
//!
//! Signing is a separate step from compilation because the blockhash is
//! only fetched right before submission, and the signer may be remote. The
//! signed bytes are exactly [`Message::serialize`].

use thiserror::Error;

use super::message::{encode_length, Message};
use crate::crypto::keys::{Signature, TransactionSigner};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("message requires {required} signatures but {provided} signers were given")]
    SignerCount { required: usize, provided: usize },

    #[error("signer {0} is not a required signer of this message")]
    UnexpectedSigner(String),
}

/// A compiled message with one signature per required signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub signatures: Vec<Signature>,
    pub message: Message,
}

impl SignedTransaction {
    /// Signs `message` with `signers`, which must be exactly the message's
    /// required signers (any order).
    pub fn sign(message: Message, signers: &[&dyn TransactionSigner]) -> Result<Self, SigningError> {
        let required = message.signers();
        if required.len() != signers.len() {
            return Err(SigningError::SignerCount {
                required: required.len(),
                provided: signers.len(),
            });
        }

        let bytes = message.serialize();
        let mut signatures = Vec::with_capacity(required.len());
        for key in required {
            let signer = signers
                .iter()
                .find(|s| s.address() == *key)
                .ok_or_else(|| SigningError::UnexpectedSigner(key.to_string()))?;
            signatures.push(signer.sign_message(&bytes));
        }

        Ok(Self {
            signatures,
            message,
        })
    }

    /// The fee payer's signature, which identifies the transaction.
    pub fn id(&self) -> Option<&Signature> {
        self.signatures.first()
    }

    /// `true` if every required signer's signature checks out.
    pub fn verify(&self) -> bool {
        let bytes = self.message.serialize();
        let required = self.message.signers();
        required.len() == self.signatures.len()
            && required
                .iter()
                .zip(&self.signatures)
                .all(|(key, sig)| sig.verify(key, &bytes))
    }

    /// Wire bytes: short-vec of signatures followed by the message.
    pub fn serialize(&self) -> Vec<u8> {
        let message = self.message.serialize();
        let mut buf = Vec::with_capacity(1 + self.signatures.len() * 64 + message.len());
        encode_length(&mut buf, self.signatures.len());
        for sig in &self.signatures {
            buf.extend_from_slice(sig.as_bytes());
        }
        buf.extend_from_slice(&message);
        buf
    }
}
