//! # Cryptographic Primitives
//!
//! Thin, typed wrappers over audited implementations:
//!
//! - **Ed25519** (`ed25519-dalek`) for signing compiled transaction messages.
//! - **Curve25519** point decompression (`curve25519-dalek`) to keep
//!   program-derived addresses off the curve.
//! - **AES-256-GCM** (`aes-gcm`) for proof payload encryption.
//! - **SHA-256** (`sha2`) for derivation, integrity hashes and discriminators.

pub mod encryption;
pub mod hash;
pub mod keys;

pub use encryption::{decrypt, encrypt, generate_key, EncryptionError};
pub use hash::{sha256, sha256_hex, sha256_multi};
pub use keys::{Address, KeyError, Keypair, Signature, TransactionSigner};
