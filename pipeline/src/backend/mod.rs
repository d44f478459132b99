//! # Execution Backend
//!
//! The only seam between the pipeline and the network. Everything the
//! pipeline needs from an RPC node fits in three calls:
//!
//! - [`ExecutionBackend::latest_blockhash`]: a fresh blockhash plus the
//!   block heights needed to tell when it expires;
//! - [`ExecutionBackend::submit_transaction`]: send signed bytes, get the
//!   signature back;
//! - [`ExecutionBackend::signature_status`]: one status observation.
//!
//! Responses are decoded into tagged enums here, at the boundary, so the
//! rest of the pipeline never inspects raw JSON. Failures split into
//! permanent ([`BackendError::Rejected`]) and transient
//! ([`BackendError::Transport`]); only the confirmation watcher treats the
//! latter as retryable.
//!
//! [`SimulatedBackend`] is a complete in-memory implementation used by the
//! tests and the CLI's `simulate` command.

pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::keys::Signature;
use crate::transaction::{Blockhash, SignedTransaction};

pub use simulated::{SimulatedBackend, SimulatedConfig, SubmissionLogEntry};

/// Errors reported by an execution backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend refused the request. Resending the same bytes will not
    /// help.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The request may not have reached the backend.
    #[error("transport error: {0}")]
    Transport(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transport(_))
    }
}

/// A blockhash and the heights that bound its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockhashContext {
    pub blockhash: Blockhash,
    /// Last block height at which a transaction using `blockhash` can land.
    pub last_valid_block_height: u64,
    /// Block height when this context was fetched.
    pub current_height: u64,
}

impl BlockhashContext {
    /// `true` once the chain has moved past `last_valid_block_height`.
    pub fn is_expired_for(&self, last_valid_block_height: u64) -> bool {
        self.current_height > last_valid_block_height
    }
}

/// One observation of a transaction's status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SignatureStatus {
    /// Not yet seen, or seen but not confirmed.
    Pending,
    Confirmed,
    Finalized,
    /// Landed and failed during execution.
    Failed { err: String },
}

impl SignatureStatus {
    /// Confirmed or finalized.
    pub fn is_success(&self) -> bool {
        matches!(self, SignatureStatus::Confirmed | SignatureStatus::Finalized)
    }
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn latest_blockhash(&self) -> Result<BlockhashContext, BackendError>;

    async fn submit_transaction(&self, tx: &SignedTransaction) -> Result<Signature, BackendError>;

    async fn signature_status(&self, signature: &Signature) -> Result<SignatureStatus, BackendError>;
}
