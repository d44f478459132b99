//! Persistence contract.
//!
//! After the final stage settles, the pipeline hands a [`TransactionRecord`]
//! to a [`TransactionRecorder`]. The record holds the proof envelope but
//! never the key.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::assembler::AssemblyKind;
use crate::confirmation::ConfirmationStatus;
use crate::crypto::keys::{Address, Signature};
use crate::proof::ProofEnvelope;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record storage failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Who was involved in a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parties {
    pub vault: Address,
    pub recipients: Vec<Address>,
}

/// What gets persisted about a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub submission_id: Uuid,
    /// Signature of the final stage.
    pub signature: Signature,
    /// Every submitted signature, setup first.
    pub signatures: Vec<Signature>,
    pub proof_envelope: ProofEnvelope,
    pub status: ConfirmationStatus,
    /// Total in base units.
    pub amount: u64,
    pub parties: Parties,
    pub invoices: Vec<String>,
    pub assembly_kind: AssemblyKind,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait TransactionRecorder: Send + Sync {
    async fn record(&self, record: TransactionRecord) -> Result<(), RecorderError>;
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    records: Mutex<Vec<TransactionRecord>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TransactionRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl TransactionRecorder for MemoryRecorder {
    async fn record(&self, record: TransactionRecord) -> Result<(), RecorderError> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
#[derive(Debug, Clone)]
pub struct JsonLinesRecorder {
    path: PathBuf,
}

impl JsonLinesRecorder {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TransactionRecorder for JsonLinesRecorder {
    async fn record(&self, record: TransactionRecord) -> Result<(), RecorderError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
