//! State threaded through the stages of one submission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assembler::Stage;
use crate::confirmation::ConfirmationRecord;
use crate::crypto::keys::Signature;

/// A transaction the backend accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub signature: Signature,
    pub stage: Stage,
    pub submitted_at: DateTime<Utc>,
    /// Expiry of the blockhash the transaction was signed with.
    pub last_valid_block_height: u64,
}

/// Explicit coupling between the setup and execute stages of a split.
///
/// The execute stage may only be sent once the setup submitted through this
/// context has a confirmed record. Nothing about that is kept anywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionContext {
    pub id: Uuid,
    setup: Option<ConfirmationRecord>,
    pub results: Vec<SubmissionResult>,
}

impl Default for SubmissionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            setup: None,
            results: Vec::new(),
        }
    }

    /// Stores the watcher's verdict on the setup stage.
    pub fn record_setup(&mut self, record: ConfirmationRecord) {
        self.setup = Some(record);
    }

    pub fn setup(&self) -> Option<&ConfirmationRecord> {
        self.setup.as_ref()
    }

    /// `true` once the setup stage submitted through this context has been
    /// observed as confirmed. A confirmed record for any other signature
    /// does not count.
    pub fn setup_confirmed(&self) -> bool {
        match (self.setup.as_ref(), self.setup_signature()) {
            (Some(record), Some(signature)) => {
                record.signature == signature && record.is_confirmed()
            }
            _ => false,
        }
    }

    pub fn setup_signature(&self) -> Option<Signature> {
        self.results
            .iter()
            .find(|r| r.stage == Stage::Setup)
            .map(|r| r.signature)
    }

    pub fn signatures(&self) -> Vec<Signature> {
        self.results.iter().map(|r| r.signature).collect()
    }
}
