//! # Confirmation Watcher
//!
//! Polls the backend until a submitted transaction reaches a terminal
//! state:
//!
//! ```text
//!            ┌──> Confirmed   (observed confirmed/finalized)
//! Pending ───┼──> Failed      (backend reported an execution error)
//!            └──> Timeout     (still pending after the last-chance check)
//! ```
//!
//! Terminal states are immutable. A record never becomes `Confirmed`
//! without a status observation that said so.
//!
//! Every poll first fetches a fresh blockhash context; a height carried
//! over from an earlier poll is never reused. When that context shows the
//! chain past the transaction's last valid block height, the remaining
//! retries are skipped (the transaction can no longer land) and the watcher
//! goes straight to the final check.
//!
//! Between polls the watcher sleeps `min(initial × multiplier^attempt,
//! max_delay)` through an injected [`Sleeper`]. After `max_retries` polls
//! it makes one more unconditional status check before declaring a timeout.

pub mod retry;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{BackendError, ExecutionBackend, SignatureStatus};
use crate::crypto::keys::Signature;

pub use retry::{RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    Pending,
    Confirmed,
    Failed,
    Timeout,
}

impl fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfirmationStatus::Pending => "pending",
            ConfirmationStatus::Confirmed => "confirmed",
            ConfirmationStatus::Failed => "failed",
            ConfirmationStatus::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Confirmation progress of one signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRecord {
    pub signature: Signature,
    status: ConfirmationStatus,
    /// Status checks made, the final one included.
    pub attempts: u32,
    pub last_checked_at: DateTime<Utc>,
    /// Why the record ended in `failed` or `timeout`.
    pub terminal_error: Option<String>,
}

impl ConfirmationRecord {
    pub fn new(signature: Signature) -> Self {
        Self {
            signature,
            status: ConfirmationStatus::Pending,
            attempts: 0,
            last_checked_at: Utc::now(),
            terminal_error: None,
        }
    }

    pub fn status(&self) -> ConfirmationStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status != ConfirmationStatus::Pending
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == ConfirmationStatus::Confirmed
    }

    /// Counts one status check.
    pub fn record_check(&mut self, at: DateTime<Utc>) {
        if !self.is_terminal() {
            self.attempts += 1;
            self.last_checked_at = at;
        }
    }

    pub fn mark_confirmed(&mut self) {
        if !self.is_terminal() {
            self.status = ConfirmationStatus::Confirmed;
        }
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        if !self.is_terminal() {
            self.status = ConfirmationStatus::Failed;
            self.terminal_error = Some(error.into());
        }
    }

    pub fn mark_timeout(&mut self, reason: impl Into<String>) {
        if !self.is_terminal() {
            self.status = ConfirmationStatus::Timeout;
            self.terminal_error = Some(reason.into());
        }
    }
}

/// Watches signatures against one backend.
pub struct ConfirmationWatcher<B: ?Sized> {
    backend: Arc<B>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl<B: ?Sized> Clone for ConfirmationWatcher<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            policy: self.policy,
            sleeper: Arc::clone(&self.sleeper),
        }
    }
}

impl<B: ExecutionBackend + ?Sized> ConfirmationWatcher<B> {
    /// A watcher that sleeps on the tokio timer.
    pub fn new(backend: Arc<B>, policy: RetryPolicy) -> Self {
        Self::with_sleeper(backend, policy, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(backend: Arc<B>, policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            backend,
            policy,
            sleeper,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Polls until `signature` is terminal.
    ///
    /// `last_valid_block_height` is the expiry of the blockhash the
    /// transaction was signed with, when known.
    pub async fn watch(
        &self,
        signature: Signature,
        last_valid_block_height: Option<u64>,
    ) -> ConfirmationRecord {
        let mut record = ConfirmationRecord::new(signature);
        let mut expired_at = None;

        for attempt in 0..self.policy.max_retries {
            match self.backend.latest_blockhash().await {
                Ok(ctx) => {
                    if let Some(last_valid) = last_valid_block_height {
                        if ctx.is_expired_for(last_valid) {
                            expired_at = Some(ctx.current_height);
                            debug!(
                                %signature,
                                height = ctx.current_height,
                                last_valid,
                                "blockhash expired, skipping to final check"
                            );
                            break;
                        }
                    }
                }
                Err(e) => warn!(%signature, error = %e, "could not refresh block height"),
            }

            self.check(&mut record).await;
            if record.is_terminal() {
                return self.finish(record);
            }

            let delay = self.policy.delay_for_attempt(attempt);
            debug!(%signature, attempt, delay_ms = delay.as_millis() as u64, "still pending");
            self.sleeper.sleep(delay).await;
        }

        // Last-chance check, regardless of why the loop ended.
        self.check(&mut record).await;
        if !record.is_terminal() {
            let reason = match expired_at {
                Some(height) => format!("blockhash expired at height {height} before confirmation"),
                None => format!("still pending after {} status checks", record.attempts),
            };
            record.mark_timeout(reason);
        }
        self.finish(record)
    }

    /// Watches several signatures concurrently. Records come back in input
    /// order.
    pub async fn watch_all(&self, signatures: &[(Signature, Option<u64>)]) -> Vec<ConfirmationRecord> {
        join_all(
            signatures
                .iter()
                .map(|(signature, last_valid)| self.watch(*signature, *last_valid)),
        )
        .await
    }

    async fn check(&self, record: &mut ConfirmationRecord) {
        record.record_check(Utc::now());
        match self.backend.signature_status(&record.signature).await {
            Ok(status) if status.is_success() => record.mark_confirmed(),
            Ok(SignatureStatus::Failed { err }) => record.mark_failed(err),
            Ok(_) => {}
            Err(BackendError::Transport(msg)) => {
                debug!(signature = %record.signature, error = %msg, "status poll failed, treating as pending");
            }
            Err(BackendError::Rejected(reason)) => record.mark_failed(reason),
        }
    }

    fn finish(&self, record: ConfirmationRecord) -> ConfirmationRecord {
        match record.status() {
            ConfirmationStatus::Confirmed => {
                info!(signature = %record.signature, attempts = record.attempts, "transaction confirmed");
            }
            status => {
                warn!(
                    signature = %record.signature,
                    %status,
                    attempts = record.attempts,
                    error = record.terminal_error.as_deref().unwrap_or_default(),
                    "transaction not confirmed"
                );
            }
        }
        record
    }
}
