//! # Payment pipeline
//!
//! The end-to-end flow for paying a batch of invoices out of a multisig
//! vault:
//!
//! 1. Validate the batch.
//! 2. Seal the proof payload.
//! 3. Derive addresses and build instructions.
//! 4. Assemble atomically, or split when over budget.
//! 5. Submit, in order for a split.
//! 6. Confirm the final stage.
//! 7. Hand a [`TransactionRecord`] to the recorder.
//!
//! The proof key is returned in the [`PaymentReceipt`] and nowhere else.
//! Once submission has started, errors carry the sealed proof too, so a
//! payment that may still land is never left without its key.

pub mod record;

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::address::AddressDeriver;
use crate::assembler::{AssemblyError, AssemblyKind, TransactionAssembler};
use crate::backend::ExecutionBackend;
use crate::config::{ConfigError, PipelineConfig};
use crate::confirmation::{
    ConfirmationRecord, ConfirmationStatus, ConfirmationWatcher, RetryPolicy, Sleeper, TokioSleeper,
};
use crate::crypto::keys::{Signature, TransactionSigner};
use crate::instruction::{BuildError, InstructionBatch, InstructionBuilder, VaultContext};
use crate::invoice::{validate_batch, BusinessMetadata, Invoice, InvoiceError};
use crate::proof::{ProofCodec, ProofEnvelope, ProofError, ProofKey, SealedProof};
use crate::submission::{SubmissionContext, SubmissionError, SubmissionPipeline};

pub use record::{
    JsonLinesRecorder, MemoryRecorder, Parties, RecorderError, TransactionRecord,
    TransactionRecorder,
};

/// Everything that can stop a payment batch.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid batch: {0}")]
    InvalidBatch(#[from] InvoiceError),

    #[error("proof: {0}")]
    Proof(#[from] ProofError),

    #[error("instruction build: {0}")]
    Build(#[from] BuildError),

    #[error("assembly: {0}")]
    Assembly(#[from] AssemblyError),

    /// Submission failed after the proof was sealed.
    #[error("submission: {source}")]
    Submission {
        #[source]
        source: SubmissionError,
        proof: Box<SealedProof>,
    },

    /// The final stage was submitted but did not confirm.
    #[error("transaction {} ended {}", .record.signature, .record.status())]
    NotConfirmed {
        record: ConfirmationRecord,
        signatures: Vec<Signature>,
        proof: Box<SealedProof>,
    },

    /// The payment confirmed but the record could not be stored.
    #[error("payment confirmed but recording failed: {source}")]
    Recording {
        #[source]
        source: RecorderError,
        receipt: Box<PaymentReceipt>,
    },
}

impl PaymentError {
    /// The sealed proof, when the failure happened after sealing.
    pub fn sealed_proof(&self) -> Option<&SealedProof> {
        match self {
            Self::Submission { proof, .. } | Self::NotConfirmed { proof, .. } => Some(proof.as_ref()),
            Self::Recording { receipt, .. } => Some(&receipt.proof),
            _ => None,
        }
    }

    /// `true` when the outcome is unknown rather than a definite failure.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::NotConfirmed { record, .. } => record.status() == ConfirmationStatus::Timeout,
            Self::Submission {
                source: SubmissionError::StageNotConfirmed { record },
                ..
            }
            | Self::Submission {
                source:
                    SubmissionError::PartialSubmission {
                        execute: Some(record),
                        ..
                    },
                ..
            } => record.status() == ConfirmationStatus::Timeout,
            _ => false,
        }
    }
}

/// What the caller gets back from a confirmed batch.
#[derive(Debug, Clone)]
pub struct PaymentReceipt {
    pub submission_id: Uuid,
    /// Submitted signatures, setup first for a split.
    pub signatures: Vec<Signature>,
    pub proof: SealedProof,
    /// One record per submitted stage, in submission order.
    pub confirmations: Vec<ConfirmationRecord>,
    pub assembly_kind: AssemblyKind,
    /// Sum of the batch in base units.
    pub total_amount: u64,
}

impl PaymentReceipt {
    pub fn envelope(&self) -> &ProofEnvelope {
        &self.proof.envelope
    }

    pub fn key(&self) -> &ProofKey {
        &self.proof.key
    }

    /// Signature of the stage that moved the funds.
    pub fn final_signature(&self) -> Option<Signature> {
        self.signatures.last().copied()
    }
}

/// Wires every stage of the payment flow against one backend.
pub struct PaymentPipeline<B: ?Sized> {
    config: PipelineConfig,
    codec: ProofCodec,
    builder: InstructionBuilder,
    assembler: TransactionAssembler,
    submission: SubmissionPipeline<B>,
    recorder: Arc<dyn TransactionRecorder>,
}

impl<B: ExecutionBackend + ?Sized> PaymentPipeline<B> {
    /// A pipeline that sleeps on the tokio timer between status polls.
    pub fn new(
        config: PipelineConfig,
        backend: Arc<B>,
        recorder: Arc<dyn TransactionRecorder>,
    ) -> Result<Self, PaymentError> {
        Self::with_sleeper(config, backend, recorder, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(
        config: PipelineConfig,
        backend: Arc<B>,
        recorder: Arc<dyn TransactionRecorder>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, PaymentError> {
        config.validate()?;

        let deriver = Arc::new(AddressDeriver::new(config.program_ids.clone()));
        let builder = InstructionBuilder::from_config(deriver, &config);
        let assembler = TransactionAssembler::from_config(&config);
        let watcher =
            ConfirmationWatcher::with_sleeper(backend.clone(), RetryPolicy::from(&config.retry), sleeper);
        let submission = SubmissionPipeline::new(backend, watcher);

        Ok(Self {
            config,
            codec: ProofCodec::new(),
            builder,
            assembler,
            submission,
            recorder,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Pays `invoices` out of the vault described by `vault`.
    ///
    /// `signer` is the multisig member that pays fees and casts the
    /// approval. Returns only once the final stage is confirmed.
    #[instrument(skip_all, fields(invoices = invoices.len(), multisig = %vault.multisig))]
    pub async fn create_and_submit_payment_batch(
        &self,
        invoices: &[Invoice],
        vault: &VaultContext,
        business: &BusinessMetadata,
        signer: &dyn TransactionSigner,
    ) -> Result<PaymentReceipt, PaymentError> {
        validate_batch(invoices)?;

        let proof = self.codec.encode(business, invoices)?;
        let batch =
            self.builder
                .build_batch(vault, signer.address(), invoices, &proof.envelope.reference())?;
        let assembly = self
            .assembler
            .assemble(&batch, self.config.effective_budget())?;

        let mut ctx = SubmissionContext::new();
        let submitted = self
            .submission
            .submit_and_execute(&assembly, signer, &mut ctx)
            .await;
        let results = match submitted {
            Ok(results) => results,
            Err(source) => {
                // A setup that did not confirm may still land; leave a trail.
                if let SubmissionError::StageNotConfirmed { record } = &source {
                    let setup_record = self.transaction_record(
                        &ctx,
                        &batch,
                        &proof.envelope,
                        record,
                        assembly.kind(),
                    );
                    if let Err(e) = self.recorder.record(setup_record).await {
                        warn!(submission = %ctx.id, error = %e, "could not record unconfirmed setup");
                    }
                }
                return Err(PaymentError::Submission {
                    source,
                    proof: Box::new(proof),
                })
            }
        };

        let Some(last) = results.last() else {
            return Err(PaymentError::Submission {
                source: SubmissionError::SequencingViolation(
                    "submission produced no transactions".into(),
                ),
                proof: Box::new(proof),
            });
        };

        let final_record = self
            .submission
            .watcher()
            .watch(last.signature, Some(last.last_valid_block_height))
            .await;
        let signatures = ctx.signatures();

        let transaction_record =
            self.transaction_record(&ctx, &batch, &proof.envelope, &final_record, assembly.kind());
        let recorded = self.recorder.record(transaction_record).await;

        if !final_record.is_confirmed() {
            if let Err(e) = recorded {
                warn!(submission = %ctx.id, error = %e, "could not record unconfirmed payment");
            }
            return Err(match ctx.setup_signature() {
                Some(setup_signature) => PaymentError::Submission {
                    source: SubmissionError::PartialSubmission {
                        setup_signature,
                        execute: Some(final_record.clone()),
                        reason: format!(
                            "execute {} ended {}: {}",
                            final_record.signature,
                            final_record.status(),
                            final_record.terminal_error.as_deref().unwrap_or("no detail")
                        ),
                    },
                    proof: Box::new(proof),
                },
                None => PaymentError::NotConfirmed {
                    record: final_record,
                    signatures,
                    proof: Box::new(proof),
                },
            });
        }

        let mut confirmations = Vec::with_capacity(2);
        confirmations.extend(ctx.setup().cloned());
        confirmations.push(final_record);

        let receipt = PaymentReceipt {
            submission_id: ctx.id,
            signatures,
            proof,
            confirmations,
            assembly_kind: assembly.kind(),
            total_amount: batch.total_amount,
        };

        info!(
            submission = %receipt.submission_id,
            kind = ?receipt.assembly_kind,
            total = receipt.total_amount,
            "payment batch confirmed"
        );

        match recorded {
            Ok(()) => Ok(receipt),
            Err(source) => Err(PaymentError::Recording {
                source,
                receipt: Box::new(receipt),
            }),
        }
    }

    fn transaction_record(
        &self,
        ctx: &SubmissionContext,
        batch: &InstructionBatch,
        envelope: &ProofEnvelope,
        final_record: &ConfirmationRecord,
        assembly_kind: AssemblyKind,
    ) -> TransactionRecord {
        TransactionRecord {
            submission_id: ctx.id,
            signature: final_record.signature,
            signatures: ctx.signatures(),
            proof_envelope: envelope.clone(),
            status: final_record.status(),
            amount: batch.total_amount,
            parties: Parties {
                vault: batch.vault,
                recipients: batch.invoices.iter().map(|i| i.recipient).collect(),
            },
            invoices: batch
                .invoices
                .iter()
                .map(|i| i.invoice_number.clone())
                .collect(),
            assembly_kind,
            recorded_at: Utc::now(),
        }
    }
}
