//! # Submission
//!
//! Sends assembled transactions to the backend, one round-trip per stage.
//!
//! Each stage fetches a fresh blockhash, compiles, signs, and submits. An
//! atomic assembly is a single stage. A split assembly is strictly
//! sequenced: the execute stage references the proposal that setup creates,
//! so it is only sent after the confirmation watcher has observed setup as
//! confirmed.
//!
//! Backend rejections are reported, never retried here. A split whose
//! setup landed but whose execute did not surfaces as
//! [`SubmissionError::PartialSubmission`], carrying the setup signature so
//! the open proposal can be reconciled.

pub mod context;

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::assembler::{AssembledTransaction, Assembly, Stage};
use crate::backend::{BackendError, ExecutionBackend};
use crate::confirmation::{ConfirmationRecord, ConfirmationWatcher};
use crate::crypto::keys::{Signature, TransactionSigner};
use crate::transaction::{Message, MessageError, SignedTransaction, SigningError};

pub use context::{SubmissionContext, SubmissionResult};

/// Errors that can occur during submission.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("{stage} stage rejected by backend: {reason}")]
    Rejected { stage: Stage, reason: String },

    #[error("{stage} stage transport failure: {reason}")]
    Transport { stage: Stage, reason: String },

    #[error("message compilation failed: {0}")]
    Message(#[from] MessageError),

    #[error("signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("setup stage {} ended {}", .record.signature, .record.status())]
    StageNotConfirmed { record: ConfirmationRecord },

    /// Setup landed, execute did not. `execute` is the watcher's record when
    /// the execute stage was submitted; `None` when it never got that far.
    #[error("setup {setup_signature} confirmed but execute did not complete: {reason}")]
    PartialSubmission {
        setup_signature: Signature,
        execute: Option<ConfirmationRecord>,
        reason: String,
    },

    #[error("sequencing violation: {0}")]
    SequencingViolation(String),
}

impl SubmissionError {
    fn from_backend(stage: Stage, err: BackendError) -> Self {
        match err {
            BackendError::Rejected(reason) => Self::Rejected { stage, reason },
            BackendError::Transport(reason) => Self::Transport { stage, reason },
        }
    }
}

/// Drives assemblies through the backend.
pub struct SubmissionPipeline<B: ?Sized> {
    backend: Arc<B>,
    watcher: ConfirmationWatcher<B>,
}

impl<B: ExecutionBackend + ?Sized> SubmissionPipeline<B> {
    pub fn new(backend: Arc<B>, watcher: ConfirmationWatcher<B>) -> Self {
        Self { backend, watcher }
    }

    pub fn watcher(&self) -> &ConfirmationWatcher<B> {
        &self.watcher
    }

    /// Submits every stage of `assembly` in order.
    ///
    /// For a split, setup is confirmed before execute is sent and the
    /// confirmation record is stored in `ctx`. The final stage is
    /// submitted but not confirmed; that is the caller's next step.
    pub async fn submit_and_execute(
        &self,
        assembly: &Assembly,
        signer: &dyn TransactionSigner,
        ctx: &mut SubmissionContext,
    ) -> Result<Vec<SubmissionResult>, SubmissionError> {
        match assembly {
            Assembly::Atomic(tx) => Ok(vec![self.submit_stage(tx, signer, ctx).await?]),
            Assembly::Split { setup, execute } => {
                let setup_result = self.submit_stage(setup, signer, ctx).await?;

                let record = self
                    .watcher
                    .watch(setup_result.signature, Some(setup_result.last_valid_block_height))
                    .await;
                ctx.record_setup(record.clone());
                if !record.is_confirmed() {
                    warn!(
                        submission = %ctx.id,
                        signature = %record.signature,
                        status = %record.status(),
                        "setup stage not confirmed, execute withheld"
                    );
                    return Err(SubmissionError::StageNotConfirmed { record });
                }

                let execute_result = self
                    .submit_stage(execute, signer, ctx)
                    .await
                    .map_err(|e| SubmissionError::PartialSubmission {
                        setup_signature: setup_result.signature,
                        execute: None,
                        reason: e.to_string(),
                    })?;

                Ok(vec![setup_result, execute_result])
            }
        }
    }

    /// Compiles, signs and submits one stage.
    ///
    /// An execute stage is refused, without contacting the backend, unless
    /// the setup submitted through `ctx` is confirmed.
    pub async fn submit_stage(
        &self,
        tx: &AssembledTransaction,
        signer: &dyn TransactionSigner,
        ctx: &mut SubmissionContext,
    ) -> Result<SubmissionResult, SubmissionError> {
        let stage = tx.stage;
        if stage == Stage::Execute && !ctx.setup_confirmed() {
            return Err(SubmissionError::SequencingViolation(format!(
                "execute stage of submission {} requested before setup was confirmed",
                ctx.id
            )));
        }

        let blockhash_ctx = self
            .backend
            .latest_blockhash()
            .await
            .map_err(|e| SubmissionError::from_backend(stage, e))?;

        let message = Message::compile(&tx.fee_payer, &tx.instructions, blockhash_ctx.blockhash)?;
        let signed = SignedTransaction::sign(message, &[signer])?;

        let signature = self
            .backend
            .submit_transaction(&signed)
            .await
            .map_err(|e| {
                warn!(submission = %ctx.id, %stage, error = %e, "submission failed");
                SubmissionError::from_backend(stage, e)
            })?;

        info!(
            submission = %ctx.id,
            %stage,
            %signature,
            estimated_bytes = tx.estimated_size,
            instructions = tx.instructions.len(),
            "stage submitted"
        );

        let result = SubmissionResult {
            signature,
            stage,
            submitted_at: Utc::now(),
            last_valid_block_height: blockhash_ctx.last_valid_block_height,
        };
        ctx.results.push(result.clone());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressDeriver;
    use crate::assembler::TransactionAssembler;
    use crate::backend::{SignatureStatus, SimulatedBackend};
    use crate::config::PipelineConfig;
    use crate::confirmation::{ConfirmationStatus, RecordingSleeper, RetryPolicy};
    use crate::crypto::keys::Keypair;
    use crate::instruction::{InstructionBatch, InstructionBuilder, InstructionKind, VaultContext};
    use crate::invoice::Invoice;
    use crate::proof::ProofReference;

    const BIG: usize = 64 * 1024;

    struct Fixture {
        backend: Arc<SimulatedBackend>,
        pipeline: SubmissionPipeline<SimulatedBackend>,
        member: Keypair,
        batch: InstructionBatch,
    }

    fn fixture(invoice_count: usize) -> Fixture {
        let backend = Arc::new(SimulatedBackend::default());
        let watcher = ConfirmationWatcher::with_sleeper(
            backend.clone(),
            RetryPolicy::default(),
            Arc::new(RecordingSleeper::new()),
        );
        let pipeline = SubmissionPipeline::new(backend.clone(), watcher);

        let deriver = Arc::new(AddressDeriver::default());
        let builder = InstructionBuilder::from_config(deriver.clone(), &PipelineConfig::default());
        let member = Keypair::from_seed(&[42; 32]);
        let ctx = VaultContext {
            multisig: deriver
                .derive_multisig_address(&Keypair::from_seed(&[1; 32]).address())
                .unwrap()
                .address,
            vault_index: 0,
            transaction_index: 1,
        };
        let invoices: Vec<Invoice> = (0..invoice_count)
            .map(|i| {
                Invoice::new(
                    format!("INV-{i}"),
                    "5.00",
                    Keypair::from_seed(&[100 + i as u8; 32]).address(),
                )
            })
            .collect();
        let proof = ProofReference {
            integrity_hash: "cd".repeat(32),
            version: "1.0".into(),
        };
        let batch = builder
            .build_batch(&ctx, member.address(), &invoices, &proof)
            .unwrap();

        Fixture {
            backend,
            pipeline,
            member,
            batch,
        }
    }

    /// Forces a split by budgeting one byte under the compact atomic size.
    fn split(batch: &InstructionBatch) -> Assembly {
        let assembler = TransactionAssembler::new(BIG);
        let mut probe = batch.clone();
        for inv in &mut probe.invoices {
            inv.annotation = inv.compact_annotation.clone();
        }
        let Assembly::Atomic(tx) = assembler.assemble(&probe, BIG).unwrap() else {
            unreachable!()
        };
        let assembly = assembler.assemble(batch, tx.estimated_size - 1).unwrap();
        assert!(!assembly.is_atomic());
        assembly
    }

    #[tokio::test]
    async fn atomic_assembly_submits_once() {
        let f = fixture(1);
        let assembly = TransactionAssembler::new(BIG).assemble(&f.batch, 1232).unwrap();
        let mut ctx = SubmissionContext::new();

        let results = f
            .pipeline
            .submit_and_execute(&assembly, &f.member, &mut ctx)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].stage, Stage::Single);
        assert_eq!(ctx.results, results);
        assert_eq!(f.backend.submissions().len(), 1);
    }

    #[tokio::test]
    async fn split_waits_for_setup_confirmation() {
        let f = fixture(2);
        let assembly = split(&f.batch);
        let mut ctx = SubmissionContext::new();

        let results = f
            .pipeline
            .submit_and_execute(&assembly, &f.member, &mut ctx)
            .await
            .unwrap();
        assert_eq!(results.iter().map(|r| r.stage).collect::<Vec<_>>(), vec![Stage::Setup, Stage::Execute]);
        assert!(ctx.setup_confirmed());

        let log = f.backend.submissions();
        assert_eq!(log.len(), 2);
        assert!(log[1].kinds.contains(&InstructionKind::VaultTransactionExecute));
        // setup confirmed (two polls) before execute was accepted
        assert!(f.backend.status_polls() >= 2);
        assert!(log[1].height > log[0].height);
    }

    #[tokio::test]
    async fn execute_before_setup_is_a_sequencing_violation() {
        let f = fixture(2);
        let Assembly::Split { execute, .. } = split(&f.batch) else {
            unreachable!()
        };
        let mut ctx = SubmissionContext::new();

        let err = f
            .pipeline
            .submit_stage(&execute, &f.member, &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::SequencingViolation(_)));
        assert!(f.backend.submissions().is_empty());
    }

    #[tokio::test]
    async fn context_from_another_submission_cannot_release_execute() {
        let f = fixture(2);
        let assembly = split(&f.batch);
        let mut finished = SubmissionContext::new();
        f.pipeline
            .submit_and_execute(&assembly, &f.member, &mut finished)
            .await
            .unwrap();

        // Carry the confirmed setup record over to a fresh context.
        let mut reused = SubmissionContext::new();
        reused.record_setup(finished.setup().cloned().unwrap());
        let Assembly::Split { execute, .. } = &assembly else {
            unreachable!()
        };

        let err = f
            .pipeline
            .submit_stage(execute, &f.member, &mut reused)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::SequencingViolation(_)));
        assert_eq!(f.backend.submissions().len(), 2);
    }

    #[tokio::test]
    async fn unconfirmed_setup_withholds_execute() {
        let f = fixture(2);
        f.backend.script_next_submission(vec![Ok(SignatureStatus::Failed {
            err: "rent payer underfunded".into(),
        })]);
        let assembly = split(&f.batch);
        let mut ctx = SubmissionContext::new();

        let err = f
            .pipeline
            .submit_and_execute(&assembly, &f.member, &mut ctx)
            .await
            .unwrap_err();
        let SubmissionError::StageNotConfirmed { record } = err else {
            panic!("expected StageNotConfirmed");
        };
        assert_eq!(record.status(), ConfirmationStatus::Failed);
        assert_eq!(f.backend.submissions().len(), 1);
    }

    #[tokio::test]
    async fn rejected_execute_is_partial_submission() {
        let f = fixture(2);
        f.backend
            .reject_instruction(InstructionKind::VaultTransactionExecute, "insufficient funds");
        let assembly = split(&f.batch);
        let mut ctx = SubmissionContext::new();

        let err = f
            .pipeline
            .submit_and_execute(&assembly, &f.member, &mut ctx)
            .await
            .unwrap_err();
        match err {
            SubmissionError::PartialSubmission {
                setup_signature,
                execute,
                reason,
            } => {
                assert_eq!(Some(setup_signature), ctx.setup_signature());
                assert!(execute.is_none());
                assert!(reason.contains("insufficient funds"));
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[tokio::test]
    async fn atomic_rejection_carries_stage_and_reason() {
        let f = fixture(1);
        f.backend.reject_instruction(InstructionKind::Transfer, "insufficient funds");
        let assembly = TransactionAssembler::new(BIG).assemble(&f.batch, 1232).unwrap();
        let mut ctx = SubmissionContext::new();

        let err = f
            .pipeline
            .submit_and_execute(&assembly, &f.member, &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SubmissionError::Rejected { stage: Stage::Single, ref reason } if reason == "insufficient funds"
        ));
    }
}
