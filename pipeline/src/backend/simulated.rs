//! In-memory execution backend.
//!
//! Behaves enough like a real cluster to exercise every pipeline path:
//!
//! - each `latest_blockhash` call produces a new block and a blockhash valid
//!   for [`SimulatedConfig::blockhash_validity`] blocks;
//! - submissions are checked for valid signatures, size, a known unexpired
//!   blockhash, and duplicate signatures;
//! - multisig approve/execute instructions are refused unless the proposal
//!   they reference was created in the same transaction or in one that has
//!   already been observed as confirmed;
//! - status polls follow a per-transaction script (default: pending for
//!   [`SimulatedConfig::confirm_after_polls`] polls, then confirmed), with the
//!   last scripted status sticking once the script runs out.
//!
//! Tests can queue status scripts, force rejections by instruction kind,
//! advance the chain, and read back the submission log.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{BackendError, BlockhashContext, ExecutionBackend, SignatureStatus};
use crate::config::{ProgramIds, MAX_TRANSACTION_SIZE};
use crate::crypto::hash::sha256_multi;
use crate::crypto::keys::{Address, Signature};
use crate::instruction::memo::Annotation;
use crate::instruction::multisig::discriminator;
use crate::instruction::token::TRANSFER_CHECKED_TAG;
use crate::instruction::InstructionKind;
use crate::transaction::{Blockhash, CompiledInstruction, Message, SignedTransaction};

/// One scripted status poll result.
pub type ScriptedStatus = Result<SignatureStatus, BackendError>;

/// Knobs for [`SimulatedBackend`].
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Largest transaction accepted, in wire bytes.
    pub max_transaction_size: usize,
    /// Blocks a blockhash stays valid after it is issued.
    pub blockhash_validity: u64,
    /// Pending polls before the default script reports confirmed.
    pub confirm_after_polls: u32,
    pub program_ids: ProgramIds,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            max_transaction_size: MAX_TRANSACTION_SIZE,
            blockhash_validity: 150,
            confirm_after_polls: 1,
            program_ids: ProgramIds::default(),
        }
    }
}

/// A transaction the backend accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionLogEntry {
    pub signature: Signature,
    pub kinds: Vec<InstructionKind>,
    /// Block height at submission.
    pub height: u64,
    /// Wire size in bytes.
    pub size: usize,
}

struct LedgerEntry {
    script: VecDeque<ScriptedStatus>,
    last: SignatureStatus,
    created_proposals: Vec<Address>,
    annotations: Vec<Annotation>,
    applied: bool,
}

#[derive(Default)]
struct State {
    height: u64,
    blockhashes: HashMap<Blockhash, u64>,
    ledger: HashMap<Signature, LedgerEntry>,
    confirmed_proposals: HashSet<Address>,
    queued_scripts: VecDeque<Vec<ScriptedStatus>>,
    rejections: HashMap<InstructionKind, String>,
    submissions: Vec<SubmissionLogEntry>,
    annotations: Vec<Annotation>,
    status_polls: usize,
}

struct Discriminators {
    create: [u8; 8],
    propose: [u8; 8],
    approve: [u8; 8],
    execute: [u8; 8],
}

pub struct SimulatedBackend {
    config: SimulatedConfig,
    discriminators: Discriminators,
    state: Mutex<State>,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(SimulatedConfig::default())
    }
}

impl SimulatedBackend {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            discriminators: Discriminators {
                create: discriminator("vault_transaction_create"),
                propose: discriminator("proposal_create"),
                approve: discriminator("proposal_approve"),
                execute: discriminator("vault_transaction_execute"),
            },
            state: Mutex::new(State::default()),
        }
    }

    /// Status script for the next accepted submission. Scripts queue in
    /// order; submissions without one get the default.
    pub fn script_next_submission(&self, statuses: Vec<ScriptedStatus>) {
        self.state.lock().queued_scripts.push_back(statuses);
    }

    /// Rejects any transaction containing `kind` with `reason`.
    pub fn reject_instruction(&self, kind: InstructionKind, reason: impl Into<String>) {
        self.state.lock().rejections.insert(kind, reason.into());
    }

    /// Moves the chain forward without issuing blockhashes.
    pub fn advance_blocks(&self, blocks: u64) {
        self.state.lock().height += blocks;
    }

    pub fn height(&self) -> u64 {
        self.state.lock().height
    }

    pub fn submissions(&self) -> Vec<SubmissionLogEntry> {
        self.state.lock().submissions.clone()
    }

    /// Annotations of every transaction observed as confirmed.
    pub fn landed_annotations(&self) -> Vec<Annotation> {
        self.state.lock().annotations.clone()
    }

    pub fn status_polls(&self) -> usize {
        self.state.lock().status_polls
    }

    pub fn is_proposal_confirmed(&self, proposal: &Address) -> bool {
        self.state.lock().confirmed_proposals.contains(proposal)
    }

    fn default_script(&self) -> Vec<ScriptedStatus> {
        (0..self.config.confirm_after_polls)
            .map(|_| Ok(SignatureStatus::Pending))
            .chain(std::iter::once(Ok(SignatureStatus::Confirmed)))
            .collect()
    }

    fn classify(&self, message: &Message, ix: &CompiledInstruction) -> Option<InstructionKind> {
        let programs = &self.config.program_ids;
        let program = message.program_id(ix)?;

        if *program == programs.memo {
            return Some(InstructionKind::Annotation);
        }
        if *program == programs.token {
            return (ix.data.first() == Some(&TRANSFER_CHECKED_TAG)).then_some(InstructionKind::Transfer);
        }
        if *program != programs.multisig || ix.data.len() < 8 {
            return None;
        }

        let disc = &ix.data[..8];
        let d = &self.discriminators;
        if disc == d.create {
            Some(InstructionKind::VaultTransactionCreate)
        } else if disc == d.propose {
            Some(InstructionKind::ProposalCreate)
        } else if disc == d.approve {
            Some(InstructionKind::ProposalApprove)
        } else if disc == d.execute {
            Some(InstructionKind::VaultTransactionExecute)
        } else {
            None
        }
    }
}

/// Address at `position` in a compiled instruction's account list.
fn account_at(message: &Message, ix: &CompiledInstruction, position: usize) -> Option<Address> {
    message.instruction_accounts(ix).nth(position).flatten().copied()
}

#[async_trait]
impl ExecutionBackend for SimulatedBackend {
    async fn latest_blockhash(&self) -> Result<BlockhashContext, BackendError> {
        let mut state = self.state.lock();
        state.height += 1;
        let height = state.height;
        let blockhash = Blockhash::new(sha256_multi(&[b"simulated-block", &height.to_le_bytes()]));
        let last_valid_block_height = height + self.config.blockhash_validity;
        state.blockhashes.insert(blockhash, last_valid_block_height);

        Ok(BlockhashContext {
            blockhash,
            last_valid_block_height,
            current_height: height,
        })
    }

    async fn submit_transaction(&self, tx: &SignedTransaction) -> Result<Signature, BackendError> {
        let signature = *tx
            .id()
            .ok_or_else(|| BackendError::Rejected("transaction carries no signatures".into()))?;

        if !tx.verify() {
            return Err(BackendError::Rejected("signature verification failed".into()));
        }
        let size = tx.serialize().len();
        if size > self.config.max_transaction_size {
            return Err(BackendError::Rejected(format!(
                "transaction too large: {size} > {}",
                self.config.max_transaction_size
            )));
        }

        let message = &tx.message;
        let mut kinds = Vec::with_capacity(message.instructions.len());
        for ix in &message.instructions {
            let kind = self.classify(message, ix).ok_or_else(|| {
                BackendError::Rejected("instruction targets an unknown program".into())
            })?;
            kinds.push(kind);
        }

        let mut state = self.state.lock();

        match state.blockhashes.get(&message.recent_blockhash) {
            None => return Err(BackendError::Rejected("blockhash not found".into())),
            Some(last_valid) if state.height > *last_valid => {
                return Err(BackendError::Rejected("blockhash expired".into()))
            }
            Some(_) => {}
        }
        if state.ledger.contains_key(&signature) {
            return Err(BackendError::Rejected("transaction already processed".into()));
        }
        if let Some(reason) = kinds.iter().find_map(|k| state.rejections.get(k)) {
            return Err(BackendError::Rejected(reason.clone()));
        }

        let mut created_proposals = Vec::new();
        let mut annotations = Vec::new();
        for (ix, kind) in message.instructions.iter().zip(&kinds) {
            let proposal_position = match kind {
                InstructionKind::ProposalCreate => {
                    if let Some(p) = account_at(message, ix, 1) {
                        created_proposals.push(p);
                    }
                    continue;
                }
                InstructionKind::ProposalApprove => 2,
                InstructionKind::VaultTransactionExecute => 1,
                InstructionKind::Annotation => {
                    if let Ok(a) = Annotation::decode(&ix.data) {
                        annotations.push(a);
                    }
                    continue;
                }
                _ => continue,
            };
            let proposal = account_at(message, ix, proposal_position).ok_or_else(|| {
                BackendError::Rejected(format!("{kind:?} is missing its proposal account"))
            })?;
            if !state.confirmed_proposals.contains(&proposal) && !created_proposals.contains(&proposal)
            {
                return Err(BackendError::Rejected(format!(
                    "proposal {proposal} does not exist"
                )));
            }
        }

        let script = match state.queued_scripts.pop_front() {
            Some(script) => script,
            None => self.default_script(),
        };
        state.ledger.insert(
            signature,
            LedgerEntry {
                script: script.into(),
                last: SignatureStatus::Pending,
                created_proposals,
                annotations,
                applied: false,
            },
        );
        let height = state.height;
        state.submissions.push(SubmissionLogEntry {
            signature,
            kinds,
            height,
            size,
        });

        debug!(%signature, size, height, "simulated backend accepted transaction");
        Ok(signature)
    }

    async fn signature_status(&self, signature: &Signature) -> Result<SignatureStatus, BackendError> {
        let mut guard = self.state.lock();
        let State {
            ledger,
            confirmed_proposals,
            annotations,
            status_polls,
            ..
        } = &mut *guard;
        *status_polls += 1;

        let Some(entry) = ledger.get_mut(signature) else {
            return Ok(SignatureStatus::Pending);
        };

        let next = entry
            .script
            .pop_front()
            .unwrap_or_else(|| Ok(entry.last.clone()));
        let status = next?;
        entry.last = status.clone();

        if status.is_success() && !entry.applied {
            entry.applied = true;
            confirmed_proposals.extend(entry.created_proposals.drain(..));
            annotations.append(&mut entry.annotations);
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::Keypair;
    use crate::crypto::TransactionSigner;
    use crate::instruction::{AccountMeta, Instruction};

    fn memo_tx(backend_ctx: &BlockhashContext, payer: &Keypair, text: &str) -> SignedTransaction {
        let ix = Instruction::new(
            InstructionKind::Annotation,
            ProgramIds::default().memo,
            Vec::new(),
            text.as_bytes().to_vec(),
        );
        let msg = Message::compile(&payer.address(), &[ix], backend_ctx.blockhash).unwrap();
        SignedTransaction::sign(msg, &[payer]).unwrap()
    }

    #[tokio::test]
    async fn blockhash_advances_each_call() {
        let backend = SimulatedBackend::default();
        let a = backend.latest_blockhash().await.unwrap();
        let b = backend.latest_blockhash().await.unwrap();
        assert_eq!(b.current_height, a.current_height + 1);
        assert_ne!(a.blockhash, b.blockhash);
        assert_eq!(a.last_valid_block_height, a.current_height + 150);
    }

    #[tokio::test]
    async fn default_script_confirms_on_second_poll() {
        let backend = SimulatedBackend::default();
        let payer = Keypair::generate();
        let ctx = backend.latest_blockhash().await.unwrap();
        let sig = backend.submit_transaction(&memo_tx(&ctx, &payer, "hi")).await.unwrap();

        assert_eq!(backend.signature_status(&sig).await.unwrap(), SignatureStatus::Pending);
        assert_eq!(backend.signature_status(&sig).await.unwrap(), SignatureStatus::Confirmed);
        // sticky
        assert_eq!(backend.signature_status(&sig).await.unwrap(), SignatureStatus::Confirmed);
        assert_eq!(backend.status_polls(), 3);
    }

    #[tokio::test]
    async fn unknown_and_expired_blockhashes_rejected() {
        let backend = SimulatedBackend::new(SimulatedConfig {
            blockhash_validity: 2,
            ..SimulatedConfig::default()
        });
        let payer = Keypair::generate();

        let bogus = BlockhashContext {
            blockhash: Blockhash::new([1; 32]),
            last_valid_block_height: 0,
            current_height: 0,
        };
        assert_eq!(
            backend.submit_transaction(&memo_tx(&bogus, &payer, "x")).await,
            Err(BackendError::Rejected("blockhash not found".into()))
        );

        let ctx = backend.latest_blockhash().await.unwrap();
        backend.advance_blocks(3);
        assert_eq!(
            backend.submit_transaction(&memo_tx(&ctx, &payer, "x")).await,
            Err(BackendError::Rejected("blockhash expired".into()))
        );
    }

    #[tokio::test]
    async fn tampered_transaction_rejected() {
        let backend = SimulatedBackend::default();
        let payer = Keypair::generate();
        let ctx = backend.latest_blockhash().await.unwrap();
        let mut tx = memo_tx(&ctx, &payer, "original");
        tx.message.instructions[0].data = b"forged".to_vec();
        assert_eq!(
            backend.submit_transaction(&tx).await,
            Err(BackendError::Rejected("signature verification failed".into()))
        );
    }

    #[tokio::test]
    async fn duplicate_submission_rejected() {
        let backend = SimulatedBackend::default();
        let payer = Keypair::generate();
        let ctx = backend.latest_blockhash().await.unwrap();
        let tx = memo_tx(&ctx, &payer, "once");
        backend.submit_transaction(&tx).await.unwrap();
        assert!(matches!(
            backend.submit_transaction(&tx).await,
            Err(BackendError::Rejected(_))
        ));
        assert_eq!(backend.submissions().len(), 1);
    }

    #[tokio::test]
    async fn approve_requires_confirmed_proposal() {
        let programs = ProgramIds::default();
        let backend = SimulatedBackend::default();
        let member = Keypair::generate();
        let multisig = Address::new([1; 32]);
        let proposal = Address::new([2; 32]);

        let approve = Instruction::new(
            InstructionKind::ProposalApprove,
            programs.multisig,
            vec![
                AccountMeta::readonly(multisig, false),
                AccountMeta::writable(member.address(), true),
                AccountMeta::writable(proposal, false),
            ],
            [discriminator("proposal_approve").as_slice(), &[0u8]].concat(),
        );
        let mut propose_data = discriminator("proposal_create").to_vec();
        propose_data.extend_from_slice(&1u64.to_le_bytes());
        propose_data.push(0);
        let propose = Instruction::new(
            InstructionKind::ProposalCreate,
            programs.multisig,
            vec![
                AccountMeta::readonly(multisig, false),
                AccountMeta::writable(proposal, false),
                AccountMeta::writable(member.address(), true),
            ],
            propose_data,
        );

        let sign = |ixs: &[Instruction], ctx: &BlockhashContext| {
            let msg = Message::compile(&member.address(), ixs, ctx.blockhash).unwrap();
            SignedTransaction::sign(msg, &[&member]).unwrap()
        };

        let ctx = backend.latest_blockhash().await.unwrap();
        let early = backend.submit_transaction(&sign(&[approve.clone()], &ctx)).await;
        assert!(matches!(early, Err(BackendError::Rejected(r)) if r.contains("does not exist")));

        let setup = backend.submit_transaction(&sign(&[propose], &ctx)).await.unwrap();
        // Created but not yet observed as confirmed.
        let ctx = backend.latest_blockhash().await.unwrap();
        assert!(backend.submit_transaction(&sign(&[approve.clone()], &ctx)).await.is_err());

        while !backend.signature_status(&setup).await.unwrap().is_success() {}
        assert!(backend.is_proposal_confirmed(&proposal));
        assert!(backend.submit_transaction(&sign(&[approve], &ctx)).await.is_ok());
    }

    #[tokio::test]
    async fn scripted_statuses_and_forced_rejections() {
        let backend = SimulatedBackend::default();
        let payer = Keypair::generate();
        backend.script_next_submission(vec![
            Err(BackendError::Transport("connection reset".into())),
            Ok(SignatureStatus::Failed {
                err: "custom program error: 0x1".into(),
            }),
        ]);

        let ctx = backend.latest_blockhash().await.unwrap();
        let sig = backend.submit_transaction(&memo_tx(&ctx, &payer, "a")).await.unwrap();
        assert!(backend.signature_status(&sig).await.unwrap_err().is_transient());
        assert!(matches!(
            backend.signature_status(&sig).await.unwrap(),
            SignatureStatus::Failed { .. }
        ));

        backend.reject_instruction(InstructionKind::Annotation, "memo disabled");
        assert_eq!(
            backend.submit_transaction(&memo_tx(&ctx, &payer, "b")).await,
            Err(BackendError::Rejected("memo disabled".into()))
        );
    }

    #[tokio::test]
    async fn annotations_land_on_confirmation() {
        let backend = SimulatedBackend::default();
        let payer = Keypair::generate();
        let annotation = Annotation::new(
            "INV-9",
            crate::proof::ProofReference {
                integrity_hash: "ff".repeat(32),
                version: "1.0".into(),
            },
        );
        let ctx = backend.latest_blockhash().await.unwrap();
        let text = String::from_utf8(annotation.encode(true).unwrap()).unwrap();
        let sig = backend.submit_transaction(&memo_tx(&ctx, &payer, &text)).await.unwrap();

        assert!(backend.landed_annotations().is_empty());
        backend.signature_status(&sig).await.unwrap();
        backend.signature_status(&sig).await.unwrap();
        assert_eq!(backend.landed_annotations(), vec![annotation]);
    }
}
