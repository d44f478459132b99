// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # VaultPay CLI
//!
//! Entry point for the `vaultpay` binary. Parses arguments, initializes
//! logging, and dispatches:
//!
//! - `derive`       derive multisig, vault, transaction, and proposal addresses
//! - `simulate`     pay an invoice batch against the in-memory backend
//! - `decode-proof` open a proof envelope with its key
//! - `version`      print build version information
//!
//! Command output goes to stdout as JSON; logs go to stderr.

mod cli;
mod logging;
mod metrics;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;

use vaultpay_pipeline::address::{parse_authority, AddressDeriver};
use vaultpay_pipeline::backend::{SimulatedBackend, SimulatedConfig};
use vaultpay_pipeline::config::{PipelineConfig, PIPELINE_VERSION, PROOF_VERSION};
use vaultpay_pipeline::crypto::keys::{Keypair, TransactionSigner};
use vaultpay_pipeline::instruction::VaultContext;
use vaultpay_pipeline::invoice::{BusinessMetadata, Invoice, PaymentMethod};
use vaultpay_pipeline::payment::{
    JsonLinesRecorder, MemoryRecorder, PaymentError, PaymentPipeline, PaymentReceipt,
    TransactionRecorder,
};
use vaultpay_pipeline::proof::{ProofCodec, ProofEnvelope, ProofKey};

use cli::{Commands, VaultPayCli};
use metrics::PipelineMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = VaultPayCli::parse();
    logging::init_logging(&cli.log_level, cli.log_format.into());

    match cli.command {
        Commands::Derive(args) => derive(cli.config.as_deref(), args),
        Commands::Simulate(args) => simulate(cli.config.as_deref(), args).await,
        Commands::DecodeProof(args) => decode_proof(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn derive(config_path: Option<&Path>, args: cli::DeriveArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let deriver = AddressDeriver::new(config.program_ids.clone());

    let multisig = match (&args.multisig, &args.create_key) {
        (Some(multisig), _) => parse_authority(multisig)?,
        (None, Some(create_key)) => {
            deriver
                .derive_multisig_address(&parse_authority(create_key)?)?
                .address
        }
        (None, None) => anyhow::bail!("one of --multisig or --create-key is required"),
    };

    let vault = deriver.derive_vault_address(&multisig, args.vault_index)?;
    let transaction = deriver.derive_transaction_address(&multisig, args.transaction_index)?;
    let proposal = deriver.derive_proposal_address(&multisig, args.transaction_index)?;

    let mint = match &args.mint {
        Some(mint) => parse_authority(mint)?,
        None => config.mint,
    };
    let vault_token_account = deriver.derive_associated_token_address(&vault.address, &mint, true)?;

    let mut out = json!({
        "multisig": multisig,
        "vault": vault,
        "vaultTokenAccount": vault_token_account,
        "transaction": transaction,
        "proposal": proposal,
    });

    if let Some(owner) = &args.owner {
        let owner = parse_authority(owner)?;
        let token_account = deriver
            .derive_associated_token_address(&owner, &mint, false)
            .context("owner must be a wallet key; vault token accounts are derived with the vault")?;
        out["tokenAccount"] = json!(token_account);
    }

    print_json(&out)
}

async fn simulate(config_path: Option<&Path>, args: cli::SimulateArgs) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(budget) = args.budget {
        config.size_budget = budget;
    }
    let metrics = PipelineMetrics::new().context("failed to create metrics registry")?;

    let member = match &args.member_key {
        Some(hex) => Keypair::from_hex(hex).context("invalid --member-key")?,
        None => Keypair::generate(),
    };

    let deriver = AddressDeriver::new(config.program_ids.clone());
    let vault = VaultContext {
        multisig: deriver.derive_multisig_address(&member.address())?.address,
        vault_index: 0,
        transaction_index: args.transaction_index,
    };

    let invoices = match &args.invoices_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read invoices from {}", path.display()))?;
            serde_json::from_str::<Vec<Invoice>>(&raw)
                .with_context(|| format!("failed to parse invoices in {}", path.display()))?
        }
        None => demo_invoices(args.invoices, &args.amount),
    };

    let backend = Arc::new(SimulatedBackend::new(SimulatedConfig {
        max_transaction_size: config.max_transaction_size,
        confirm_after_polls: args.confirm_after,
        program_ids: config.program_ids.clone(),
        ..SimulatedConfig::default()
    }));
    let recorder: Arc<dyn TransactionRecorder> = match &args.ledger {
        Some(path) => Arc::new(JsonLinesRecorder::new(path)),
        None => Arc::new(MemoryRecorder::new()),
    };

    let pipeline = PaymentPipeline::new(config, backend, recorder)?;
    let business = business_metadata(&args);

    tracing::info!(
        invoices = invoices.len(),
        member = %member.address(),
        multisig = %vault.multisig,
        "running payment batch"
    );

    let outcome = pipeline
        .create_and_submit_payment_batch(&invoices, &vault, &business, &member)
        .await;
    observe(&metrics, &outcome);

    let result = match outcome {
        Ok(receipt) => print_json(&receipt_json(&receipt)),
        Err(err) => {
            if let Some(proof) = err.sealed_proof() {
                // The batch may still land; the key must not be lost with the error.
                print_json(&json!({
                    "error": err.to_string(),
                    "envelope": proof.envelope,
                    "key": proof.key.to_hex(),
                }))?;
            }
            Err(anyhow::Error::new(err).context("payment batch did not complete"))
        }
    };

    if args.metrics {
        print!("{}", metrics.encode()?);
    }
    result
}

fn observe(metrics: &PipelineMetrics, outcome: &Result<PaymentReceipt, PaymentError>) {
    match outcome {
        Ok(receipt) => {
            metrics.observe_batch(Some(receipt.assembly_kind));
            metrics.observe_submitted(receipt.signatures.len());
            for record in &receipt.confirmations {
                metrics.observe_confirmation(record);
            }
        }
        Err(PaymentError::NotConfirmed {
            record, signatures, ..
        }) => {
            metrics.observe_batch(None);
            metrics.observe_submitted(signatures.len());
            metrics.observe_confirmation(record);
        }
        Err(_) => metrics.observe_batch(None),
    }
}

fn receipt_json(receipt: &PaymentReceipt) -> serde_json::Value {
    json!({
        "submissionId": receipt.submission_id,
        "assemblyKind": receipt.assembly_kind,
        "totalAmount": receipt.total_amount,
        "signatures": receipt.signatures,
        "confirmations": receipt.confirmations,
        "envelope": receipt.envelope(),
        "key": receipt.key().to_hex(),
    })
}

fn business_metadata(args: &cli::SimulateArgs) -> BusinessMetadata {
    BusinessMetadata {
        vendor_id: args.vendor_id.clone(),
        payment_method: PaymentMethod::Stablecoin,
        timestamp: chrono::Utc::now().timestamp_millis(),
        originating_account_id: args.originating_account.clone(),
    }
}

fn demo_invoices(count: usize, amount: &str) -> Vec<Invoice> {
    (0..count)
        .map(|i| {
            Invoice::new(
                format!("DEMO-{:04}", i + 1),
                amount,
                Keypair::generate().address(),
            )
        })
        .collect()
}

fn decode_proof(args: cli::DecodeProofArgs) -> Result<()> {
    let raw = std::fs::read_to_string(&args.envelope)
        .with_context(|| format!("failed to read envelope from {}", args.envelope.display()))?;
    let envelope: ProofEnvelope =
        serde_json::from_str(&raw).context("envelope is not valid JSON")?;
    let key = ProofKey::from_hex(&args.key).context("invalid proof key")?;

    let payload = ProofCodec::new()
        .decode(&envelope, &key)
        .context("proof did not open")?;
    print_json(&serde_json::to_value(&payload)?)
}

fn print_version() {
    println!("vaultpay  {}", env!("CARGO_PKG_VERSION"));
    println!("pipeline  {}", PIPELINE_VERSION);
    println!("proof     {}", PROOF_VERSION);
}
