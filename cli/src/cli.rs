//! # CLI Interface
//!
//! Argument structure for the `vaultpay` binary, via `clap` derive.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// VaultPay operator tool.
///
/// Derives vault addresses, runs payment batches against the simulated
/// backend, and opens proof envelopes.
#[derive(Parser, Debug)]
#[command(
    name = "vaultpay",
    about = "Vault payment pipeline operator tool",
    version,
    propagate_version = true
)]
pub struct VaultPayCli {
    /// Pipeline config file (JSON). Defaults apply when omitted.
    #[arg(long, short = 'c', global = true, env = "VAULTPAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "vaultpay=info,vaultpay_pipeline=info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Derive the multisig, vault, transaction, and proposal addresses.
    Derive(DeriveArgs),
    /// Pay a batch of invoices against the in-memory backend.
    Simulate(SimulateArgs),
    /// Decrypt a proof envelope and check its integrity hash.
    DecodeProof(DecodeProofArgs),
    /// Print version information and exit.
    Version,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

#[derive(Args, Debug)]
pub struct DeriveArgs {
    /// Base58 create key the multisig was created with.
    #[arg(long, conflicts_with = "multisig", required_unless_present = "multisig")]
    pub create_key: Option<String>,

    /// Base58 multisig address, when already known.
    #[arg(long)]
    pub multisig: Option<String>,

    #[arg(long, default_value_t = 0)]
    pub vault_index: u8,

    #[arg(long, default_value_t = 1)]
    pub transaction_index: u64,

    /// Mint for the vault token account. Defaults to the configured mint.
    #[arg(long)]
    pub mint: Option<String>,

    /// Also derive this wallet's token account.
    #[arg(long)]
    pub owner: Option<String>,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of generated demo invoices.
    #[arg(long, short = 'n', default_value_t = 3, conflicts_with = "invoices_file")]
    pub invoices: usize,

    /// Amount of each generated invoice.
    #[arg(long, default_value = "100.00")]
    pub amount: String,

    /// Invoice batch file: a JSON array of `{number, amount, recipient}`.
    #[arg(long, short = 'i')]
    pub invoices_file: Option<PathBuf>,

    /// Size budget in bytes, overriding the config.
    #[arg(long)]
    pub budget: Option<usize>,

    /// Hex-encoded 32-byte seed of the paying multisig member.
    /// A fresh key is generated when omitted.
    #[arg(long, env = "VAULTPAY_MEMBER_KEY")]
    pub member_key: Option<String>,

    #[arg(long, default_value = "vendor-001")]
    pub vendor_id: String,

    #[arg(long, default_value = "operating-001")]
    pub originating_account: String,

    #[arg(long, default_value_t = 1)]
    pub transaction_index: u64,

    /// Pending polls before the simulated backend confirms.
    #[arg(long, default_value_t = 1)]
    pub confirm_after: u32,

    /// Append the transaction record to this JSON-lines file.
    #[arg(long)]
    pub ledger: Option<PathBuf>,

    /// Print Prometheus metrics after the run.
    #[arg(long)]
    pub metrics: bool,
}

#[derive(Args, Debug)]
pub struct DecodeProofArgs {
    /// Proof envelope file (JSON).
    #[arg(long, short = 'e')]
    pub envelope: PathBuf,

    /// Hex-encoded proof key.
    #[arg(long, short = 'k', env = "VAULTPAY_PROOF_KEY")]
    pub key: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        VaultPayCli::command().debug_assert();
    }

    #[test]
    fn derive_requires_a_multisig_source() {
        assert!(VaultPayCli::try_parse_from(["vaultpay", "derive"]).is_err());
        let cli = VaultPayCli::try_parse_from([
            "vaultpay",
            "derive",
            "--multisig",
            "11111111111111111111111111111111",
            "--vault-index",
            "2",
        ])
        .unwrap();
        let Commands::Derive(args) = cli.command else {
            panic!("expected derive");
        };
        assert_eq!(args.vault_index, 2);
        assert_eq!(args.transaction_index, 1);
    }

    #[test]
    fn simulate_defaults() {
        let cli = VaultPayCli::try_parse_from(["vaultpay", "simulate", "--budget", "900"]).unwrap();
        let Commands::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.invoices, 3);
        assert_eq!(args.amount, "100.00");
        assert_eq!(args.budget, Some(900));
        assert!(!args.metrics);
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli =
            VaultPayCli::try_parse_from(["vaultpay", "version", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format, LogFormatArg::Json);
    }
}
