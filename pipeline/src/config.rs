//! # Pipeline Configuration & Constants
//!
//! Every protocol constant the pipeline depends on lives here: the hard
//! transaction-size ceiling, address-derivation seeds, well-known program
//! ids, token decimals, cipher parameters, and the confirmation retry
//! envelope.
//!
//! Runtime-tunable values are grouped in [`PipelineConfig`], which can be
//! loaded from a JSON file and falls back to the constants below for any
//! field the file omits.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::keys::Address;

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

/// Crate version, surfaced by the CLI.
pub const PIPELINE_VERSION: &str = "0.1.0";

/// Version tag written into every proof envelope. Decoders reject anything
/// they don't recognize.
pub const PROOF_VERSION: &str = "1.0";

/// Schema version embedded in each annotation instruction.
pub const ANNOTATION_SCHEMA_VERSION: &str = "1";

// ---------------------------------------------------------------------------
// Transaction Size
// ---------------------------------------------------------------------------

/// Hard ceiling on a serialized transaction (IPv6 MTU minus headers).
/// Nothing the assembler emits may estimate above this.
pub const MAX_TRANSACTION_SIZE: usize = 1232;

/// Ed25519 signature length in bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// Account key length in bytes.
pub const ACCOUNT_KEY_LENGTH: usize = 32;

/// Fixed per-transaction overhead: signature count prefix, one signature,
/// the three-byte message header, the recent blockhash, and the account-key
/// and instruction count prefixes.
pub const TRANSACTION_BASE_OVERHEAD: usize = 1 + SIGNATURE_LENGTH + 3 + 32 + 1 + 1;

/// Fixed per-instruction overhead: program index, account-index length
/// prefix, and a two-byte data length prefix (upper bound for short-vec).
pub const INSTRUCTION_BASE_OVERHEAD: usize = 4;

/// Bytes each account reference costs inside an instruction (one index byte;
/// the key itself is charged once in the transaction's key table).
pub const PER_ACCOUNT_BYTES: usize = 1;

// ---------------------------------------------------------------------------
// Address Derivation
// ---------------------------------------------------------------------------

/// Maximum length of a single derivation seed.
pub const MAX_SEED_LENGTH: usize = 32;

/// Maximum number of seeds, bump included.
pub const MAX_SEEDS: usize = 16;

/// Number of bump values tried before giving up (255 down to 0).
pub const MAX_BUMP_ATTEMPTS: usize = 256;

/// Domain marker appended to every program-derived address preimage.
pub const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

/// Seed prefix shared by every multisig-program account.
pub const SEED_PREFIX: &[u8] = b"multisig";

/// Seed selecting the multisig account itself.
pub const SEED_MULTISIG: &[u8] = b"multisig";

/// Seed selecting a vault under a multisig.
pub const SEED_VAULT: &[u8] = b"vault";

/// Seed selecting a vault transaction under a multisig.
pub const SEED_TRANSACTION: &[u8] = b"transaction";

/// Seed selecting the proposal attached to a vault transaction.
pub const SEED_PROPOSAL: &[u8] = b"proposal";

// ---------------------------------------------------------------------------
// Program IDs
// ---------------------------------------------------------------------------

/// Multisig program (Squads v4 layout).
pub const MULTISIG_PROGRAM_ID: &str = "SQDS4ep65T869zMMBKyuUq6aD6EgTu8psMjkvj52pCf";

/// SPL token program.
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

/// Associated token account program.
pub const ASSOCIATED_TOKEN_PROGRAM_ID: &str = "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL";

/// Memo program, used for invoice annotations.
pub const MEMO_PROGRAM_ID: &str = "MemoSq4gqABAXKb1qfsR2cDB1ND58oaKaJxpCqdcLBw";

/// System program (all-zero key).
pub const SYSTEM_PROGRAM_ID: &str = "11111111111111111111111111111111";

/// Default settlement mint (devnet USDC).
pub const DEFAULT_MINT: &str = "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU";

/// Decimal places of the stable settlement token.
pub const STABLE_TOKEN_DECIMALS: u8 = 6;

// ---------------------------------------------------------------------------
// Symmetric Encryption
// ---------------------------------------------------------------------------

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes. Twelve, always.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

// ---------------------------------------------------------------------------
// Confirmation Retry Envelope
// ---------------------------------------------------------------------------

/// Status polls before the final last-chance check.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Delay before the second poll. Doubles from there.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Growth factor between successive poll delays.
pub const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;

/// Upper bound on any single poll delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(8);

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating a [`PipelineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Backoff parameters for the confirmation watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: u32,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay_ms: DEFAULT_INITIAL_DELAY.as_millis() as u64,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_delay_ms: DEFAULT_MAX_DELAY.as_millis() as u64,
        }
    }
}

/// Program ids the pipeline builds instructions against.
///
/// Defaults to the mainnet deployments. Override in config to point at a
/// local validator or a forked program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramIds {
    pub multisig: Address,
    pub token: Address,
    pub associated_token: Address,
    pub memo: Address,
    pub system: Address,
}

impl Default for ProgramIds {
    fn default() -> Self {
        Self {
            multisig: Address::from_static(MULTISIG_PROGRAM_ID),
            token: Address::from_static(TOKEN_PROGRAM_ID),
            associated_token: Address::from_static(ASSOCIATED_TOKEN_PROGRAM_ID),
            memo: Address::from_static(MEMO_PROGRAM_ID),
            system: Address::from_static(SYSTEM_PROGRAM_ID),
        }
    }
}

/// Tunable pipeline parameters.
///
/// Every field has a default, so a config file only needs to list what it
/// changes:
///
/// ```json
/// { "size_budget": 1024, "retry": { "max_retries": 8 } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Hard ceiling enforced by the execution backend.
    pub max_transaction_size: usize,
    /// Budget the assembler aims for. Clamped to `max_transaction_size`.
    pub size_budget: usize,
    /// Settlement token mint.
    pub mint: Address,
    /// Decimal places of `mint`.
    pub token_decimals: u8,
    pub retry: RetrySettings,
    pub program_ids: ProgramIds,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_transaction_size: MAX_TRANSACTION_SIZE,
            size_budget: MAX_TRANSACTION_SIZE,
            mint: Address::from_static(DEFAULT_MINT),
            token_decimals: STABLE_TOKEN_DECIMALS,
            retry: RetrySettings::default(),
            program_ids: ProgramIds::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads and validates a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would make the pipeline unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_transaction_size <= TRANSACTION_BASE_OVERHEAD {
            return Err(ConfigError::Invalid(format!(
                "max_transaction_size must exceed the {TRANSACTION_BASE_OVERHEAD}-byte base overhead"
            )));
        }
        if self.size_budget == 0 {
            return Err(ConfigError::Invalid("size_budget must be positive".into()));
        }
        if self.retry.max_retries == 0 {
            return Err(ConfigError::Invalid("retry.max_retries must be at least 1".into()));
        }
        if self.retry.backoff_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "retry.backoff_multiplier must be at least 1".into(),
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.initial_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        if self.token_decimals > 18 {
            return Err(ConfigError::Invalid("token_decimals above 18 overflows u64 scaling".into()));
        }
        Ok(())
    }

    /// The budget the assembler should actually use.
    pub fn effective_budget(&self) -> usize {
        self.size_budget.min(self.max_transaction_size)
    }
}
