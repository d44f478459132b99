//! # Invoices & Business Metadata
//!
//! The pipeline's inputs. An [`Invoice`] is what gets paid; the
//! [`BusinessMetadata`] is opaque context that only ends up inside the
//! encrypted proof payload.
//!
//! Amounts arrive as decimal strings (`"150.00"`) and are converted to
//! integer base units with [`to_base_units`] before any instruction is
//! built. Floating point never touches an amount.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::keys::Address;

/// Why an amount string could not be converted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,

    #[error("amount {0:?} is not a decimal number")]
    Malformed(String),

    #[error("amount {0:?} must be greater than zero")]
    NotPositive(String),

    #[error("amount {amount:?} has more than {decimals} fractional digits")]
    TooPrecise { amount: String, decimals: u8 },

    #[error("amount {0:?} overflows u64 base units")]
    Overflow(String),
}

/// Why an invoice batch was refused before any work started.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvoiceError {
    #[error("invoice batch is empty")]
    EmptyBatch,

    #[error("invoice at position {0} has an empty number")]
    MissingNumber(usize),

    #[error("invoice number {0:?} appears more than once")]
    DuplicateNumber(String),
}

/// A single invoice to pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub number: String,
    /// Decimal amount in display units, e.g. `"150.00"`.
    pub amount: String,
    /// Wallet that receives the payment. Its token account is derived.
    pub recipient: Address,
}

impl Invoice {
    pub fn new(number: impl Into<String>, amount: impl Into<String>, recipient: Address) -> Self {
        Self {
            number: number.into(),
            amount: amount.into(),
            recipient,
        }
    }

    /// Amount in integer base units of a mint with `decimals` places.
    pub fn base_units(&self, decimals: u8) -> Result<u64, AmountError> {
        to_base_units(&self.amount, decimals)
    }
}

/// How the underlying business obligation was originally settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Ach,
    Wire,
    Card,
    Stablecoin,
}

/// Context carried into the proof payload. Not interpreted by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessMetadata {
    pub vendor_id: String,
    pub payment_method: PaymentMethod,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub originating_account_id: String,
}

/// Checks batch-level invariants: non-empty, every number present and
/// unique. Amounts are checked later, per invoice, by the builder.
pub fn validate_batch(invoices: &[Invoice]) -> Result<(), InvoiceError> {
    if invoices.is_empty() {
        return Err(InvoiceError::EmptyBatch);
    }
    let mut seen = HashSet::with_capacity(invoices.len());
    for (i, invoice) in invoices.iter().enumerate() {
        if invoice.number.trim().is_empty() {
            return Err(InvoiceError::MissingNumber(i));
        }
        if !seen.insert(invoice.number.as_str()) {
            return Err(InvoiceError::DuplicateNumber(invoice.number.clone()));
        }
    }
    Ok(())
}

/// Converts a decimal string into base units.
///
/// `"150.5"` with 6 decimals is `150_500_000`. Leading `+`, exponents,
/// signs and separators are rejected; so is any amount that rounds to zero
/// or needs more fractional digits than the mint has.
pub fn to_base_units(amount: &str, decimals: u8) -> Result<u64, AmountError> {
    let trimmed = amount.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Empty);
    }
    let malformed = || AmountError::Malformed(amount.to_string());

    let (whole, fraction) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(malformed());
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !all_digits(fraction) {
        if trimmed.starts_with('-') {
            return Err(AmountError::NotPositive(amount.to_string()));
        }
        return Err(malformed());
    }

    let significant_fraction = fraction.trim_end_matches('0');
    if significant_fraction.len() > decimals as usize {
        return Err(AmountError::TooPrecise {
            amount: amount.to_string(),
            decimals,
        });
    }

    let overflow = || AmountError::Overflow(amount.to_string());
    let scale = 10u64.checked_pow(u32::from(decimals)).ok_or_else(overflow)?;

    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<u64>().map_err(|_| overflow())?
    };

    let fraction_units = if significant_fraction.is_empty() {
        0
    } else {
        let padded = format!("{significant_fraction:0<width$}", width = decimals as usize);
        padded.parse::<u64>().map_err(|_| malformed())?
    };

    let total = whole_units
        .checked_mul(scale)
        .and_then(|w| w.checked_add(fraction_units))
        .ok_or_else(overflow)?;

    if total == 0 {
        return Err(AmountError::NotPositive(amount.to_string()));
    }
    Ok(total)
}
