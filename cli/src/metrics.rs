//! # Prometheus Metrics
//!
//! Counters for payment batches and their transactions, plus a histogram of
//! how many status checks confirmation took.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] under the
//! `vaultpay` namespace.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

use vaultpay_pipeline::assembler::AssemblyKind;
use vaultpay_pipeline::confirmation::ConfirmationRecord;

#[derive(Clone)]
pub struct PipelineMetrics {
    registry: Registry,
    /// Batches attempted, by assembly kind (`atomic`, `split`, `none`).
    pub batches_total: IntCounterVec,
    /// Transactions accepted by the backend.
    pub transactions_submitted_total: IntCounter,
    /// Terminal confirmation outcomes, by status.
    pub confirmations_total: IntCounterVec,
    /// Status checks spent per watched signature.
    pub confirmation_attempts: Histogram,
}

impl PipelineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("vaultpay".into()), None)?;

        let batches_total = IntCounterVec::new(
            Opts::new("batches_total", "Payment batches attempted"),
            &["kind"],
        )?;
        registry.register(Box::new(batches_total.clone()))?;

        let transactions_submitted_total = IntCounter::new(
            "transactions_submitted_total",
            "Transactions accepted by the execution backend",
        )?;
        registry.register(Box::new(transactions_submitted_total.clone()))?;

        let confirmations_total = IntCounterVec::new(
            Opts::new("confirmations_total", "Terminal confirmation outcomes"),
            &["status"],
        )?;
        registry.register(Box::new(confirmations_total.clone()))?;

        let confirmation_attempts = Histogram::with_opts(
            HistogramOpts::new(
                "confirmation_attempts",
                "Status checks spent before a signature reached a terminal state",
            )
            .buckets(vec![1.0, 2.0, 3.0, 4.0, 6.0, 8.0, 12.0]),
        )?;
        registry.register(Box::new(confirmation_attempts.clone()))?;

        Ok(Self {
            registry,
            batches_total,
            transactions_submitted_total,
            confirmations_total,
            confirmation_attempts,
        })
    }

    pub fn observe_batch(&self, kind: Option<AssemblyKind>) {
        let label = match kind {
            Some(AssemblyKind::Atomic) => "atomic",
            Some(AssemblyKind::Split) => "split",
            None => "none",
        };
        self.batches_total.with_label_values(&[label]).inc();
    }

    pub fn observe_submitted(&self, count: usize) {
        self.transactions_submitted_total.inc_by(count as u64);
    }

    pub fn observe_confirmation(&self, record: &ConfirmationRecord) {
        let status = record.status().to_string();
        self.confirmations_total.with_label_values(&[&status]).inc();
        self.confirmation_attempts.observe(f64::from(record.attempts));
    }

    /// Encodes all registered metrics in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
