// Pipeline benchmarks.
//
// Covers the CPU-bound stages: address derivation (cold and cached), proof
// sealing and opening, batch assembly at various sizes, and message
// compilation plus signing.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use vaultpay_pipeline::address::{find_program_address, AddressDeriver};
use vaultpay_pipeline::assembler::{Assembly, TransactionAssembler};
use vaultpay_pipeline::config::ProgramIds;
use vaultpay_pipeline::crypto::keys::{Keypair, TransactionSigner};
use vaultpay_pipeline::instruction::{InstructionBatch, InstructionBuilder, VaultContext};
use vaultpay_pipeline::invoice::{BusinessMetadata, Invoice, PaymentMethod};
use vaultpay_pipeline::proof::{ProofCodec, ProofReference};
use vaultpay_pipeline::transaction::{Blockhash, Message, SignedTransaction};
use vaultpay_pipeline::PipelineConfig;

const CEILING: usize = 64 * 1024;

fn invoices(count: usize) -> Vec<Invoice> {
    (0..count)
        .map(|i| {
            Invoice::new(
                format!("INV-{i:05}"),
                "1250.75",
                Keypair::from_seed(&[(i % 250) as u8 + 1; 32]).address(),
            )
        })
        .collect()
}

fn business() -> BusinessMetadata {
    BusinessMetadata {
        vendor_id: "vendor-bench".into(),
        payment_method: PaymentMethod::Ach,
        timestamp: 1_760_000_000_000,
        originating_account_id: "acct-bench".into(),
    }
}

fn batch(member: &Keypair, count: usize) -> InstructionBatch {
    let config = PipelineConfig::default();
    let deriver = Arc::new(AddressDeriver::new(config.program_ids.clone()));
    let builder = InstructionBuilder::from_config(deriver.clone(), &config);
    let vault = VaultContext {
        multisig: deriver
            .derive_multisig_address(&member.address())
            .expect("multisig")
            .address,
        vault_index: 0,
        transaction_index: 1,
    };
    let reference = ProofReference {
        integrity_hash: "ef".repeat(32),
        version: "1.0".into(),
    };
    builder
        .build_batch(&vault, member.address(), &invoices(count), &reference)
        .expect("batch")
}

fn bench_derivation(c: &mut Criterion) {
    let programs = ProgramIds::default();
    let create_key = Keypair::from_seed(&[5; 32]).address();

    c.bench_function("derive/find_program_address", |b| {
        b.iter(|| {
            find_program_address(
                &[b"multisig", b"multisig", create_key.as_bytes()],
                &programs.multisig,
            )
        });
    });

    let deriver = AddressDeriver::new(programs.clone());
    c.bench_function("derive/vault_cached", |b| {
        b.iter(|| deriver.derive_vault_address(&create_key, 0));
    });
}

fn bench_proof(c: &mut Criterion) {
    let codec = ProofCodec::new();
    let mut group = c.benchmark_group("proof");

    for count in [1usize, 20, 200] {
        let batch = invoices(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("encode", count), &batch, |b, batch| {
            b.iter(|| codec.encode(&business(), batch));
        });

        let sealed = codec.encode(&business(), &batch).expect("seal");
        group.bench_with_input(BenchmarkId::new("decode", count), &sealed, |b, sealed| {
            b.iter(|| codec.decode(&sealed.envelope, &sealed.key));
        });
    }
    group.finish();
}

/// Size of the atomic form with compact annotations. One byte less forces
/// a split.
fn compact_atomic_size(assembler: &TransactionAssembler, batch: &InstructionBatch) -> usize {
    let mut probe = batch.clone();
    for invoice in &mut probe.invoices {
        invoice.annotation = invoice.compact_annotation.clone();
    }
    match assembler.assemble(&probe, CEILING).expect("probe") {
        Assembly::Atomic(tx) => tx.estimated_size,
        Assembly::Split { setup, .. } => setup.estimated_size,
    }
}

fn bench_assembly(c: &mut Criterion) {
    let member = Keypair::from_seed(&[6; 32]);
    let assembler = TransactionAssembler::new(CEILING);
    let mut group = c.benchmark_group("assemble");

    for count in [1usize, 5, 20] {
        let batch = batch(&member, count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("atomic", count), &batch, |b, batch| {
            b.iter(|| assembler.assemble(batch, CEILING));
        });
        let budget = compact_atomic_size(&assembler, &batch) - 1;
        group.bench_with_input(BenchmarkId::new("split", count), &batch, |b, batch| {
            b.iter(|| assembler.assemble(batch, budget));
        });
    }
    group.finish();
}

fn bench_compile_and_sign(c: &mut Criterion) {
    let member = Keypair::from_seed(&[7; 32]);
    let batch = batch(&member, 1);
    let tx = match TransactionAssembler::new(CEILING)
        .assemble(&batch, CEILING)
        .expect("assembly")
    {
        Assembly::Atomic(tx) => tx,
        Assembly::Split { setup, .. } => setup,
    };
    let blockhash = Blockhash::new([9; 32]);

    c.bench_function("transaction/compile", |b| {
        b.iter(|| Message::compile(&tx.fee_payer, &tx.instructions, blockhash));
    });

    let message = Message::compile(&tx.fee_payer, &tx.instructions, blockhash).expect("compile");
    c.bench_function("transaction/sign", |b| {
        b.iter(|| SignedTransaction::sign(message.clone(), &[&member]));
    });
}

criterion_group!(
    benches,
    bench_derivation,
    bench_proof,
    bench_assembly,
    bench_compile_and_sign
);
criterion_main!(benches);
