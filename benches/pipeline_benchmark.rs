use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use muling_graph_detect::{run_pipeline, PipelineConfig, Transaction};

fn tx(id: usize, sender: String, receiver: String, amount: f64, minutes: i64) -> Transaction {
    Transaction {
        transaction_id: format!("t{id}"),
        sender,
        receiver,
        amount,
        timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes),
    }
}

/// A batch with a handful of planted cycles, fan-in rings, and shell chains
/// scattered across an otherwise random transaction population.
fn generate_batch(n_accounts: usize, n_transactions: usize) -> Vec<Transaction> {
    let mut batch = Vec::with_capacity(n_transactions);
    let mut id = 0;

    for ring in 0..(n_accounts / 50).max(1) {
        let base = format!("RING{ring}");
        let a = format!("{base}_A");
        let b = format!("{base}_B");
        let c = format!("{base}_C");
        batch.push(tx(id, a.clone(), b.clone(), 10_000.0, (ring * 1000) as i64));
        id += 1;
        batch.push(tx(id, b, c.clone(), 9_800.0, (ring * 1000 + 60) as i64));
        id += 1;
        batch.push(tx(id, c, a, 9_600.0, (ring * 1000 + 120) as i64));
        id += 1;
    }

    let mut account = 0usize;
    while batch.len() < n_transactions {
        let sender = format!("ACC{}", account % n_accounts);
        let receiver = format!("ACC{}", (account + 1 + account / 7) % n_accounts);
        batch.push(tx(id, sender, receiver, 100.0 + (account % 500) as f64, account as i64));
        id += 1;
        account += 1;
    }

    batch
}

fn bench_pipeline(c: &mut Criterion) {
    let small = generate_batch(200, 2_000);
    let large = generate_batch(2_000, 20_000);
    let config = PipelineConfig::default();

    c.bench_function("pipeline_small_2k_txns", |b| {
        b.iter(|| run_pipeline(black_box(&small), black_box(&config), None).unwrap())
    });

    c.bench_function("pipeline_large_20k_txns", |b| {
        b.iter(|| run_pipeline(black_box(&large), black_box(&config), None).unwrap())
    });
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
