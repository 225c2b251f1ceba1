//! Pipeline walkthrough
//!
//! This example builds a small synthetic batch covering a cycle, a fan-in
//! smurfing ring, and a shell chain, then runs the detection pipeline and
//! prints the resulting report.

use chrono::{Duration, TimeZone, Utc};
use muling_graph_detect::{run_pipeline, PipelineConfig, Transaction};
use tracing_subscriber::EnvFilter;

fn tx(id: &str, sender: &str, receiver: &str, amount: f64, minutes: i64) -> Transaction {
    Transaction {
        transaction_id: id.to_string(),
        sender: sender.to_string(),
        receiver: receiver.to_string(),
        amount,
        timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("muling_graph_detect=info".parse().unwrap()))
        .init();

    println!("=== Money-Muling Graph Detection ===\n");

    let mut batch = Vec::new();

    // A value-preserving three-hop cycle.
    batch.push(tx("t1", "A", "B", 10_000.0, 0));
    batch.push(tx("t2", "B", "C", 9_800.0, 60));
    batch.push(tx("t3", "C", "A", 9_600.0, 120));

    // A fan-in ring: twelve senders into one collector.
    for i in 0..12 {
        batch.push(tx(&format!("fan{i}"), &format!("SMURF{i}"), "COLLECTOR", 900.0, i * 45));
    }

    // A four-hop shell chain with padding inflow on the origin.
    batch.push(tx("s1", "ORIGIN", "SHELL1", 5_000.0, 1_000));
    batch.push(tx("s2", "SHELL1", "SHELL2", 4_900.0, 1_240));
    batch.push(tx("s3", "SHELL2", "DEST", 4_800.0, 1_480));
    for i in 0..4 {
        batch.push(tx(&format!("pad{i}"), &format!("PAYER{i}"), "ORIGIN", 50.0, 6_000 + i));
    }

    println!("1. Batch summary");
    println!("   transactions: {}", batch.len());
    println!();

    let config = PipelineConfig::default();
    let report = run_pipeline(&batch, &config, None).expect("pipeline run");

    println!("2. Fraud rings");
    for ring in &report.fraud_rings {
        println!(
            "   {} [{}] risk={:.2} members={:?}",
            ring.ring_id,
            ring.pattern_type.as_str(),
            ring.risk_score,
            ring.member_accounts
        );
    }
    println!();

    println!("3. Suspicious accounts");
    for account in &report.suspicious_accounts {
        println!(
            "   {} score={:.2} ring={:?} patterns={:?}",
            account.account_id, account.suspicion_score, account.ring_id, account.detected_patterns
        );
    }
    println!();

    println!("4. Summary");
    println!("   accounts analyzed:   {}", report.summary.total_accounts_analyzed);
    println!("   accounts flagged:    {}", report.summary.suspicious_accounts_flagged);
    println!("   rings detected:      {}", report.summary.fraud_rings_detected);
    println!("   processing time (s): {:.3}", report.summary.processing_time_seconds);
}
