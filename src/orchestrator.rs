//! Runs the full detection DAG: builds the graph, runs the structural and
//! behavioural detectors, assigns ring ids, and fuses every signal into the
//! final per-account score.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tracing::info;

use crate::anomaly;
use crate::config::PipelineConfig;
use crate::contagion;
use crate::cycles::{self, Cycle};
use crate::features;
use crate::graph::TransactionGraph;
use crate::profiler::{self, MuleCollectorFinding, MuleRiskLabel};
use crate::shells::{self, ShellChain};
use crate::smurfing::{self, SmurfPattern, SmurfingRing};
use crate::{
    AccountId, AnalysisSummary, FraudRing, PatternType, PipelineError, PipelineOutput,
    ScoreProvider, SuspiciousAccount, Transaction,
};

/// Run the whole pipeline over `transactions` and return the ranked report.
///
/// `score_provider`, when given, replaces the in-crate anomaly scorer as the
/// sender-side signal fed into contagion propagation; when absent the
/// isolation-forest-style scorer is used instead.
pub fn run_pipeline(
    transactions: &[Transaction],
    config: &PipelineConfig,
    score_provider: Option<&dyn ScoreProvider>,
) -> Result<PipelineOutput, PipelineError> {
    let start = Instant::now();

    let graph = TransactionGraph::build(transactions);
    info!(nodes = graph.node_count(), edges = graph.edge_count(), "graph built");

    // Cycle, smurfing, and shell detection read disjoint views of the same
    // read-only graph and can run concurrently.
    let (cycles, (smurf_rings, shell_chains)) = rayon::join(
        || cycles::detect(&graph, config),
        || rayon::join(|| smurfing::detect(&graph, config), || shells::detect(&graph, config)),
    );

    let (feature_table, profiles) = rayon::join(
        || features::extract(&graph, &cycles, config),
        || profiler::build_profiles(&graph),
    );

    let raw_scores: HashMap<AccountId, f64> = match score_provider {
        Some(provider) => {
            let predicted = provider.predict(transactions);
            graph
                .accounts()
                .into_iter()
                .map(|a| (a.clone(), predicted.get(a).copied().unwrap_or(0.0)))
                .collect()
        }
        None => anomaly::score(&feature_table, config),
    };
    let fused_sender_scores = contagion::propagate(&graph, &raw_scores, config);

    let s1_scores = profiler::s1_scores(&graph, &profiles);
    let rapid_exit = profiler::rapid_inflow_exit(&graph, &profiles);
    let mule_findings = profiler::detect_mule_collectors(&graph, config);

    check_timeout(&start, config)?;

    let mut assigned: HashMap<AccountId, String> = HashMap::new();
    let mut rings: Vec<FraudRing> = Vec::new();
    let mut counters: HashMap<String, usize> = HashMap::new();

    assign_cycle_rings(&cycles, &mut assigned, &mut rings, &mut counters)?;
    assign_smurf_rings(&smurf_rings, &mut assigned, &mut rings, &mut counters)?;
    assign_shell_rings(&shell_chains, &mut assigned, &mut rings, &mut counters)?;

    for ring in &rings {
        for member in &ring.member_accounts {
            if graph.stats(member).is_none() {
                return Err(PipelineError::InconsistentRingState(format!(
                    "ring {} references unknown account {}",
                    ring.ring_id, member
                )));
            }
        }
    }

    let labels = accumulate_labels(&cycles, &smurf_rings, &shell_chains, &rapid_exit, &mule_findings);
    let rapid_exit_accounts: HashSet<&AccountId> = rapid_exit.iter().map(|a| &a.account).collect();
    let mule_by_account: HashMap<&AccountId, &MuleCollectorFinding> =
        mule_findings.iter().map(|f| (&f.account, f)).collect();

    let mut suspicious = Vec::new();
    for account in graph.accounts() {
        let sender_side = fused_sender_scores.get(account).copied().unwrap_or(0.0);
        let s1 = s1_scores.get(account).copied().unwrap_or(0.0);
        let mule_score = mule_by_account.get(account).map(|f| f.score).unwrap_or(0.0);
        let rapid_exit_score = if rapid_exit_accounts.contains(account) { 95.0 } else { 0.0 };
        let receiver_side = s1.max(mule_score).max(rapid_exit_score);

        let mut score = sender_side.max(receiver_side);

        let account_labels = labels.get(account).cloned().unwrap_or_default();
        let critical_mule = mule_by_account
            .get(account)
            .map(|f| f.label == MuleRiskLabel::Critical)
            .unwrap_or(false);
        let high_priority = critical_mule
            || account_labels.iter().any(|l| {
                l == "cycle_member" || l == "shell_member" || l.ends_with("_center") || l == "rapid_exit_detected"
            });

        let ring_id = assigned.get(account).cloned();

        if high_priority {
            score = score.max(90.0);
        } else if ring_id.is_some() {
            score = score.max(65.0);
        }

        if score < config.report_threshold {
            continue;
        }

        let mut metadata = HashMap::new();
        if sender_side > 0.0 {
            metadata.insert("sender_side_score".to_string(), format!("{:.2}", sender_side));
        }
        if receiver_side > 0.0 {
            metadata.insert("receiver_side_score".to_string(), format!("{:.2}", receiver_side));
        }

        let mut detected_patterns: Vec<String> = account_labels.into_iter().collect();
        detected_patterns.sort();

        suspicious.push(SuspiciousAccount {
            account_id: account.clone(),
            suspicion_score: round2(score),
            detected_patterns,
            ring_id,
            metadata,
        });
    }

    suspicious.sort_by(|a, b| {
        b.suspicion_score
            .partial_cmp(&a.suspicion_score)
            .unwrap()
            .then_with(|| a.account_id.cmp(&b.account_id))
    });

    let summary = AnalysisSummary {
        total_accounts_analyzed: graph.node_count(),
        suspicious_accounts_flagged: suspicious.len(),
        fraud_rings_detected: rings.len(),
        processing_time_seconds: round2(start.elapsed().as_secs_f64()),
    };

    Ok(PipelineOutput {
        suspicious_accounts: suspicious,
        fraud_rings: rings,
        summary,
    })
}

fn check_timeout(start: &Instant, config: &PipelineConfig) -> Result<(), PipelineError> {
    if let Some(limit) = config.batch_timeout {
        if start.elapsed() > limit {
            return Err(PipelineError::Timeout);
        }
    }
    Ok(())
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn make_ring_id(counters: &mut HashMap<String, usize>, type_name: &str) -> String {
    let counter = counters.entry(type_name.to_string()).or_insert(0);
    *counter += 1;
    format!("RING_{}_{:03}", type_name, counter)
}

fn assign_cycle_rings(
    cycles: &[Cycle],
    assigned: &mut HashMap<AccountId, String>,
    rings: &mut Vec<FraudRing>,
    counters: &mut HashMap<String, usize>,
) -> Result<(), PipelineError> {
    for cycle in cycles {
        if cycle.members.is_empty() {
            return Err(PipelineError::DivisionByZero("cycle with no members".to_string()));
        }
        let ring_id = make_ring_id(counters, "CYCLE");
        let risk = (90.0 + 2.0 * cycle.members.len() as f64).min(100.0);
        for member in &cycle.members {
            assigned.entry(member.clone()).or_insert_with(|| ring_id.clone());
        }
        rings.push(FraudRing {
            ring_id,
            member_accounts: cycle.members.clone(),
            pattern_type: PatternType::Cycle,
            risk_score: round2(risk),
        });
    }
    Ok(())
}

fn assign_smurf_rings(
    smurf_rings: &[SmurfingRing],
    assigned: &mut HashMap<AccountId, String>,
    rings: &mut Vec<FraudRing>,
    counters: &mut HashMap<String, usize>,
) -> Result<(), PipelineError> {
    for ring in smurf_rings {
        if ring.members.is_empty() {
            return Err(PipelineError::DivisionByZero("smurfing ring with no members".to_string()));
        }
        let ring_id = make_ring_id(counters, "SMURF");
        let risk = if ring.pattern == SmurfPattern::FanInOut { 95.0 } else { 85.0 };
        for member in &ring.members {
            assigned.entry(member.clone()).or_insert_with(|| ring_id.clone());
        }
        let pattern_type = match ring.pattern {
            SmurfPattern::FanIn => PatternType::FanIn,
            SmurfPattern::FanOut => PatternType::FanOut,
            SmurfPattern::FanInOut => PatternType::FanInOut,
        };
        rings.push(FraudRing {
            ring_id,
            member_accounts: ring.members.clone(),
            pattern_type,
            risk_score: round2(risk),
        });
    }
    Ok(())
}

fn assign_shell_rings(
    chains: &[ShellChain],
    assigned: &mut HashMap<AccountId, String>,
    rings: &mut Vec<FraudRing>,
    counters: &mut HashMap<String, usize>,
) -> Result<(), PipelineError> {
    for chain in chains {
        let n = chain.members.len();
        if n == 0 {
            return Err(PipelineError::DivisionByZero("shell chain with no members".to_string()));
        }
        let overlap = chain.members.iter().filter(|m| assigned.contains_key(*m)).count();
        if overlap as f64 / n as f64 > 0.5 {
            continue;
        }
        let ring_id = make_ring_id(counters, "SHELL");
        for member in &chain.members {
            assigned.entry(member.clone()).or_insert_with(|| ring_id.clone());
        }
        rings.push(FraudRing {
            ring_id,
            member_accounts: chain.members.clone(),
            pattern_type: PatternType::LayeredShell,
            risk_score: round2(80.0),
        });
    }
    Ok(())
}

fn accumulate_labels(
    cycles: &[Cycle],
    smurf_rings: &[SmurfingRing],
    shell_chains: &[ShellChain],
    rapid_exit: &[profiler::RapidExitAlert],
    mule_findings: &[MuleCollectorFinding],
) -> HashMap<AccountId, HashSet<String>> {
    let mut labels: HashMap<AccountId, HashSet<String>> = HashMap::new();

    for cycle in cycles {
        for member in &cycle.members {
            labels.entry(member.clone()).or_default().insert("cycle_member".to_string());
        }
    }
    for ring in smurf_rings {
        labels
            .entry(ring.centre.clone())
            .or_default()
            .insert(format!("{}_center", ring.pattern.as_str()));
    }
    for chain in shell_chains {
        for member in &chain.members {
            labels.entry(member.clone()).or_default().insert("shell_member".to_string());
        }
    }
    for alert in rapid_exit {
        labels
            .entry(alert.account.clone())
            .or_default()
            .insert("rapid_exit_detected".to_string());
    }
    for finding in mule_findings {
        labels
            .entry(finding.account.clone())
            .or_default()
            .insert(format!("mule_collector_risk:{}", mule_label_str(finding.label)));
    }

    labels
}

fn mule_label_str(label: MuleRiskLabel) -> &'static str {
    match label {
        MuleRiskLabel::Critical => "critical",
        MuleRiskLabel::High => "high",
        MuleRiskLabel::Medium => "medium",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn tx(id: &str, s: &str, r: &str, amount: f64, minutes: i64) -> Transaction {
        Transaction {
            transaction_id: id.to_string(),
            sender: s.to_string(),
            receiver: r.to_string(),
            amount,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minutes),
        }
    }

    #[test]
    fn empty_batch_yields_empty_report_with_summary() {
        let out = run_pipeline(&[], &PipelineConfig::default(), None).unwrap();
        assert!(out.suspicious_accounts.is_empty());
        assert!(out.fraud_rings.is_empty());
        assert_eq!(out.summary.total_accounts_analyzed, 0);
    }

    #[test]
    fn single_self_loop_is_dropped_to_empty_output() {
        let txns = vec![tx("t1", "A", "A", 10.0, 0)];
        let out = run_pipeline(&txns, &PipelineConfig::default(), None).unwrap();
        assert!(out.suspicious_accounts.is_empty());
        assert_eq!(out.summary.total_accounts_analyzed, 0);
    }

    #[test]
    fn fast_value_preserving_cycle_scores_high() {
        let txns = vec![
            tx("t1", "A", "B", 1000.0, 0),
            tx("t2", "B", "C", 980.0, 60),
            tx("t3", "C", "A", 960.0, 120),
        ];
        let out = run_pipeline(&txns, &PipelineConfig::default(), None).unwrap();
        assert_eq!(out.fraud_rings.len(), 1);
        let ring = &out.fraud_rings[0];
        assert_eq!(ring.pattern_type, PatternType::Cycle);
        assert_eq!(ring.risk_score, 96.0);
        let mut members = ring.member_accounts.clone();
        members.sort();
        assert_eq!(members, vec!["A".to_string(), "B".to_string(), "C".to_string()]);

        for account in ["A", "B", "C"] {
            let entry = out.suspicious_accounts.iter().find(|a| a.account_id == account).unwrap();
            assert!(entry.suspicion_score >= 90.0);
        }
    }

    #[test]
    fn fan_in_smurfing_ring_has_expected_risk() {
        let txns: Vec<Transaction> = (0..12)
            .map(|i| tx(&format!("t{i}"), &format!("S{i}"), "R", 900.0, i * 60))
            .collect();
        let out = run_pipeline(&txns, &PipelineConfig::default(), None).unwrap();
        let ring = out.fraud_rings.iter().find(|r| r.pattern_type == PatternType::FanIn).unwrap();
        assert_eq!(ring.risk_score, 85.0);
        assert_eq!(ring.member_accounts.len(), 13);
    }

    #[test]
    fn shell_chain_ring_has_expected_risk() {
        let mut txns = vec![
            tx("t1", "A", "B", 1000.0, 0),
            tx("t2", "B", "C", 980.0, 240),
            tx("t3", "C", "D", 960.0, 480),
        ];
        for i in 0..4 {
            txns.push(tx(&format!("pad{i}"), &format!("Z{i}"), "A", 20.0, 6000 + i));
        }
        let out = run_pipeline(&txns, &PipelineConfig::default(), None).unwrap();
        let ring = out
            .fraud_rings
            .iter()
            .find(|r| r.pattern_type == PatternType::LayeredShell)
            .unwrap();
        assert_eq!(ring.risk_score, 80.0);
        assert_eq!(
            ring.member_accounts,
            vec!["A".to_string(), "B".to_string(), "C".to_string(), "D".to_string()]
        );
    }

    #[test]
    fn rapid_inflow_exit_scores_high() {
        let mut txns: Vec<Transaction> = (0..10)
            .map(|i| tx(&format!("in{i}"), &format!("S{i}"), "U", 150.0, i * 2))
            .collect();
        txns.push(tx("out1", "U", "FRESH", 1400.0, 30));
        let out = run_pipeline(&txns, &PipelineConfig::default(), None).unwrap();
        let entry = out.suspicious_accounts.iter().find(|a| a.account_id == "U").unwrap();
        assert!(entry.suspicion_score >= 90.0);
        assert!(entry.detected_patterns.contains(&"rapid_exit_detected".to_string()));
    }
}
