//! Fan-in / fan-out detection over sliding time windows, with legitimacy,
//! source-only, and merchant refinements to keep payroll/merchant accounts
//! from tripping the same signal as a structuring ring.

use std::collections::{BTreeSet, HashMap};

use crate::config::PipelineConfig;
use crate::graph::{TransactionGraph, TxRef};
use crate::util::{coefficient_of_variation, flow_ratio};
use crate::AccountId;

/// Which side(s) of a centre account tripped the fan threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmurfPattern {
    FanIn,
    FanOut,
    FanInOut,
}

impl SmurfPattern {
    pub fn as_str(self) -> &'static str {
        match self {
            SmurfPattern::FanIn => "fan_in",
            SmurfPattern::FanOut => "fan_out",
            SmurfPattern::FanInOut => "fan_in_out",
        }
    }
}

/// One detected smurfing centre.
#[derive(Debug, Clone, PartialEq)]
pub struct SmurfingRing {
    pub centre: AccountId,
    pub pattern: SmurfPattern,
    /// Centre first, then its triggering counterparties, sorted.
    pub members: Vec<AccountId>,
}

/// Detect fan-in, fan-out, and combined smurfing centres.
pub fn detect(graph: &TransactionGraph, config: &PipelineConfig) -> Vec<SmurfingRing> {
    let mut rings = Vec::new();

    for account in graph.accounts() {
        let Some(stats) = graph.stats(account) else { continue };
        if stats.unique_counterparties >= config.merchant_counterparty_threshold {
            continue;
        }

        let incoming = graph.incoming(account);
        let outgoing = graph.outgoing(account);

        let fan_in_hit = window_scan(incoming, config.time_window_hours, config.fan_threshold);
        let mut fan_out_hit = window_scan(outgoing, config.time_window_hours, config.fan_threshold);

        let fan_in_hit =
            fan_in_hit.filter(|_| passes_merchant_refinement(stats.received_count, stats.in_degree, incoming, outgoing));

        if let Some(hit) = &fan_out_hit {
            if !passes_source_only_refinement(hit, incoming, outgoing) {
                fan_out_hit = None;
            }
        }

        let (pattern, mut counterparties) = match (&fan_in_hit, &fan_out_hit) {
            (Some(a), Some(b)) => (SmurfPattern::FanInOut, union(&a.counterparties, &b.counterparties)),
            (Some(a), None) => (SmurfPattern::FanIn, a.counterparties.clone()),
            (None, Some(b)) => (SmurfPattern::FanOut, b.counterparties.clone()),
            (None, None) => continue,
        };

        counterparties.retain(|cp| {
            graph
                .stats(cp)
                .map(|s| s.unique_counterparties < config.merchant_counterparty_threshold)
                .unwrap_or(true)
        });

        let mut members: Vec<AccountId> = vec![account.clone()];
        members.extend(counterparties.into_iter());

        rings.push(SmurfingRing {
            centre: account.clone(),
            pattern,
            members,
        });
    }

    rings.sort_by(|a, b| a.centre.cmp(&b.centre));
    rings
}

struct WindowHit {
    counterparties: BTreeSet<AccountId>,
    amounts: Vec<f64>,
    span_hours: f64,
}

/// Two-pointer sliding-window scan for the first window reaching `threshold`
/// distinct counterparties, terminating as soon as it is found.
fn window_scan(txns: &[TxRef], window_hours: i64, threshold: usize) -> Option<WindowHit> {
    if txns.is_empty() {
        return None;
    }
    let window = chrono::Duration::hours(window_hours);
    let mut counts: HashMap<&AccountId, usize> = HashMap::new();
    let mut right = 0usize;

    for i in 0..txns.len() {
        while right < txns.len() && txns[right].timestamp <= txns[i].timestamp + window {
            *counts.entry(&txns[right].counterparty).or_insert(0) += 1;
            right += 1;
        }

        if counts.len() >= threshold {
            let window_txns = &txns[i..right];
            let counterparties = window_txns.iter().map(|t| t.counterparty.clone()).collect();
            let amounts = window_txns.iter().map(|t| t.amount).collect();
            let span_hours =
                (window_txns.last().unwrap().timestamp - window_txns[0].timestamp).num_minutes() as f64 / 60.0;
            return Some(WindowHit {
                counterparties,
                amounts,
                span_hours,
            });
        }

        let entry = counts.get_mut(&txns[i].counterparty).unwrap();
        *entry -= 1;
        if *entry == 0 {
            counts.remove(&txns[i].counterparty);
        }
    }
    None
}

fn union(a: &BTreeSet<AccountId>, b: &BTreeSet<AccountId>) -> BTreeSet<AccountId> {
    a.union(b).cloned().collect()
}

/// Fan-in merchant refinement: receivers with heavy traffic and a low
/// sent/received ratio are treated as merchants, not smurfing centres.
/// `unique_senders` is the receiver's total distinct-sender count, not the
/// triggering window's subset — the refinement looks at the account's whole
/// history, unlike the source-only refinement below.
fn passes_merchant_refinement(received_count: usize, unique_senders: usize, incoming: &[TxRef], outgoing: &[TxRef]) -> bool {
    if received_count <= 20 {
        return true;
    }
    let total_sent: f64 = outgoing.iter().map(|t| t.amount).sum();
    let total_recv: f64 = incoming.iter().map(|t| t.amount).sum();
    let ratio = flow_ratio(total_sent, total_recv);
    if ratio < 0.05 {
        return false;
    }
    if unique_senders > 20 && ratio < 0.2 {
        return false;
    }
    true
}

/// Source-only fan-out refinement: pure-source accounts (essentially no
/// inbound volume) that pay out on a steady payroll-like cadence are not
/// smurfing, even though they fan out to many distinct recipients.
fn passes_source_only_refinement(hit: &WindowHit, incoming: &[TxRef], outgoing: &[TxRef]) -> bool {
    let total_sent: f64 = outgoing.iter().map(|t| t.amount).sum();
    let total_recv: f64 = incoming.iter().map(|t| t.amount).sum();
    if total_recv >= 0.05 * total_sent {
        return true;
    }
    let cv = coefficient_of_variation(&hit.amounts);
    let payroll_like = hit.span_hours > 1.0 && cv > 0.01;
    let systematic_payout = cv < 0.01 && hit.span_hours < 1.0;
    !(payroll_like || systematic_payout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Transaction;
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

    fn fan_in_batch() -> Vec<Transaction> {
        (0..12)
            .map(|i| tx(&format!("t{i}"), &format!("S{i}"), "R", 900.0, i * 60))
            .collect()
    }

    #[test]
    fn fan_in_smurfing_is_detected() {
        let txns = fan_in_batch();
        let graph = TransactionGraph::build(&txns);
        let rings = detect(&graph, &PipelineConfig::default());
        assert_eq!(rings.len(), 1);
        assert_eq!(rings[0].pattern, SmurfPattern::FanIn);
        assert_eq!(rings[0].members.len(), 13);
    }

    #[test]
    fn merchant_with_high_counterparty_count_is_filtered() {
        let txns: Vec<Transaction> = (0..60)
            .map(|i| tx(&format!("t{i}"), &format!("S{i}"), "M", 100.0, i * 10))
            .collect();
        let graph = TransactionGraph::build(&txns);
        let rings = detect(&graph, &PipelineConfig::default());
        assert!(rings.iter().all(|r| r.centre != "M"));
    }

    #[test]
    fn merchant_refinement_uses_total_distinct_senders_not_window_subset() {
        let mut txns: Vec<Transaction> = (0..10).map(|i| tx(&format!("t{i}"), &format!("S{i}"), "R", 100.0, i * 60)).collect();
        for i in 10..25 {
            txns.push(tx(&format!("t{i}"), &format!("S{i}"), "R", 100.0, i * 60 * 100));
        }
        txns.push(tx("out1", "R", "X", 200.0, 1));
        let graph = TransactionGraph::build(&txns);
        assert_eq!(graph.stats("R").unwrap().in_degree, 25);
        let rings = detect(&graph, &PipelineConfig::default());
        assert!(rings.iter().all(|r| r.centre != "R"));
    }

    #[test]
    fn below_threshold_does_not_trigger() {
        let txns: Vec<Transaction> = (0..5)
            .map(|i| tx(&format!("t{i}"), &format!("S{i}"), "R", 900.0, i * 60))
            .collect();
        let graph = TransactionGraph::build(&txns);
        let rings = detect(&graph, &PipelineConfig::default());
        assert!(rings.is_empty());
    }
}
