//! Per-account tabular feature vector: volume/flow, amount-pattern,
//! counterparty, graph-structural, temporal, and cycle-participation
//! signals, consumed downstream by the anomaly scorer.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Timelike, Utc};

use crate::config::PipelineConfig;
use crate::cycles::Cycle;
use crate::graph::TransactionGraph;
use crate::util::{coefficient_of_variation, flow_ratio, signed_log1p};
use crate::AccountId;

const STRUCTURING_THRESHOLDS: [f64; 2] = [10_000.0, 50_000.0];
const PAGERANK_DAMPING: f64 = 0.85;
const PAGERANK_MAX_ITER: usize = 100;
const PAGERANK_TOLERANCE: f64 = 1e-6;

/// The fixed-schema numeric vector produced for every account.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureVector {
    pub total_sent: f64,
    pub total_recv: f64,
    pub count_sent: usize,
    pub count_recv: usize,
    pub net_flow: f64,
    pub total_volume: f64,
    pub flow_ratio: f64,
    pub passthrough: f64,
    pub structuring_score: f64,
    pub repeated_amounts: usize,
    pub cv_out: f64,
    pub cv_in: f64,
    pub unique_receivers: usize,
    pub unique_senders: usize,
    pub pagerank: f64,
    pub in_degree: usize,
    pub out_degree: usize,
    pub clustering_coef: f64,
    pub max_hourly_tx: usize,
    pub days_active: f64,
    pub days_since_first: f64,
    pub cycle_repetition_count: usize,
}

pub type FeatureTable = HashMap<AccountId, FeatureVector>;

/// Build the feature table for every account in `graph`. `cycles` should be
/// the already-detected, temporally-validated cycle list so the
/// `cycle_repetition_count` signal does not re-run cycle enumeration.
pub fn extract(graph: &TransactionGraph, cycles: &[Cycle], _config: &PipelineConfig) -> FeatureTable {
    let pagerank = compute_pagerank(graph);
    let clustering = compute_clustering(graph);
    let cycle_repetition = compute_cycle_repetition(graph, cycles);
    let latest = graph.latest_timestamp();

    let mut table = FeatureTable::new();
    for account in graph.accounts() {
        let stats = graph.stats(account).cloned().unwrap_or_default();
        let outs = graph.outgoing(account);
        let ins = graph.incoming(account);

        let total_sent: f64 = outs.iter().map(|t| t.amount).sum();
        let total_recv: f64 = ins.iter().map(|t| t.amount).sum();
        let net_flow = total_recv - total_sent;
        let total_volume = total_sent + total_recv;
        let passthrough = if total_sent.max(total_recv) > 0.0 {
            total_sent.min(total_recv) / total_sent.max(total_recv)
        } else {
            0.0
        };

        let structuring_score = STRUCTURING_THRESHOLDS
            .iter()
            .map(|&t| {
                let lo = 0.9 * t;
                let sent_hits = outs.iter().filter(|tx| tx.amount >= lo && tx.amount < t).count();
                let recv_hits = ins.iter().filter(|tx| tx.amount >= lo && tx.amount < t).count();
                (sent_hits + recv_hits) as f64
            })
            .sum();

        let repeated_amounts = {
            let mut by_amount: HashMap<u64, usize> = HashMap::new();
            for tx in outs {
                *by_amount.entry(tx.amount.to_bits()).or_insert(0) += 1;
            }
            by_amount.values().filter(|&&c| c >= 2).sum()
        };

        let sent_amounts: Vec<f64> = outs.iter().map(|t| t.amount).collect();
        let recv_amounts: Vec<f64> = ins.iter().map(|t| t.amount).collect();

        let max_hourly_tx = {
            let mut by_hour: HashMap<DateTime<Utc>, usize> = HashMap::new();
            for tx in outs {
                let floored = floor_to_hour(tx.timestamp);
                *by_hour.entry(floored).or_insert(0) += 1;
            }
            by_hour.values().copied().max().unwrap_or(0)
        };

        let days_active = match (outs.first(), outs.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_minutes() as f64 / (60.0 * 24.0),
            _ => 0.0,
        };

        let days_since_first = match (stats.timestamps.first(), latest) {
            (Some(first), Some(latest)) => (latest - *first).num_minutes() as f64 / (60.0 * 24.0),
            _ => 0.0,
        };

        let vector = FeatureVector {
            total_sent,
            total_recv,
            count_sent: stats.sent_count,
            count_recv: stats.received_count,
            net_flow,
            total_volume,
            flow_ratio: flow_ratio(total_sent, total_recv),
            passthrough,
            structuring_score,
            repeated_amounts,
            cv_out: coefficient_of_variation(&sent_amounts),
            cv_in: coefficient_of_variation(&recv_amounts),
            unique_receivers: stats.out_degree,
            unique_senders: stats.in_degree,
            pagerank: pagerank.get(account).copied().unwrap_or(0.0),
            in_degree: stats.in_degree,
            out_degree: stats.out_degree,
            clustering_coef: clustering.get(account).copied().unwrap_or(0.0),
            max_hourly_tx,
            days_active,
            days_since_first,
            cycle_repetition_count: cycle_repetition.get(account).copied().unwrap_or(0),
        };

        table.insert(account.clone(), vector);
    }

    for vector in table.values_mut() {
        vector.total_sent = signed_log1p(vector.total_sent);
        vector.total_recv = signed_log1p(vector.total_recv);
        vector.net_flow = signed_log1p(vector.net_flow);
        vector.total_volume = signed_log1p(vector.total_volume);
    }

    table
}

fn floor_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_hms_opt(ts.hour(), 0, 0).unwrap().and_utc()
}

/// Weighted PageRank over the aggregated directed graph. Falls back to all
/// zeros if the power iteration does not converge within the iteration cap.
fn compute_pagerank(graph: &TransactionGraph) -> HashMap<AccountId, f64> {
    let accounts = graph.accounts();
    let n = accounts.len();
    if n == 0 {
        return HashMap::new();
    }

    let index: HashMap<&AccountId, usize> = accounts.iter().enumerate().map(|(i, a)| (*a, i)).collect();
    let out_degree: Vec<usize> = accounts.iter().map(|a| graph.successors(a.as_str()).len()).collect();

    let mut rank = vec![1.0 / n as f64; n];
    let base = (1.0 - PAGERANK_DAMPING) / n as f64;
    let mut converged = false;

    for _ in 0..PAGERANK_MAX_ITER {
        let mut next = vec![base; n];
        let dangling_mass: f64 = (0..n).filter(|&i| out_degree[i] == 0).map(|i| rank[i]).sum();

        for (i, account) in accounts.iter().enumerate() {
            if out_degree[i] == 0 {
                continue;
            }
            let share = PAGERANK_DAMPING * rank[i] / out_degree[i] as f64;
            for succ in graph.successors(account.as_str()) {
                let j = index[succ];
                next[j] += share;
            }
        }
        for slot in next.iter_mut() {
            *slot += PAGERANK_DAMPING * dangling_mass / n as f64;
        }

        let diff: f64 = rank.iter().zip(next.iter()).map(|(a, b)| (a - b).abs()).sum();
        rank = next;
        if diff < PAGERANK_TOLERANCE {
            converged = true;
            break;
        }
    }

    if !converged {
        return accounts.into_iter().map(|a| (a.clone(), 0.0)).collect();
    }

    accounts.into_iter().enumerate().map(|(i, a)| (a.clone(), rank[i])).collect()
}

/// Clustering coefficient over the undirected projection (successors union predecessors).
fn compute_clustering(graph: &TransactionGraph) -> HashMap<AccountId, f64> {
    let mut neighbor_sets: HashMap<&AccountId, HashSet<&AccountId>> = HashMap::new();
    for account in graph.accounts() {
        let mut set: HashSet<&AccountId> = HashSet::new();
        set.extend(graph.successors(account));
        set.extend(graph.predecessors(account));
        neighbor_sets.insert(account, set);
    }

    let mut out = HashMap::new();
    for (account, neighbors) in &neighbor_sets {
        let k = neighbors.len();
        if k < 2 {
            out.insert((**account).clone(), 0.0);
            continue;
        }
        let neighbor_vec: Vec<&&AccountId> = neighbors.iter().collect();
        let mut links = 0usize;
        for i in 0..neighbor_vec.len() {
            for j in (i + 1)..neighbor_vec.len() {
                let a = neighbor_vec[i];
                let b = neighbor_vec[j];
                let connected = neighbor_sets.get(*a).map(|s| s.contains(*b)).unwrap_or(false)
                    || neighbor_sets.get(*b).map(|s| s.contains(*a)).unwrap_or(false);
                if connected {
                    links += 1;
                }
            }
        }
        let possible = k * (k - 1) / 2;
        out.insert((**account).clone(), links as f64 / possible as f64);
    }
    out
}

/// For every account, the maximum over its cycles of the number of distinct
/// calendar days on which every edge of that cycle fired at least once.
fn compute_cycle_repetition(graph: &TransactionGraph, cycles: &[Cycle]) -> HashMap<AccountId, usize> {
    let mut best: HashMap<AccountId, usize> = HashMap::new();

    for cycle in cycles {
        let mut intersection: Option<HashSet<NaiveDate>> = None;
        for i in 0..cycle.members.len() {
            let src = &cycle.members[i];
            let dst = &cycle.members[(i + 1) % cycle.members.len()];
            let Some(edge) = graph.edge(src, dst) else {
                intersection = Some(HashSet::new());
                break;
            };
            let dates: HashSet<NaiveDate> = edge.transactions.iter().map(|t| t.timestamp.date_naive()).collect();
            intersection = Some(match intersection {
                Some(acc) => acc.intersection(&dates).copied().collect(),
                None => dates,
            });
        }
        let count = intersection.map(|s| s.len()).unwrap_or(0);
        for member in &cycle.members {
            let slot = best.entry(member.clone()).or_insert(0);
            if count > *slot {
                *slot = count;
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Transaction;
    use chrono::TimeZone;

    fn tx(id: &str, s: &str, r: &str, amount: f64, hour: i64) -> Transaction {
        Transaction {
            transaction_id: id.to_string(),
            sender: s.to_string(),
            receiver: r.to_string(),
            amount,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(hour),
        }
    }

    #[test]
    fn basic_volume_features_are_computed() {
        let txns = vec![tx("t1", "A", "B", 100.0, 0), tx("t2", "B", "A", 40.0, 1)];
        let graph = TransactionGraph::build(&txns);
        let table = extract(&graph, &[], &PipelineConfig::default());
        let a = &table["A"];
        assert_eq!(a.count_sent, 1);
        assert_eq!(a.count_recv, 1);
    }

    #[test]
    fn structuring_score_flags_near_threshold_amounts() {
        let txns = vec![tx("t1", "A", "B", 9_500.0, 0), tx("t2", "A", "C", 9_800.0, 1)];
        let graph = TransactionGraph::build(&txns);
        let table = extract(&graph, &[], &PipelineConfig::default());
        assert_eq!(table["A"].structuring_score, 2.0);
    }

    #[test]
    fn pagerank_sums_close_to_one_when_converged() {
        let txns = vec![
            tx("t1", "A", "B", 10.0, 0),
            tx("t2", "B", "C", 10.0, 1),
            tx("t3", "C", "A", 10.0, 2),
        ];
        let graph = TransactionGraph::build(&txns);
        let table = extract(&graph, &[], &PipelineConfig::default());
        let total: f64 = table.values().map(|f| f.pagerank).sum();
        assert!((total - 1.0).abs() < 1e-3);
    }

    #[test]
    fn empty_graph_has_no_features() {
        let graph = TransactionGraph::build(&[]);
        let table = extract(&graph, &[], &PipelineConfig::default());
        assert!(table.is_empty());
    }
}
