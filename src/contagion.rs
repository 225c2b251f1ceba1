//! One-hop suspicion propagation from high-scoring seeds, weighted by edge
//! amount share and recency, fused back with the seed scores themselves.

use std::collections::HashMap;

use crate::config::PipelineConfig;
use crate::graph::TransactionGraph;
use crate::AccountId;

/// Propagate `raw_scores` (sender-side scores, either from the external
/// provider or from the anomaly scorer) across one hop and fuse the result.
/// Returns the final per-account sender-side score in `[0,100]`.
pub fn propagate(
    graph: &TransactionGraph,
    raw_scores: &HashMap<AccountId, f64>,
    config: &PipelineConfig,
) -> HashMap<AccountId, f64> {
    let total_system_amount = graph.total_system_amount();
    let latest = graph.latest_timestamp();

    let mut seeds: Vec<&AccountId> = raw_scores
        .iter()
        .filter(|(_, &score)| score >= config.contagion_seed_threshold)
        .map(|(account, _)| account)
        .collect();
    seeds.sort();

    let mut contagion: HashMap<AccountId, f64> = HashMap::new();

    for seed in seeds.iter().copied() {
        let seed_score = raw_scores[seed];

        for succ in graph.successors(seed.as_str()) {
            if let Some(edge) = graph.edge(seed.as_str(), succ.as_str()) {
                let impact = seed_score
                    * amount_weight(edge.total_amount, total_system_amount)
                    * recency_weight(edge.transactions.last().map(|t| t.timestamp), latest);
                bump(&mut contagion, succ, impact);
            }
        }

        for pred in graph.predecessors(seed.as_str()) {
            if let Some(edge) = graph.edge(pred.as_str(), seed.as_str()) {
                let impact = config.contagion_predecessor_factor
                    * seed_score
                    * amount_weight(edge.total_amount, total_system_amount)
                    * recency_weight(edge.transactions.last().map(|t| t.timestamp), latest);
                bump(&mut contagion, pred, impact);
            }
        }
    }

    let max_contagion = contagion.values().cloned().fold(0.0f64, f64::max);

    let mut fused = HashMap::new();
    for account in graph.accounts() {
        let anomaly = raw_scores.get(account).copied().unwrap_or(0.0);
        let normalized_contagion = if max_contagion > 0.0 {
            100.0 * contagion.get(account).copied().unwrap_or(0.0) / max_contagion
        } else {
            0.0
        };
        fused.insert(account.clone(), 0.6 * anomaly + 0.4 * normalized_contagion);
    }
    fused
}

fn bump(map: &mut HashMap<AccountId, f64>, account: &AccountId, impact: f64) {
    let entry = map.entry(account.clone()).or_insert(0.0);
    if impact > *entry {
        *entry = impact;
    }
}

fn amount_weight(edge_amount: f64, total_system_amount: f64) -> f64 {
    if total_system_amount <= 0.0 {
        return 0.0;
    }
    (1.0 + edge_amount).ln() / (1.0 + total_system_amount).ln()
}

fn recency_weight(last_edge_ts: Option<chrono::DateTime<chrono::Utc>>, latest: Option<chrono::DateTime<chrono::Utc>>) -> f64 {
    match (last_edge_ts, latest) {
        (Some(ts), Some(latest)) => {
            let days_since = (latest - ts).num_minutes() as f64 / (60.0 * 24.0);
            (-days_since.max(0.0) / 30.0).exp()
        }
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Transaction;
    use chrono::{TimeZone, Utc};

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
    fn seed_spreads_to_successor_and_predecessor() {
        let txns = vec![tx("t1", "SEED", "NEIGH_OUT", 1000.0, 0), tx("t2", "NEIGH_IN", "SEED", 500.0, 1)];
        let graph = TransactionGraph::build(&txns);
        let mut raw = HashMap::new();
        raw.insert("SEED".to_string(), 90.0);
        raw.insert("NEIGH_OUT".to_string(), 0.0);
        raw.insert("NEIGH_IN".to_string(), 0.0);

        let fused = propagate(&graph, &raw, &PipelineConfig::default());
        assert!(fused["NEIGH_OUT"] > 0.0);
        assert!(fused["NEIGH_IN"] > 0.0);
        assert!(fused["NEIGH_OUT"] > fused["NEIGH_IN"]);
    }

    #[test]
    fn below_threshold_seeds_do_not_propagate() {
        let txns = vec![tx("t1", "A", "B", 100.0, 0)];
        let graph = TransactionGraph::build(&txns);
        let mut raw = HashMap::new();
        raw.insert("A".to_string(), 10.0);
        raw.insert("B".to_string(), 0.0);
        let fused = propagate(&graph, &raw, &PipelineConfig::default());
        assert_eq!(fused["B"], 0.6 * 0.0 + 0.4 * 0.0);
    }
}
