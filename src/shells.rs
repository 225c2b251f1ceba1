//! Layered shell-chain detection: short low-activity intermediates strung
//! together into a flow-consistent pass-through chain.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::PipelineConfig;
use crate::graph::{EdgeTxn, TransactionGraph};
use crate::AccountId;

/// One detected shell chain, source to terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellChain {
    /// Ordered members, `v0` (source) through `vk` (terminal).
    pub members: Vec<AccountId>,
}

/// Detect layered shell chains over `graph`.
pub fn detect(graph: &TransactionGraph, config: &PipelineConfig) -> Vec<ShellChain> {
    let shell_nodes: HashSet<&AccountId> = graph
        .accounts()
        .into_iter()
        .filter(|a| {
            graph
                .stats(a.as_str())
                .map(|s| s.total_transactions <= config.shell_intermediate_max_txs)
                .unwrap_or(false)
        })
        .collect();

    let mut sources: Vec<AccountId> = Vec::new();
    let mut seen_sources = HashSet::new();
    for shell in &shell_nodes {
        for pred in graph.predecessors(shell.as_str()) {
            if !shell_nodes.contains(pred) && seen_sources.insert(pred.clone()) {
                sources.push(pred.clone());
            }
        }
    }
    sources.sort();

    let mut seen: HashSet<Vec<AccountId>> = HashSet::new();
    let mut chains = Vec::new();
    let max_edges = config.shell_chain_max_nodes - 1;

    'sources: for source in &sources {
        for first in graph.successors(source) {
            if !shell_nodes.contains(first) {
                continue;
            }
            let Some(edge) = graph.edge(source, first) else { continue };
            let Some(first_txn) = largest(&edge.transactions) else { continue };

            let mut path = vec![source.clone(), first.clone()];
            extend(
                graph,
                &shell_nodes,
                config,
                max_edges,
                first_txn.amount,
                first_txn.timestamp,
                &mut path,
                &mut seen,
                &mut chains,
            );

            if chains.len() >= config.shell_enum_cap {
                warn!(cap = config.shell_enum_cap, "shell chain enumeration cap reached");
                break 'sources;
            }
        }
    }

    chains.sort_by(|a: &ShellChain, b: &ShellChain| a.members.cmp(&b.members));
    chains
}

#[allow(clippy::too_many_arguments)]
fn extend(
    graph: &TransactionGraph,
    shell_nodes: &HashSet<&AccountId>,
    config: &PipelineConfig,
    max_edges: usize,
    last_amount: f64,
    last_timestamp: DateTime<Utc>,
    path: &mut Vec<AccountId>,
    seen: &mut HashSet<Vec<AccountId>>,
    out: &mut Vec<ShellChain>,
) {
    if out.len() >= config.shell_enum_cap {
        return;
    }

    if path.len() >= config.shell_chain_min_nodes && seen.insert(path.clone()) {
        out.push(ShellChain { members: path.clone() });
    }

    if path.len() - 1 >= max_edges {
        return;
    }

    let current = path.last().unwrap().clone();
    let is_shell = shell_nodes.contains(&current);
    if path.len() > 1 && !is_shell {
        return;
    }

    for next in graph.successors(&current) {
        if path.contains(next) {
            continue;
        }
        let Some(edge) = graph.edge(&current, next) else { continue };
        let lo = 0.8 * last_amount;
        let hi = 1.05 * last_amount;
        let Some(candidate) = earliest_in_band(&edge.transactions, lo, hi, last_timestamp) else {
            continue;
        };

        path.push(next.clone());
        extend(
            graph,
            shell_nodes,
            config,
            max_edges,
            candidate.amount,
            candidate.timestamp,
            path,
            seen,
            out,
        );
        path.pop();

        if out.len() >= config.shell_enum_cap {
            return;
        }
    }
}

fn largest(transactions: &[EdgeTxn]) -> Option<&EdgeTxn> {
    transactions.iter().max_by(|a, b| a.amount.partial_cmp(&b.amount).unwrap())
}

fn earliest_in_band(transactions: &[EdgeTxn], lo: f64, hi: f64, not_before: DateTime<Utc>) -> Option<&EdgeTxn> {
    transactions
        .iter()
        .filter(|t| t.amount >= lo && t.amount <= hi && t.timestamp >= not_before)
        .min_by_key(|t| t.timestamp)
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

    /// A has several unrelated incoming transactions so it reads as an
    /// established source account rather than itself qualifying as a shell.
    fn source_padding(prefix: &str) -> Vec<Transaction> {
        (0..4)
            .map(|i| tx(&format!("{prefix}{i}"), &format!("Z{i}"), "A", 20.0, 100 + i))
            .collect()
    }

    #[test]
    fn four_node_shell_chain_is_detected() {
        let mut txns = vec![
            tx("t1", "A", "B", 1000.0, 0),
            tx("t2", "B", "C", 980.0, 4),
            tx("t3", "C", "D", 960.0, 8),
        ];
        txns.extend(source_padding("pad"));
        let graph = TransactionGraph::build(&txns);
        let chains = detect(&graph, &PipelineConfig::default());
        assert_eq!(chains.len(), 1);
        assert_eq!(
            chains[0].members,
            vec!["A".to_string(), "B".to_string(), "C".to_string(), "D".to_string()]
        );
    }

    #[test]
    fn non_shell_intermediate_breaks_chain() {
        let mut txns = vec![
            tx("t1", "A", "B", 1000.0, 0),
            tx("t2", "B", "C", 980.0, 4),
            tx("t3", "C", "D", 960.0, 8),
        ];
        txns.extend(source_padding("pad"));
        for i in 0..5 {
            txns.push(tx(&format!("extra{i}"), "B", &format!("X{i}"), 5.0, 20 + i));
        }
        let graph = TransactionGraph::build(&txns);
        let chains = detect(&graph, &PipelineConfig::default());
        assert!(chains.is_empty());
    }

    #[test]
    fn flow_inconsistent_hop_is_rejected() {
        let mut txns = vec![
            tx("t1", "A", "B", 1000.0, 0),
            tx("t2", "B", "C", 100.0, 4),
            tx("t3", "C", "D", 95.0, 8),
        ];
        txns.extend(source_padding("pad"));
        let graph = TransactionGraph::build(&txns);
        let chains = detect(&graph, &PipelineConfig::default());
        assert!(chains.is_empty());
    }
}
