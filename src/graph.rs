//! Directed multigraph over accounts, aggregated into one edge record per
//! ordered pair, plus the per-node statistics and sorted transaction arrays
//! every detector reads from.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::AccountId;
use crate::Transaction;

/// One underlying transaction folded into an edge record.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeTxn {
    pub transaction_id: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
}

/// The aggregate of every transaction sent along one `(sender, receiver)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRecord {
    pub total_amount: f64,
    pub count: usize,
    /// Underlying transactions, sorted ascending by timestamp.
    pub transactions: Vec<EdgeTxn>,
}

impl EdgeRecord {
    /// The earliest underlying transaction (used for cycle temporal validation).
    pub fn earliest(&self) -> &EdgeTxn {
        &self.transactions[0]
    }
}

/// A single transaction viewed from one endpoint's perspective, with the
/// other party recorded as `counterparty`.
#[derive(Debug, Clone, PartialEq)]
pub struct TxRef {
    pub transaction_id: String,
    pub counterparty: AccountId,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate statistics for one account, derived once at build time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeStats {
    pub total_transactions: usize,
    pub sent_count: usize,
    pub received_count: usize,
    pub unique_counterparties: usize,
    /// Number of distinct predecessors (accounts that paid into this one).
    pub in_degree: usize,
    /// Number of distinct successors (accounts this one paid out to).
    pub out_degree: usize,
    /// Every timestamp touching this account (sent or received), sorted ascending.
    pub timestamps: Vec<DateTime<Utc>>,
}

/// Directed multigraph over accounts, built once from a transaction batch and
/// treated as read-only by every downstream component.
pub struct TransactionGraph {
    graph: DiGraph<AccountId, EdgeRecord>,
    index: HashMap<AccountId, NodeIndex>,
    stats: HashMap<AccountId, NodeStats>,
    incoming: HashMap<AccountId, Vec<TxRef>>,
    outgoing: HashMap<AccountId, Vec<TxRef>>,
    total_amount: f64,
    latest_timestamp: Option<DateTime<Utc>>,
}

impl TransactionGraph {
    /// Build the graph from a transaction batch. Self-loops (`sender ==
    /// receiver`) are skipped defensively; the upstream validator is
    /// documented to drop them, but the graph builder does not trust that.
    pub fn build(transactions: &[Transaction]) -> Self {
        let mut accounts: std::collections::BTreeSet<&AccountId> = std::collections::BTreeSet::new();
        for tx in transactions {
            if tx.sender == tx.receiver {
                continue;
            }
            accounts.insert(&tx.sender);
            accounts.insert(&tx.receiver);
        }

        let mut graph = DiGraph::new();
        let mut index = HashMap::with_capacity(accounts.len());
        for account in &accounts {
            let idx = graph.add_node((*account).clone());
            index.insert((*account).clone(), idx);
        }

        let mut edge_acc: HashMap<(AccountId, AccountId), Vec<EdgeTxn>> = HashMap::new();
        let mut incoming: HashMap<AccountId, Vec<TxRef>> = HashMap::new();
        let mut outgoing: HashMap<AccountId, Vec<TxRef>> = HashMap::new();
        let mut total_amount = 0.0;
        let mut latest_timestamp: Option<DateTime<Utc>> = None;

        for tx in transactions {
            if tx.sender == tx.receiver {
                continue;
            }
            total_amount += tx.amount;
            latest_timestamp = Some(match latest_timestamp {
                Some(t) if t >= tx.timestamp => t,
                _ => tx.timestamp,
            });

            edge_acc
                .entry((tx.sender.clone(), tx.receiver.clone()))
                .or_default()
                .push(EdgeTxn {
                    transaction_id: tx.transaction_id.clone(),
                    amount: tx.amount,
                    timestamp: tx.timestamp,
                });

            outgoing.entry(tx.sender.clone()).or_default().push(TxRef {
                transaction_id: tx.transaction_id.clone(),
                counterparty: tx.receiver.clone(),
                amount: tx.amount,
                timestamp: tx.timestamp,
            });
            incoming.entry(tx.receiver.clone()).or_default().push(TxRef {
                transaction_id: tx.transaction_id.clone(),
                counterparty: tx.sender.clone(),
                amount: tx.amount,
                timestamp: tx.timestamp,
            });
        }

        for txns in incoming.values_mut() {
            txns.sort_by(|a, b| (a.timestamp, &a.transaction_id).cmp(&(b.timestamp, &b.transaction_id)));
        }
        for txns in outgoing.values_mut() {
            txns.sort_by(|a, b| (a.timestamp, &a.transaction_id).cmp(&(b.timestamp, &b.transaction_id)));
        }

        let mut pairs: Vec<_> = edge_acc.into_iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        for ((src, dst), mut txns) in pairs {
            txns.sort_by(|a, b| (a.timestamp, &a.transaction_id).cmp(&(b.timestamp, &b.transaction_id)));
            let total = txns.iter().map(|t| t.amount).sum();
            let count = txns.len();
            let src_idx = index[&src];
            let dst_idx = index[&dst];
            graph.add_edge(
                src_idx,
                dst_idx,
                EdgeRecord {
                    total_amount: total,
                    count,
                    transactions: txns,
                },
            );
        }

        let mut stats = HashMap::with_capacity(accounts.len());
        for account in &accounts {
            let empty_in = Vec::new();
            let empty_out = Vec::new();
            let ins = incoming.get(*account).unwrap_or(&empty_in);
            let outs = outgoing.get(*account).unwrap_or(&empty_out);

            let mut counterparties: std::collections::HashSet<&AccountId> = std::collections::HashSet::new();
            let mut in_peers: std::collections::HashSet<&AccountId> = std::collections::HashSet::new();
            let mut out_peers: std::collections::HashSet<&AccountId> = std::collections::HashSet::new();
            for t in ins {
                counterparties.insert(&t.counterparty);
                in_peers.insert(&t.counterparty);
            }
            for t in outs {
                counterparties.insert(&t.counterparty);
                out_peers.insert(&t.counterparty);
            }

            let mut timestamps: Vec<DateTime<Utc>> =
                ins.iter().map(|t| t.timestamp).chain(outs.iter().map(|t| t.timestamp)).collect();
            timestamps.sort();

            stats.insert(
                (*account).clone(),
                NodeStats {
                    total_transactions: ins.len() + outs.len(),
                    sent_count: outs.len(),
                    received_count: ins.len(),
                    unique_counterparties: counterparties.len(),
                    in_degree: in_peers.len(),
                    out_degree: out_peers.len(),
                    timestamps,
                },
            );
        }

        TransactionGraph {
            graph,
            index,
            stats,
            incoming,
            outgoing,
            total_amount,
            latest_timestamp,
        }
    }

    /// All accounts that appear in the graph, in sorted (deterministic) order.
    pub fn accounts(&self) -> Vec<&AccountId> {
        let mut out: Vec<&AccountId> = self.index.keys().collect();
        out.sort();
        out
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn total_system_amount(&self) -> f64 {
        self.total_amount
    }

    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.latest_timestamp
    }

    pub fn stats(&self, account: &str) -> Option<&NodeStats> {
        self.stats.get(account)
    }

    /// Incoming transactions for `account`, sorted ascending by timestamp.
    pub fn incoming(&self, account: &str) -> &[TxRef] {
        self.incoming.get(account).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Outgoing transactions for `account`, sorted ascending by timestamp.
    pub fn outgoing(&self, account: &str) -> &[TxRef] {
        self.outgoing.get(account).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub(crate) fn node_index(&self, account: &str) -> Option<NodeIndex> {
        self.index.get(account).copied()
    }

    pub(crate) fn account_of(&self, idx: NodeIndex) -> &AccountId {
        &self.graph[idx]
    }

    pub(crate) fn inner(&self) -> &DiGraph<AccountId, EdgeRecord> {
        &self.graph
    }

    /// Aggregated edge record from `src` to `dst`, if any transaction exists.
    pub fn edge(&self, src: &str, dst: &str) -> Option<&EdgeRecord> {
        let src_idx = self.node_index(src)?;
        let dst_idx = self.node_index(dst)?;
        self.graph
            .edges(src_idx)
            .find(|e| e.target() == dst_idx)
            .map(|e| e.weight())
    }

    /// Distinct successors of `account`, sorted by account id.
    pub fn successors(&self, account: &str) -> Vec<&AccountId> {
        let Some(idx) = self.node_index(account) else {
            return Vec::new();
        };
        let mut out: Vec<&AccountId> = self.graph.neighbors(idx).map(|n| &self.graph[n]).collect();
        out.sort();
        out.dedup();
        out
    }

    /// Distinct predecessors of `account`, sorted by account id.
    pub fn predecessors(&self, account: &str) -> Vec<&AccountId> {
        let Some(idx) = self.node_index(account) else {
            return Vec::new();
        };
        let mut out: Vec<&AccountId> = self
            .graph
            .neighbors_directed(idx, petgraph::Direction::Incoming)
            .map(|n| &self.graph[n])
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn self_loops_are_dropped() {
        let g = TransactionGraph::build(&[tx("t1", "A", "A", 10.0, 0)]);
        assert_eq!(g.node_count(), 0);
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn aggregates_parallel_edges() {
        let txns = vec![tx("t1", "A", "B", 100.0, 0), tx("t2", "A", "B", 50.0, 1)];
        let g = TransactionGraph::build(&txns);
        let e = g.edge("A", "B").unwrap();
        assert_eq!(e.count, 2);
        assert_eq!(e.total_amount, 150.0);
        assert_eq!(e.transactions[0].transaction_id, "t1");
    }

    #[test]
    fn stats_reflect_unique_counterparties() {
        let txns = vec![tx("t1", "A", "B", 100.0, 0), tx("t2", "C", "B", 200.0, 1)];
        let g = TransactionGraph::build(&txns);
        let stats = g.stats("B").unwrap();
        assert_eq!(stats.received_count, 2);
        assert_eq!(stats.unique_counterparties, 2);
        assert_eq!(stats.in_degree, 2);
    }

    #[test]
    fn empty_batch_has_empty_graph() {
        let g = TransactionGraph::build(&[]);
        assert_eq!(g.node_count(), 0);
        assert!(g.accounts().is_empty());
    }
}
