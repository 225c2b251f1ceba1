//! SCC-pruned enumeration of simple directed cycles, temporally validated.
//!
//! Cycle length is bounded (3-5 by default) so enumeration is done as a
//! depth-limited DFS restricted to nodes ranked at or above the start node
//! within its strongly connected component — the same subgraph-restriction
//! trick Johnson's algorithm uses to avoid emitting each cycle once per
//! rotation, specialised to a small fixed depth instead of a general
//! "shortest blocked path" bookkeeping structure.

use std::collections::HashSet;

use petgraph::algo::tarjan_scc;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use tracing::warn;

use crate::config::PipelineConfig;
use crate::graph::TransactionGraph;
use crate::AccountId;

/// A single validated cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Cycle {
    /// Members in traversal order, `members[0]` closing back on itself.
    pub members: Vec<AccountId>,
    /// Sum of `total_amount` across every edge record participating in the cycle.
    pub total_amount: f64,
}

/// Enumerate and temporally validate simple cycles over `graph`.
///
/// Cycles are deduplicated by sorted member tuple and capped at
/// `config.cycle_enum_cap` raw candidates considered across every component.
pub fn detect(graph: &TransactionGraph, config: &PipelineConfig) -> Vec<Cycle> {
    let inner = graph.inner();
    let sccs = tarjan_scc(inner);

    let mut seen: HashSet<Vec<AccountId>> = HashSet::new();
    let mut cycles = Vec::new();
    let mut raw_considered = 0usize;

    let mut components: Vec<Vec<NodeIndex>> = sccs.into_iter().filter(|c| c.len() >= config.cycle_min_len).collect();
    components.sort_by_key(|c| c.iter().map(|n| graph.account_of(*n).clone()).min());

    'components: for component in &components {
        let member_set: HashSet<NodeIndex> = component.iter().copied().collect();
        let mut ranked: Vec<NodeIndex> = component.clone();
        ranked.sort_by_key(|n| graph.account_of(*n).clone());

        for (rank, &start) in ranked.iter().enumerate() {
            let allowed: HashSet<NodeIndex> = ranked[rank..].iter().copied().collect();
            let mut path = vec![start];
            let mut on_path: HashSet<NodeIndex> = HashSet::from([start]);

            if raw_considered >= config.cycle_enum_cap {
                warn!(cap = config.cycle_enum_cap, "cycle enumeration cap reached");
                break 'components;
            }

            dfs(
                graph,
                inner,
                &member_set,
                &allowed,
                start,
                start,
                &mut path,
                &mut on_path,
                config,
                &mut raw_considered,
                &mut seen,
                &mut cycles,
            );

            if raw_considered >= config.cycle_enum_cap {
                warn!(cap = config.cycle_enum_cap, "cycle enumeration cap reached");
                break 'components;
            }
        }
    }

    cycles.sort_by(|a, b| a.members.cmp(&b.members));
    cycles
}

#[allow(clippy::too_many_arguments)]
fn dfs(
    graph: &TransactionGraph,
    inner: &petgraph::graph::DiGraph<AccountId, crate::graph::EdgeRecord>,
    member_set: &HashSet<NodeIndex>,
    allowed: &HashSet<NodeIndex>,
    start: NodeIndex,
    current: NodeIndex,
    path: &mut Vec<NodeIndex>,
    on_path: &mut HashSet<NodeIndex>,
    config: &PipelineConfig,
    raw_considered: &mut usize,
    seen: &mut HashSet<Vec<AccountId>>,
    out: &mut Vec<Cycle>,
) {
    if *raw_considered >= config.cycle_enum_cap {
        return;
    }
    if path.len() > config.cycle_max_len {
        return;
    }

    for edge in inner.edges(current) {
        let next = edge.target();
        if !member_set.contains(&next) || !allowed.contains(&next) {
            continue;
        }

        if next == start {
            if path.len() >= config.cycle_min_len {
                *raw_considered += 1;
                try_validate(graph, path, config, seen, out);
                if *raw_considered >= config.cycle_enum_cap {
                    return;
                }
            }
            continue;
        }

        if on_path.contains(&next) || path.len() == config.cycle_max_len {
            continue;
        }

        path.push(next);
        on_path.insert(next);
        dfs(
            graph, inner, member_set, allowed, start, next, path, on_path, config, raw_considered, seen, out,
        );
        on_path.remove(&next);
        path.pop();

        if *raw_considered >= config.cycle_enum_cap {
            return;
        }
    }
}

fn try_validate(
    graph: &TransactionGraph,
    path: &[NodeIndex],
    config: &PipelineConfig,
    seen: &mut HashSet<Vec<AccountId>>,
    out: &mut Vec<Cycle>,
) {
    let members: Vec<AccountId> = path.iter().map(|n| graph.account_of(*n).clone()).collect();
    let mut key = members.clone();
    key.sort();
    if !seen.insert(key) {
        return;
    }

    let mut earliest_per_edge = Vec::with_capacity(members.len());
    let mut total_amount = 0.0;
    for i in 0..members.len() {
        let src = &members[i];
        let dst = &members[(i + 1) % members.len()];
        let Some(edge) = graph.edge(src, dst) else { return };
        earliest_per_edge.push(edge.earliest().clone());
        total_amount += edge.total_amount;
    }

    let min_ts = earliest_per_edge.iter().map(|t| t.timestamp).min().unwrap();
    let max_ts = earliest_per_edge.iter().map(|t| t.timestamp).max().unwrap();
    let span_hours = (max_ts - min_ts).num_minutes() as f64 / 60.0;
    if span_hours > config.cycle_span_hours as f64 {
        return;
    }

    let min_amount = earliest_per_edge.iter().map(|t| t.amount).fold(f64::INFINITY, f64::min);
    let max_amount = earliest_per_edge.iter().map(|t| t.amount).fold(f64::NEG_INFINITY, f64::max);
    if max_amount <= 0.0 {
        return;
    }
    let decay = 1.0 - min_amount / max_amount;
    if decay > config.cycle_max_decay {
        return;
    }

    out.push(Cycle { members, total_amount });
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
    fn fast_value_preserving_cycle_is_detected() {
        let txns = vec![
            tx("t1", "A", "B", 1000.0, 0),
            tx("t2", "B", "C", 980.0, 1),
            tx("t3", "C", "A", 960.0, 2),
        ];
        let graph = TransactionGraph::build(&txns);
        let cycles = detect(&graph, &PipelineConfig::default());
        assert_eq!(cycles.len(), 1);
        let mut members = cycles[0].members.clone();
        members.sort();
        assert_eq!(members, vec!["A".to_string(), "B".to_string(), "C".to_string()]);
    }

    #[test]
    fn too_slow_cycle_is_rejected() {
        let txns = vec![
            tx("t1", "A", "B", 1000.0, 0),
            tx("t2", "B", "C", 980.0, 40),
            tx("t3", "C", "A", 960.0, 80),
        ];
        let graph = TransactionGraph::build(&txns);
        let cycles = detect(&graph, &PipelineConfig::default());
        assert!(cycles.is_empty());
    }

    #[test]
    fn two_cycle_is_never_reported() {
        let txns = vec![tx("t1", "A", "B", 100.0, 0), tx("t2", "B", "A", 95.0, 1)];
        let graph = TransactionGraph::build(&txns);
        let cycles = detect(&graph, &PipelineConfig::default());
        assert!(cycles.is_empty());
    }

    #[test]
    fn single_vertex_has_no_cycles() {
        let graph = TransactionGraph::build(&[]);
        assert!(detect(&graph, &PipelineConfig::default()).is_empty());
    }

    #[test]
    fn high_decay_cycle_is_rejected() {
        let txns = vec![
            tx("t1", "A", "B", 1000.0, 0),
            tx("t2", "B", "C", 500.0, 1),
            tx("t3", "C", "A", 100.0, 2),
        ];
        let graph = TransactionGraph::build(&txns);
        let cycles = detect(&graph, &PipelineConfig::default());
        assert!(cycles.is_empty());
    }
}
