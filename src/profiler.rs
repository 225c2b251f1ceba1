//! Per-account behavioural baseline ("segment-of-one" profile) and the three
//! receiver-side detectors built on top of it: S1 per-transaction scoring,
//! rapid-inflow-exit, and mule-collector detection.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, Timelike, Utc};

use crate::config::PipelineConfig;
use crate::graph::{TransactionGraph, TxRef};
use crate::util::{clamp01, std_dev};
use crate::AccountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDirection {
    Sender,
    Receiver,
    Mixed,
}

/// A 90-day-rolling statistical baseline for one account, fit over the whole batch.
#[derive(Debug, Clone)]
pub struct AccountProfile {
    pub sent_mean: f64,
    pub sent_std: f64,
    pub recv_mean: f64,
    pub recv_std: f64,
    pub p25: f64,
    pub p75: f64,
    pub p99: f64,
    pub active_hours: HashSet<u32>,
    pub daily_velocity: f64,
    pub direction: FlowDirection,
    pub typical_sent_sum: f64,
    pub typical_recv_sum: f64,
}

pub type ProfileTable = HashMap<AccountId, AccountProfile>;

/// Fit a baseline profile for every account in the graph.
pub fn build_profiles(graph: &TransactionGraph) -> ProfileTable {
    let mut table = ProfileTable::new();
    for account in graph.accounts() {
        let ins = graph.incoming(account);
        let outs = graph.outgoing(account);

        let recv_amounts: Vec<f64> = ins.iter().map(|t| t.amount).collect();
        let sent_amounts: Vec<f64> = outs.iter().map(|t| t.amount).collect();

        let recv_mean = mean(&recv_amounts);
        let sent_mean = mean(&sent_amounts);
        let recv_std = std_dev(&recv_amounts, recv_mean);
        let sent_std = std_dev(&sent_amounts, sent_mean);

        let mut all_amounts: Vec<f64> = recv_amounts.iter().chain(sent_amounts.iter()).copied().collect();
        all_amounts.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let p25 = percentile(&all_amounts, 0.25);
        let p75 = percentile(&all_amounts, 0.75);
        let p99 = percentile(&all_amounts, 0.99);

        let mut hour_counts: HashMap<u32, usize> = HashMap::new();
        for t in ins.iter().chain(outs.iter()) {
            *hour_counts.entry(t.timestamp.hour()).or_insert(0) += 1;
        }
        let mut hours: Vec<(u32, usize)> = hour_counts.into_iter().collect();
        hours.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let active_hours: HashSet<u32> = hours.into_iter().take(8).map(|(h, _)| h).collect();

        let stats = graph.stats(account).cloned().unwrap_or_default();
        let span_days = if stats.timestamps.len() >= 2 {
            (*stats.timestamps.last().unwrap() - *stats.timestamps.first().unwrap()).num_minutes() as f64
                / (60.0 * 24.0)
        } else {
            0.0
        };
        let daily_velocity = if span_days > 0.0 {
            stats.total_transactions as f64 / span_days
        } else {
            stats.total_transactions as f64
        };

        let typical_sent_sum: f64 = sent_amounts.iter().sum();
        let typical_recv_sum: f64 = recv_amounts.iter().sum();
        let direction = if typical_sent_sum > 1.5 * typical_recv_sum.max(1e-9) {
            FlowDirection::Sender
        } else if typical_recv_sum > 1.5 * typical_sent_sum.max(1e-9) {
            FlowDirection::Receiver
        } else {
            FlowDirection::Mixed
        };

        table.insert(
            account.clone(),
            AccountProfile {
                sent_mean,
                sent_std,
                recv_mean,
                recv_std,
                p25,
                p75,
                p99,
                active_hours,
                daily_velocity,
                direction,
                typical_sent_sum,
                typical_recv_sum,
            },
        );
    }
    table
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// The weighted S1 fusion for a single inbound transaction against the
/// receiver's profile. Returns a score in `[0,100]`.
///
/// `seen_before` must come from a scan-order `seen` set built over the same
/// account's chronological incoming transactions (see `s1_scores`), not from
/// `profile.known_counterparties` — the profile is fit over the whole batch
/// being scored, so that set already contains every counterparty by
/// construction and would make this signal trivially 0 for everyone.
pub fn s1_score(profile: &AccountProfile, tx: &TxRef, seen_before: bool) -> f64 {
    let std = profile.recv_std.max(1.0);
    let zscore = (tx.amount - profile.recv_mean) / std;
    let z_norm = clamp01((zscore.abs() / 5.0).min(1.0));

    let new_counterparty = if seen_before { 0.0 } else { 1.0 };
    let unusual_hour = if profile.active_hours.contains(&tx.timestamp.hour()) {
        0.0
    } else {
        1.0
    };

    let flow_reversal = if profile.direction == FlowDirection::Sender && profile.typical_sent_sum > 0.0 {
        clamp01((tx.amount / profile.typical_sent_sum).min(1.0))
    } else {
        0.0
    };

    let p99_ratio = clamp01((tx.amount / profile.p99.max(1.0) / 5.0).min(1.0));

    let fused = 0.25 * z_norm + 0.25 * new_counterparty + 0.10 * unusual_hour + 0.25 * flow_reversal + 0.15 * p99_ratio;
    fused * 100.0
}

/// Per-receiver max S1 score across its inbound transactions, keeping only
/// accounts whose peak transaction score clears the noise floor.
pub fn s1_scores(graph: &TransactionGraph, profiles: &ProfileTable) -> HashMap<AccountId, f64> {
    let mut out = HashMap::new();
    for account in graph.accounts() {
        let Some(profile) = profiles.get(account) else { continue };
        let mut seen: HashSet<&AccountId> = HashSet::new();
        let mut best = 0.0f64;
        for tx in graph.incoming(account) {
            let seen_before = !seen.insert(&tx.counterparty);
            let score = s1_score(profile, tx, seen_before);
            if score > best {
                best = score;
            }
        }
        if best > 50.0 {
            out.insert(account.clone(), best);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RapidExitRisk {
    Critical,
    High,
}

#[derive(Debug, Clone)]
pub struct RapidExitAlert {
    pub account: AccountId,
    pub risk: RapidExitRisk,
}

/// Scan every account for an anomalous inbound transaction quickly
/// forwarded to fresh destinations.
pub fn rapid_inflow_exit(graph: &TransactionGraph, profiles: &ProfileTable) -> Vec<RapidExitAlert> {
    let mut alerts = Vec::new();

    for account in graph.accounts() {
        let Some(profile) = profiles.get(account) else { continue };
        let incoming = graph.incoming(account);
        let outgoing = graph.outgoing(account);

        let mut dest_total_history: HashMap<&AccountId, usize> = HashMap::new();
        for t in outgoing {
            *dest_total_history.entry(&t.counterparty).or_insert(0) += 1;
        }

        for inbound in incoming {
            let anomalous = (profile.recv_std < 10.0 && inbound.amount > 100.0)
                || inbound.amount >= profile.recv_mean + 3.0 * profile.recv_std;
            if !anomalous {
                continue;
            }

            let window_end = inbound.timestamp + Duration::hours(24);
            let exits: Vec<&TxRef> = outgoing
                .iter()
                .filter(|t| t.timestamp >= inbound.timestamp && t.timestamp <= window_end)
                .collect();
            if exits.is_empty() {
                continue;
            }

            let exit_total: f64 = exits.iter().map(|t| t.amount).sum();
            let passthrough = exit_total / inbound.amount.max(1.0);
            let new_dest_count = exits
                .iter()
                .filter(|t| dest_total_history.get(&t.counterparty).copied().unwrap_or(0) <= 2)
                .count();
            let new_dest_ratio = new_dest_count as f64 / exits.len() as f64;

            if passthrough >= 0.8 && new_dest_ratio >= 0.5 {
                let first_exit = exits.iter().map(|t| t.timestamp).min().unwrap();
                let minutes_to_exit = (first_exit - inbound.timestamp).num_minutes();
                let risk = if minutes_to_exit <= 60 {
                    RapidExitRisk::Critical
                } else {
                    RapidExitRisk::High
                };
                alerts.push(RapidExitAlert {
                    account: account.clone(),
                    risk,
                });
                break;
            }
        }
    }

    alerts
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuleRiskLabel {
    Critical,
    High,
    Medium,
}

#[derive(Debug, Clone)]
pub struct MuleCollectorFinding {
    pub account: AccountId,
    pub score: f64,
    pub label: MuleRiskLabel,
}

/// Compare each receiver's last 7 days of inbound activity against its prior
/// history to flag aggregation-style mule-collector behaviour.
pub fn detect_mule_collectors(graph: &TransactionGraph, config: &PipelineConfig) -> Vec<MuleCollectorFinding> {
    let lookback = Duration::days(7);
    let mut findings = Vec::new();

    for account in graph.accounts() {
        let incoming = graph.incoming(account);
        if incoming.is_empty() {
            continue;
        }
        let latest = incoming.last().unwrap().timestamp;
        let cutoff = latest - lookback;

        let recent: Vec<&TxRef> = incoming.iter().filter(|t| t.timestamp > cutoff).collect();
        let historical: Vec<&TxRef> = incoming.iter().filter(|t| t.timestamp <= cutoff).collect();

        let recent_senders: HashSet<&AccountId> = recent.iter().map(|t| &t.counterparty).collect();
        if recent_senders.len() < 5 {
            continue;
        }

        let historical_senders: HashSet<&AccountId> = historical.iter().map(|t| &t.counterparty).collect();
        let new_senders = recent_senders.iter().filter(|s| !historical_senders.contains(**s)).count();
        let new_sender_ratio = new_senders as f64 / recent_senders.len() as f64;
        if new_sender_ratio < 0.7 {
            continue;
        }

        let small_ratio =
            recent.iter().filter(|t| t.amount <= 2000.0).count() as f64 / recent.len() as f64;

        let first_recent = recent.iter().map(|t| t.timestamp).min().unwrap();
        let last_recent = recent.iter().map(|t| t.timestamp).max().unwrap();
        let span_hours = ((last_recent - first_recent).num_minutes() as f64 / 60.0).max(1.0);
        let burst_score = (recent_senders.len() as f64 / span_hours).min(10.0);

        let isolation_score = sender_isolation_score(graph, &recent_senders);

        let score = 100.0
            * (0.30 * new_sender_ratio + 0.25 * small_ratio + 0.25 * (burst_score / 10.0).min(1.0) + 0.20 * isolation_score);

        if score <= 40.0 {
            continue;
        }

        let label = if score >= 75.0 {
            MuleRiskLabel::Critical
        } else if score >= 50.0 {
            MuleRiskLabel::High
        } else {
            MuleRiskLabel::Medium
        };

        findings.push(MuleCollectorFinding {
            account: account.clone(),
            score,
            label,
        });
    }

    findings
}

/// `1 - (edges among recent senders) / C(n,2)`, skipped (returns 0) when there
/// are too many senders to check pairwise cheaply.
fn sender_isolation_score(graph: &TransactionGraph, senders: &HashSet<&AccountId>) -> f64 {
    let n = senders.len();
    if n >= 50 || n < 2 {
        return 0.0;
    }
    let possible = (n * (n - 1) / 2) as f64;
    let sender_vec: Vec<&&AccountId> = senders.iter().collect();
    let mut edges = 0usize;
    for i in 0..sender_vec.len() {
        for j in (i + 1)..sender_vec.len() {
            let a = sender_vec[i].as_str();
            let b = sender_vec[j].as_str();
            if graph.edge(a, b).is_some() || graph.edge(b, a).is_some() {
                edges += 1;
            }
        }
    }
    1.0 - edges as f64 / possible
}
