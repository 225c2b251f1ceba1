//! Unsupervised per-account anomaly score: a small from-scratch
//! isolation-forest-shaped ensemble over a standardised feature subset.
//!
//! The scoring method itself is not load-bearing: any ensemble of random
//! space-partitioning estimators that yields a monotone decision function
//! and a contamination-bounded binary verdict satisfies the contract. This
//! is one such estimator.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::PipelineConfig;
use crate::features::FeatureTable;
use crate::AccountId;

const N_ESTIMATORS: usize = 100;
const MAX_SUBSAMPLE: usize = 256;

/// Standardised feature subset fed into the estimator, in column order:
/// total_volume, count_sent, count_recv, net_flow, passthrough,
/// structuring_score, repeated_amounts, cv_out, cv_in, unique_receivers,
/// unique_senders, pagerank, in_degree, out_degree, clustering_coef,
/// max_hourly_tx, days_active, cycle_repetition_count.
fn row_for(features: &crate::features::FeatureVector) -> Vec<f64> {
    vec![
        features.total_volume,
        features.count_sent as f64,
        features.count_recv as f64,
        features.net_flow,
        features.passthrough,
        features.structuring_score,
        features.repeated_amounts as f64,
        features.cv_out,
        features.cv_in,
        features.unique_receivers as f64,
        features.unique_senders as f64,
        features.pagerank,
        features.in_degree as f64,
        features.out_degree as f64,
        features.clustering_coef,
        features.max_hourly_tx as f64,
        features.days_active,
        features.cycle_repetition_count as f64,
    ]
}

enum Node {
    Leaf { size: usize },
    Split { feature: usize, value: f64, left: Box<Node>, right: Box<Node> },
}

fn build_tree(data: &[Vec<f64>], indices: &[usize], depth: usize, max_depth: usize, rng: &mut StdRng) -> Node {
    if indices.len() <= 1 || depth >= max_depth {
        return Node::Leaf { size: indices.len() };
    }

    let n_features = data[0].len();
    for _ in 0..4 {
        let feature = rng.gen_range(0..n_features);
        let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
        for &i in indices {
            let v = data[i][feature];
            lo = lo.min(v);
            hi = hi.max(v);
        }
        if lo >= hi {
            continue;
        }
        let split = rng.gen_range(lo..hi);
        let (left, right): (Vec<usize>, Vec<usize>) = indices.iter().partition(|&&i| data[i][feature] < split);
        if left.is_empty() || right.is_empty() {
            continue;
        }
        return Node::Split {
            feature,
            value: split,
            left: Box::new(build_tree(data, &left, depth + 1, max_depth, rng)),
            right: Box::new(build_tree(data, &right, depth + 1, max_depth, rng)),
        };
    }
    Node::Leaf { size: indices.len() }
}

fn path_length(node: &Node, point: &[f64], depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path_length(*size),
        Node::Split { feature, value, left, right } => {
            if point[*feature] < *value {
                path_length(left, point, depth + 1)
            } else {
                path_length(right, point, depth + 1)
            }
        }
    }
}

/// Average path length of an unsuccessful search in a binary search tree
/// over `n` items (the standard isolation-forest normalisation constant).
fn average_path_length(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let n = n as f64;
    2.0 * ((n - 1.0).ln() + 0.5772156649) - 2.0 * (n - 1.0) / n
}

/// Standardise each column to zero mean, unit variance (epsilon-guarded).
fn standardize(data: &mut [Vec<f64>]) {
    if data.is_empty() {
        return;
    }
    let n_features = data[0].len();
    let n = data.len() as f64;
    for f in 0..n_features {
        let mean = data.iter().map(|r| r[f]).sum::<f64>() / n;
        let variance = data.iter().map(|r| (r[f] - mean).powi(2)).sum::<f64>() / n;
        let std = (variance + 1e-9).sqrt();
        for row in data.iter_mut() {
            row[f] = (row[f] - mean) / std;
        }
    }
}

/// Compute the per-account anomaly score in `[0,100]`. Inliers (per the
/// contamination cutoff) are forced to 0.
pub fn score(features: &FeatureTable, config: &PipelineConfig) -> HashMap<AccountId, f64> {
    let mut accounts: Vec<&AccountId> = features.keys().collect();
    accounts.sort();
    let n = accounts.len();
    if n == 0 {
        return HashMap::new();
    }

    let mut data: Vec<Vec<f64>> = accounts.iter().map(|a| row_for(&features[*a])).collect();
    standardize(&mut data);

    let subsample_size = MAX_SUBSAMPLE.min(n);
    let max_depth = (subsample_size as f64).log2().ceil() as usize;
    let mut rng = StdRng::seed_from_u64(0xA17A_u64);

    let all_indices: Vec<usize> = (0..n).collect();
    let mut trees = Vec::with_capacity(N_ESTIMATORS);
    for _ in 0..N_ESTIMATORS {
        let sample: Vec<usize> = if n <= subsample_size {
            all_indices.clone()
        } else {
            (0..subsample_size).map(|_| rng.gen_range(0..n)).collect()
        };
        trees.push(build_tree(&data, &sample, 0, max_depth, &mut rng));
    }

    let c_n = average_path_length(subsample_size);
    let mut raw_scores = vec![0.0f64; n];
    for (i, row) in data.iter().enumerate() {
        let avg_path: f64 = trees.iter().map(|t| path_length(t, row, 0)).sum::<f64>() / trees.len() as f64;
        raw_scores[i] = 2f64.powf(-avg_path / c_n.max(1e-9));
    }

    let min_s = raw_scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_s = raw_scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let spread = (max_s - min_s).max(1e-9);

    let mut ranked: Vec<usize> = (0..n).collect();
    ranked.sort_by(|&a, &b| raw_scores[b].partial_cmp(&raw_scores[a]).unwrap());
    let n_outliers = ((config.anomaly_contamination * n as f64).ceil() as usize).max(1).min(n);
    let outlier_set: std::collections::HashSet<usize> = ranked[..n_outliers].iter().copied().collect();

    let mut out = HashMap::new();
    for (i, account) in accounts.into_iter().enumerate() {
        let normalized = 100.0 * (raw_scores[i] - min_s) / spread;
        let value = if outlier_set.contains(&i) { normalized } else { 0.0 };
        out.insert(account.clone(), value);
    }
    out
}
