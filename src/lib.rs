//! # Money-Muling Graph Detection
//!
//! Graph-analytic detection of money-muling behaviour over a batch of
//! financial transactions: a weighted directed multigraph over accounts,
//! three structural detectors (cycles, smurfing fan-in/fan-out, layered
//! shell chains), a per-account behavioural profile and anomaly score,
//! one-hop contagion propagation, and a fusion layer that combines every
//! signal into a ranked list of suspicious accounts and fraud rings.
//!
//! ## Scope
//!
//! This crate is the core detection pipeline only. CSV ingestion, the HTTP
//! surface, report serialisation, and the supervised scoring model are
//! external collaborators; the latter is represented here purely as the
//! [`ScoreProvider`] trait seam.

pub mod anomaly;
pub mod config;
pub mod contagion;
pub mod cycles;
pub mod features;
pub mod graph;
pub mod orchestrator;
pub mod profiler;
pub mod shells;
pub mod smurfing;
mod util;

pub use config::PipelineConfig;
pub use orchestrator::run_pipeline;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque account identifier; no internal structure is inferred from it.
pub type AccountId = String;

/// One immutable transaction record. `sender != receiver` is an invariant
/// enforced upstream; the graph builder still drops any self-loop
/// defensively rather than trusting the ingestion collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub sender: AccountId,
    pub receiver: AccountId,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
}

/// Orchestrator-level failures. Every detector absorbs its own internal
/// failure (enumeration caps, PageRank non-convergence, an absent scoring
/// provider) into a zero or empty signal; only a bug in the orchestrator's
/// own bookkeeping propagates here.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum PipelineError {
    #[error("inconsistent ring state: {0}")]
    InconsistentRingState(String),

    #[error("division by zero: {0}")]
    DivisionByZero(String),

    #[error("batch processing timed out")]
    Timeout,
}

/// Which structural pattern a ring represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Cycle,
    FanIn,
    FanOut,
    FanInOut,
    LayeredShell,
}

impl PatternType {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternType::Cycle => "cycle",
            PatternType::FanIn => "fan_in",
            PatternType::FanOut => "fan_out",
            PatternType::FanInOut => "fan_in_out",
            PatternType::LayeredShell => "layered_shell",
        }
    }
}

/// A detected fraud ring, attributed to one of the three structural detectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudRing {
    pub ring_id: String,
    pub member_accounts: Vec<AccountId>,
    pub pattern_type: PatternType,
    pub risk_score: f64,
}

/// One account flagged in the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspiciousAccount {
    pub account_id: AccountId,
    pub suspicion_score: f64,
    pub detected_patterns: Vec<String>,
    pub ring_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Batch-level summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub total_accounts_analyzed: usize,
    pub suspicious_accounts_flagged: usize,
    pub fraud_rings_detected: usize,
    pub processing_time_seconds: f64,
}

/// The full pipeline result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub suspicious_accounts: Vec<SuspiciousAccount>,
    pub fraud_rings: Vec<FraudRing>,
    pub summary: AnalysisSummary,
}

impl PipelineOutput {
    /// Render the output contract as pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Pluggable sender-side score provider. When the orchestrator is not given
/// one, it substitutes the anomaly scorer chained with contagion propagation.
pub trait ScoreProvider {
    fn predict(&self, transactions: &[Transaction]) -> HashMap<AccountId, f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_output_round_trips_through_json() {
        let mut metadata = HashMap::new();
        metadata.insert("sender_side_score".to_string(), "91.50".to_string());

        let output = PipelineOutput {
            suspicious_accounts: vec![SuspiciousAccount {
                account_id: "A".to_string(),
                suspicion_score: 91.5,
                detected_patterns: vec!["cycle_member".to_string()],
                ring_id: Some("RING_CYCLE_001".to_string()),
                metadata,
            }],
            fraud_rings: vec![FraudRing {
                ring_id: "RING_CYCLE_001".to_string(),
                member_accounts: vec!["A".to_string(), "B".to_string(), "C".to_string()],
                pattern_type: PatternType::Cycle,
                risk_score: 96.0,
            }],
            summary: AnalysisSummary {
                total_accounts_analyzed: 3,
                suspicious_accounts_flagged: 1,
                fraud_rings_detected: 1,
                processing_time_seconds: 0.01,
            },
        };

        let json = output.to_json().expect("serialize");
        assert!(json.contains("\"pattern_type\": \"cycle\""));

        let round_tripped: PipelineOutput = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(round_tripped.fraud_rings[0].ring_id, "RING_CYCLE_001");
        assert_eq!(round_tripped.suspicious_accounts[0].suspicion_score, 91.5);
    }
}
