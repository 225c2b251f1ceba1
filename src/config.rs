//! Tunable thresholds for the detection pipeline.
//!
//! One flat, `Default`-able struct that every detector borrows from.

use std::time::Duration;

/// All thresholds that drive the detectors, with the defaults the system
/// ships with. Construct via `PipelineConfig::default()` and override fields
/// as needed; every field is public plain data, no builder required.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Distinct counterparties within the window required to trigger smurfing.
    pub fan_threshold: usize,
    /// Width of the smurfing sliding window, in hours.
    pub time_window_hours: i64,
    /// Unique counterparties at/above which a node is treated as a legitimate
    /// merchant/payroll account and skipped as a smurfing centre.
    pub merchant_counterparty_threshold: usize,
    /// Minimum simple-cycle length considered.
    pub cycle_min_len: usize,
    /// Maximum simple-cycle length considered.
    pub cycle_max_len: usize,
    /// Maximum span between a cycle's earliest and latest selected transaction, in hours.
    pub cycle_span_hours: i64,
    /// Maximum allowed `1 - min(amount)/max(amount)` decay around a cycle.
    pub cycle_max_decay: f64,
    /// Hard cap on raw cycles enumerated across all components.
    pub cycle_enum_cap: usize,
    /// Total transaction count at/below which a node counts as a "shell".
    pub shell_intermediate_max_txs: usize,
    /// Minimum node count (inclusive) of a reported shell chain.
    pub shell_chain_min_nodes: usize,
    /// Maximum node count (inclusive) of a reported shell chain.
    pub shell_chain_max_nodes: usize,
    /// Hard cap on shell chains enumerated.
    pub shell_enum_cap: usize,
    /// Minimum anomaly score to seed contagion propagation.
    pub contagion_seed_threshold: f64,
    /// Multiplier applied to inbound (predecessor) contagion impact.
    pub contagion_predecessor_factor: f64,
    /// Minimum final fused score required to appear in the report.
    pub report_threshold: f64,
    /// Expected fraction of outliers for the isolation-style anomaly scorer.
    pub anomaly_contamination: f64,
    /// Optional wall-clock deadline for a whole batch; `None` disables it.
    pub batch_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fan_threshold: 10,
            time_window_hours: 72,
            merchant_counterparty_threshold: 50,
            cycle_min_len: 3,
            cycle_max_len: 5,
            cycle_span_hours: 72,
            cycle_max_decay: 0.30,
            cycle_enum_cap: 5000,
            shell_intermediate_max_txs: 3,
            shell_chain_min_nodes: 4,
            shell_chain_max_nodes: 5,
            shell_enum_cap: 2000,
            contagion_seed_threshold: 60.0,
            contagion_predecessor_factor: 0.5,
            report_threshold: 55.0,
            anomaly_contamination: 0.02,
            batch_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_table() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.fan_threshold, 10);
        assert_eq!(cfg.cycle_enum_cap, 5000);
        assert_eq!(cfg.shell_enum_cap, 2000);
        assert_eq!(cfg.report_threshold, 55.0);
        assert!(cfg.batch_timeout.is_none());
    }
}
