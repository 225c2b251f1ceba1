//! Small numeric helpers shared across the detectors.
//!
//! Centralised here so every division-by-zero guard and log transform
//! follows the same convention.

/// `sent / recv`; if there is no inbound volume at all, falls back to
/// `sent` (or 0) rather than dividing by zero.
pub fn flow_ratio(sent: f64, recv: f64) -> f64 {
    if recv > 0.0 {
        sent / recv
    } else if sent > 0.0 {
        sent
    } else {
        0.0
    }
}

/// Coefficient of variation (population std / mean), 0 when undefined.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean == 0.0 {
        return 0.0;
    }
    std_dev(values, mean) / mean
}

/// Population standard deviation given a precomputed mean.
pub fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values
        .iter()
        .map(|v| (v - mean).powi(2))
        .sum::<f64>()
        / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Sign-preserving `ln(1+|x|)`, used to log-compress the amount features.
pub fn signed_log1p(x: f64) -> f64 {
    x.signum() * (1.0 + x.abs()).ln()
}

/// Clamp into `[0,1]`.
pub fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_ratio_zero_guards() {
        assert_eq!(flow_ratio(0.0, 0.0), 0.0);
        assert_eq!(flow_ratio(50.0, 0.0), 50.0);
        assert_eq!(flow_ratio(50.0, 100.0), 0.5);
    }

    #[test]
    fn cv_needs_two_samples() {
        assert_eq!(coefficient_of_variation(&[100.0]), 0.0);
        assert_eq!(coefficient_of_variation(&[]), 0.0);
        assert!(coefficient_of_variation(&[100.0, 200.0, 300.0]) > 0.0);
    }

    #[test]
    fn signed_log1p_preserves_sign() {
        assert!(signed_log1p(100.0) > 0.0);
        assert!(signed_log1p(-100.0) < 0.0);
        assert_eq!(signed_log1p(0.0), 0.0);
    }
}
