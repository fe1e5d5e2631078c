//! Time-to-pressure projection
//!
//! First-order linear projection: free headroom divided by the summed growth
//! rate of confirmed suspects. Acceleration is not modelled.

use serde::{Deserialize, Serialize};

/// How long until current leaks consume the headroom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "hours")]
pub enum TimeEstimate {
    Hours(f64),
    /// Leaks are not consuming memory on balance
    Unbounded,
}

impl TimeEstimate {
    pub fn hours(&self) -> Option<f64> {
        match self {
            TimeEstimate::Hours(h) => Some(*h),
            TimeEstimate::Unbounded => None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, TimeEstimate::Unbounded)
    }
}

impl std::fmt::Display for TimeEstimate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeEstimate::Hours(h) if *h < 1.0 => write!(f, "{:.0} min", h * 60.0),
            TimeEstimate::Hours(h) if *h < 48.0 => write!(f, "{:.1} h", h),
            TimeEstimate::Hours(h) => write!(f, "{:.1} days", h / 24.0),
            TimeEstimate::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// Project time to pressure from suspect growth rates (MB/hour).
pub fn estimate_time_to_pressure(rates_mb_per_hour: &[f64], free_headroom_mb: f64) -> TimeEstimate {
    let total_rate: f64 = rates_mb_per_hour.iter().sum();
    if !(total_rate > 0.0) {
        return TimeEstimate::Unbounded;
    }
    TimeEstimate::Hours(free_headroom_mb.max(0.0) / total_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_suspects() {
        let estimate = estimate_time_to_pressure(&[10.0, 20.0], 300.0);
        assert_eq!(estimate, TimeEstimate::Hours(10.0));
        assert_eq!(estimate.hours(), Some(10.0));
    }

    #[test]
    fn test_no_growth_is_unbounded() {
        assert!(estimate_time_to_pressure(&[], 300.0).is_unbounded());
        assert!(estimate_time_to_pressure(&[5.0, -5.0], 300.0).is_unbounded());
        assert!(estimate_time_to_pressure(&[-1.0], 300.0).is_unbounded());
    }

    #[test]
    fn test_no_headroom_left() {
        assert_eq!(estimate_time_to_pressure(&[10.0], -50.0), TimeEstimate::Hours(0.0));
    }

    #[test]
    fn test_display() {
        assert_eq!(TimeEstimate::Hours(0.5).to_string(), "30 min");
        assert_eq!(TimeEstimate::Hours(10.0).to_string(), "10.0 h");
        assert_eq!(TimeEstimate::Hours(72.0).to_string(), "3.0 days");
        assert_eq!(TimeEstimate::Unbounded.to_string(), "unbounded");
    }
}
