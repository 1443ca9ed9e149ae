//! Severity-based routing between the minimal and the full pipeline

use serde::{Deserialize, Serialize};

/// Threshold used when none is configured
pub const DEFAULT_SEVERITY_THRESHOLD: u8 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingDecision {
    /// Allocation, communication and reporting all run
    ProceedFull,
    /// The workflow ends after assessment
    ProceedMinimal,
}

impl RoutingDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingDecision::ProceedFull => "proceed_full",
            RoutingDecision::ProceedMinimal => "proceed_minimal",
        }
    }
}

/// Route on the assessed severity. Severities at or above the threshold take
/// the full pipeline.
pub fn decide(severity: u8, threshold: u8) -> RoutingDecision {
    if severity >= threshold {
        RoutingDecision::ProceedFull
    } else {
        RoutingDecision::ProceedMinimal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_threshold_boundary() {
        assert_eq!(decide(60, 60), RoutingDecision::ProceedFull);
        assert_eq!(decide(59, 60), RoutingDecision::ProceedMinimal);
        assert_eq!(decide(100, 60), RoutingDecision::ProceedFull);
        assert_eq!(decide(0, 60), RoutingDecision::ProceedMinimal);
    }

    #[test]
    fn test_zero_threshold_always_proceeds() {
        assert_eq!(decide(0, 0), RoutingDecision::ProceedFull);
    }

    proptest! {
        #[test]
        fn test_decision_matches_comparison(severity in 0u8..=100, threshold in 0u8..=100) {
            let decision = decide(severity, threshold);
            if severity >= threshold {
                prop_assert_eq!(decision, RoutingDecision::ProceedFull);
            } else {
                prop_assert_eq!(decision, RoutingDecision::ProceedMinimal);
            }
        }

        #[test]
        fn test_decision_is_monotonic(severity in 0u8..100, threshold in 0u8..=100) {
            // Raising the severity never downgrades the route
            if decide(severity, threshold) == RoutingDecision::ProceedFull {
                prop_assert_eq!(decide(severity + 1, threshold), RoutingDecision::ProceedFull);
            }
        }
    }
}
