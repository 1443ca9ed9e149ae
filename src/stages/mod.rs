//! Reference stage implementations
//!
//! Deterministic stand-ins for the external collaborators (damage
//! detection, impact clustering, logistics, alerting and report rendering).
//! Any of them can be swapped for a real implementation of
//! [`StageContract`](crate::workflow::StageContract).

use std::sync::Arc;
use std::time::Duration;

use crate::config::StageSettings;
use crate::workflow::StageTable;

pub mod aggregation;
pub mod allocation;
pub mod assessment;
pub mod communication;
pub mod reporting;

pub use aggregation::EventAggregator;
pub use allocation::{AllocationPolicy, AllocationTier, ResourceAllocator};
pub use assessment::ImpactAssessor;
pub use communication::AlertDispatcher;
pub use reporting::ReportSynthesizer;

impl StageTable {
    /// Table of the bundled reference stages
    pub fn reference(settings: &StageSettings) -> Self {
        let latency = settings.simulated_latency;
        Self {
            aggregation: Arc::new(EventAggregator::new(latency)),
            assessment: Arc::new(ImpactAssessor::new(latency)),
            allocation: Arc::new(ResourceAllocator::new(
                settings.allocation.clone(),
                latency,
            )),
            communication: Arc::new(AlertDispatcher::new(latency)),
            reporting: Arc::new(ReportSynthesizer::new(latency)),
        }
    }
}

pub(crate) async fn simulate_latency(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

/// Priority label for a severity score
pub(crate) fn priority_for(severity: u8) -> &'static str {
    match severity {
        80.. => "CRITICAL",
        60..=79 => "HIGH",
        40..=59 => "MEDIUM",
        _ => "LOW",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{DisasterEvent, EventType, GeoPoint, RetryPolicy};

    #[test]
    fn test_priority_bands() {
        assert_eq!(priority_for(95), "CRITICAL");
        assert_eq!(priority_for(80), "CRITICAL");
        assert_eq!(priority_for(60), "HIGH");
        assert_eq!(priority_for(45), "MEDIUM");
        assert_eq!(priority_for(10), "LOW");
    }

    #[tokio::test]
    async fn test_reference_table_chains() {
        let table = StageTable::reference(&StageSettings::default());
        let policy = RetryPolicy::default();
        let event = DisasterEvent::new(
            "evt-1",
            EventType::Flood,
            GeoPoint::new(34.05, -118.24),
            85,
        );

        let aggregation = policy.invoke(table.aggregation.as_ref(), &event).await;
        let aggregation = aggregation.result.unwrap();
        let assessment = policy
            .invoke(table.assessment.as_ref(), &aggregation)
            .await
            .result
            .unwrap();

        assert_eq!(assessment.overall_severity, 85);
    }
}
