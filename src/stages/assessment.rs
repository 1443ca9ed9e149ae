use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::simulate_latency;
use crate::workflow::{
    AggregationOutput, AssessmentOutput, ImpactCluster, StageContract, StageError,
};

const MIN_RADIUS_KM: f64 = 1.5;
const RADIUS_SPAN_KM: f64 = 2.5;
const BASE_POPULATION: u64 = 10_000;
const POPULATION_PER_SEVERITY: u64 = 400;

/// Groups sub-events into impact clusters and scores overall severity
#[derive(Debug, Clone, Default)]
pub struct ImpactAssessor {
    latency: Duration,
}

impl ImpactAssessor {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl StageContract for ImpactAssessor {
    type Input = AggregationOutput;
    type Output = AssessmentOutput;

    async fn execute(&self, input: &AggregationOutput) -> Result<AssessmentOutput, StageError> {
        if input.sub_events.is_empty() {
            return Err(StageError::invalid_input(format!(
                "aggregation {} produced no sub-events",
                input.processing_id
            )));
        }

        simulate_latency(self.latency).await;

        let clusters: Vec<ImpactCluster> = input
            .sub_events
            .iter()
            .enumerate()
            .map(|(i, sub_event)| {
                let severity = sub_event.severity_raw.min(100);
                ImpactCluster {
                    cluster_id: format!("cluster_{}", i + 1),
                    center: sub_event.location,
                    radius_km: MIN_RADIUS_KM + f64::from(severity) / 100.0 * RADIUS_SPAN_KM,
                    severity,
                    population_affected: BASE_POPULATION
                        + u64::from(severity) * POPULATION_PER_SEVERITY,
                    damage_types: vec![sub_event.event_type],
                }
            })
            .collect();

        let overall_severity = clusters.iter().map(|c| c.severity).max().unwrap_or_default();
        let affected_population = clusters.iter().map(|c| c.population_affected).sum();

        debug!(
            "Assessed {} clusters, overall severity {}",
            clusters.len(),
            overall_severity
        );

        Ok(AssessmentOutput {
            assessment_id: format!("assess-{}", input.processing_id),
            overall_severity,
            clusters,
            affected_population,
        })
    }
}
