use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::simulate_latency;
use crate::workflow::{AggregationOutput, DisasterEvent, StageContract, StageError, SubEvent};

/// Turns a raw event into the sub-events downstream stages cluster
#[derive(Debug, Clone, Default)]
pub struct EventAggregator {
    latency: Duration,
}

impl EventAggregator {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl StageContract for EventAggregator {
    type Input = DisasterEvent;
    type Output = AggregationOutput;

    async fn execute(&self, event: &DisasterEvent) -> Result<AggregationOutput, StageError> {
        if event.severity_raw > 100 {
            return Err(StageError::invalid_input(format!(
                "severity {} is outside 0-100",
                event.severity_raw
            )));
        }
        if !(-90.0..=90.0).contains(&event.location.latitude)
            || !(-180.0..=180.0).contains(&event.location.longitude)
        {
            return Err(StageError::invalid_input(format!(
                "location ({}, {}) is not a valid coordinate",
                event.location.latitude, event.location.longitude
            )));
        }

        simulate_latency(self.latency).await;

        debug!("Aggregated event {} into 1 sub-event", event.id);
        Ok(AggregationOutput {
            processing_id: format!("proc-{}", event.id),
            sub_events: vec![SubEvent {
                event_id: event.id.clone(),
                location: event.location,
                event_type: event.event_type,
                severity_raw: event.severity_raw,
                observed_at: event.timestamp,
            }],
        })
    }
}
