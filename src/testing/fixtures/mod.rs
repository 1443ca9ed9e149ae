//! Sample data and a fully scripted stage table

use chrono::{TimeZone, Utc};
use std::sync::Arc;

use crate::testing::mocks::ScriptedStage;
use crate::workflow::{
    AggregationOutput, AllocationOutput, AssessmentOutput, CommunicationOutput, DisasterEvent,
    DispatchInput, EventType, GeoPoint, ImpactCluster, ReportOutput, ResourceAllocation,
    StageName, StageTable, SubEvent,
};

pub fn sample_location() -> GeoPoint {
    GeoPoint::new(34.0522, -118.2437)
}

/// Flood event with a fixed timestamp
pub fn sample_event(severity: u8) -> DisasterEvent {
    DisasterEvent {
        id: format!("evt-flood-{severity}"),
        location: sample_location(),
        event_type: EventType::Flood,
        severity_raw: severity,
        timestamp: Utc
            .with_ymd_and_hms(2026, 3, 14, 9, 30, 0)
            .single()
            .unwrap_or_else(Utc::now),
        description: Some("River levee breach".to_string()),
    }
}

pub fn aggregation_for(event: &DisasterEvent) -> AggregationOutput {
    AggregationOutput {
        processing_id: format!("proc-{}", event.id),
        sub_events: vec![SubEvent {
            event_id: event.id.clone(),
            location: event.location,
            event_type: event.event_type,
            severity_raw: event.severity_raw,
            observed_at: event.timestamp,
        }],
    }
}

/// Assessment with one cluster at the given severity
pub fn assessment_with_severity(severity: u8) -> AssessmentOutput {
    AssessmentOutput {
        assessment_id: format!("assess-{severity}"),
        overall_severity: severity,
        clusters: vec![ImpactCluster {
            cluster_id: "cluster_1".to_string(),
            center: sample_location(),
            radius_km: 2.5,
            severity,
            population_affected: 25_000,
            damage_types: vec![EventType::Flood],
        }],
        affected_population: 25_000,
    }
}

pub fn sample_allocation() -> AllocationOutput {
    AllocationOutput {
        allocation_id: "alloc-1".to_string(),
        allocations: vec![ResourceAllocation {
            resource_type: "ambulance".to_string(),
            quantity: 5,
            target: sample_location(),
            priority: "CRITICAL".to_string(),
        }],
        total_resources: 5,
    }
}

pub fn sample_communication() -> CommunicationOutput {
    CommunicationOutput {
        alerts_sent: 1_200,
        delivery_rate: 0.95,
        alert_level: "CRITICAL".to_string(),
        channels: vec!["sms".to_string()],
    }
}

pub fn sample_report() -> ReportOutput {
    ReportOutput {
        report_id: "report-1".to_string(),
        generated: true,
        reports_count: 3,
        artifacts: vec!["report-1_situation_report.pdf".to_string()],
        executive_summary: "Severity 85/100 incident".to_string(),
    }
}

/// Five scripted stages that succeed by default, with the assessment
/// reporting a fixed severity. Replace any field to script failures.
pub struct ScriptedTable {
    pub aggregation: Arc<ScriptedStage<DisasterEvent, AggregationOutput>>,
    pub assessment: Arc<ScriptedStage<AggregationOutput, AssessmentOutput>>,
    pub allocation: Arc<ScriptedStage<AssessmentOutput, AllocationOutput>>,
    pub communication: Arc<ScriptedStage<DispatchInput, CommunicationOutput>>,
    pub reporting: Arc<ScriptedStage<DispatchInput, ReportOutput>>,
}

impl ScriptedTable {
    pub fn new(severity: u8) -> Self {
        Self {
            aggregation: Arc::new(ScriptedStage::succeeding(aggregation_for(&sample_event(
                severity,
            )))),
            assessment: Arc::new(ScriptedStage::succeeding(assessment_with_severity(
                severity,
            ))),
            allocation: Arc::new(ScriptedStage::succeeding(sample_allocation())),
            communication: Arc::new(ScriptedStage::succeeding(sample_communication())),
            reporting: Arc::new(ScriptedStage::succeeding(sample_report())),
        }
    }

    pub fn table(&self) -> StageTable {
        StageTable {
            aggregation: self.aggregation.clone(),
            assessment: self.assessment.clone(),
            allocation: self.allocation.clone(),
            communication: self.communication.clone(),
            reporting: self.reporting.clone(),
        }
    }

    pub fn calls(&self, stage: StageName) -> usize {
        match stage {
            StageName::Aggregation => self.aggregation.calls(),
            StageName::Assessment => self.assessment.calls(),
            StageName::Allocation => self.allocation.calls(),
            StageName::Communication => self.communication.calls(),
            StageName::Reporting => self.reporting.calls(),
        }
    }
}
