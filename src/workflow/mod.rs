//! Workflow orchestration core
//!
//! A disaster event flows through five stages: aggregation, assessment,
//! allocation, communication and reporting. The executor sequences them,
//! routes on the assessed severity, joins communication and reporting, and
//! folds every outcome into a single frozen [`WorkflowResult`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod event;
pub mod executor;
pub mod join;
pub mod retry;
pub mod router;
pub mod stage;
pub mod state;

pub use event::{
    spawn_event_writer, EventEmitter, EventWriter, JsonlEventWriter, StepEvent, StepPhase,
    Subscription,
};
pub use executor::{run_workflow, WorkflowExecutor};
pub use join::{join, JoinResults, JoinTask};
pub use retry::{Attempted, RetryPolicy};
pub use router::{decide, RoutingDecision};
pub use stage::{
    AggregationOutput, AllocationOutput, AssessmentOutput, CommunicationOutput, DispatchInput,
    ErrorKind, ImpactCluster, ReportOutput, ResourceAllocation, StageContract, StageError,
    StageOutcome, StagePayload, StageTable, SubEvent,
};
pub use state::{RecordedError, Slot, WorkflowResult, WorkflowState, WorkflowSummary};

/// A latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Flood,
    Fire,
    #[serde(alias = "earthquake")]
    Quake,
    Structural,
    Other,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Flood => "flood",
            EventType::Fire => "fire",
            EventType::Quake => "quake",
            EventType::Structural => "structural",
            EventType::Other => "other",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "flood" => Ok(EventType::Flood),
            "fire" | "wildfire" => Ok(EventType::Fire),
            "quake" | "earthquake" => Ok(EventType::Quake),
            "structural" => Ok(EventType::Structural),
            "other" => Ok(EventType::Other),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// Raw disaster event handed to the aggregation stage.
///
/// The executor only ever lends this out by shared reference, so an event is
/// effectively immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisasterEvent {
    pub id: String,
    pub location: GeoPoint,
    pub event_type: EventType,
    /// Raw severity on a 0-100 scale
    pub severity_raw: u8,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl DisasterEvent {
    pub fn new(
        id: impl Into<String>,
        event_type: EventType,
        location: GeoPoint,
        severity_raw: u8,
    ) -> Self {
        Self {
            id: id.into(),
            location,
            event_type,
            severity_raw,
            timestamp: Utc::now(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// The five stages a workflow can invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Aggregation,
    Assessment,
    Allocation,
    Communication,
    Reporting,
}

impl StageName {
    pub const ALL: [StageName; 5] = [
        StageName::Aggregation,
        StageName::Assessment,
        StageName::Allocation,
        StageName::Communication,
        StageName::Reporting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Aggregation => "aggregation",
            StageName::Assessment => "assessment",
            StageName::Allocation => "allocation",
            StageName::Communication => "communication",
            StageName::Reporting => "reporting",
        }
    }

    /// Aggregation and assessment failures halt the workflow
    pub fn is_critical(&self) -> bool {
        matches!(self, StageName::Aggregation | StageName::Assessment)
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Steps of the executor's state machine, as reported in step events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Workflow,
    Aggregate,
    Assess,
    Route,
    Allocate,
    Join,
    Communicate,
    Report,
    Finalize,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Workflow => "workflow",
            PipelineStep::Aggregate => "aggregate",
            PipelineStep::Assess => "assess",
            PipelineStep::Route => "route",
            PipelineStep::Allocate => "allocate",
            PipelineStep::Join => "join",
            PipelineStep::Communicate => "communicate",
            PipelineStep::Report => "report",
            PipelineStep::Finalize => "finalize",
        }
    }
}

impl From<StageName> for PipelineStep {
    fn from(stage: StageName) -> Self {
        match stage {
            StageName::Aggregation => PipelineStep::Aggregate,
            StageName::Assessment => PipelineStep::Assess,
            StageName::Allocation => PipelineStep::Allocate,
            StageName::Communication => PipelineStep::Communicate,
            StageName::Reporting => PipelineStep::Report,
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::CompletedWithErrors | WorkflowStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::CompletedWithErrors => "completed_with_errors",
            WorkflowStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
