//! Stage contract and the typed inputs/outputs exchanged between stages

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::{DisasterEvent, EventType, GeoPoint, StageName};

/// Failure categories a stage may report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The attempt exceeded its stage timeout
    Timeout,
    /// Upstream data could not be used
    InvalidInput,
    /// A downstream dependency was unreachable
    Unavailable,
    /// The stage failed for its own reasons
    Internal,
    /// The stage panicked instead of returning a result
    ContractViolation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Internal => "internal",
            ErrorKind::ContractViolation => "contract_violation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected failure returned by a stage
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl StageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message, true)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message, true)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message, false)
    }

    pub fn internal(message: impl Into<String>, retryable: bool) -> Self {
        Self::new(ErrorKind::Internal, message, retryable)
    }

    pub fn contract_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ContractViolation, message, false)
    }

    pub fn is_contract_violation(&self) -> bool {
        self.kind == ErrorKind::ContractViolation
    }
}

/// Settled outcome of a stage as stored in the workflow state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome<T> {
    Success { output: T },
    Failure { error: StageError },
}

impl<T> StageOutcome<T> {
    pub fn success(&self) -> Option<&T> {
        match self {
            StageOutcome::Success { output } => Some(output),
            StageOutcome::Failure { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&StageError> {
        match self {
            StageOutcome::Success { .. } => None,
            StageOutcome::Failure { error } => Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success { .. })
    }
}

impl<T> From<Result<T, StageError>> for StageOutcome<T> {
    fn from(result: Result<T, StageError>) -> Self {
        match result {
            Ok(output) => StageOutcome::Success { output },
            Err(error) => StageOutcome::Failure { error },
        }
    }
}

/// Contract every pipeline stage implements.
///
/// `Input` is the slice of prior workflow state the stage depends on, never
/// the whole state. Implementations must not share mutable state across
/// calls and must be safe to run alongside other stages. Expected failures
/// are returned as [`StageError`]; a panic is treated as a contract
/// violation and halts the workflow.
#[async_trait]
pub trait StageContract: Send + Sync {
    type Input: Send + Sync;
    type Output: Send;

    async fn execute(&self, input: &Self::Input) -> Result<Self::Output, StageError>;
}

/// One damage observation derived from the raw event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubEvent {
    pub event_id: String,
    pub location: GeoPoint,
    pub event_type: EventType,
    pub severity_raw: u8,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationOutput {
    pub processing_id: String,
    pub sub_events: Vec<SubEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactCluster {
    pub cluster_id: String,
    pub center: GeoPoint,
    pub radius_km: f64,
    pub severity: u8,
    pub population_affected: u64,
    pub damage_types: Vec<EventType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentOutput {
    pub assessment_id: String,
    /// Overall severity on a 0-100 scale; drives routing
    pub overall_severity: u8,
    pub clusters: Vec<ImpactCluster>,
    pub affected_population: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub resource_type: String,
    pub quantity: u32,
    pub target: GeoPoint,
    pub priority: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationOutput {
    pub allocation_id: String,
    pub allocations: Vec<ResourceAllocation>,
    pub total_resources: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationOutput {
    pub alerts_sent: u64,
    /// Fraction of alerts delivered, 0.0 to 1.0
    pub delivery_rate: f64,
    pub alert_level: String,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportOutput {
    pub report_id: String,
    pub generated: bool,
    pub reports_count: u32,
    pub artifacts: Vec<String>,
    pub executive_summary: String,
}

/// Input shared by the two joined stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchInput {
    pub assessment: AssessmentOutput,
    pub allocation: Option<AllocationOutput>,
}

macro_rules! stage_payload {
    ($($variant:ident => $output:ty),* $(,)?) => {
        /// Closed set of stage outputs, used where outputs of different
        /// stages travel through one channel (the join)
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "stage", content = "output", rename_all = "snake_case")]
        pub enum StagePayload {
            $($variant($output)),*
        }

        $(
            impl From<$output> for StagePayload {
                fn from(output: $output) -> Self {
                    StagePayload::$variant(output)
                }
            }

            impl TryFrom<StagePayload> for $output {
                type Error = StagePayload;

                fn try_from(payload: StagePayload) -> Result<Self, Self::Error> {
                    match payload {
                        StagePayload::$variant(output) => Ok(output),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

stage_payload! {
    Aggregation => AggregationOutput,
    Assessment => AssessmentOutput,
    Allocation => AllocationOutput,
    Communication => CommunicationOutput,
    Reporting => ReportOutput,
}

impl StagePayload {
    pub fn stage(&self) -> StageName {
        match self {
            StagePayload::Aggregation(_) => StageName::Aggregation,
            StagePayload::Assessment(_) => StageName::Assessment,
            StagePayload::Allocation(_) => StageName::Allocation,
            StagePayload::Communication(_) => StageName::Communication,
            StagePayload::Reporting(_) => StageName::Reporting,
        }
    }
}

pub type AggregationStage =
    Arc<dyn StageContract<Input = DisasterEvent, Output = AggregationOutput>>;
pub type AssessmentStage =
    Arc<dyn StageContract<Input = AggregationOutput, Output = AssessmentOutput>>;
pub type AllocationStage =
    Arc<dyn StageContract<Input = AssessmentOutput, Output = AllocationOutput>>;
pub type CommunicationStage =
    Arc<dyn StageContract<Input = DispatchInput, Output = CommunicationOutput>>;
pub type ReportingStage = Arc<dyn StageContract<Input = DispatchInput, Output = ReportOutput>>;

/// Fixed table of the five stages an executor drives
#[derive(Clone)]
pub struct StageTable {
    pub aggregation: AggregationStage,
    pub assessment: AssessmentStage,
    pub allocation: AllocationStage,
    pub communication: CommunicationStage,
    pub reporting: ReportingStage,
}

impl fmt::Debug for StageTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageTable").finish_non_exhaustive()
    }
}
