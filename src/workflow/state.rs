//! Per-run workflow state and its frozen result
//!
//! The executor is the only writer of a [`WorkflowState`]. Each stage owns
//! exactly one write-once [`Slot`]; once the run reaches a terminal status
//! the state is frozen into a [`WorkflowResult`] that only exposes reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use uuid::Uuid;

use super::retry::Attempted;
use super::stage::{
    AggregationOutput, AllocationOutput, AssessmentOutput, CommunicationOutput, ErrorKind,
    ReportOutput, StageError, StageOutcome,
};
use super::{PipelineStep, StageName, WorkflowStatus};

/// Write-once holder for a single stage outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slot<T>(Option<StageOutcome<T>>);

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot(None)
    }
}

impl<T> Slot<T> {
    /// Write the outcome. A second write is rejected and leaves the first
    /// outcome in place.
    pub(crate) fn fill(&mut self, outcome: StageOutcome<T>) -> Result<(), StageError> {
        if self.0.is_some() {
            return Err(StageError::contract_violation(
                "stage slot written more than once",
            ));
        }
        self.0 = Some(outcome);
        Ok(())
    }

    pub fn outcome(&self) -> Option<&StageOutcome<T>> {
        self.0.as_ref()
    }

    pub fn success(&self) -> Option<&T> {
        self.0.as_ref().and_then(StageOutcome::success)
    }

    pub fn failure(&self) -> Option<&StageError> {
        self.0.as_ref().and_then(StageOutcome::failure)
    }

    pub fn is_filled(&self) -> bool {
        self.0.is_some()
    }
}

/// The five stage slots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageSlots {
    #[serde(default, skip_serializing_if = "empty")]
    pub aggregation: Slot<AggregationOutput>,
    #[serde(default, skip_serializing_if = "empty")]
    pub assessment: Slot<AssessmentOutput>,
    #[serde(default, skip_serializing_if = "empty")]
    pub allocation: Slot<AllocationOutput>,
    #[serde(default, skip_serializing_if = "empty")]
    pub communication: Slot<CommunicationOutput>,
    #[serde(default, skip_serializing_if = "empty")]
    pub reporting: Slot<ReportOutput>,
}

fn empty<T>(slot: &Slot<T>) -> bool {
    !slot.is_filled()
}

impl StageSlots {
    pub fn is_filled(&self, stage: StageName) -> bool {
        match stage {
            StageName::Aggregation => self.aggregation.is_filled(),
            StageName::Assessment => self.assessment.is_filled(),
            StageName::Allocation => self.allocation.is_filled(),
            StageName::Communication => self.communication.is_filled(),
            StageName::Reporting => self.reporting.is_filled(),
        }
    }

    pub fn succeeded(&self, stage: StageName) -> bool {
        match stage {
            StageName::Aggregation => self.aggregation.success().is_some(),
            StageName::Assessment => self.assessment.success().is_some(),
            StageName::Allocation => self.allocation.success().is_some(),
            StageName::Communication => self.communication.success().is_some(),
            StageName::Reporting => self.reporting.success().is_some(),
        }
    }
}

/// Stage output types that own a slot in [`StageSlots`]
pub(crate) trait SlotOutput: Sized {
    const STAGE: StageName;

    fn slot(slots: &mut StageSlots) -> &mut Slot<Self>;
}

macro_rules! slot_output {
    ($($output:ty => $stage:ident, $field:ident);* $(;)?) => {
        $(
            impl SlotOutput for $output {
                const STAGE: StageName = StageName::$stage;

                fn slot(slots: &mut StageSlots) -> &mut Slot<Self> {
                    &mut slots.$field
                }
            }
        )*
    };
}

slot_output! {
    AggregationOutput => Aggregation, aggregation;
    AssessmentOutput => Assessment, assessment;
    AllocationOutput => Allocation, allocation;
    CommunicationOutput => Communication, communication;
    ReportOutput => Reporting, reporting;
}

/// A stage failure kept in the workflow's error list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedError {
    pub stage: StageName,
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    pub attempts: u32,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub(crate) workflow_id: Uuid,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) status: WorkflowStatus,
    pub(crate) step_index: u32,
    pub(crate) current_step: PipelineStep,
    pub(crate) slots: StageSlots,
    pub(crate) errors: Vec<RecordedError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) halted_at: Option<StageName>,
}

impl WorkflowState {
    pub(crate) fn start() -> Self {
        Self {
            workflow_id: Uuid::new_v4(),
            started_at: Utc::now(),
            completed_at: None,
            status: WorkflowStatus::Running,
            step_index: 0,
            current_step: PipelineStep::Workflow,
            slots: StageSlots::default(),
            errors: Vec::new(),
            halted_at: None,
        }
    }

    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn step_index(&self) -> u32 {
        self.step_index
    }

    pub fn current_step(&self) -> PipelineStep {
        self.current_step
    }

    pub fn slots(&self) -> &StageSlots {
        &self.slots
    }

    pub fn aggregation(&self) -> &Slot<AggregationOutput> {
        &self.slots.aggregation
    }

    pub fn assessment(&self) -> &Slot<AssessmentOutput> {
        &self.slots.assessment
    }

    pub fn allocation(&self) -> &Slot<AllocationOutput> {
        &self.slots.allocation
    }

    pub fn communication(&self) -> &Slot<CommunicationOutput> {
        &self.slots.communication
    }

    pub fn reporting(&self) -> &Slot<ReportOutput> {
        &self.slots.reporting
    }

    pub fn errors(&self) -> &[RecordedError] {
        &self.errors
    }

    /// Stage whose failure halted the run, if any
    pub fn halted_at(&self) -> Option<StageName> {
        self.halted_at
    }

    pub(crate) fn advance(&mut self, step: PipelineStep) {
        self.step_index += 1;
        self.current_step = step;
    }

    pub(crate) fn halt(&mut self, stage: StageName) {
        if self.halted_at.is_none() {
            self.halted_at = Some(stage);
        }
    }

    /// Write a settled stage call into its slot. A failure is appended to
    /// the error list and returned so the caller can decide whether to halt.
    pub(crate) fn settle<T: SlotOutput>(&mut self, attempted: Attempted<T>) -> Option<StageError> {
        let Attempted { result, attempts } = attempted;
        let failure = result.as_ref().err().cloned();

        let failure = match T::slot(&mut self.slots).fill(result.into()) {
            Ok(()) => failure,
            Err(violation) => Some(violation),
        };

        if let Some(err) = &failure {
            self.record(T::STAGE, err, attempts);
        }
        failure
    }

    fn record(&mut self, stage: StageName, err: &StageError, attempts: u32) {
        self.errors.push(RecordedError {
            stage,
            kind: err.kind,
            message: err.message.clone(),
            retryable: err.retryable,
            attempts,
            at: Utc::now(),
        });
    }

    pub(crate) fn freeze(mut self, status: WorkflowStatus) -> WorkflowResult {
        self.status = status;
        self.current_step = PipelineStep::Finalize;
        self.step_index += 1;
        self.completed_at = Some(Utc::now());
        WorkflowResult(self)
    }
}

/// Frozen state of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowResult(WorkflowState);

impl Deref for WorkflowResult {
    type Target = WorkflowState;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl WorkflowResult {
    pub fn into_state(self) -> WorkflowState {
        self.0
    }

    pub fn duration_ms(&self) -> i64 {
        self.0
            .completed_at
            .map(|done| (done - self.0.started_at).num_milliseconds())
            .unwrap_or_default()
    }

    /// Condensed view of the run for dashboards and the CLI
    pub fn summary(&self) -> WorkflowSummary {
        let slots = &self.0.slots;
        WorkflowSummary {
            workflow_id: self.0.workflow_id,
            status: self.0.status,
            steps_completed: StageName::ALL
                .into_iter()
                .filter(|stage| slots.succeeded(*stage))
                .collect(),
            overall_severity: slots.assessment.success().map(|a| a.overall_severity),
            resources_allocated: slots
                .allocation
                .success()
                .map(|a| a.total_resources)
                .unwrap_or_default(),
            alerts_sent: slots
                .communication
                .success()
                .map(|c| c.alerts_sent)
                .unwrap_or_default(),
            reports_generated: slots
                .reporting
                .success()
                .map(|r| r.reports_count)
                .unwrap_or_default(),
            error_count: self.0.errors.len(),
            duration_ms: self.duration_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub workflow_id: Uuid,
    pub status: WorkflowStatus,
    pub steps_completed: Vec<StageName>,
    pub overall_severity: Option<u8>,
    pub resources_allocated: u32,
    pub alerts_sent: u64,
    pub reports_generated: u32,
    pub error_count: usize,
    pub duration_ms: i64,
}
