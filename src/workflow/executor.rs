//! The workflow state machine
//!
//! start -> aggregate -> assess -> route -> [skip | allocate] ->
//! join(communicate, report) -> finalize

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::event::{EventEmitter, StepPhase};
use super::join::{join, JoinResults, JoinTask};
use super::retry::{Attempted, RetryPolicy};
use super::router::{decide, RoutingDecision};
use super::stage::{
    AssessmentOutput, CommunicationOutput, DispatchInput, ReportOutput, StageContract, StageError,
    StagePayload, StageTable,
};
use super::state::{WorkflowResult, WorkflowState};
use super::{DisasterEvent, PipelineStep, StageName, WorkflowStatus};
use crate::config::WorkflowConfig;
use crate::error::Result;

/// Drives one event at a time through the fixed stage table.
///
/// An executor holds no per-run state, so concurrent `run` calls on the
/// same executor are independent; they share only the event emitter.
pub struct WorkflowExecutor {
    config: WorkflowConfig,
    stages: StageTable,
    emitter: Arc<EventEmitter>,
    retry: RetryPolicy,
}

impl WorkflowExecutor {
    /// Build an executor. Invalid configuration is rejected here, before
    /// any run starts.
    pub fn new(
        config: WorkflowConfig,
        stages: StageTable,
        emitter: Arc<EventEmitter>,
    ) -> Result<Self> {
        config.validate()?;
        let retry = RetryPolicy::from_config(&config);

        Ok(Self {
            config,
            stages,
            emitter,
            retry,
        })
    }

    /// Replace the retry policy derived from the configuration
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn emitter(&self) -> &Arc<EventEmitter> {
        &self.emitter
    }

    /// Run the pipeline for one event. Stage failures never surface as an
    /// `Err`; they are folded into the returned result.
    pub async fn run(&self, event: &DisasterEvent) -> WorkflowResult {
        let state = WorkflowState::start();
        let span = info_span!(
            "workflow",
            workflow_id = %state.workflow_id(),
            event_id = %event.id
        );
        self.drive(state, event).instrument(span).await
    }

    async fn drive(&self, mut state: WorkflowState, event: &DisasterEvent) -> WorkflowResult {
        let id = state.workflow_id();
        info!(
            "Starting workflow for {} event {} (severity {})",
            event.event_type, event.id, event.severity_raw
        );
        self.emitter.emit(
            id,
            PipelineStep::Workflow,
            StepPhase::Start,
            Some(json!({
                "event_id": event.id,
                "event_type": event.event_type,
                "severity_raw": event.severity_raw,
            })),
        );

        // Aggregate
        state.advance(PipelineStep::Aggregate);
        let attempted = self
            .invoke_stage(id, StageName::Aggregation, self.stages.aggregation.as_ref(), event)
            .await;
        if let Some(err) = state.settle(attempted) {
            if halts(StageName::Aggregation, &err) {
                return self.halt(state, StageName::Aggregation);
            }
        }

        // Assess
        state.advance(PipelineStep::Assess);
        let Some(aggregation) = state.aggregation().success() else {
            return self.halt(state, StageName::Aggregation);
        };
        let attempted = self
            .invoke_checked(
                id,
                StageName::Assessment,
                self.stages.assessment.as_ref(),
                aggregation,
                check_severity,
            )
            .await;
        if let Some(err) = state.settle(attempted) {
            if halts(StageName::Assessment, &err) {
                return self.halt(state, StageName::Assessment);
            }
        }

        // Route
        state.advance(PipelineStep::Route);
        let Some(severity) = state.assessment().success().map(|a| a.overall_severity) else {
            return self.halt(state, StageName::Assessment);
        };
        let threshold = self.config.severity_threshold;
        self.emitter.emit(
            id,
            PipelineStep::Route,
            StepPhase::Start,
            Some(json!({ "severity": severity, "threshold": threshold })),
        );
        let decision = decide(severity, threshold);
        info!(
            "Severity {} against threshold {}: {}",
            severity,
            threshold,
            decision.as_str()
        );
        self.emitter.emit(
            id,
            PipelineStep::Route,
            StepPhase::Complete,
            Some(json!({
                "severity": severity,
                "threshold": threshold,
                "decision": decision,
            })),
        );

        if decision == RoutingDecision::ProceedMinimal {
            for step in [
                PipelineStep::Allocate,
                PipelineStep::Join,
                PipelineStep::Communicate,
                PipelineStep::Report,
            ] {
                self.emitter.emit(
                    id,
                    step,
                    StepPhase::Skipped,
                    Some(json!({ "reason": decision })),
                );
            }
            return self.finalize(state);
        }

        // Allocate
        state.advance(PipelineStep::Allocate);
        let Some(assessment) = state.assessment().success() else {
            return self.halt(state, StageName::Assessment);
        };
        let attempted = self
            .invoke_stage(
                id,
                StageName::Allocation,
                self.stages.allocation.as_ref(),
                assessment,
            )
            .await;
        if let Some(err) = state.settle(attempted) {
            if halts(StageName::Allocation, &err) {
                return self.halt(state, StageName::Allocation);
            }
            warn!("Continuing without allocation: {}", err);
        }

        // Join
        state.advance(PipelineStep::Join);
        let Some(assessment) = state.assessment().success().cloned() else {
            return self.halt(state, StageName::Assessment);
        };
        let dispatch = DispatchInput {
            assessment,
            allocation: state.allocation().success().cloned(),
        };
        self.emitter.emit(
            id,
            PipelineStep::Join,
            StepPhase::Start,
            Some(json!({
                "stages": [StageName::Communication, StageName::Reporting],
                "allocation_present": dispatch.allocation.is_some(),
            })),
        );

        let joined = join(vec![
            JoinTask::new(StageName::Communication, async {
                self.invoke_stage(
                    id,
                    StageName::Communication,
                    self.stages.communication.as_ref(),
                    &dispatch,
                )
                .await
                .map(StagePayload::from)
            }),
            JoinTask::new(StageName::Reporting, async {
                self.invoke_stage(
                    id,
                    StageName::Reporting,
                    self.stages.reporting.as_ref(),
                    &dispatch,
                )
                .await
                .map(StagePayload::from)
            }),
        ])
        .await;
        let mut results = joined.unwrap_or_else(|err| {
            error!("Join rejected: {}", err);
            JoinResults::default()
        });

        let communication =
            unpack::<CommunicationOutput>(results.take(StageName::Communication), StageName::Communication);
        let reporting = unpack::<ReportOutput>(results.take(StageName::Reporting), StageName::Reporting);

        let communication_ok = communication.is_success();
        let reporting_ok = reporting.is_success();
        let communication_err = state.settle(communication);
        let reporting_err = state.settle(reporting);

        self.emitter.emit(
            id,
            PipelineStep::Join,
            StepPhase::Complete,
            Some(json!({
                "communication": communication_ok,
                "reporting": reporting_ok,
            })),
        );

        for (stage, err) in [
            (StageName::Communication, communication_err),
            (StageName::Reporting, reporting_err),
        ] {
            match err {
                Some(err) if halts(stage, &err) => state.halt(stage),
                Some(err) => warn!("Recorded {} failure: {}", stage, err),
                None => {}
            }
        }

        self.finalize(state)
    }

    /// Invoke one stage through the retry policy, emitting its lifecycle
    /// events.
    async fn invoke_stage<S>(
        &self,
        id: Uuid,
        name: StageName,
        stage: &S,
        input: &S::Input,
    ) -> Attempted<S::Output>
    where
        S: StageContract + ?Sized,
        S::Output: Serialize,
    {
        self.invoke_checked(id, name, stage, input, |_| Ok(())).await
    }

    /// Like [`invoke_stage`](Self::invoke_stage), with `check` applied to a
    /// successful output before it settles. A rejected output settles as
    /// the returned error.
    async fn invoke_checked<S, C>(
        &self,
        id: Uuid,
        name: StageName,
        stage: &S,
        input: &S::Input,
        check: C,
    ) -> Attempted<S::Output>
    where
        S: StageContract + ?Sized,
        S::Output: Serialize,
        C: FnOnce(&S::Output) -> std::result::Result<(), StageError> + Send,
    {
        let step = PipelineStep::from(name);
        let emitter = &self.emitter;

        emitter.emit(id, step, StepPhase::Start, None);
        debug!("Invoking {} stage", name);

        let attempted = self
            .retry
            .invoke_observed(stage, input, |attempt, delay, err| {
                emitter.emit(
                    id,
                    step,
                    StepPhase::Retry,
                    Some(json!({
                        "attempt": attempt,
                        "delay_ms": delay.as_millis() as u64,
                        "error_kind": err.kind,
                        "message": err.message,
                    })),
                );
            })
            .await;
        let Attempted { result, attempts } = attempted;
        let attempted = Attempted::new(
            result.and_then(|output| check(&output).map(|()| output)),
            attempts,
        );

        match &attempted.result {
            Ok(output) => {
                info!(
                    "Stage {} completed after {} attempt(s)",
                    name, attempted.attempts
                );
                emitter.emit(
                    id,
                    step,
                    StepPhase::Complete,
                    Some(json!({
                        "attempts": attempted.attempts,
                        "output": serde_json::to_value(output).ok(),
                    })),
                );
            }
            Err(err) => {
                warn!(
                    "Stage {} failed after {} attempt(s): {}",
                    name, attempted.attempts, err
                );
                emitter.emit(
                    id,
                    step,
                    StepPhase::Error,
                    Some(json!({
                        "attempts": attempted.attempts,
                        "error": err,
                    })),
                );
            }
        }

        attempted
    }

    fn halt(&self, mut state: WorkflowState, stage: StageName) -> WorkflowResult {
        state.halt(stage);
        self.finalize(state)
    }

    fn finalize(&self, state: WorkflowState) -> WorkflowResult {
        let status = if state.halted_at().is_some() {
            WorkflowStatus::Failed
        } else if state.errors().is_empty() {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::CompletedWithErrors
        };

        let result = state.freeze(status);
        let summary = serde_json::to_value(result.summary()).ok();

        if status == WorkflowStatus::Failed {
            error!(
                "Workflow failed at {} with {} recorded error(s)",
                result.halted_at().map(|s| s.as_str()).unwrap_or("unknown stage"),
                result.errors().len()
            );
            self.emitter
                .emit(result.workflow_id(), PipelineStep::Workflow, StepPhase::Error, summary);
        } else {
            info!(
                "Workflow {} in {}ms",
                status,
                result.duration_ms()
            );
            self.emitter.emit(
                result.workflow_id(),
                PipelineStep::Workflow,
                StepPhase::Complete,
                summary,
            );
        }

        result
    }
}

/// Aggregation and assessment halt on any failure; the other stages only
/// on a contract violation
fn halts(stage: StageName, err: &StageError) -> bool {
    stage.is_critical() || err.is_contract_violation()
}

/// Assessed severity must stay on the 0-100 scale routing is defined on
fn check_severity(assessment: &AssessmentOutput) -> std::result::Result<(), StageError> {
    if assessment.overall_severity > 100 {
        return Err(StageError::contract_violation(format!(
            "assessed severity {} is outside 0-100",
            assessment.overall_severity
        )));
    }
    Ok(())
}

/// Recover the typed output of a joined stage. A missing entry or an
/// output of the wrong stage is a contract violation.
fn unpack<T>(entry: Option<Attempted<StagePayload>>, stage: StageName) -> Attempted<T>
where
    T: TryFrom<StagePayload, Error = StagePayload>,
{
    let Some(Attempted { result, attempts }) = entry else {
        return Attempted::new(
            Err(StageError::contract_violation(format!(
                "{stage} produced no join result"
            ))),
            0,
        );
    };

    let result = result.and_then(|payload| {
        T::try_from(payload).map_err(|other| {
            StageError::contract_violation(format!(
                "{stage} returned a {} output",
                other.stage()
            ))
        })
    });
    Attempted::new(result, attempts)
}

/// Validate `config`, run one workflow and return its frozen result.
///
/// Only configuration errors are returned as `Err`.
pub async fn run_workflow(
    event: &DisasterEvent,
    config: &WorkflowConfig,
    stages: StageTable,
    emitter: Arc<EventEmitter>,
) -> Result<WorkflowResult> {
    let executor = WorkflowExecutor::new(config.clone(), stages, emitter)?;
    Ok(executor.run(event).await)
}
