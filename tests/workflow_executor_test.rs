//! End-to-end behaviour of the workflow executor
//!
//! Uses scripted stages to drive every branch of the pipeline and the
//! reference stages for the two canonical scenarios.

use proptest::prelude::*;
use resilientflow::config::{StageSettings, WorkflowConfig};
use resilientflow::testing::{sample_event, Reply, ScriptedStage, ScriptedTable};
use resilientflow::workflow::{
    run_workflow, DisasterEvent, ErrorKind, EventEmitter, EventType, GeoPoint, PipelineStep,
    StageError, StageName, StageTable, StepPhase, WorkflowExecutor, WorkflowResult,
    WorkflowStatus,
};
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> WorkflowConfig {
    WorkflowConfig {
        retry_base_delay: Duration::from_millis(1),
        max_retry_delay: Duration::from_millis(10),
        stage_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

async fn run_scripted(scripted: &ScriptedTable, severity: u8) -> (WorkflowResult, Arc<EventEmitter>) {
    let emitter = Arc::new(EventEmitter::new());
    let result = run_workflow(
        &sample_event(severity),
        &fast_config(),
        scripted.table(),
        emitter.clone(),
    )
    .await
    .unwrap();
    (result, emitter)
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

// ============================================================================
// Routing properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_below_threshold_never_reaches_downstream(
        threshold in 1u8..=100,
        offset in 1u8..=100,
    ) {
        let severity = threshold.saturating_sub(offset);

        let scripted = ScriptedTable::new(severity);
        let config = WorkflowConfig { severity_threshold: threshold, ..fast_config() };
        let result = block_on(run_workflow(
            &sample_event(severity),
            &config,
            scripted.table(),
            Arc::new(EventEmitter::new()),
        ))
        .unwrap();

        prop_assert_eq!(result.status(), WorkflowStatus::Completed);
        prop_assert_eq!(scripted.calls(StageName::Allocation), 0);
        prop_assert_eq!(scripted.calls(StageName::Communication), 0);
        prop_assert_eq!(scripted.calls(StageName::Reporting), 0);
    }

    #[test]
    fn prop_at_or_above_threshold_invokes_every_stage_once(
        threshold in 0u8..=100,
        extra in 0u8..=100,
    ) {
        let severity = threshold.saturating_add(extra).min(100);

        let scripted = ScriptedTable::new(severity);
        let config = WorkflowConfig { severity_threshold: threshold, ..fast_config() };
        let result = block_on(run_workflow(
            &sample_event(severity),
            &config,
            scripted.table(),
            Arc::new(EventEmitter::new()),
        ))
        .unwrap();

        prop_assert_eq!(result.status(), WorkflowStatus::Completed);
        for stage in StageName::ALL {
            prop_assert_eq!(scripted.calls(stage), 1);
        }
    }
}

// ============================================================================
// Partial and fatal failures
// ============================================================================

#[tokio::test]
async fn test_communication_failure_keeps_report() {
    let scripted = ScriptedTable {
        communication: Arc::new(ScriptedStage::failing(StageError::internal(
            "template rendering failed",
            false,
        ))),
        ..ScriptedTable::new(85)
    };

    let (result, _) = run_scripted(&scripted, 85).await;

    assert_eq!(result.status(), WorkflowStatus::CompletedWithErrors);
    assert_eq!(result.errors().len(), 1);
    assert_eq!(result.errors()[0].stage, StageName::Communication);
    assert_eq!(
        result.reporting().success().map(|r| r.report_id.as_str()),
        Some("report-1")
    );
    assert!(result.communication().failure().is_some());
}

#[tokio::test]
async fn test_reporting_failure_keeps_alerts() {
    let scripted = ScriptedTable {
        reporting: Arc::new(ScriptedStage::failing(StageError::unavailable(
            "pdf renderer offline",
        ))),
        ..ScriptedTable::new(85)
    };

    let (result, _) = run_scripted(&scripted, 85).await;

    assert_eq!(result.status(), WorkflowStatus::CompletedWithErrors);
    assert_eq!(result.errors().len(), 1);
    assert_eq!(result.errors()[0].stage, StageName::Reporting);
    assert_eq!(result.errors()[0].attempts, 3);
    assert_eq!(
        result.communication().success().map(|c| c.alerts_sent),
        Some(1_200)
    );
    assert_eq!(scripted.calls(StageName::Reporting), 3);
}

#[tokio::test]
async fn test_allocation_failure_after_retries_still_joins() {
    let scripted = ScriptedTable {
        allocation: Arc::new(ScriptedStage::failing(StageError::unavailable(
            "fleet api unreachable",
        ))),
        ..ScriptedTable::new(85)
    };

    let (result, emitter) = run_scripted(&scripted, 85).await;

    assert_eq!(result.status(), WorkflowStatus::CompletedWithErrors);
    assert_eq!(scripted.calls(StageName::Allocation), 3);
    assert_eq!(scripted.calls(StageName::Communication), 1);
    assert_eq!(scripted.calls(StageName::Reporting), 1);
    assert!(result.communication().success().is_some());
    assert!(result.reporting().success().is_some());

    let recorded = &result.errors()[0];
    assert_eq!(recorded.stage, StageName::Allocation);
    assert_eq!(recorded.kind, ErrorKind::Unavailable);
    assert_eq!(recorded.attempts, 3);

    let retries = emitter
        .events_for(result.workflow_id())
        .into_iter()
        .filter(|e| e.step == PipelineStep::Allocate && e.phase == StepPhase::Retry)
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn test_assessment_failure_is_fatal() {
    let scripted = ScriptedTable {
        assessment: Arc::new(ScriptedStage::failing(StageError::timeout(
            "clustering service slow",
        ))),
        ..ScriptedTable::new(85)
    };

    let (result, _) = run_scripted(&scripted, 85).await;

    assert_eq!(result.status(), WorkflowStatus::Failed);
    assert_eq!(result.halted_at(), Some(StageName::Assessment));
    assert_eq!(scripted.calls(StageName::Assessment), 3);
    assert_eq!(scripted.calls(StageName::Allocation), 0);
    assert_eq!(scripted.calls(StageName::Communication), 0);
    assert_eq!(scripted.calls(StageName::Reporting), 0);
    assert!(result.aggregation().success().is_some());
}

#[tokio::test]
async fn test_aggregation_failure_is_fatal() {
    let scripted = ScriptedTable {
        aggregation: Arc::new(ScriptedStage::failing(StageError::invalid_input(
            "malformed event",
        ))),
        ..ScriptedTable::new(85)
    };

    let (result, _) = run_scripted(&scripted, 85).await;

    assert_eq!(result.status(), WorkflowStatus::Failed);
    assert_eq!(scripted.calls(StageName::Aggregation), 1);
    assert_eq!(scripted.calls(StageName::Assessment), 0);
    assert!(result.aggregation().failure().is_some());
}

#[tokio::test]
async fn test_transient_failure_is_not_recorded() {
    let scripted = ScriptedTable::new(85);
    scripted
        .communication
        .push(Reply::Fail(StageError::unavailable("sms gateway blip")));

    let (result, emitter) = run_scripted(&scripted, 85).await;

    assert_eq!(result.status(), WorkflowStatus::Completed);
    assert!(result.errors().is_empty());
    assert_eq!(scripted.calls(StageName::Communication), 2);

    let complete = emitter
        .events_for(result.workflow_id())
        .into_iter()
        .find(|e| e.step == PipelineStep::Communicate && e.phase == StepPhase::Complete)
        .unwrap();
    assert_eq!(complete.payload.unwrap()["attempts"], 2);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_branch_times_out_without_losing_sibling() {
    let scripted = ScriptedTable {
        communication: Arc::new(ScriptedStage::new(Reply::Hang)),
        ..ScriptedTable::new(85)
    };
    let config = WorkflowConfig {
        stage_timeout: Duration::from_millis(200),
        ..fast_config()
    };

    let result = run_workflow(
        &sample_event(85),
        &config,
        scripted.table(),
        Arc::new(EventEmitter::new()),
    )
    .await
    .unwrap();

    assert_eq!(result.status(), WorkflowStatus::CompletedWithErrors);
    let failure = result.communication().failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::Timeout);
    assert!(result.reporting().success().is_some());
    assert_eq!(scripted.calls(StageName::Communication), 3);
}

#[tokio::test(start_paused = true)]
async fn test_join_branches_overlap() {
    let scripted = ScriptedTable {
        communication: Arc::new(ScriptedStage::new(Reply::SucceedAfter(
            Duration::from_secs(2),
            resilientflow::testing::sample_communication(),
        ))),
        reporting: Arc::new(ScriptedStage::new(Reply::SucceedAfter(
            Duration::from_secs(2),
            resilientflow::testing::sample_report(),
        ))),
        ..ScriptedTable::new(85)
    };
    let config = WorkflowConfig {
        stage_timeout: Duration::from_secs(10),
        ..fast_config()
    };

    let start = tokio::time::Instant::now();
    let result = run_workflow(
        &sample_event(85),
        &config,
        scripted.table(),
        Arc::new(EventEmitter::new()),
    )
    .await
    .unwrap();

    assert_eq!(result.status(), WorkflowStatus::Completed);
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_panic_in_stage_fails_workflow_but_returns_result() {
    let scripted = ScriptedTable {
        communication: Arc::new(ScriptedStage::new(Reply::Panic(
            "unexpected channel".to_string(),
        ))),
        ..ScriptedTable::new(85)
    };

    let (result, _) = run_scripted(&scripted, 85).await;

    assert_eq!(result.status(), WorkflowStatus::Failed);
    assert_eq!(scripted.calls(StageName::Communication), 1);
    assert!(result.reporting().success().is_some());
    assert_eq!(result.errors()[0].kind, ErrorKind::ContractViolation);
}

// ============================================================================
// Reference-stage scenarios
// ============================================================================

fn reference_executor() -> WorkflowExecutor {
    WorkflowExecutor::new(
        WorkflowConfig::default(),
        StageTable::reference(&StageSettings::default()),
        Arc::new(EventEmitter::new()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_severe_flood_completes_every_stage() {
    let event = DisasterEvent::new("evt-flood-85", EventType::Flood, GeoPoint::new(34.05, -118.24), 85);

    let result = reference_executor().run(&event).await;

    assert_eq!(result.status(), WorkflowStatus::Completed);
    for stage in StageName::ALL {
        assert!(result.slots().succeeded(stage), "{stage} slot missing");
    }

    let summary = result.summary();
    assert_eq!(summary.overall_severity, Some(85));
    assert_eq!(summary.resources_allocated, 20);
    assert_eq!(summary.reports_generated, 3);
    assert!(summary.alerts_sent > 0);
    assert_eq!(summary.steps_completed.len(), 5);
}

#[tokio::test]
async fn test_moderate_event_takes_minimal_route() {
    let event = DisasterEvent::new("evt-fire-40", EventType::Fire, GeoPoint::new(37.77, -122.42), 40);

    let result = reference_executor().run(&event).await;

    assert_eq!(result.status(), WorkflowStatus::Completed);
    assert!(result.aggregation().success().is_some());
    assert!(result.assessment().success().is_some());
    assert!(!result.allocation().is_filled());
    assert!(!result.communication().is_filled());
    assert!(!result.reporting().is_filled());
}

#[tokio::test]
async fn test_result_serializes_for_dashboards() {
    let scripted = ScriptedTable::new(85);
    let (result, _) = run_scripted(&scripted, 85).await;

    let value = serde_json::to_value(&result).unwrap();

    assert_eq!(value["status"], "completed");
    assert_eq!(value["workflow_id"], result.workflow_id().to_string());
    assert_eq!(value["slots"]["communication"]["outcome"], "success");
    assert_eq!(value["slots"]["reporting"]["output"]["reports_count"], 3);
    assert!(value["errors"].as_array().unwrap().is_empty());
    assert!(value["completed_at"].is_string());
}
