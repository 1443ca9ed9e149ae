//! Testing utilities and fixtures
//!
//! Scripted stages and sample payloads for exercising the workflow
//! executor without the reference stages.

pub mod fixtures;
pub mod mocks;

pub use fixtures::{
    aggregation_for, assessment_with_severity, sample_allocation, sample_communication,
    sample_event, sample_location, sample_report, ScriptedTable,
};
pub use mocks::{Reply, ScriptedStage};
