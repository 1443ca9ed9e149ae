//! # ResilientFlow
//!
//! Orchestration core for a disaster-response pipeline: a raw disaster event
//! is aggregated, assessed, routed on its severity, optionally matched with
//! resources, and then alerted on and reported in parallel.
//!
//! ## Usage
//!
//! ```bash
//! resilientflow run --event-type flood --severity 85 --lat 34.05 --lon -118.24
//! ```
//!
//! ## Modules
//!
//! - `config` - TOML configuration with environment overrides
//! - `error` - Crate-level error type
//! - `stages` - Deterministic reference implementations of the five stages
//! - `testing` - Scripted stages and fixtures for exercising the executor
//! - `workflow` - Stage contract, retry policy, router, join, events and executor
pub mod config;
pub mod error;
pub mod stages;
pub mod workflow;

pub mod testing;

pub use error::{Error, Result};
pub use workflow::{run_workflow, WorkflowExecutor, WorkflowResult};
