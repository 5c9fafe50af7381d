//! Stage coordination: run locks, run ids and the referrers file round trip.

pub mod orchestrator;

pub use orchestrator::{OrchestrationError, Pipeline, PipelineSummary, Stage};
