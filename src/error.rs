use crate::resources::ResourceKind;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Error type returned by pipeline implementations and tower services.
pub type PipelineError = Box<dyn std::error::Error + Send + Sync + 'static>;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),
    #[error(transparent)]
    Initialization(#[from] InitializationError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("Pipeline {0} is not registered")]
    UnknownPipeline(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InitializationError {
    #[error("Pipeline {pipeline} did not initialize within {timeout:?} ({attempts} attempts)")]
    Timeout {
        pipeline: String,
        timeout: Duration,
        attempts: u32,
    },
    #[error("Pipeline {pipeline} failed to initialize after {attempts} attempts: {reason}")]
    Failed {
        pipeline: String,
        attempts: u32,
        reason: String,
    },
    #[error(
        "Unresolved pipeline dependencies (cycle or missing pipeline) for: {}",
        pipelines.join(", ")
    )]
    CircularOrMissingDependency {
        /// Every pipeline that could not start.
        pipelines: Vec<String>,
        /// The subset of `pipelines` that sits on a dependency cycle.
        cycle: Vec<String>,
        missing: Vec<String>,
    },
    #[error("Pipeline {pipeline} is blocked by failed dependency {dependency}")]
    BlockedByDependency { pipeline: String, dependency: String },
    #[error("Pipeline {0} is already registered")]
    AlreadyRegistered(String),
    #[error("Pipeline {0} was unregistered while initializing")]
    Unregistered(String),
}

/// Raised when a call is rejected because the pipeline's breaker is open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Circuit breaker for pipeline {pipeline} is open")]
pub struct CircuitOpenError {
    pub pipeline: String,
}

/// One failed step of an `analyze` fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackAttempt {
    pub pipeline: String,
    pub error: String,
    pub duration_ms: f64,
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),
    #[error("No ready pipeline provides [{}]", required.join(", "))]
    NoCompatiblePipeline { required: Vec<String> },
    #[error("Pipeline {pipeline} failed: {reason}")]
    PipelineFailed { pipeline: String, reason: String },
    #[error("Pipeline {pipeline} timed out after {timeout:?}")]
    Timeout { pipeline: String, timeout: Duration },
    #[error("All {} candidate pipelines failed, first error: {source}", attempts.len())]
    AllCandidatesFailed {
        source: Box<AnalysisError>,
        attempts: Vec<FallbackAttempt>,
    },
    #[error("Orchestrator is shut down")]
    Unavailable,
}

impl AnalysisError {
    /// Name of the pipeline the error is attributed to, if any.
    pub fn pipeline(&self) -> Option<&str> {
        match self {
            AnalysisError::CircuitOpen(open) => Some(&open.pipeline),
            AnalysisError::PipelineFailed { pipeline, .. } => Some(pipeline),
            AnalysisError::Timeout { pipeline, .. } => Some(pipeline),
            AnalysisError::AllCandidatesFailed { source, .. } => source.pipeline(),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    #[error("Failed to create {kind} resource: {reason}")]
    Creation { kind: ResourceKind, reason: String },
    #[error("Resource handle {0} is not checked out from this pool")]
    UnknownHandle(u64),
    #[error("Invalid resource request: {0}")]
    InvalidRequest(String),
}

/// Non-fatal: the batch queue dropped its oldest items to stay bounded.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[error("Batch queue overflow: dropped {dropped} oldest items ({total_dropped} dropped so far)")]
pub struct QueueOverflowWarning {
    pub dropped: usize,
    pub total_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_names_every_stuck_pipeline() {
        let error = InitializationError::CircularOrMissingDependency {
            pipelines: vec!["a".to_string(), "b".to_string()],
            cycle: vec!["a".to_string(), "b".to_string()],
            missing: Vec::new(),
        };
        let message = error.to_string();
        assert!(message.contains("a"));
        assert!(message.contains("b"));
    }

    #[test]
    fn exhausted_fallback_reports_origin_pipeline() {
        let error = AnalysisError::AllCandidatesFailed {
            source: Box::new(AnalysisError::PipelineFailed {
                pipeline: "fast".to_string(),
                reason: "boom".to_string(),
            }),
            attempts: vec![FallbackAttempt {
                pipeline: "fast".to_string(),
                error: "boom".to_string(),
                duration_ms: 1.0,
            }],
        };
        assert_eq!(error.pipeline(), Some("fast"));
        assert!(error.to_string().contains("boom"));
    }
}
