pub mod config;
pub mod error;
pub mod events;
pub mod initialization;
pub mod orchestration;
pub mod pipeline;
pub mod reliability;
pub mod resources;
pub mod scheduling;
pub mod selection;

pub use crate::config::Configuration;
pub use error::{
    AnalysisError, AppError, CircuitOpenError, InitializationError, PipelineError, QueueOverflowWarning,
    ResourceError,
};
pub use events::{EventPublisher, OrchestratorEvent};
pub use orchestration::{AnalysisOutcome, Orchestrator, OrchestratorBuilder, PipelineStatus};
pub use pipeline::{AnalysisPipeline, AnalysisRequirement, AnalysisResult, SensorFrame};
pub use resources::ResourcePool;
pub use scheduling::{AdaptiveBatchScheduler, BatchQueue};
pub use selection::{SelectionStrategy, StrategySelector};
