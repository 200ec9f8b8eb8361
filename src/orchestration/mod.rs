pub mod orchestrator;
pub mod registry;

pub use orchestrator::{AnalysisOutcome, Orchestrator, OrchestratorBuilder, OrchestratorConfig};
pub use registry::{PipelineStatus, PipelineSummary};
