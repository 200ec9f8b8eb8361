pub mod analysis_pipeline;
pub mod descriptor;
pub mod frame;
pub mod requirement;
pub mod result;
pub mod service;
pub mod simulated;

pub use analysis_pipeline::{AnalysisPipeline, PipelineConfig};
pub use descriptor::{Capability, ModelComplexity, PerformanceProfile, PipelineDescriptor, PipelineHealth};
pub use frame::{Modality, SensorFrame};
pub use requirement::AnalysisRequirement;
pub use result::AnalysisResult;
pub use service::{GuardedPipelineService, PipelineService};
pub use simulated::SimulatedPipeline;
