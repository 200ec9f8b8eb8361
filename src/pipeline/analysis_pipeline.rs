use super::descriptor::PipelineDescriptor;
use super::frame::SensorFrame;
use crate::error::PipelineError;
use async_trait::async_trait;
use std::sync::Arc;

/// Per-pipeline initialization settings, passed through untouched.
pub type PipelineConfig = serde_json::Value;

/// A pluggable analysis unit (face, gaze, speech, emotion, ...).
#[async_trait]
pub trait AnalysisPipeline: Send + Sync {
    fn descriptor(&self) -> PipelineDescriptor;

    async fn initialize(&self, config: &PipelineConfig) -> Result<(), PipelineError>;

    async fn process(&self, frame: Arc<SensorFrame>) -> Result<serde_json::Value, PipelineError>;

    async fn cleanup(&self) -> Result<(), PipelineError>;

    fn name(&self) -> String {
        self.descriptor().name
    }
}
