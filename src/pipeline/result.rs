use serde::{Deserialize, Serialize};

/// Plain result object consumed by the distribution layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub success: bool,
    pub data: serde_json::Value,
    pub processing_time_ms: f64,
    pub pipeline_used: String,
}

impl AnalysisResult {
    pub fn new(pipeline_used: impl Into<String>, data: serde_json::Value, processing_time_ms: f64) -> Self {
        Self {
            success: true,
            data,
            processing_time_ms,
            pipeline_used: pipeline_used.into(),
        }
    }
}
