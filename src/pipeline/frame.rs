use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Video,
    Audio,
    EyeTracking,
    Multimodal,
}

/// A captured sample handed to a pipeline for analysis.
#[derive(Debug, Clone)]
pub struct SensorFrame {
    frame_id: Uuid,
    modality: Modality,
    captured_at: DateTime<Utc>,
    payload: Vec<u8>,
    metadata: serde_json::Value,
}

impl SensorFrame {
    pub fn new(modality: Modality, payload: Vec<u8>) -> Self {
        Self {
            frame_id: Uuid::new_v4(),
            modality,
            captured_at: Utc::now(),
            payload,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn frame_id(&self) -> Uuid {
        self.frame_id
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn metadata(&self) -> &serde_json::Value {
        &self.metadata
    }
}
