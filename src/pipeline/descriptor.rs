use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Analysis features a pipeline can produce.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    FaceDetection,
    FaceLandmarks,
    GazeTracking,
    EyeTracking,
    EmotionAnalysis,
    AgeEstimation,
    SpeechRecognition,
    SpeechAnalysis,
    AudioAnalysis,
    PoseEstimation,
    Custom(String),
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::FaceDetection => write!(f, "face_detection"),
            Capability::FaceLandmarks => write!(f, "face_landmarks"),
            Capability::GazeTracking => write!(f, "gaze_tracking"),
            Capability::EyeTracking => write!(f, "eye_tracking"),
            Capability::EmotionAnalysis => write!(f, "emotion_analysis"),
            Capability::AgeEstimation => write!(f, "age_estimation"),
            Capability::SpeechRecognition => write!(f, "speech_recognition"),
            Capability::SpeechAnalysis => write!(f, "speech_analysis"),
            Capability::AudioAnalysis => write!(f, "audio_analysis"),
            Capability::PoseEstimation => write!(f, "pose_estimation"),
            Capability::Custom(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelComplexity {
    Low,
    #[default]
    Medium,
    High,
}

/// Declared (not measured) performance characteristics of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceProfile {
    pub fps: f64,
    pub latency_ms: f64,
    /// 0.0 - 1.0
    pub accuracy: f64,
    /// Relative CPU/GPU/battery cost, 0.0 (free) - 1.0 (expensive).
    pub resource_cost: f64,
    pub model_complexity: ModelComplexity,
}

impl Default for PerformanceProfile {
    fn default() -> Self {
        Self {
            fps: 30.0,
            latency_ms: 33.0,
            accuracy: 0.8,
            resource_cost: 0.5,
            model_complexity: ModelComplexity::Medium,
        }
    }
}

impl PerformanceProfile {
    pub fn new(fps: f64, latency_ms: f64, accuracy: f64) -> Self {
        Self {
            fps,
            latency_ms,
            accuracy,
            ..Self::default()
        }
    }

    pub fn with_resource_cost(mut self, resource_cost: f64) -> Self {
        self.resource_cost = resource_cost;
        self
    }

    pub fn with_model_complexity(mut self, model_complexity: ModelComplexity) -> Self {
        self.model_complexity = model_complexity;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineHealth {
    #[default]
    Healthy,
    Degraded,
    CircuitOpen,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDescriptor {
    pub name: String,
    pub capabilities: BTreeSet<Capability>,
    #[serde(default)]
    pub performance: PerformanceProfile,
    /// Pipelines that must be ready before this one initializes.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub health: PipelineHealth,
}

impl PipelineDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: BTreeSet::new(),
            performance: PerformanceProfile::default(),
            dependencies: Vec::new(),
            health: PipelineHealth::Healthy,
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(capabilities);
        self
    }

    pub fn with_performance(mut self, performance: PerformanceProfile) -> Self {
        self.performance = performance;
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn supports(&self, required: &BTreeSet<Capability>) -> bool {
        required.is_subset(&self.capabilities)
    }
}
