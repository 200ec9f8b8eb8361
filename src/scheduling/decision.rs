use super::load::SystemLoad;
use serde::Serialize;
use std::time::Duration;

/// Interval floor applied to every decision.
pub const MIN_INTERVAL: Duration = Duration::from_millis(8);
/// Interval ceiling applied to every decision.
pub const MAX_INTERVAL: Duration = Duration::from_millis(100);

/// Confidence profile of the pending items.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityMetrics {
    pub total: usize,
    pub high_confidence: usize,
    /// `high_confidence / total`, 1.0 for an empty set.
    pub ratio: f64,
}

impl QualityMetrics {
    pub fn new(total: usize, high_confidence: usize) -> Self {
        let ratio = if total == 0 {
            1.0
        } else {
            high_confidence as f64 / total as f64
        };
        Self {
            total,
            high_confidence,
            ratio,
        }
    }
}

/// Output of one scheduling decision. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchDecision {
    pub batch_size: usize,
    pub interval: Duration,
    /// Diagnostic tag naming what shaped the decision.
    pub reason: String,
    pub system_load: Option<SystemLoad>,
    pub quality: Option<QualityMetrics>,
}
