use crate::pipeline::PipelineDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyTier {
    Low,
    #[default]
    Medium,
    High,
}

impl AccuracyTier {
    fn lower(self) -> Self {
        match self {
            AccuracyTier::High => AccuracyTier::Medium,
            _ => AccuracyTier::Low,
        }
    }

    fn higher(self) -> Self {
        match self {
            AccuracyTier::Low => AccuracyTier::Medium,
            _ => AccuracyTier::High,
        }
    }
}

impl fmt::Display for AccuracyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccuracyTier::Low => write!(f, "low"),
            AccuracyTier::Medium => write!(f, "medium"),
            AccuracyTier::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub initial_tier: AccuracyTier,
    /// Rolling window length in samples.
    pub window: usize,
    /// Samples required before the tier may move.
    pub min_samples: usize,
    pub high_latency_ms: f64,
    pub low_latency_ms: f64,
    pub high_error_rate: f64,
    pub low_error_rate: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            initial_tier: AccuracyTier::Medium,
            window: 20,
            min_samples: 10,
            high_latency_ms: 100.0,
            low_latency_ms: 33.0,
            high_error_rate: 0.2,
            low_error_rate: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierChange {
    pub from: AccuracyTier,
    pub to: AccuracyTier,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    latency_ms: f64,
    success: bool,
}

/// Rolling latency/error history driving the adaptive accuracy tier.
#[derive(Debug)]
pub struct AdaptiveState {
    config: AdaptiveConfig,
    tier: AccuracyTier,
    history: VecDeque<Sample>,
}

impl AdaptiveState {
    pub fn new(config: AdaptiveConfig) -> Self {
        Self {
            tier: config.initial_tier,
            history: VecDeque::with_capacity(config.window),
            config,
        }
    }

    pub fn tier(&self) -> AccuracyTier {
        self.tier
    }

    /// Records one invocation and shifts the tier when the whole window
    /// agrees. The window restarts after a shift so the next move needs
    /// fresh evidence.
    pub fn observe(&mut self, latency_ms: f64, success: bool) -> Option<TierChange> {
        self.history.push_back(Sample { latency_ms, success });
        while self.history.len() > self.config.window.max(1) {
            self.history.pop_front();
        }
        if self.history.len() < self.config.min_samples.max(1) {
            return None;
        }

        let count = self.history.len() as f64;
        let avg_latency_ms = self.history.iter().map(|s| s.latency_ms).sum::<f64>() / count;
        let error_rate = self.history.iter().filter(|s| !s.success).count() as f64 / count;

        let next = if avg_latency_ms > self.config.high_latency_ms
            || error_rate > self.config.high_error_rate
        {
            self.tier.lower()
        } else if avg_latency_ms < self.config.low_latency_ms
            && error_rate < self.config.low_error_rate
        {
            self.tier.higher()
        } else {
            self.tier
        };

        if next == self.tier {
            return None;
        }

        let change = TierChange {
            from: self.tier,
            to: next,
            avg_latency_ms,
            error_rate,
        };
        info!(
            from = %change.from,
            to = %change.to,
            avg_latency_ms,
            error_rate,
            "Adaptive selection tier changed"
        );
        self.tier = next;
        self.history.clear();
        Some(change)
    }

    /// Orders candidates for the current tier; ties go to the more accurate.
    pub fn rank(&self, candidates: &mut [&PipelineDescriptor]) {
        let max_fps = candidates
            .iter()
            .map(|d| d.performance.fps)
            .fold(0.0_f64, f64::max)
            .max(f64::EPSILON);
        let tier = self.tier;
        let score = |d: &PipelineDescriptor| {
            let speed = d.performance.fps / max_fps;
            let accuracy = d.performance.accuracy;
            match tier {
                AccuracyTier::Low => speed,
                AccuracyTier::Medium => 0.5 * speed + 0.5 * accuracy,
                AccuracyTier::High => accuracy,
            }
        };
        candidates.sort_by(|a, b| {
            score(b).total_cmp(&score(a)).then_with(|| {
                b.performance
                    .accuracy
                    .total_cmp(&a.performance.accuracy)
            })
        });
    }
}
