use super::decision::QualityMetrics;
use super::load::SystemLoad;
use super::scheduler::BatchConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStrategyKind {
    Fixed,
    TimeBased,
    LoadBased,
    #[default]
    Adaptive,
    QualityAware,
}

impl fmt::Display for BatchStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStrategyKind::Fixed => write!(f, "fixed"),
            BatchStrategyKind::TimeBased => write!(f, "time_based"),
            BatchStrategyKind::LoadBased => write!(f, "load_based"),
            BatchStrategyKind::Adaptive => write!(f, "adaptive"),
            BatchStrategyKind::QualityAware => write!(f, "quality_aware"),
        }
    }
}

/// Raw measurements a strategy may react to.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SchedulingContext {
    pub system_load: SystemLoad,
    /// Recent average per-batch processing latency.
    pub average_latency: Option<Duration>,
    pub queue_depth: usize,
    /// Items arriving per second.
    pub frame_rate: f64,
    /// Time between the two most recent batches.
    pub last_batch_gap: Option<Duration>,
}

/// Unclamped strategy output.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub batch_size: f64,
    pub interval_ms: f64,
    pub reason: String,
}

pub trait BatchStrategy: Send + Sync {
    fn kind(&self) -> BatchStrategyKind;

    fn propose(
        &self,
        pending: usize,
        quality: &QualityMetrics,
        context: &SchedulingContext,
        config: &BatchConfig,
    ) -> Proposal;
}

fn requested(pending: usize, config: &BatchConfig) -> f64 {
    pending.min(config.max_batch_size) as f64
}

pub struct FixedStrategy;

impl BatchStrategy for FixedStrategy {
    fn kind(&self) -> BatchStrategyKind {
        BatchStrategyKind::Fixed
    }

    fn propose(&self, _: usize, _: &QualityMetrics, _: &SchedulingContext, config: &BatchConfig) -> Proposal {
        Proposal {
            batch_size: config.target_batch_size as f64,
            interval_ms: config.base_interval_ms as f64,
            reason: "fixed".to_string(),
        }
    }
}

/// Drains everything pending, no slower than the recent batch cadence.
pub struct TimeBasedStrategy;

impl BatchStrategy for TimeBasedStrategy {
    fn kind(&self) -> BatchStrategyKind {
        BatchStrategyKind::TimeBased
    }

    fn propose(
        &self,
        pending: usize,
        _: &QualityMetrics,
        context: &SchedulingContext,
        config: &BatchConfig,
    ) -> Proposal {
        let base = config.base_interval_ms as f64;
        let interval_ms = context
            .last_batch_gap
            .map_or(base, |gap| base.min(gap.as_secs_f64() * 1_000.0));
        Proposal {
            batch_size: pending as f64,
            interval_ms,
            reason: "time_based".to_string(),
        }
    }
}

pub struct LoadBasedStrategy;

impl BatchStrategy for LoadBasedStrategy {
    fn kind(&self) -> BatchStrategyKind {
        BatchStrategyKind::LoadBased
    }

    fn propose(
        &self,
        pending: usize,
        _: &QualityMetrics,
        context: &SchedulingContext,
        config: &BatchConfig,
    ) -> Proposal {
        let size = requested(pending, config);
        let base = config.base_interval_ms as f64;
        let load = context.system_load.peak();
        let (size_factor, interval_factor, reason) = if load > 0.9 {
            (0.3, 2.0, "load_critical")
        } else if load > 0.7 {
            (0.6, 1.5, "load_high")
        } else {
            (1.0, 1.0, "load_normal")
        };
        Proposal {
            batch_size: size * size_factor,
            interval_ms: base * interval_factor,
            reason: reason.to_string(),
        }
    }
}

/// Every factor that crosses its threshold shrinks the batch and stretches
/// the interval; factors multiply.
pub struct AdaptiveStrategy;

impl BatchStrategy for AdaptiveStrategy {
    fn kind(&self) -> BatchStrategyKind {
        BatchStrategyKind::Adaptive
    }

    fn propose(
        &self,
        pending: usize,
        _: &QualityMetrics,
        context: &SchedulingContext,
        config: &BatchConfig,
    ) -> Proposal {
        let mut size = requested(pending, config);
        let mut interval_ms = config.base_interval_ms as f64;
        let mut factors = Vec::new();

        let load = context.system_load.peak();
        if load > 0.9 {
            size *= 0.5;
            interval_ms *= 1.5;
            factors.push("load_critical");
        } else if load > 0.7 {
            size *= 0.75;
            interval_ms *= 1.25;
            factors.push("load_high");
        }

        if let Some(latency) = context.average_latency {
            if latency.as_secs_f64() * 1_000.0 > config.target_latency_ms as f64 {
                size *= 0.8;
                interval_ms *= 1.2;
                factors.push("latency");
            }
        }

        if context.queue_depth > config.max_batch_size.saturating_mul(3) {
            size *= 0.9;
            interval_ms *= 1.1;
            factors.push("queue_depth");
        }

        if context.frame_rate > config.target_frame_rate {
            size *= 0.85;
            interval_ms *= 1.15;
            factors.push("frame_rate");
        }

        let reason = if factors.is_empty() {
            "adaptive".to_string()
        } else {
            format!("adaptive:{}", factors.join("+"))
        };
        Proposal {
            batch_size: size,
            interval_ms,
            reason,
        }
    }
}

/// Larger, faster batches when most pending items are high confidence.
pub struct QualityAwareStrategy;

impl BatchStrategy for QualityAwareStrategy {
    fn kind(&self) -> BatchStrategyKind {
        BatchStrategyKind::QualityAware
    }

    fn propose(
        &self,
        pending: usize,
        quality: &QualityMetrics,
        _: &SchedulingContext,
        config: &BatchConfig,
    ) -> Proposal {
        let size = requested(pending, config);
        let base = config.base_interval_ms as f64;
        let (size_factor, interval_factor, reason) = if quality.ratio >= 0.8 {
            (1.0, 0.75, "quality_high")
        } else if quality.ratio >= 0.5 {
            (0.75, 1.0, "quality_medium")
        } else {
            (0.5, 1.5, "quality_low")
        };
        Proposal {
            batch_size: size * size_factor,
            interval_ms: base * interval_factor,
            reason: reason.to_string(),
        }
    }
}

pub fn strategy_for(kind: BatchStrategyKind) -> Box<dyn BatchStrategy> {
    match kind {
        BatchStrategyKind::Fixed => Box::new(FixedStrategy),
        BatchStrategyKind::TimeBased => Box::new(TimeBasedStrategy),
        BatchStrategyKind::LoadBased => Box::new(LoadBasedStrategy),
        BatchStrategyKind::Adaptive => Box::new(AdaptiveStrategy),
        BatchStrategyKind::QualityAware => Box::new(QualityAwareStrategy),
    }
}
