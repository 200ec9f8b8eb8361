use super::adaptive::AccuracyTier;
use super::telemetry::TelemetrySnapshot;
use crate::pipeline::PipelineDescriptor;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    PerformanceFirst,
    AccuracyFirst,
    #[serde(alias = "battery_optimized")]
    ResourceOptimized,
    Hybrid,
    #[default]
    Adaptive,
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionStrategy::PerformanceFirst => write!(f, "performance_first"),
            SelectionStrategy::AccuracyFirst => write!(f, "accuracy_first"),
            SelectionStrategy::ResourceOptimized => write!(f, "resource_optimized"),
            SelectionStrategy::Hybrid => write!(f, "hybrid"),
            SelectionStrategy::Adaptive => write!(f, "adaptive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankRole {
    Primary,
    Fallback,
    /// Hybrid phase one: fast, cheap, immediate result.
    Coarse,
    /// Hybrid phase two: higher accuracy result replacing the coarse one.
    Refinement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedPipeline {
    pub name: String,
    pub role: RankRole,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ranking {
    pub strategy: SelectionStrategy,
    pub tier: Option<AccuracyTier>,
    pub pipelines: Vec<RankedPipeline>,
}

impl Ranking {
    pub(crate) fn empty(strategy: SelectionStrategy) -> Self {
        Self {
            strategy,
            tier: None,
            pipelines: Vec::new(),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.pipelines.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn refinement(&self) -> Option<&RankedPipeline> {
        self.pipelines.iter().find(|p| p.role == RankRole::Refinement)
    }
}

/// Observed latency when the pipeline has been called, declared otherwise.
pub(crate) fn effective_latency(descriptor: &PipelineDescriptor, telemetry: &TelemetrySnapshot) -> f64 {
    telemetry
        .get(&descriptor.name)
        .filter(|t| t.samples > 0)
        .map_or(descriptor.performance.latency_ms, |t| t.avg_latency_ms)
}

fn by_accuracy_desc(a: &PipelineDescriptor, b: &PipelineDescriptor) -> Ordering {
    b.performance.accuracy.total_cmp(&a.performance.accuracy)
}

pub(crate) fn performance_first(candidates: &mut [&PipelineDescriptor], telemetry: &TelemetrySnapshot) {
    candidates.sort_by(|a, b| {
        b.performance
            .fps
            .total_cmp(&a.performance.fps)
            .then_with(|| effective_latency(a, telemetry).total_cmp(&effective_latency(b, telemetry)))
    });
}

pub(crate) fn accuracy_first(candidates: &mut [&PipelineDescriptor]) {
    candidates.sort_by(|a, b| {
        by_accuracy_desc(a, b).then_with(|| {
            b.performance
                .model_complexity
                .cmp(&a.performance.model_complexity)
        })
    });
}

pub(crate) fn resource_optimized(candidates: &mut [&PipelineDescriptor]) {
    candidates.sort_by(|a, b| {
        a.performance
            .resource_cost
            .total_cmp(&b.performance.resource_cost)
            .then_with(|| b.performance.fps.total_cmp(&a.performance.fps))
    });
}

/// Coarse pick first (fastest), refinement second (most accurate of the
/// rest), remaining candidates by accuracy.
pub(crate) fn hybrid(candidates: &mut Vec<&PipelineDescriptor>, telemetry: &TelemetrySnapshot) {
    performance_first(candidates, telemetry);
    if candidates.len() > 2 {
        accuracy_first(&mut candidates[1..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ModelComplexity, PerformanceProfile};

    fn descriptor(name: &str, fps: f64, latency_ms: f64, accuracy: f64, cost: f64) -> PipelineDescriptor {
        PipelineDescriptor::new(name).with_performance(
            PerformanceProfile::new(fps, latency_ms, accuracy).with_resource_cost(cost),
        )
    }

    fn names(candidates: &[&PipelineDescriptor]) -> Vec<String> {
        candidates.iter().map(|d| d.name.clone()).collect()
    }

    #[test]
    fn performance_first_breaks_fps_ties_by_latency() {
        let a = descriptor("a", 30.0, 40.0, 0.9, 0.5);
        let b = descriptor("b", 30.0, 20.0, 0.8, 0.5);
        let c = descriptor("c", 60.0, 50.0, 0.7, 0.5);
        let mut candidates = vec![&a, &b, &c];
        performance_first(&mut candidates, &TelemetrySnapshot::new());
        assert_eq!(names(&candidates), vec!["c", "b", "a"]);
    }

    #[test]
    fn observed_latency_overrides_declared() {
        let a = descriptor("a", 30.0, 10.0, 0.9, 0.5);
        let b = descriptor("b", 30.0, 20.0, 0.8, 0.5);
        let mut telemetry = TelemetrySnapshot::new();
        telemetry.insert(
            "a".to_string(),
            crate::selection::PipelineTelemetry {
                avg_latency_ms: 90.0,
                samples: 5,
                ..Default::default()
            },
        );
        let mut candidates = vec![&a, &b];
        performance_first(&mut candidates, &telemetry);
        assert_eq!(names(&candidates), vec!["b", "a"]);
    }

    #[test]
    fn accuracy_ties_prefer_complex_models() {
        let simple = PipelineDescriptor::new("simple").with_performance(
            PerformanceProfile::new(30.0, 30.0, 0.9).with_model_complexity(ModelComplexity::Low),
        );
        let complex = PipelineDescriptor::new("complex").with_performance(
            PerformanceProfile::new(30.0, 30.0, 0.9).with_model_complexity(ModelComplexity::High),
        );
        let mut candidates = vec![&simple, &complex];
        accuracy_first(&mut candidates);
        assert_eq!(names(&candidates), vec!["complex", "simple"]);
    }

    #[test]
    fn resource_optimized_prefers_cheap() {
        let heavy = descriptor("heavy", 30.0, 30.0, 0.9, 0.9);
        let light = descriptor("light", 15.0, 30.0, 0.7, 0.1);
        let mut candidates = vec![&heavy, &light];
        resource_optimized(&mut candidates);
        assert_eq!(names(&candidates), vec!["light", "heavy"]);
    }

    #[test]
    fn hybrid_orders_coarse_then_refinement() {
        let fast = descriptor("fast", 60.0, 10.0, 0.6, 0.2);
        let mid = descriptor("mid", 30.0, 30.0, 0.8, 0.5);
        let precise = descriptor("precise", 10.0, 90.0, 0.97, 0.9);
        let mut candidates = vec![&mid, &precise, &fast];
        hybrid(&mut candidates, &TelemetrySnapshot::new());
        assert_eq!(names(&candidates), vec!["fast", "precise", "mid"]);
    }
}
