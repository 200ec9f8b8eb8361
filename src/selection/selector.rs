use super::adaptive::{AdaptiveConfig, AdaptiveState, TierChange};
use super::strategy::{self as rank, RankRole, RankedPipeline, Ranking, SelectionStrategy};
use super::telemetry::TelemetrySnapshot;
use super::AccuracyTier;
use crate::pipeline::{AnalysisRequirement, PipelineDescriptor, PipelineHealth};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub strategy: SelectionStrategy,
    pub max_concurrent_pipelines: usize,
    pub adaptive: AdaptiveConfig,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::Adaptive,
            max_concurrent_pipelines: 3,
            adaptive: AdaptiveConfig::default(),
        }
    }
}

/// Ranks eligible pipelines for a requirement. Holds no registry state; the
/// caller passes candidates and telemetry on every call.
#[derive(Debug)]
pub struct StrategySelector {
    config: SelectorConfig,
    adaptive: Mutex<AdaptiveState>,
}

impl StrategySelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self {
            adaptive: Mutex::new(AdaptiveState::new(config.adaptive.clone())),
            config,
        }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    pub fn tier(&self) -> AccuracyTier {
        self.adaptive.lock().tier()
    }

    /// Feeds one invocation outcome into the adaptive window.
    pub fn observe(&self, latency_ms: f64, success: bool) -> Option<TierChange> {
        self.adaptive.lock().observe(latency_ms, success)
    }

    pub fn select(
        &self,
        candidates: &[PipelineDescriptor],
        requirement: &AnalysisRequirement,
        telemetry: &TelemetrySnapshot,
    ) -> Ranking {
        let strategy = requirement.strategy().unwrap_or(self.config.strategy);

        let mut eligible: Vec<&PipelineDescriptor> = candidates
            .iter()
            .filter(|d| d.health != PipelineHealth::CircuitOpen)
            .filter(|d| d.supports(requirement.capabilities()))
            .collect();

        if eligible.is_empty() {
            debug!(
                %strategy,
                required = ?requirement.capability_names(),
                "No eligible pipeline"
            );
            return Ranking::empty(strategy);
        }

        let mut tier = None;
        match strategy {
            SelectionStrategy::PerformanceFirst => rank::performance_first(&mut eligible, telemetry),
            SelectionStrategy::AccuracyFirst => rank::accuracy_first(&mut eligible),
            SelectionStrategy::ResourceOptimized => rank::resource_optimized(&mut eligible),
            SelectionStrategy::Hybrid => rank::hybrid(&mut eligible, telemetry),
            SelectionStrategy::Adaptive => {
                let state = self.adaptive.lock();
                state.rank(&mut eligible);
                tier = Some(state.tier());
            }
        }

        // Hybrid keeps its coarse/refinement positions; every other strategy
        // lets candidates meeting the soft targets move ahead.
        if strategy != SelectionStrategy::Hybrid {
            let (mut meeting, rest): (Vec<_>, Vec<_>) = eligible.into_iter().partition(|d| {
                requirement.targets_met(d, rank::effective_latency(d, telemetry))
            });
            meeting.extend(rest);
            eligible = meeting;
        }

        eligible.truncate(self.config.max_concurrent_pipelines.max(1));

        let pipelines = eligible
            .iter()
            .enumerate()
            .map(|(index, d)| RankedPipeline {
                name: d.name.clone(),
                role: role_for(strategy, index, eligible.len()),
            })
            .collect();

        let ranking = Ranking {
            strategy,
            tier,
            pipelines,
        };
        debug!(%strategy, ranking = ?ranking.names(), "Pipelines ranked");
        ranking
    }
}

impl Default for StrategySelector {
    fn default() -> Self {
        Self::new(SelectorConfig::default())
    }
}

fn role_for(strategy: SelectionStrategy, index: usize, len: usize) -> RankRole {
    match (strategy, index) {
        (SelectionStrategy::Hybrid, 0) if len > 1 => RankRole::Coarse,
        (SelectionStrategy::Hybrid, 1) => RankRole::Refinement,
        (_, 0) => RankRole::Primary,
        _ => RankRole::Fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Capability, PerformanceProfile};

    fn face(name: &str, fps: f64, latency_ms: f64, accuracy: f64) -> PipelineDescriptor {
        PipelineDescriptor::new(name)
            .with_capability(Capability::FaceDetection)
            .with_performance(PerformanceProfile::new(fps, latency_ms, accuracy))
    }

    fn candidates() -> Vec<PipelineDescriptor> {
        vec![face("fast", 60.0, 16.0, 0.7), face("precise", 15.0, 66.0, 0.95)]
    }

    fn selector(strategy: SelectionStrategy) -> StrategySelector {
        StrategySelector::new(SelectorConfig {
            strategy,
            ..SelectorConfig::default()
        })
    }

    #[test]
    fn performance_first_prefers_fast_pipeline() {
        let requirement = AnalysisRequirement::new([Capability::FaceDetection]);
        let ranking = selector(SelectionStrategy::PerformanceFirst).select(
            &candidates(),
            &requirement,
            &TelemetrySnapshot::new(),
        );
        assert_eq!(ranking.names(), vec!["fast", "precise"]);
        assert_eq!(ranking.pipelines[0].role, RankRole::Primary);
        assert_eq!(ranking.pipelines[1].role, RankRole::Fallback);
    }

    #[test]
    fn accuracy_first_prefers_precise_pipeline() {
        let requirement = AnalysisRequirement::new([Capability::FaceDetection]);
        let ranking = selector(SelectionStrategy::AccuracyFirst).select(
            &candidates(),
            &requirement,
            &TelemetrySnapshot::new(),
        );
        assert_eq!(ranking.names(), vec!["precise", "fast"]);
    }

    #[test]
    fn requirement_hint_overrides_configured_strategy() {
        let requirement = AnalysisRequirement::new([Capability::FaceDetection])
            .prefer(SelectionStrategy::AccuracyFirst);
        let ranking = selector(SelectionStrategy::PerformanceFirst).select(
            &candidates(),
            &requirement,
            &TelemetrySnapshot::new(),
        );
        assert_eq!(ranking.strategy, SelectionStrategy::AccuracyFirst);
        assert_eq!(ranking.names(), vec!["precise", "fast"]);
    }

    #[test]
    fn filters_capabilities_and_open_circuits() {
        let mut pipelines = candidates();
        pipelines[0].health = PipelineHealth::CircuitOpen;
        pipelines.push(
            PipelineDescriptor::new("gaze").with_capability(Capability::GazeTracking),
        );

        let requirement = AnalysisRequirement::new([Capability::FaceDetection]);
        let ranking = selector(SelectionStrategy::PerformanceFirst).select(
            &pipelines,
            &requirement,
            &TelemetrySnapshot::new(),
        );
        assert_eq!(ranking.names(), vec!["precise"]);

        let unmet = AnalysisRequirement::new([Capability::SpeechRecognition]);
        assert!(selector(SelectionStrategy::PerformanceFirst)
            .select(&pipelines, &unmet, &TelemetrySnapshot::new())
            .is_empty());
    }

    #[test]
    fn soft_targets_reorder_without_excluding() {
        let requirement =
            AnalysisRequirement::new([Capability::FaceDetection]).min_accuracy(0.9);
        let ranking = selector(SelectionStrategy::PerformanceFirst).select(
            &candidates(),
            &requirement,
            &TelemetrySnapshot::new(),
        );
        assert_eq!(ranking.names(), vec!["precise", "fast"]);
    }

    #[test]
    fn truncates_to_max_concurrent_pipelines() {
        let mut pipelines = candidates();
        pipelines.push(face("mid", 30.0, 33.0, 0.85));
        let selector = StrategySelector::new(SelectorConfig {
            strategy: SelectionStrategy::PerformanceFirst,
            max_concurrent_pipelines: 2,
            ..SelectorConfig::default()
        });
        let requirement = AnalysisRequirement::new([Capability::FaceDetection]);
        let ranking = selector.select(&pipelines, &requirement, &TelemetrySnapshot::new());
        assert_eq!(ranking.names(), vec!["fast", "mid"]);
    }

    #[test]
    fn hybrid_assigns_coarse_and_refinement_roles() {
        let requirement = AnalysisRequirement::new([Capability::FaceDetection]);
        let ranking = selector(SelectionStrategy::Hybrid).select(
            &candidates(),
            &requirement,
            &TelemetrySnapshot::new(),
        );
        assert_eq!(ranking.pipelines[0].role, RankRole::Coarse);
        assert_eq!(ranking.refinement().map(|p| p.name.as_str()), Some("precise"));

        let single = vec![face("only", 30.0, 33.0, 0.8)];
        let ranking = selector(SelectionStrategy::Hybrid).select(
            &single,
            &requirement,
            &TelemetrySnapshot::new(),
        );
        assert_eq!(ranking.pipelines[0].role, RankRole::Primary);
        assert!(ranking.refinement().is_none());
    }

    #[test]
    fn adaptive_ranking_reports_tier_and_moves_with_observations() {
        let selector = StrategySelector::new(SelectorConfig {
            strategy: SelectionStrategy::Adaptive,
            adaptive: AdaptiveConfig {
                window: 4,
                min_samples: 4,
                ..AdaptiveConfig::default()
            },
            ..SelectorConfig::default()
        });
        let requirement = AnalysisRequirement::new([Capability::FaceDetection]);

        let ranking = selector.select(&candidates(), &requirement, &TelemetrySnapshot::new());
        assert_eq!(ranking.tier, Some(AccuracyTier::Medium));

        let mut change = None;
        for _ in 0..4 {
            change = change.or(selector.observe(250.0, false));
        }
        assert_eq!(change.map(|c| c.to), Some(AccuracyTier::Low));

        let ranking = selector.select(&candidates(), &requirement, &TelemetrySnapshot::new());
        assert_eq!(ranking.tier, Some(AccuracyTier::Low));
        assert_eq!(ranking.names(), vec!["fast", "precise"]);
    }
}
