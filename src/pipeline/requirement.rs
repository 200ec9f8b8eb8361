use super::descriptor::{Capability, PipelineDescriptor};
use crate::selection::SelectionStrategy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What a single `analyze` call needs. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequirement {
    capabilities: BTreeSet<Capability>,
    #[serde(default)]
    min_accuracy: Option<f64>,
    #[serde(default)]
    max_latency_ms: Option<f64>,
    #[serde(default)]
    strategy: Option<SelectionStrategy>,
}

impl AnalysisRequirement {
    pub fn new(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            capabilities: capabilities.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn min_accuracy(mut self, accuracy: f64) -> Self {
        self.min_accuracy = Some(accuracy);
        self
    }

    pub fn max_latency_ms(mut self, latency_ms: f64) -> Self {
        self.max_latency_ms = Some(latency_ms);
        self
    }

    /// Overrides the selector's configured strategy for this call only.
    pub fn prefer(mut self, strategy: SelectionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }

    pub fn accuracy_target(&self) -> Option<f64> {
        self.min_accuracy
    }

    pub fn latency_target_ms(&self) -> Option<f64> {
        self.max_latency_ms
    }

    pub fn strategy(&self) -> Option<SelectionStrategy> {
        self.strategy
    }

    /// Whether the pipeline meets the soft quality and latency targets.
    pub fn targets_met(&self, descriptor: &PipelineDescriptor, latency_ms: f64) -> bool {
        let accurate_enough = self
            .min_accuracy
            .map_or(true, |min| descriptor.performance.accuracy >= min);
        let fast_enough = self.max_latency_ms.map_or(true, |max| latency_ms <= max);
        accurate_enough && fast_enough
    }

    pub(crate) fn capability_names(&self) -> Vec<String> {
        self.capabilities.iter().map(ToString::to_string).collect()
    }
}
