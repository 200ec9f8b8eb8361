use crate::pipeline::{AnalysisPipeline, Capability, PipelineConfig, PipelineDescriptor, PipelineHealth};
use crate::reliability::{CircuitBreaker, CircuitState};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Registered,
    Initializing,
    Ready,
    /// Ready, but its breaker is not closed.
    Degraded,
    /// Initialization exhausted its retries. Excluded from selection until
    /// registered again.
    Failed,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStatus::Registered => write!(f, "registered"),
            PipelineStatus::Initializing => write!(f, "initializing"),
            PipelineStatus::Ready => write!(f, "ready"),
            PipelineStatus::Degraded => write!(f, "degraded"),
            PipelineStatus::Failed => write!(f, "failed"),
        }
    }
}

pub(crate) struct RegistryEntry {
    /// Distinguishes this registration from a later one under the same name.
    pub(crate) registration: Uuid,
    pub(crate) pipeline: Arc<dyn AnalysisPipeline>,
    pub(crate) descriptor: PipelineDescriptor,
    pub(crate) config: PipelineConfig,
    pub(crate) breaker: Arc<CircuitBreaker>,
    pub(crate) status: PipelineStatus,
}

impl RegistryEntry {
    pub(crate) fn status(&self) -> PipelineStatus {
        match self.status {
            PipelineStatus::Ready if self.breaker.state() != CircuitState::Closed => {
                PipelineStatus::Degraded
            }
            status => status,
        }
    }

    fn is_selectable(&self) -> bool {
        matches!(self.status, PipelineStatus::Ready | PipelineStatus::Degraded)
    }

    fn summary(&self) -> PipelineSummary {
        PipelineSummary {
            name: self.descriptor.name.clone(),
            status: self.status(),
            health: self.breaker.health(),
            circuit: self.breaker.state(),
            capabilities: self.descriptor.capabilities.clone(),
        }
    }
}

/// Point-in-time view of one registered pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub name: String,
    pub status: PipelineStatus,
    pub health: PipelineHealth,
    pub circuit: CircuitState,
    pub capabilities: BTreeSet<Capability>,
}

/// What `analyze` needs from a selectable entry, detached from the registry
/// lock so in-flight calls keep their pipeline after it is unregistered.
#[derive(Clone)]
pub(crate) struct Candidate {
    pub(crate) descriptor: PipelineDescriptor,
    pub(crate) pipeline: Arc<dyn AnalysisPipeline>,
    pub(crate) breaker: Arc<CircuitBreaker>,
}

/// Name to implementation map, in registration order.
#[derive(Default)]
pub(crate) struct PipelineRegistry {
    entries: IndexMap<String, RegistryEntry>,
}

impl PipelineRegistry {
    pub(crate) fn insert(&mut self, entry: RegistryEntry) {
        self.entries.insert(entry.descriptor.name.clone(), entry);
    }

    pub(crate) fn get(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut RegistryEntry> {
        self.entries.get_mut(name)
    }

    /// The entry for `name`, only while it is still the given registration.
    pub(crate) fn current_mut(&mut self, name: &str, registration: Uuid) -> Option<&mut RegistryEntry> {
        self.entries
            .get_mut(name)
            .filter(|entry| entry.registration == registration)
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<RegistryEntry> {
        self.entries.shift_remove(name)
    }

    pub(crate) fn drain(&mut self) -> Vec<RegistryEntry> {
        self.entries.drain(..).map(|(_, entry)| entry).collect()
    }

    /// Any entry that is not `Failed` blocks a new registration of its name.
    pub(crate) fn is_live(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .is_some_and(|entry| entry.status != PipelineStatus::Failed)
    }

    pub(crate) fn ready_names(&self) -> HashSet<String> {
        self.entries
            .values()
            .filter(|entry| entry.is_selectable())
            .map(|entry| entry.descriptor.name.clone())
            .collect()
    }

    /// Selectable entries with health refreshed from their breakers.
    pub(crate) fn candidates(&self) -> Vec<Candidate> {
        self.entries
            .values()
            .filter(|entry| entry.is_selectable())
            .map(|entry| {
                let mut descriptor = entry.descriptor.clone();
                descriptor.health = entry.breaker.health();
                Candidate {
                    descriptor,
                    pipeline: Arc::clone(&entry.pipeline),
                    breaker: Arc::clone(&entry.breaker),
                }
            })
            .collect()
    }

    pub(crate) fn summaries(&self) -> Vec<PipelineSummary> {
        self.entries.values().map(RegistryEntry::summary).collect()
    }
}
