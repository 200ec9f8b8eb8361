use super::factory::{HeapResourceFactory, ResourceFactory};
use super::resource::{PoolKey, RenderContext, Resource, ResourceKind, ResourceRequest};
use crate::error::ResourceError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Percentage of each ceiling kept after a reclamation pass.
const TRIM_PERCENT: usize = 70;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_canvas_elements: usize,
    pub max_webgl_contexts: usize,
    pub max_image_buffers: usize,
    pub max_typed_arrays: usize,
    pub gc_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_canvas_elements: 10,
            max_webgl_contexts: 4,
            max_image_buffers: 20,
            max_typed_arrays: 50,
            gc_interval_ms: 30_000,
        }
    }
}

impl PoolConfig {
    pub fn capacity(&self, kind: ResourceKind) -> usize {
        match kind {
            ResourceKind::Surface => self.max_canvas_elements,
            ResourceKind::Context => self.max_webgl_contexts,
            ResourceKind::ImageBuffer => self.max_image_buffers,
            ResourceKind::NumericArray => self.max_typed_arrays,
        }
    }

    pub fn total_capacity(&self) -> usize {
        ResourceKind::ALL.iter().map(|k| self.capacity(*k)).sum()
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }
}

/// A checked-out resource. Only the issuing pool accepts it back.
#[derive(Debug)]
pub struct ResourceHandle {
    pool_id: Uuid,
    id: u64,
    key: PoolKey,
    created: Instant,
    resource: Resource,
}

impl ResourceHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> PoolKey {
        self.key
    }

    pub fn created(&self) -> Instant {
        self.created
    }
}

impl Deref for ResourceHandle {
    type Target = Resource;

    fn deref(&self) -> &Resource {
        &self.resource
    }
}

impl DerefMut for ResourceHandle {
    fn deref_mut(&mut self) -> &mut Resource {
        &mut self.resource
    }
}

#[derive(Debug)]
struct IdleEntry {
    id: u64,
    key: PoolKey,
    created: Instant,
    idle_since: Instant,
    resource: Resource,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
    /// Released while the idle list was at capacity.
    pub discarded: u64,
    /// Dropped by reclamation.
    pub freed: u64,
    pub creation_failures: u64,
    /// Companion surfaces released after a failed context creation.
    pub partial_releases: u64,
    pub idle: usize,
    pub in_use: usize,
    pub memory_pressure: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ReclamationReport {
    pub expired: usize,
    pub trimmed: usize,
    pub memory_pressure: f64,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<IdleEntry>,
    in_use: HashMap<u64, PoolKey>,
    next_id: u64,
    stats: PoolStats,
}

impl PoolState {
    fn idle_count(&self, kind: ResourceKind) -> usize {
        self.idle.iter().filter(|e| e.key.kind() == kind).count()
    }

    fn refresh(&mut self, config: &PoolConfig) {
        let total = config.total_capacity().max(1) as f64;
        self.stats.idle = self.idle.len();
        self.stats.in_use = self.in_use.len();
        self.stats.memory_pressure = ((self.idle.len() + self.in_use.len()) as f64 / total).clamp(0.0, 1.0);
    }
}

/// Bounded cache of reusable surfaces, contexts, image buffers and numeric
/// arrays.
pub struct ResourcePool {
    id: Uuid,
    config: PoolConfig,
    factory: Arc<dyn ResourceFactory>,
    state: Mutex<PoolState>,
}

impl ResourcePool {
    pub fn new(config: PoolConfig, factory: Arc<dyn ResourceFactory>) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            factory,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(PoolConfig::default(), Arc::new(HeapResourceFactory::new()))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn acquire(&self, request: ResourceRequest) -> Result<ResourceHandle, ResourceError> {
        request.validate()?;

        let reused = {
            let mut state = self.state.lock();
            let position = state.idle.iter().position(|e| e.key == request);
            position.map(|index| {
                let entry = state.idle.swap_remove(index);
                state.in_use.insert(entry.id, entry.key);
                state.stats.reused += 1;
                state.refresh(&self.config);
                entry
            })
        };

        if let Some(mut entry) = reused {
            entry.resource.clear();
            debug!(id = entry.id, key = ?request, "Reusing pooled resource");
            return Ok(ResourceHandle {
                pool_id: self.id,
                id: entry.id,
                key: entry.key,
                created: entry.created,
                resource: entry.resource,
            });
        }

        let resource = match self.create(request) {
            Ok(resource) => resource,
            Err(error) => {
                self.state.lock().stats.creation_failures += 1;
                warn!(key = ?request, error = %error, "Resource creation failed");
                return Err(error);
            }
        };

        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.in_use.insert(id, request);
        state.stats.created += 1;
        state.refresh(&self.config);
        debug!(id, key = ?request, "Created pooled resource");

        Ok(ResourceHandle {
            pool_id: self.id,
            id,
            key: request,
            created: Instant::now(),
            resource,
        })
    }

    fn create(&self, request: ResourceRequest) -> Result<Resource, ResourceError> {
        match request {
            ResourceRequest::Surface { width, height } => {
                self.factory.create_surface(width, height).map(Resource::Surface)
            }
            ResourceRequest::Context { width, height } => {
                let surface = self.factory.create_surface(width, height)?;
                match self.factory.create_context(&surface) {
                    Ok(state) => Ok(Resource::Context(RenderContext::new(surface, state))),
                    Err(error) => {
                        self.factory.release_surface(surface);
                        self.state.lock().stats.partial_releases += 1;
                        debug!(width, height, "Released companion surface after context failure");
                        Err(error)
                    }
                }
            }
            ResourceRequest::ImageBuffer { width, height } => {
                self.factory.create_image_buffer(width, height).map(Resource::ImageBuffer)
            }
            ResourceRequest::NumericArray { element, len } => {
                self.factory.create_numeric_array(element, len).map(Resource::NumericArray)
            }
        }
    }

    /// Returns a handle. Its contents are cleared; it is kept for reuse only
    /// while the idle list for its kind is under the configured ceiling.
    pub fn release(&self, handle: ResourceHandle) -> Result<(), ResourceError> {
        let ResourceHandle {
            pool_id,
            id,
            key,
            created,
            mut resource,
        } = handle;

        let mut state = self.state.lock();
        if pool_id != self.id || state.in_use.remove(&id).is_none() {
            return Err(ResourceError::UnknownHandle(id));
        }

        let kind = key.kind();
        if !resource.matches(&key) {
            state.stats.discarded += 1;
            warn!(id, key = ?key, "Released resource no longer matches its key, discarding");
        } else if state.idle_count(kind) < self.config.capacity(kind) {
            // Cleared under the lock so nobody can observe stale contents.
            resource.clear();
            state.idle.push(IdleEntry {
                id,
                key,
                created,
                idle_since: Instant::now(),
                resource,
            });
        } else {
            state.stats.discarded += 1;
            debug!(id, %kind, "Idle list full, discarding resource");
        }
        state.refresh(&self.config);
        Ok(())
    }

    /// One reclamation pass: frees long-idle entries, trims every kind to
    /// its headroom target and recomputes memory pressure.
    pub fn reclaim(&self) -> ReclamationReport {
        let max_idle = self.config.gc_interval() * 2;
        let now = Instant::now();
        let mut state = self.state.lock();

        let before = state.idle.len();
        state.idle.retain(|e| now.duration_since(e.idle_since) <= max_idle);
        let expired = before - state.idle.len();

        let mut trimmed = 0;
        for kind in ResourceKind::ALL {
            let target = self.config.capacity(kind) * TRIM_PERCENT / 100;
            let excess = state.idle_count(kind).saturating_sub(target);
            if excess == 0 {
                continue;
            }
            let mut oldest: Vec<(Instant, u64)> = state
                .idle
                .iter()
                .filter(|e| e.key.kind() == kind)
                .map(|e| (e.idle_since, e.id))
                .collect();
            oldest.sort();
            let doomed: Vec<u64> = oldest.into_iter().take(excess).map(|(_, id)| id).collect();
            state.idle.retain(|e| !doomed.contains(&e.id));
            trimmed += excess;
        }

        state.stats.freed += (expired + trimmed) as u64;
        state.refresh(&self.config);
        let report = ReclamationReport {
            expired,
            trimmed,
            memory_pressure: state.stats.memory_pressure,
        };
        if expired + trimmed > 0 {
            info!(
                expired,
                trimmed,
                memory_pressure = report.memory_pressure,
                "Reclaimed idle resources"
            );
        }
        report
    }

    /// Pooled items over the sum of ceilings, in `[0, 1]`.
    pub fn memory_pressure(&self) -> f64 {
        self.state.lock().stats.memory_pressure
    }

    pub fn stats(&self) -> PoolStats {
        self.state.lock().stats
    }

    /// Runs `reclaim` every `gc_interval` until cancelled.
    pub fn spawn_reclaimer(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        let period = self.config.gc_interval().max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Resource reclaimer stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        pool.reclaim();
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
