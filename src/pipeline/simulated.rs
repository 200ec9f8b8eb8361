use super::analysis_pipeline::{AnalysisPipeline, PipelineConfig};
use super::descriptor::PipelineDescriptor;
use super::frame::SensorFrame;
use crate::error::PipelineError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const ALWAYS: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    InitStarted(String),
    InitFinished(String),
    Processed(String),
    CleanedUp(String),
}

/// Shared, ordered record of lifecycle events across several pipelines.
#[derive(Debug, Clone, Default)]
pub struct LifecycleLog(Arc<Mutex<Vec<LifecycleEvent>>>);

impl LifecycleLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: LifecycleEvent) {
        self.0.lock().push(event);
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.0.lock().clone()
    }

    pub fn position(&self, event: &LifecycleEvent) -> Option<usize> {
        self.0.lock().iter().position(|e| e == event)
    }
}

/// Stand-in analysis unit with scripted latency and failures, used by the
/// demo binary and tests.
pub struct SimulatedPipeline {
    descriptor: PipelineDescriptor,
    init_delay: Duration,
    process_delay: Duration,
    init_failures: AtomicU32,
    process_failures: AtomicU32,
    failure_rate: f64,
    initialized: AtomicBool,
    init_attempts: AtomicU32,
    process_calls: AtomicU64,
    concurrent_inits: Option<Arc<ConcurrencyGauge>>,
    log: Option<LifecycleLog>,
}

impl SimulatedPipeline {
    pub fn new(descriptor: PipelineDescriptor) -> Self {
        Self {
            descriptor,
            init_delay: Duration::ZERO,
            process_delay: Duration::ZERO,
            init_failures: AtomicU32::new(0),
            process_failures: AtomicU32::new(0),
            failure_rate: 0.0,
            initialized: AtomicBool::new(false),
            init_attempts: AtomicU32::new(0),
            process_calls: AtomicU64::new(0),
            concurrent_inits: None,
            log: None,
        }
    }

    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub fn with_process_delay(mut self, delay: Duration) -> Self {
        self.process_delay = delay;
        self
    }

    /// The first `attempts` initialization attempts fail.
    pub fn failing_init(self, attempts: u32) -> Self {
        self.init_failures.store(attempts, Ordering::SeqCst);
        self
    }

    pub fn always_failing_init(self) -> Self {
        self.failing_init(ALWAYS)
    }

    /// The next `calls` process calls fail.
    pub fn failing_process(self, calls: u32) -> Self {
        self.process_failures.store(calls, Ordering::SeqCst);
        self
    }

    pub fn always_failing(self) -> Self {
        self.failing_process(ALWAYS)
    }

    /// Random failure probability applied to every process call.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_log(mut self, log: LifecycleLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_concurrency_gauge(mut self, gauge: Arc<ConcurrencyGauge>) -> Self {
        self.concurrent_inits = Some(gauge);
        self
    }

    /// Changes how many upcoming process calls fail.
    pub fn set_process_failures(&self, calls: u32) {
        self.process_failures.store(calls, Ordering::SeqCst);
    }

    pub fn process_calls(&self) -> u64 {
        self.process_calls.load(Ordering::SeqCst)
    }

    pub fn init_attempts(&self) -> u32 {
        self.init_attempts.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn record(&self, event: LifecycleEvent) {
        if let Some(log) = &self.log {
            log.push(event);
        }
    }

    fn consume_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| match remaining {
                0 => None,
                ALWAYS => Some(ALWAYS),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

#[async_trait]
impl AnalysisPipeline for SimulatedPipeline {
    fn descriptor(&self) -> PipelineDescriptor {
        self.descriptor.clone()
    }

    async fn initialize(&self, _config: &PipelineConfig) -> Result<(), PipelineError> {
        let name = &self.descriptor.name;
        let attempt = self.init_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(LifecycleEvent::InitStarted(name.clone()));
        let _active = self.concurrent_inits.as_ref().map(|gauge| gauge.enter());

        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }

        if Self::consume_failure(&self.init_failures) {
            debug!(pipeline = %name, attempt, "Simulated initialization failure");
            return Err(format!("{} failed to load model (attempt {})", name, attempt).into());
        }

        self.initialized.store(true, Ordering::SeqCst);
        self.record(LifecycleEvent::InitFinished(name.clone()));
        Ok(())
    }

    async fn process(&self, frame: Arc<SensorFrame>) -> Result<serde_json::Value, PipelineError> {
        let name = &self.descriptor.name;
        self.process_calls.fetch_add(1, Ordering::SeqCst);

        if !self.is_initialized() {
            return Err(format!("{} is not initialized", name).into());
        }

        if !self.process_delay.is_zero() {
            tokio::time::sleep(self.process_delay).await;
        }

        if Self::consume_failure(&self.process_failures)
            || (self.failure_rate > 0.0 && rand::random::<f64>() < self.failure_rate)
        {
            return Err(format!("{} failed to analyze frame {}", name, frame.frame_id()).into());
        }

        self.record(LifecycleEvent::Processed(name.clone()));
        Ok(json!({
            "pipeline": name,
            "frameId": frame.frame_id().to_string(),
            "bytes": frame.payload().len(),
            "capabilities": self.descriptor.capabilities,
            "accuracy": self.descriptor.performance.accuracy,
        }))
    }

    async fn cleanup(&self) -> Result<(), PipelineError> {
        self.initialized.store(false, Ordering::SeqCst);
        self.record(LifecycleEvent::CleanedUp(self.descriptor.name.clone()));
        Ok(())
    }
}

/// Tracks how many initializations run at once across pipelines.
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    current: AtomicU32,
    peak: AtomicU32,
}

impl ConcurrencyGauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn peak(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> GaugeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(Arc::clone(self))
    }
}

struct GaugeGuard(Arc<ConcurrencyGauge>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}
