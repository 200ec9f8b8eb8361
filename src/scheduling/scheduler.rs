use super::decision::{BatchDecision, QualityMetrics, MAX_INTERVAL, MIN_INTERVAL};
use super::load::SystemLoad;
use super::strategy::{strategy_for, BatchStrategy, BatchStrategyKind, Proposal, SchedulingContext};
use crate::error::PipelineError;
use crate::pipeline::SensorFrame;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub strategy: BatchStrategyKind,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    /// Size used by the fixed strategy.
    pub target_batch_size: usize,
    pub base_interval_ms: u64,
    pub target_latency_ms: u64,
    /// Items per second above which the adaptive strategy backs off.
    pub target_frame_rate: f64,
    pub high_confidence_threshold: f64,
    /// Batches remembered for the latency average.
    pub latency_window: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            strategy: BatchStrategyKind::Adaptive,
            min_batch_size: 1,
            max_batch_size: 50,
            target_batch_size: 10,
            base_interval_ms: 16,
            target_latency_ms: 50,
            target_frame_rate: 200.0,
            high_confidence_threshold: 0.8,
            latency_window: 20,
        }
    }
}

/// Something that can be batched. Items without a confidence score count as
/// high quality.
pub trait BatchItem: Send + 'static {
    fn confidence(&self) -> Option<f64> {
        None
    }
}

impl BatchItem for SensorFrame {
    fn confidence(&self) -> Option<f64> {
        self.metadata().get("confidence").and_then(Value::as_f64)
    }
}

impl<T: BatchItem + Sync> BatchItem for Arc<T> {
    fn confidence(&self) -> Option<f64> {
        self.as_ref().confidence()
    }
}

#[async_trait]
pub trait BatchProcessor<T: Send + 'static>: Send + Sync {
    async fn process_batch(&self, batch: Vec<T>) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    pub batches: u64,
    pub items: u64,
    pub failed_batches: u64,
    pub average_latency_ms: f64,
}

/// Outcome of draining a set of items with `process_batch`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchRun {
    pub decisions: Vec<BatchDecision>,
    pub processed: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct History {
    latencies: VecDeque<Duration>,
    last_batch_at: Option<Instant>,
    last_gap: Option<Duration>,
    stats: SchedulerStats,
}

impl History {
    fn average_latency(&self) -> Option<Duration> {
        if self.latencies.is_empty() {
            return None;
        }
        let total: Duration = self.latencies.iter().sum();
        Some(total / self.latencies.len() as u32)
    }
}

/// Decides how many items to process next and how long to wait before the
/// following batch.
pub struct AdaptiveBatchScheduler {
    config: BatchConfig,
    strategy: RwLock<Box<dyn BatchStrategy>>,
    history: Mutex<History>,
}

impl AdaptiveBatchScheduler {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            strategy: RwLock::new(strategy_for(config.strategy)),
            config,
            history: Mutex::new(History::default()),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn strategy(&self) -> BatchStrategyKind {
        self.strategy.read().kind()
    }

    /// Swaps the strategy; the next decision uses it.
    pub fn set_strategy(&self, kind: BatchStrategyKind) {
        self.set_custom_strategy(strategy_for(kind));
    }

    pub fn set_custom_strategy(&self, strategy: Box<dyn BatchStrategy>) {
        let mut current = self.strategy.write();
        info!(from = %current.kind(), to = %strategy.kind(), "Batch strategy changed");
        *current = strategy;
    }

    pub fn quality_of<T: BatchItem>(&self, items: &[T]) -> QualityMetrics {
        let threshold = self.config.high_confidence_threshold;
        let high = items
            .iter()
            .filter(|item| item.confidence().map_or(true, |c| c >= threshold))
            .count();
        QualityMetrics::new(items.len(), high)
    }

    /// Context filled with the scheduler's own latency and cadence history.
    pub fn context(&self, system_load: SystemLoad, queue_depth: usize, frame_rate: f64) -> SchedulingContext {
        let history = self.history.lock();
        SchedulingContext {
            system_load,
            average_latency: history.average_latency(),
            queue_depth,
            frame_rate,
            last_batch_gap: history.last_gap,
        }
    }

    pub fn decide<T: BatchItem>(&self, items: &[T], context: &SchedulingContext) -> BatchDecision {
        let quality = self.quality_of(items);
        let proposal = self
            .strategy
            .read()
            .propose(items.len(), &quality, context, &self.config);
        self.finalize(proposal, quality, context)
    }

    fn finalize(&self, proposal: Proposal, quality: QualityMetrics, context: &SchedulingContext) -> BatchDecision {
        let min = self.config.min_batch_size.max(1);
        let max = self.config.max_batch_size.max(min);

        let batch_size = if proposal.batch_size.is_finite() {
            proposal.batch_size.round().max(0.0) as usize
        } else {
            self.config.target_batch_size
        };
        let batch_size = batch_size.max(min).min(max);

        let interval_ms = if proposal.interval_ms.is_finite() {
            proposal.interval_ms.max(0.0)
        } else {
            self.config.base_interval_ms as f64
        };
        let interval = Duration::from_micros((interval_ms * 1_000.0).round() as u64)
            .clamp(MIN_INTERVAL, MAX_INTERVAL);

        let decision = BatchDecision {
            batch_size,
            interval,
            reason: proposal.reason,
            system_load: Some(context.system_load),
            quality: Some(quality),
        };
        debug!(
            batch_size,
            interval_ms = interval.as_millis() as u64,
            reason = %decision.reason,
            "Batch decision"
        );
        decision
    }

    /// Feeds one processed batch back into the latency and cadence history.
    pub fn record_batch(&self, items: usize, latency: Duration, success: bool) {
        let now = Instant::now();
        let mut history = self.history.lock();
        history.latencies.push_back(latency);
        while history.latencies.len() > self.config.latency_window.max(1) {
            history.latencies.pop_front();
        }
        if let Some(previous) = history.last_batch_at.replace(now) {
            history.last_gap = Some(now.duration_since(previous));
        }
        let average = history.average_latency().unwrap_or_default();
        let stats = &mut history.stats;
        stats.batches += 1;
        stats.items += items as u64;
        if !success {
            stats.failed_batches += 1;
        }
        stats.average_latency_ms = average.as_secs_f64() * 1_000.0;
    }

    pub fn stats(&self) -> SchedulerStats {
        self.history.lock().stats
    }

    /// Processes `items` in decided batches, waiting the decided interval
    /// between them. A failed batch is counted and skipped.
    pub async fn process_batch<T, P>(&self, items: Vec<T>, processor: &P, system_load: SystemLoad) -> BatchRun
    where
        T: BatchItem,
        P: BatchProcessor<T> + ?Sized,
    {
        let mut remaining: VecDeque<T> = items.into();
        let mut run = BatchRun::default();

        while !remaining.is_empty() {
            let pending = remaining.make_contiguous();
            let context = self.context(system_load, pending.len(), 0.0);
            let decision = self.decide(pending, &context);
            let take = decision.batch_size.min(remaining.len());
            let batch: Vec<T> = remaining.drain(..take).collect();

            let started = Instant::now();
            let outcome = processor.process_batch(batch).await;
            self.record_batch(take, started.elapsed(), outcome.is_ok());
            match outcome {
                Ok(()) => run.processed += take,
                Err(error) => {
                    warn!(items = take, error = %error, "Batch processing failed");
                    run.failed += take;
                }
            }

            let interval = decision.interval;
            run.decisions.push(decision);
            if !remaining.is_empty() {
                tokio::time::sleep(interval).await;
            }
        }
        run
    }
}

impl Default for AdaptiveBatchScheduler {
    fn default() -> Self {
        Self::new(BatchConfig::default())
    }
}
