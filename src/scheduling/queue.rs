use super::decision::BatchDecision;
use super::load::LoadProbe;
use super::scheduler::{AdaptiveBatchScheduler, BatchItem, BatchProcessor};
use crate::error::QueueOverflowWarning;
use crate::events::{EventPublisher, OrchestratorEvent};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Window over which the arrival rate is measured.
const RATE_WINDOW: Duration = Duration::from_secs(1);
/// Queue bound as a multiple of `max_batch_size`.
const CAPACITY_FACTOR: usize = 5;

struct QueueState<T> {
    items: VecDeque<T>,
    arrivals: VecDeque<Instant>,
    dropped: u64,
}

/// Bounded queue drained in scheduler-decided batches.
pub struct BatchQueue<T> {
    scheduler: Arc<AdaptiveBatchScheduler>,
    state: Mutex<QueueState<T>>,
    events: Option<EventPublisher>,
}

impl<T: BatchItem> BatchQueue<T> {
    pub fn new(scheduler: Arc<AdaptiveBatchScheduler>) -> Self {
        Self {
            scheduler,
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                arrivals: VecDeque::new(),
                dropped: 0,
            }),
            events: None,
        }
    }

    /// Overflow warnings are also published here.
    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    pub fn scheduler(&self) -> &Arc<AdaptiveBatchScheduler> {
        &self.scheduler
    }

    pub fn capacity(&self) -> usize {
        self.scheduler.config().max_batch_size.max(1) * CAPACITY_FACTOR
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items trimmed so far.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }

    pub fn push(&self, item: T) -> Option<QueueOverflowWarning> {
        self.extend(std::iter::once(item))
    }

    /// Appends items. Past capacity the oldest items are dropped and counted.
    pub fn extend(&self, items: impl IntoIterator<Item = T>) -> Option<QueueOverflowWarning> {
        let capacity = self.capacity();
        let now = Instant::now();
        let warning = {
            let mut state = self.state.lock();
            for item in items {
                state.items.push_back(item);
                state.arrivals.push_back(now);
            }
            prune_arrivals(&mut state.arrivals, now);

            let excess = state.items.len().saturating_sub(capacity);
            if excess == 0 {
                None
            } else {
                state.items.drain(..excess);
                state.dropped += excess as u64;
                Some(QueueOverflowWarning {
                    dropped: excess,
                    total_dropped: state.dropped,
                })
            }
        };

        if let Some(warning) = warning {
            warn!(
                dropped = warning.dropped,
                total_dropped = warning.total_dropped,
                capacity,
                "Batch queue overflow, dropped oldest items"
            );
            if let Some(events) = &self.events {
                events.publish(OrchestratorEvent::QueueOverflow(warning));
            }
        }
        warning
    }

    /// Items that arrived during the last second.
    pub fn frame_rate(&self) -> f64 {
        let mut state = self.state.lock();
        prune_arrivals(&mut state.arrivals, Instant::now());
        state.arrivals.len() as f64 / RATE_WINDOW.as_secs_f64()
    }

    /// Decides against the current queue and removes the decided batch.
    pub fn take_batch(&self, probe: &dyn LoadProbe) -> (Vec<T>, BatchDecision) {
        let frame_rate = self.frame_rate();
        let load = probe.sample();
        let mut state = self.state.lock();
        let depth = state.items.len();
        let context = self.scheduler.context(load, depth, frame_rate);
        let decision = self.scheduler.decide(state.items.make_contiguous(), &context);
        let take = decision.batch_size.min(depth);
        let batch = state.items.drain(..take).collect();
        (batch, decision)
    }

    /// One drain cycle. Returns the interval to wait before the next one.
    pub async fn drain_once<P>(&self, processor: &P, probe: &dyn LoadProbe) -> Duration
    where
        P: BatchProcessor<T> + ?Sized,
    {
        let (batch, decision) = self.take_batch(probe);
        if batch.is_empty() {
            return decision.interval;
        }

        let size = batch.len();
        let started = Instant::now();
        let outcome = processor.process_batch(batch).await;
        let elapsed = started.elapsed();
        self.scheduler.record_batch(size, elapsed, outcome.is_ok());
        match outcome {
            Ok(()) => debug!(
                items = size,
                elapsed_ms = elapsed.as_millis() as u64,
                reason = %decision.reason,
                "Batch processed"
            ),
            Err(error) => warn!(items = size, error = %error, "Batch processing failed"),
        }
        decision.interval
    }

    /// Drains continuously, re-deciding every cycle, until cancelled.
    pub fn spawn<P>(
        self: Arc<Self>,
        processor: Arc<P>,
        probe: Arc<dyn LoadProbe>,
        cancel: CancellationToken,
    ) -> JoinHandle<()>
    where
        P: BatchProcessor<T> + ?Sized + 'static,
    {
        tokio::spawn(async move {
            loop {
                let interval = self.drain_once(processor.as_ref(), probe.as_ref()).await;
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(remaining = self.len(), "Batch queue processor stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        })
    }
}

fn prune_arrivals(arrivals: &mut VecDeque<Instant>, now: Instant) {
    while let Some(first) = arrivals.front() {
        if now.duration_since(*first) > RATE_WINDOW {
            arrivals.pop_front();
        } else {
            break;
        }
    }
}
