use crate::error::QueueOverflowWarning;
use crate::reliability::{CircuitState, StateTransition, TransitionListener};
use crate::selection::{AccuracyTier, TierChange};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Everything observable about the orchestrator's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    PipelineRegistered {
        name: String,
    },
    PipelineReady {
        name: String,
        attempts: u32,
        duration: Duration,
    },
    PipelineFailed {
        name: String,
        error: String,
    },
    PipelineUnregistered {
        name: String,
    },
    CircuitStateChanged {
        name: String,
        from: CircuitState,
        to: CircuitState,
    },
    StrategyAdapted {
        from: AccuracyTier,
        to: AccuracyTier,
        avg_latency_ms: f64,
        error_rate: f64,
    },
    FallbackUsed {
        failed: String,
        next: String,
        error: String,
    },
    AnalysisCompleted {
        pipeline: String,
        processing_time_ms: f64,
    },
    QueueOverflow(QueueOverflowWarning),
}

impl From<TierChange> for OrchestratorEvent {
    fn from(change: TierChange) -> Self {
        OrchestratorEvent::StrategyAdapted {
            from: change.from,
            to: change.to,
            avg_latency_ms: change.avg_latency_ms,
            error_rate: change.error_rate,
        }
    }
}

/// Broadcast fan-out. Every current subscriber sees every event sent after it
/// subscribed; dropping the receiver unsubscribes.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: OrchestratorEvent) {
        // No subscribers is not an error.
        if self.tx.send(event).is_err() {
            trace!("Event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.tx.subscribe()
    }

    /// Stream view; lagging consumers see a `Lagged` error item.
    pub fn subscribe_stream(&self) -> BroadcastStream<OrchestratorEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl TransitionListener for EventPublisher {
    fn on_transition(&self, pipeline: &str, transition: StateTransition) {
        self.publish(OrchestratorEvent::CircuitStateChanged {
            name: pipeline.to_string(),
            from: transition.from,
            to: transition.to,
        });
    }
}
