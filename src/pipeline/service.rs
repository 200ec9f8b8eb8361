use super::analysis_pipeline::AnalysisPipeline;
use super::frame::SensorFrame;
use crate::error::PipelineError;
use crate::reliability::{CircuitBreaker, CircuitBreakerLayer};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::util::BoxService;
use tower::{Service, ServiceBuilder};

pub type GuardedPipelineService = BoxService<Arc<SensorFrame>, serde_json::Value, PipelineError>;

/// Exposes a pipeline's `process` as a tower service.
#[derive(Clone)]
pub struct PipelineService {
    inner: Arc<dyn AnalysisPipeline>,
}

impl PipelineService {
    pub fn new(inner: Arc<dyn AnalysisPipeline>) -> Self {
        Self { inner }
    }

    /// Wraps the pipeline in its breaker (outer) and a timeout (inner), so a
    /// timed out call is recorded as a breaker failure.
    pub fn guarded(
        inner: Arc<dyn AnalysisPipeline>,
        breaker: Arc<CircuitBreaker>,
        timeout: Duration,
    ) -> GuardedPipelineService {
        let service = ServiceBuilder::new()
            .layer(CircuitBreakerLayer::new(breaker))
            .timeout(timeout)
            .service(PipelineService::new(inner));
        BoxService::new(service)
    }
}

impl Service<Arc<SensorFrame>> for PipelineService {
    type Response = serde_json::Value;
    type Error = PipelineError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, frame: Arc<SensorFrame>) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move { inner.process(frame).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CircuitOpenError;
    use crate::pipeline::simulated::SimulatedPipeline;
    use crate::pipeline::{Capability, Modality, PipelineDescriptor};
    use crate::reliability::{CircuitBreakerConfig, CircuitState};
    use tower::ServiceExt;

    fn frame() -> Arc<SensorFrame> {
        Arc::new(SensorFrame::new(Modality::Video, vec![1, 2, 3]))
    }

    async fn ready_pipeline(pipeline: SimulatedPipeline) -> Arc<dyn AnalysisPipeline> {
        pipeline.initialize(&serde_json::Value::Null).await.unwrap();
        Arc::new(pipeline)
    }

    #[tokio::test]
    async fn test_pipeline_service() {
        let pipeline = ready_pipeline(SimulatedPipeline::new(
            PipelineDescriptor::new("face").with_capability(Capability::FaceDetection),
        ))
        .await;
        let response = PipelineService::new(pipeline).oneshot(frame()).await.unwrap();
        assert_eq!(response["pipeline"], "face");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_breaker_failure() {
        let pipeline = ready_pipeline(
            SimulatedPipeline::new(PipelineDescriptor::new("slow"))
                .with_process_delay(Duration::from_secs(5)),
        )
        .await;
        let breaker = Arc::new(CircuitBreaker::new(
            "slow",
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..CircuitBreakerConfig::default()
            },
        ));

        let error = PipelineService::guarded(pipeline.clone(), breaker.clone(), Duration::from_millis(50))
            .oneshot(frame())
            .await
            .unwrap_err();
        assert!(error.is::<tower::timeout::error::Elapsed>());
        assert_eq!(breaker.state(), CircuitState::Open);

        let error = PipelineService::guarded(pipeline, breaker, Duration::from_millis(50))
            .oneshot(frame())
            .await
            .unwrap_err();
        assert!(error.downcast_ref::<CircuitOpenError>().is_some());
    }
}
