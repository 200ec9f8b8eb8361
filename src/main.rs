use async_trait::async_trait;
use sensor_orchestrator::pipeline::{
    AnalysisPipeline, Capability, Modality, ModelComplexity, PerformanceProfile, PipelineConfig,
    PipelineDescriptor, SimulatedPipeline,
};
use sensor_orchestrator::resources::{HeapResourceFactory, ResourceRequest};
use sensor_orchestrator::scheduling::{BatchProcessor, LoadProbe, SystemLoadProbe};
use sensor_orchestrator::{
    AdaptiveBatchScheduler, AnalysisRequirement, AppError, BatchQueue, Configuration, Orchestrator,
    OrchestratorEvent, PipelineError, ResourcePool, SelectionStrategy, SensorFrame,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};

fn init_logging() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();
}

fn demo_pipelines() -> Vec<(Arc<dyn AnalysisPipeline>, PipelineConfig)> {
    let face_fast = SimulatedPipeline::new(
        PipelineDescriptor::new("face_fast")
            .with_capability(Capability::FaceDetection)
            .with_performance(
                PerformanceProfile::new(60.0, 12.0, 0.72)
                    .with_resource_cost(0.2)
                    .with_model_complexity(ModelComplexity::Low),
            ),
    )
    .with_init_delay(Duration::from_millis(50))
    .with_process_delay(Duration::from_millis(8));

    let face_precise = SimulatedPipeline::new(
        PipelineDescriptor::new("face_precise")
            .with_capabilities([Capability::FaceDetection, Capability::FaceLandmarks])
            .with_performance(
                PerformanceProfile::new(15.0, 60.0, 0.95)
                    .with_resource_cost(0.8)
                    .with_model_complexity(ModelComplexity::High),
            ),
    )
    .with_init_delay(Duration::from_millis(150))
    .with_process_delay(Duration::from_millis(40))
    .failing_init(1);

    let gaze = SimulatedPipeline::new(
        PipelineDescriptor::new("gaze")
            .with_capabilities([Capability::GazeTracking, Capability::EyeTracking])
            .with_performance(PerformanceProfile::new(120.0, 6.0, 0.85))
            .depends_on("face_fast"),
    )
    .with_init_delay(Duration::from_millis(30))
    .with_process_delay(Duration::from_millis(4));

    let emotion = SimulatedPipeline::new(
        PipelineDescriptor::new("emotion")
            .with_capability(Capability::EmotionAnalysis)
            .with_performance(PerformanceProfile::new(30.0, 25.0, 0.8))
            .depends_on("face_precise"),
    )
    .with_process_delay(Duration::from_millis(15))
    .with_failure_rate(0.3);

    let pipelines: [(Arc<dyn AnalysisPipeline>, PipelineConfig); 4] = [
        (Arc::new(face_fast), json!({"model": "blazeface"})),
        (Arc::new(face_precise), json!({"model": "retinaface", "landmarks": 68})),
        (Arc::new(gaze), PipelineConfig::Null),
        (Arc::new(emotion), PipelineConfig::Null),
    ];
    pipelines.into()
}

fn frame(index: usize) -> SensorFrame {
    let confidence = if index % 4 == 0 { 0.4 } else { 0.9 };
    SensorFrame::new(Modality::Video, vec![(index % 256) as u8; 64])
        .with_metadata(json!({ "sequence": index, "confidence": confidence }))
}

/// Sends every batched frame through the orchestrator.
struct FrameAnalyzer {
    orchestrator: Arc<Orchestrator>,
    requirement: AnalysisRequirement,
}

#[async_trait]
impl BatchProcessor<SensorFrame> for FrameAnalyzer {
    async fn process_batch(&self, frames: Vec<SensorFrame>) -> Result<(), PipelineError> {
        for frame in frames {
            self.orchestrator.analyze(&self.requirement, frame).await?;
        }
        Ok(())
    }
}

fn spawn_event_logger(
    mut events: broadcast::Receiver<OrchestratorEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(OrchestratorEvent::AnalysisCompleted { .. }) => {}
                    Ok(event) => info!(event = ?event, "Orchestrator event"),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger lagged"),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_logging();
    let path = std::env::args().nth(1).map(PathBuf::from);
    let configuration = Configuration::load(path.as_deref())?;
    let cancel = CancellationToken::new();

    let orchestrator = Arc::new(Orchestrator::new(&configuration));
    let event_logger = spawn_event_logger(orchestrator.subscribe(), cancel.clone());

    let report = orchestrator.register_all(demo_pipelines()).await;
    info!(
        ready = report.successful.len(),
        failed = report.failed.len(),
        total_ms = report.total_time.as_millis() as u64,
        parallel_efficiency = report.parallel_efficiency,
        "Pipelines registered"
    );

    let face = AnalysisRequirement::new([Capability::FaceDetection]);
    let strategies = [
        SelectionStrategy::PerformanceFirst,
        SelectionStrategy::AccuracyFirst,
        SelectionStrategy::ResourceOptimized,
        SelectionStrategy::Hybrid,
        SelectionStrategy::Adaptive,
    ];
    for (index, strategy) in strategies.into_iter().enumerate() {
        match orchestrator.analyze(&face.clone().prefer(strategy), frame(index)).await {
            Ok(outcome) => info!(
                %strategy,
                pipeline = %outcome.result.pipeline_used,
                coarse = ?outcome.coarse.map(|c| c.pipeline_used),
                processing_ms = outcome.result.processing_time_ms,
                "Analysis finished"
            ),
            Err(error) => warn!(%strategy, error = %error, "Analysis failed"),
        }
    }

    let emotion = AnalysisRequirement::new([Capability::EmotionAnalysis]);
    for index in 0..10 {
        if let Err(error) = orchestrator.analyze(&emotion, frame(index)).await {
            warn!(error = %error, "Emotion analysis failed");
        }
    }

    let scheduler = Arc::new(AdaptiveBatchScheduler::new(configuration.batching.clone()));
    let queue = Arc::new(BatchQueue::new(scheduler).with_events(orchestrator.events().clone()));
    let analyzer = Arc::new(FrameAnalyzer {
        orchestrator: Arc::clone(&orchestrator),
        requirement: AnalysisRequirement::new([Capability::GazeTracking]),
    });
    let probe: Arc<dyn LoadProbe> = Arc::new(SystemLoadProbe::new());
    let drain = Arc::clone(&queue).spawn(analyzer, probe, cancel.clone());

    for index in 0..400 {
        queue.push(frame(index));
        if index % 50 == 49 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
    tokio::time::sleep(Duration::from_millis(500)).await;
    info!(
        remaining = queue.len(),
        dropped = queue.dropped(),
        stats = ?queue.scheduler().stats(),
        "Batch queue drained"
    );

    let pool = Arc::new(ResourcePool::new(
        configuration.resources.clone(),
        Arc::new(HeapResourceFactory::new()),
    ));
    let reclaimer = pool.spawn_reclaimer(cancel.clone());
    let request = ResourceRequest::ImageBuffer {
        width: 640,
        height: 480,
    };
    let mut buffer = pool.acquire(request)?;
    if let Some(image) = buffer.as_image_buffer_mut() {
        image.data.fill(255);
    }
    pool.release(buffer)?;
    let reused = pool.acquire(request)?;
    info!(zeroed = reused.is_zeroed(), stats = ?pool.stats(), "Pooled buffer reused");
    pool.release(reused)?;

    orchestrator.shutdown().await;
    cancel.cancel();
    for task in [drain, reclaimer, event_logger] {
        if let Err(join_error) = task.await {
            error!(error = %join_error, "Background task failed");
        }
    }
    Ok(())
}
