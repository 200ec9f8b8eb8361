use super::registry::{Candidate, PipelineRegistry, PipelineStatus, PipelineSummary, RegistryEntry};
use crate::config::Configuration;
use crate::error::{AnalysisError, AppError, CircuitOpenError, FallbackAttempt, InitializationError};
use crate::events::{EventPublisher, OrchestratorEvent, DEFAULT_EVENT_CAPACITY};
use crate::initialization::{
    FailedPipeline, InitializationReport, InitializationTask, InitializerConfig, ParallelInitializer,
};
use crate::pipeline::{
    AnalysisPipeline, AnalysisRequirement, AnalysisResult, PipelineConfig, PipelineService, SensorFrame,
};
use crate::reliability::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, TransitionListener};
use crate::selection::{
    AccuracyTier, PipelineTelemetry, RankRole, Ranking, SelectionStrategy, StrategySelector, TelemetryStore,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock, Semaphore};
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tower::timeout::error::Elapsed;
use tower::ServiceExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_concurrent_analyses: usize,
    /// Per attempt, not per `analyze` call.
    pub analysis_timeout_ms: u64,
    pub event_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_analyses: 8,
            analysis_timeout_ms: 5_000,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl OrchestratorConfig {
    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis_timeout_ms)
    }
}

/// Result of one `analyze` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisOutcome {
    pub result: AnalysisResult,
    /// Hybrid only: the coarse result a successful refinement replaced.
    pub coarse: Option<AnalysisResult>,
    pub strategy: SelectionStrategy,
    /// Failed attempts that preceded the result, in order.
    pub attempts: Vec<FallbackAttempt>,
}

/// Owns the pipeline registry and routes every analysis through selection,
/// circuit breaking and fallback.
pub struct Orchestrator {
    registry: RwLock<PipelineRegistry>,
    selector: StrategySelector,
    initializer: ParallelInitializer,
    telemetry: TelemetryStore,
    breaker_config: CircuitBreakerConfig,
    analyses: Semaphore,
    analysis_timeout: Duration,
    events: EventPublisher,
}

impl Orchestrator {
    pub fn new(configuration: &Configuration) -> Self {
        Self {
            registry: RwLock::new(PipelineRegistry::default()),
            selector: StrategySelector::new(configuration.selection.clone()),
            initializer: ParallelInitializer::new(configuration.initialization.clone()),
            telemetry: TelemetryStore::new(),
            breaker_config: configuration.circuit_breaker.clone(),
            analyses: Semaphore::new(configuration.orchestrator.max_concurrent_analyses.max(1)),
            analysis_timeout: configuration.orchestrator.analysis_timeout(),
            events: EventPublisher::new(configuration.orchestrator.event_capacity),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&Configuration::default())
    }

    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new(Configuration::default())
    }

    /// Registers a batch and initializes it in dependency order. Names that
    /// are already live (or repeated in the batch) are reported as
    /// `AlreadyRegistered` and leave the existing entry untouched.
    ///
    /// A pipeline unregistered while it initializes is cleaned up once its
    /// initialization returns and reported as `Unregistered`, even when its
    /// name has since been registered again.
    #[instrument(skip_all, fields(pipelines = batch.len()))]
    pub async fn register_all(
        &self,
        batch: Vec<(Arc<dyn AnalysisPipeline>, PipelineConfig)>,
    ) -> InitializationReport {
        let mut rejected = Vec::new();
        let mut tasks = Vec::new();
        let mut registrations: HashMap<String, (Uuid, Arc<dyn AnalysisPipeline>)> = HashMap::new();

        let already_ready = {
            let mut registry = self.registry.write().await;
            for (pipeline, config) in batch {
                let descriptor = pipeline.descriptor();
                let name = descriptor.name.clone();
                if registry.is_live(&name) || registrations.contains_key(&name) {
                    warn!(pipeline = %name, "Pipeline is already registered");
                    rejected.push(FailedPipeline {
                        error: InitializationError::AlreadyRegistered(name.clone()),
                        name,
                        attempts: 0,
                        duration: Duration::ZERO,
                    });
                    continue;
                }

                let registration = Uuid::new_v4();
                let listener: Arc<dyn TransitionListener> = Arc::new(self.events.clone());
                let breaker = CircuitBreaker::new(name.clone(), self.breaker_config.clone()).with_listener(listener);
                registry.insert(RegistryEntry {
                    registration,
                    pipeline: Arc::clone(&pipeline),
                    descriptor,
                    config: config.clone(),
                    breaker: Arc::new(breaker),
                    status: PipelineStatus::Registered,
                });
                debug!(pipeline = %name, %registration, "Pipeline registered");
                self.events.publish(OrchestratorEvent::PipelineRegistered { name: name.clone() });
                registrations.insert(name, (registration, Arc::clone(&pipeline)));
                tasks.push(InitializationTask::new(pipeline, config));
            }

            for task in &tasks {
                if let Some(entry) = registry.get_mut(task.name()) {
                    entry.status = PipelineStatus::Initializing;
                }
            }
            registry.ready_names()
        };

        let mut report = self.initializer.initialize_all(tasks, &already_ready).await;

        let mut stale = Vec::new();
        {
            let mut registry = self.registry.write().await;
            let successful = std::mem::take(&mut report.successful);
            for ready in successful {
                let Some((registration, pipeline)) = registrations.get(&ready.name) else {
                    continue;
                };
                match registry.current_mut(&ready.name, *registration) {
                    Some(entry) => {
                        entry.status = PipelineStatus::Ready;
                        self.events.publish(OrchestratorEvent::PipelineReady {
                            name: ready.name.clone(),
                            attempts: ready.attempts,
                            duration: ready.duration,
                        });
                        report.successful.push(ready);
                    }
                    None => {
                        warn!(pipeline = %ready.name, "Pipeline was unregistered while initializing");
                        stale.push(Arc::clone(pipeline));
                        report.failed.push(FailedPipeline {
                            error: InitializationError::Unregistered(ready.name.clone()),
                            name: ready.name,
                            attempts: ready.attempts,
                            duration: ready.duration,
                        });
                    }
                }
            }
            for failed in &report.failed {
                let Some((registration, _)) = registrations.get(&failed.name) else {
                    continue;
                };
                if matches!(failed.error, InitializationError::Unregistered(_)) {
                    continue;
                }
                if let Some(entry) = registry.current_mut(&failed.name, *registration) {
                    entry.status = PipelineStatus::Failed;
                    self.events.publish(OrchestratorEvent::PipelineFailed {
                        name: failed.name.clone(),
                        error: failed.error.to_string(),
                    });
                }
            }
        }

        for pipeline in stale {
            if let Err(error) = pipeline.cleanup().await {
                warn!(pipeline = %pipeline.name(), error = %error, "Pipeline cleanup failed");
            }
        }

        info!(
            ready = report.successful.len(),
            failed = report.failed.len() + rejected.len(),
            total_ms = report.total_time.as_millis() as u64,
            parallel_efficiency = report.parallel_efficiency,
            "Pipeline registration finished"
        );
        report.failed.extend(rejected);
        report
    }

    pub async fn register_pipeline(
        &self,
        pipeline: Arc<dyn AnalysisPipeline>,
        config: PipelineConfig,
    ) -> Result<(), AppError> {
        let report = self.register_all(vec![(pipeline, config)]).await;
        match report.failed.into_iter().next() {
            Some(failed) => Err(failed.error.into()),
            None => Ok(()),
        }
    }

    /// Runs the frame through the best ranked pipeline, falling back through
    /// the rest of the ranking one candidate at a time.
    #[instrument(skip_all, fields(frame_id = %frame.frame_id()))]
    pub async fn analyze(
        &self,
        requirement: &AnalysisRequirement,
        frame: SensorFrame,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let _permit = self
            .analyses
            .acquire()
            .await
            .map_err(|_| AnalysisError::Unavailable)?;

        let candidates = self.registry.read().await.candidates();
        let descriptors: Vec<_> = candidates.iter().map(|c| c.descriptor.clone()).collect();
        let ranking = self
            .selector
            .select(&descriptors, requirement, &self.telemetry.snapshot());
        if ranking.is_empty() {
            return Err(AnalysisError::NoCompatiblePipeline {
                required: requirement.capability_names(),
            });
        }

        let frame = Arc::new(frame);
        let mut attempts = Vec::new();
        let mut first_error = None;

        for (index, ranked) in ranking.pipelines.iter().enumerate() {
            let Some(candidate) = find(&candidates, &ranked.name) else {
                continue;
            };

            let (elapsed, outcome) = self.invoke(candidate, Arc::clone(&frame)).await;
            let error = match outcome {
                Ok(result) if ranked.role == RankRole::Coarse => {
                    return Ok(self
                        .refine(result, &ranking, &candidates, frame, attempts)
                        .await);
                }
                Ok(result) => {
                    return Ok(AnalysisOutcome {
                        result,
                        coarse: None,
                        strategy: ranking.strategy,
                        attempts,
                    });
                }
                Err(error) => error,
            };

            attempts.push(FallbackAttempt {
                pipeline: ranked.name.clone(),
                error: error.to_string(),
                duration_ms: millis(elapsed),
            });
            if let Some(next) = ranking.pipelines.get(index + 1) {
                warn!(failed = %ranked.name, next = %next.name, error = %error, "Falling back to next pipeline");
                self.events.publish(OrchestratorEvent::FallbackUsed {
                    failed: ranked.name.clone(),
                    next: next.name.clone(),
                    error: error.to_string(),
                });
            }
            first_error.get_or_insert(error);
        }

        match first_error {
            Some(source) => {
                warn!(attempts = attempts.len(), "Every candidate pipeline failed");
                Err(AnalysisError::AllCandidatesFailed {
                    source: Box::new(source),
                    attempts,
                })
            }
            None => Err(AnalysisError::NoCompatiblePipeline {
                required: requirement.capability_names(),
            }),
        }
    }

    /// Hybrid second phase: the refinement pipeline gets exactly one try and
    /// the coarse result stands if it fails.
    async fn refine(
        &self,
        coarse: AnalysisResult,
        ranking: &Ranking,
        candidates: &[Candidate],
        frame: Arc<SensorFrame>,
        mut attempts: Vec<FallbackAttempt>,
    ) -> AnalysisOutcome {
        let refinement = ranking
            .refinement()
            .and_then(|ranked| find(candidates, &ranked.name));

        if let Some(candidate) = refinement {
            match self.invoke(candidate, frame).await {
                (_, Ok(refined)) => {
                    debug!(coarse = %coarse.pipeline_used, refined = %refined.pipeline_used, "Refinement succeeded");
                    return AnalysisOutcome {
                        result: refined,
                        coarse: Some(coarse),
                        strategy: ranking.strategy,
                        attempts,
                    };
                }
                (elapsed, Err(error)) => {
                    debug!(error = %error, "Refinement failed, keeping coarse result");
                    attempts.push(FallbackAttempt {
                        pipeline: candidate.descriptor.name.clone(),
                        error: error.to_string(),
                        duration_ms: millis(elapsed),
                    });
                }
            }
        }

        AnalysisOutcome {
            result: coarse,
            coarse: None,
            strategy: ranking.strategy,
            attempts,
        }
    }

    /// One attempt through the candidate's breaker and the analysis timeout.
    async fn invoke(
        &self,
        candidate: &Candidate,
        frame: Arc<SensorFrame>,
    ) -> (Duration, Result<AnalysisResult, AnalysisError>) {
        let name = candidate.descriptor.name.as_str();
        let service = PipelineService::guarded(
            Arc::clone(&candidate.pipeline),
            Arc::clone(&candidate.breaker),
            self.analysis_timeout,
        );

        let started = Instant::now();
        let outcome = service.oneshot(frame).await;
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(data) => {
                self.record(name, elapsed, true);
                let processing_time_ms = millis(elapsed);
                self.events.publish(OrchestratorEvent::AnalysisCompleted {
                    pipeline: name.to_string(),
                    processing_time_ms,
                });
                Ok(AnalysisResult::new(name, data, processing_time_ms))
            }
            Err(error) => {
                // Rejected without running; nothing to measure.
                if let Some(open) = error.downcast_ref::<CircuitOpenError>() {
                    debug!(pipeline = name, "Circuit open, skipping pipeline");
                    return (elapsed, Err(AnalysisError::CircuitOpen(open.clone())));
                }
                self.record(name, elapsed, false);
                if error.is::<Elapsed>() {
                    Err(AnalysisError::Timeout {
                        pipeline: name.to_string(),
                        timeout: self.analysis_timeout,
                    })
                } else {
                    Err(AnalysisError::PipelineFailed {
                        pipeline: name.to_string(),
                        reason: error.to_string(),
                    })
                }
            }
        };
        (elapsed, result)
    }

    fn record(&self, pipeline: &str, elapsed: Duration, success: bool) {
        self.telemetry.record(pipeline, elapsed, success);
        if let Some(change) = self.selector.observe(millis(elapsed), success) {
            self.events.publish(change.into());
        }
    }

    /// Removes the pipeline and its breaker. Calls already holding the
    /// pipeline finish normally; no new ones are dispatched to it.
    pub async fn unregister_pipeline(&self, name: &str) -> Result<(), AppError> {
        let entry = self
            .registry
            .write()
            .await
            .remove(name)
            .ok_or_else(|| AppError::UnknownPipeline(name.to_string()))?;
        self.telemetry.remove(name);
        self.events.publish(OrchestratorEvent::PipelineUnregistered {
            name: name.to_string(),
        });
        info!(pipeline = %name, "Pipeline unregistered");

        if let Err(error) = entry.pipeline.cleanup().await {
            warn!(pipeline = %name, error = %error, "Pipeline cleanup failed");
        }
        Ok(())
    }

    /// Stops accepting analyses and cleans up every registered pipeline.
    pub async fn shutdown(&self) {
        self.analyses.close();
        let entries = self.registry.write().await.drain();
        for entry in entries {
            let name = entry.descriptor.name;
            if let Err(error) = entry.pipeline.cleanup().await {
                warn!(pipeline = %name, error = %error, "Pipeline cleanup failed");
            }
            self.telemetry.remove(&name);
            self.events.publish(OrchestratorEvent::PipelineUnregistered { name });
        }
        info!("Orchestrator shut down");
    }

    pub async fn pipelines(&self) -> Vec<PipelineSummary> {
        self.registry.read().await.summaries()
    }

    pub async fn status(&self, name: &str) -> Option<PipelineStatus> {
        self.registry.read().await.get(name).map(RegistryEntry::status)
    }

    pub async fn breaker_snapshot(&self, name: &str) -> Option<CircuitBreakerSnapshot> {
        self.registry
            .read()
            .await
            .get(name)
            .map(|entry| entry.breaker.snapshot())
    }

    /// Configuration the pipeline was registered with.
    pub async fn pipeline_config(&self, name: &str) -> Option<PipelineConfig> {
        self.registry
            .read()
            .await
            .get(name)
            .map(|entry| entry.config.clone())
    }

    pub fn telemetry(&self, name: &str) -> Option<PipelineTelemetry> {
        self.telemetry.get(name)
    }

    pub fn tier(&self) -> AccuracyTier {
        self.selector.tier()
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_stream(&self) -> BroadcastStream<OrchestratorEvent> {
        self.events.subscribe_stream()
    }
}

fn find<'a>(candidates: &'a [Candidate], name: &str) -> Option<&'a Candidate> {
    candidates.iter().find(|c| c.descriptor.name == name)
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}

pub struct OrchestratorBuilder {
    configuration: Configuration,
}

impl OrchestratorBuilder {
    pub fn new(configuration: Configuration) -> Self {
        Self { configuration }
    }

    // Sets the selection strategy, this will override the default configuration.
    pub fn strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.configuration.selection.strategy = strategy;
        self
    }

    // Limits how many ranked pipelines an analysis may try, this will override the default configuration.
    pub fn max_concurrent_pipelines(mut self, max_concurrent_pipelines: usize) -> Self {
        self.configuration.selection.max_concurrent_pipelines = max_concurrent_pipelines;
        self
    }

    // Adjusts the in-flight analysis limit, this will override the default configuration.
    pub fn max_concurrent_analyses(mut self, max_concurrent_analyses: usize) -> Self {
        self.configuration.orchestrator.max_concurrent_analyses = max_concurrent_analyses;
        self
    }

    // Sets the per-attempt analysis timeout, this will override the default configuration.
    pub fn analysis_timeout_ms(mut self, analysis_timeout_ms: u64) -> Self {
        self.configuration.orchestrator.analysis_timeout_ms = analysis_timeout_ms;
        self
    }

    pub fn circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.configuration.circuit_breaker = circuit_breaker;
        self
    }

    pub fn initialization(mut self, initialization: InitializerConfig) -> Self {
        self.configuration.initialization = initialization;
        self
    }

    pub fn build(self) -> Result<Orchestrator, AppError> {
        self.configuration.validate()?;
        Ok(Orchestrator::new(&self.configuration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Capability, Modality, PerformanceProfile, PipelineDescriptor, SimulatedPipeline};
    use crate::reliability::CircuitState;

    fn face(name: &str, fps: f64, accuracy: f64) -> SimulatedPipeline {
        SimulatedPipeline::new(
            PipelineDescriptor::new(name)
                .with_capability(Capability::FaceDetection)
                .with_performance(PerformanceProfile::new(fps, 1_000.0 / fps, accuracy)),
        )
    }

    fn fast_init() -> InitializerConfig {
        InitializerConfig {
            retry_attempts: 1,
            base_delay_ms: 1,
            max_delay_ms: 2,
            ..InitializerConfig::default()
        }
    }

    fn orchestrator(strategy: SelectionStrategy) -> Orchestrator {
        Orchestrator::builder()
            .strategy(strategy)
            .initialization(fast_init())
            .build()
            .unwrap()
    }

    fn frame() -> SensorFrame {
        SensorFrame::new(Modality::Video, vec![0; 16])
    }

    fn face_requirement() -> AnalysisRequirement {
        AnalysisRequirement::new([Capability::FaceDetection])
    }

    async fn register(orchestrator: &Orchestrator, pipelines: Vec<Arc<SimulatedPipeline>>) {
        let batch = pipelines
            .into_iter()
            .map(|p| (p as Arc<dyn AnalysisPipeline>, PipelineConfig::Null))
            .collect();
        let report = orchestrator.register_all(batch).await;
        assert!(report.is_complete_success(), "{:?}", report.failed);
    }

    #[tokio::test]
    async fn failing_top_candidate_falls_back_to_second() {
        let orchestrator = orchestrator(SelectionStrategy::PerformanceFirst);
        let fast = Arc::new(face("fast", 60.0, 0.7).always_failing());
        let precise = Arc::new(face("precise", 15.0, 0.95));
        register(&orchestrator, vec![fast.clone(), precise.clone()]).await;
        let mut events = orchestrator.subscribe();

        let outcome = orchestrator.analyze(&face_requirement(), frame()).await.unwrap();

        assert_eq!(outcome.result.pipeline_used, "precise");
        assert!(outcome.result.success);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].pipeline, "fast");

        let snapshot = orchestrator.breaker_snapshot("fast").await.unwrap();
        assert_eq!(snapshot.failure_count, 1);
        assert_eq!(snapshot.total_failures, 1);
        assert_eq!(orchestrator.breaker_snapshot("precise").await.unwrap().total_failures, 0);
        assert_eq!(orchestrator.telemetry("fast").unwrap().failures, 1);

        assert!(matches!(
            events.recv().await.unwrap(),
            OrchestratorEvent::FallbackUsed { ref failed, ref next, .. } if failed == "fast" && next == "precise"
        ));
    }

    #[tokio::test]
    async fn missing_capability_is_reported() {
        let orchestrator = orchestrator(SelectionStrategy::PerformanceFirst);
        register(&orchestrator, vec![Arc::new(face("fast", 60.0, 0.7))]).await;

        let error = orchestrator
            .analyze(&AnalysisRequirement::new([Capability::GazeTracking]), frame())
            .await
            .unwrap_err();
        match error {
            AnalysisError::NoCompatiblePipeline { required } => {
                assert_eq!(required, vec!["gaze_tracking".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn open_circuit_removes_pipeline_from_selection() {
        let orchestrator = Orchestrator::builder()
            .strategy(SelectionStrategy::PerformanceFirst)
            .initialization(fast_init())
            .circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout_ms: 60_000,
                success_threshold: 1,
            })
            .build()
            .unwrap();
        let fast = Arc::new(face("fast", 60.0, 0.7).always_failing());
        let precise = Arc::new(face("precise", 15.0, 0.95));
        register(&orchestrator, vec![fast.clone(), precise.clone()]).await;

        orchestrator.analyze(&face_requirement(), frame()).await.unwrap();
        assert_eq!(
            orchestrator.breaker_snapshot("fast").await.unwrap().state,
            CircuitState::Open
        );
        assert_eq!(orchestrator.status("fast").await, Some(PipelineStatus::Degraded));

        let outcome = orchestrator.analyze(&face_requirement(), frame()).await.unwrap();
        assert_eq!(outcome.result.pipeline_used, "precise");
        assert!(outcome.attempts.is_empty());
        assert_eq!(fast.process_calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_candidates_surface_first_error() {
        let orchestrator = orchestrator(SelectionStrategy::PerformanceFirst);
        register(
            &orchestrator,
            vec![
                Arc::new(face("fast", 60.0, 0.7).always_failing()),
                Arc::new(face("precise", 15.0, 0.95).always_failing()),
            ],
        )
        .await;

        let error = orchestrator.analyze(&face_requirement(), frame()).await.unwrap_err();
        assert_eq!(error.pipeline(), Some("fast"));
        match error {
            AnalysisError::AllCandidatesFailed { source, attempts } => {
                assert!(matches!(*source, AnalysisError::PipelineFailed { .. }));
                let tried: Vec<_> = attempts.iter().map(|a| a.pipeline.as_str()).collect();
                assert_eq!(tried, vec!["fast", "precise"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_pipeline_times_out_and_counts_as_failure() {
        let orchestrator = Orchestrator::builder()
            .initialization(fast_init())
            .analysis_timeout_ms(50)
            .build()
            .unwrap();
        let slow = Arc::new(face("slow", 30.0, 0.8).with_process_delay(Duration::from_secs(2)));
        register(&orchestrator, vec![slow]).await;

        let error = orchestrator.analyze(&face_requirement(), frame()).await.unwrap_err();
        match error {
            AnalysisError::AllCandidatesFailed { source, .. } => {
                assert!(matches!(*source, AnalysisError::Timeout { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(orchestrator.breaker_snapshot("slow").await.unwrap().failure_count, 1);
    }

    #[tokio::test]
    async fn failed_initialization_is_excluded_until_registered_again() {
        let orchestrator = orchestrator(SelectionStrategy::PerformanceFirst);
        let broken = Arc::new(face("face", 30.0, 0.8).always_failing_init());

        let error = orchestrator
            .register_pipeline(broken.clone(), PipelineConfig::Null)
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            AppError::Initialization(InitializationError::Failed { attempts: 2, .. })
        ));
        assert_eq!(orchestrator.status("face").await, Some(PipelineStatus::Failed));
        assert!(matches!(
            orchestrator.analyze(&face_requirement(), frame()).await,
            Err(AnalysisError::NoCompatiblePipeline { .. })
        ));

        orchestrator
            .register_pipeline(Arc::new(face("face", 30.0, 0.8)), PipelineConfig::Null)
            .await
            .unwrap();
        assert_eq!(orchestrator.status("face").await, Some(PipelineStatus::Ready));
        assert!(orchestrator.analyze(&face_requirement(), frame()).await.is_ok());
    }

    #[tokio::test]
    async fn live_pipeline_cannot_be_registered_twice() {
        let orchestrator = orchestrator(SelectionStrategy::PerformanceFirst);
        register(&orchestrator, vec![Arc::new(face("face", 30.0, 0.8))]).await;

        let error = orchestrator
            .register_pipeline(Arc::new(face("face", 60.0, 0.5)), PipelineConfig::Null)
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            AppError::Initialization(InitializationError::AlreadyRegistered(ref name)) if name == "face"
        ));
        assert_eq!(orchestrator.status("face").await, Some(PipelineStatus::Ready));
    }

    #[tokio::test]
    async fn dependencies_initialize_through_registration() {
        let orchestrator = orchestrator(SelectionStrategy::PerformanceFirst);
        let face = Arc::new(face("face", 30.0, 0.8));
        let gaze = Arc::new(SimulatedPipeline::new(
            PipelineDescriptor::new("gaze")
                .with_capability(Capability::GazeTracking)
                .depends_on("face"),
        ));
        register(&orchestrator, vec![gaze.clone(), face.clone()]).await;

        assert!(face.is_initialized() && gaze.is_initialized());
        let names: Vec<_> = orchestrator.pipelines().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["gaze", "face"]);

        // A later registration may depend on an already ready pipeline.
        let emotion = SimulatedPipeline::new(
            PipelineDescriptor::new("emotion")
                .with_capability(Capability::EmotionAnalysis)
                .depends_on("face"),
        );
        orchestrator
            .register_pipeline(Arc::new(emotion), serde_json::json!({"model": "small"}))
            .await
            .unwrap();
        assert_eq!(
            orchestrator.pipeline_config("emotion").await,
            Some(serde_json::json!({"model": "small"}))
        );
    }

    #[tokio::test]
    async fn unregister_removes_entry_and_cleans_up() {
        let orchestrator = orchestrator(SelectionStrategy::PerformanceFirst);
        let face = Arc::new(face("face", 30.0, 0.8));
        register(&orchestrator, vec![face.clone()]).await;
        orchestrator.analyze(&face_requirement(), frame()).await.unwrap();
        assert!(orchestrator.telemetry("face").is_some());

        orchestrator.unregister_pipeline("face").await.unwrap();

        assert!(!face.is_initialized());
        assert_eq!(orchestrator.status("face").await, None);
        assert!(orchestrator.breaker_snapshot("face").await.is_none());
        assert!(orchestrator.telemetry("face").is_none());
        assert!(matches!(
            orchestrator.unregister_pipeline("face").await,
            Err(AppError::UnknownPipeline(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_call_completes_after_unregister() {
        let orchestrator = Arc::new(orchestrator(SelectionStrategy::PerformanceFirst));
        let slow = Arc::new(face("slow", 30.0, 0.8).with_process_delay(Duration::from_millis(500)));
        register(&orchestrator, vec![slow.clone()]).await;

        let call = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.analyze(&face_requirement(), frame()).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        orchestrator.unregister_pipeline("slow").await.unwrap();

        let outcome = call.await.unwrap().unwrap();
        assert_eq!(outcome.result.pipeline_used, "slow");
        assert!(matches!(
            orchestrator.analyze(&face_requirement(), frame()).await,
            Err(AnalysisError::NoCompatiblePipeline { .. })
        ));
        assert_eq!(slow.process_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn initialization_outliving_its_registration_is_discarded() {
        let orchestrator = Arc::new(orchestrator(SelectionStrategy::PerformanceFirst));
        let mut events = orchestrator.subscribe();
        let old = Arc::new(face("face", 30.0, 0.8).with_init_delay(Duration::from_millis(100)));
        let new = Arc::new(face("face", 30.0, 0.8).with_init_delay(Duration::from_secs(10)));

        let first = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            let old = old.clone();
            async move { orchestrator.register_pipeline(old, PipelineConfig::Null).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        orchestrator.unregister_pipeline("face").await.unwrap();

        let second = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            let new = new.clone();
            async move { orchestrator.register_pipeline(new, PipelineConfig::Null).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let error = first.await.unwrap().unwrap_err();
        assert!(matches!(
            error,
            AppError::Initialization(InitializationError::Unregistered(ref name)) if name == "face"
        ));
        assert!(!old.is_initialized());
        assert!(!new.is_initialized());
        assert_eq!(orchestrator.status("face").await, Some(PipelineStatus::Initializing));
        assert!(matches!(
            orchestrator.analyze(&face_requirement(), frame()).await,
            Err(AnalysisError::NoCompatiblePipeline { .. })
        ));
        assert_eq!(new.process_calls(), 0);

        second.await.unwrap().unwrap();
        assert_eq!(orchestrator.status("face").await, Some(PipelineStatus::Ready));
        assert!(new.is_initialized());

        let mut ready_events = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, OrchestratorEvent::PipelineReady { .. }) {
                ready_events += 1;
            }
        }
        assert_eq!(ready_events, 1);
    }

    #[tokio::test]
    async fn hybrid_refines_coarse_result() {
        let orchestrator = orchestrator(SelectionStrategy::Hybrid);
        register(
            &orchestrator,
            vec![Arc::new(face("fast", 60.0, 0.7)), Arc::new(face("precise", 15.0, 0.95))],
        )
        .await;

        let outcome = orchestrator.analyze(&face_requirement(), frame()).await.unwrap();
        assert_eq!(outcome.strategy, SelectionStrategy::Hybrid);
        assert_eq!(outcome.result.pipeline_used, "precise");
        assert_eq!(outcome.coarse.unwrap().pipeline_used, "fast");
    }

    #[tokio::test]
    async fn hybrid_keeps_coarse_result_when_refinement_fails() {
        let orchestrator = orchestrator(SelectionStrategy::Hybrid);
        let precise = Arc::new(face("precise", 15.0, 0.95).always_failing());
        register(&orchestrator, vec![Arc::new(face("fast", 60.0, 0.7)), precise.clone()]).await;

        let outcome = orchestrator.analyze(&face_requirement(), frame()).await.unwrap();
        assert_eq!(outcome.result.pipeline_used, "fast");
        assert!(outcome.coarse.is_none());
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(precise.process_calls(), 1);
    }

    #[tokio::test]
    async fn registration_events_are_published() {
        let orchestrator = orchestrator(SelectionStrategy::PerformanceFirst);
        let mut events = orchestrator.subscribe();
        register(&orchestrator, vec![Arc::new(face("face", 30.0, 0.8))]).await;

        assert_eq!(
            events.recv().await.unwrap(),
            OrchestratorEvent::PipelineRegistered {
                name: "face".to_string()
            }
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            OrchestratorEvent::PipelineReady { ref name, attempts: 1, .. } if name == "face"
        ));
    }

    #[tokio::test]
    async fn shutdown_rejects_further_analyses() {
        let orchestrator = orchestrator(SelectionStrategy::PerformanceFirst);
        let face = Arc::new(face("face", 30.0, 0.8));
        register(&orchestrator, vec![face.clone()]).await;

        orchestrator.shutdown().await;

        assert!(!face.is_initialized());
        assert!(orchestrator.pipelines().await.is_empty());
        assert!(matches!(
            orchestrator.analyze(&face_requirement(), frame()).await,
            Err(AnalysisError::Unavailable)
        ));
    }

    #[test]
    fn builder_rejects_invalid_configuration() {
        let result = Orchestrator::builder().max_concurrent_analyses(0).build();
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
