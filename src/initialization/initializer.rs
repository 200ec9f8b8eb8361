use super::graph::{DependencyGraph, MissingDependencyPolicy};
use crate::error::InitializationError;
use crate::pipeline::{AnalysisPipeline, PipelineConfig, PipelineDescriptor};
use crate::reliability::Backoff;
use futures::FutureExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitializerConfig {
    pub max_concurrency: usize,
    /// Per attempt.
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub retry_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    pub missing_dependencies: MissingDependencyPolicy,
}

impl Default for InitializerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            timeout_ms: 30_000,
            retry_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            jitter: false,
            missing_dependencies: MissingDependencyPolicy::Block,
        }
    }
}

impl InitializerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
        .with_jitter(self.jitter)
    }
}

/// A pipeline waiting to be initialized, with the config it receives.
pub struct InitializationTask {
    pub pipeline: Arc<dyn AnalysisPipeline>,
    pub descriptor: PipelineDescriptor,
    pub config: PipelineConfig,
}

impl InitializationTask {
    pub fn new(pipeline: Arc<dyn AnalysisPipeline>, config: PipelineConfig) -> Self {
        Self {
            descriptor: pipeline.descriptor(),
            pipeline,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitializedPipeline {
    pub name: String,
    pub attempts: u32,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedPipeline {
    pub name: String,
    pub error: InitializationError,
    /// Zero when the pipeline was never started.
    pub attempts: u32,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitializationReport {
    pub successful: Vec<InitializedPipeline>,
    pub failed: Vec<FailedPipeline>,
    pub total_time: Duration,
    /// Sum of per-pipeline busy time over wall-clock time.
    pub parallel_efficiency: f64,
}

impl InitializationReport {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn succeeded(&self, name: &str) -> bool {
        self.successful.iter().any(|p| p.name == name)
    }

    pub fn failure(&self, name: &str) -> Option<&FailedPipeline> {
        self.failed.iter().find(|p| p.name == name)
    }
}

struct Completion {
    name: String,
    attempts: u32,
    duration: Duration,
    result: Result<(), InitializationError>,
}

/// Initializes a batch of pipelines in dependency order, bounded by a
/// semaphore, with per-attempt timeouts and backed-off retries.
#[derive(Debug, Clone, Default)]
pub struct ParallelInitializer {
    config: InitializerConfig,
}

impl ParallelInitializer {
    pub fn new(config: InitializerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InitializerConfig {
        &self.config
    }

    pub async fn initialize_all(
        &self,
        tasks: Vec<InitializationTask>,
        already_ready: &HashSet<String>,
    ) -> InitializationReport {
        let started = Instant::now();
        let mut report = InitializationReport::default();

        let mut pending: IndexMap<String, InitializationTask> = IndexMap::new();
        for task in tasks {
            let name = task.descriptor.name.clone();
            if pending.contains_key(&name) || already_ready.contains(&name) {
                warn!(pipeline = %name, "Duplicate pipeline in initialization batch");
                report.failed.push(FailedPipeline {
                    error: InitializationError::AlreadyRegistered(name.clone()),
                    name,
                    attempts: 0,
                    duration: Duration::ZERO,
                });
                continue;
            }
            pending.insert(name, task);
        }

        let graph = DependencyGraph::build(
            pending.values().map(|t| &t.descriptor),
            already_ready,
            self.config.missing_dependencies,
        );
        info!(
            pipelines = graph.len(),
            max_concurrency = self.config.max_concurrency,
            "Starting parallel initialization"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut satisfied: HashSet<String> = HashSet::new();
        let mut in_flight: JoinSet<Completion> = JoinSet::new();
        let mut running: HashMap<Id, String> = HashMap::new();

        loop {
            for name in graph.ready(|n| pending.contains_key(n), &satisfied) {
                let Some(task) = pending.shift_remove(&name) else {
                    continue;
                };
                debug!(pipeline = %name, "Pipeline ready to initialize");
                let semaphore = Arc::clone(&semaphore);
                let config = self.config.clone();
                let spawned_name = name.clone();
                let handle = in_flight.spawn(async move {
                    let (attempts, duration, result) = match semaphore.acquire_owned().await {
                        Ok(_permit) => {
                            let began = Instant::now();
                            let (attempts, result) = initialize_with_retry(&task, &config).await;
                            (attempts, began.elapsed(), result)
                        }
                        Err(_) => (
                            0,
                            Duration::ZERO,
                            Err(InitializationError::Failed {
                                pipeline: name.clone(),
                                attempts: 0,
                                reason: "initializer closed".to_string(),
                            }),
                        ),
                    };
                    Completion {
                        name,
                        attempts,
                        duration,
                        result,
                    }
                });
                running.insert(handle.id(), spawned_name);
            }

            let completion = match in_flight.join_next_with_id().await {
                Some(Ok((id, completion))) => {
                    running.remove(&id);
                    completion
                }
                Some(Err(join_error)) => {
                    let Some(name) = running.remove(&join_error.id()) else {
                        error!(error = %join_error, "Unknown initialization task aborted");
                        continue;
                    };
                    error!(pipeline = %name, error = %join_error, "Initialization task aborted");
                    Completion {
                        result: Err(InitializationError::Failed {
                            pipeline: name.clone(),
                            attempts: 0,
                            reason: format!("initialization task aborted: {}", join_error),
                        }),
                        name,
                        attempts: 0,
                        duration: Duration::ZERO,
                    }
                }
                None => break,
            };

            match completion.result {
                Ok(()) => {
                    info!(
                        pipeline = %completion.name,
                        attempts = completion.attempts,
                        duration_ms = completion.duration.as_millis() as u64,
                        "Pipeline initialized"
                    );
                    satisfied.insert(completion.name.clone());
                    report.successful.push(InitializedPipeline {
                        name: completion.name,
                        attempts: completion.attempts,
                        duration: completion.duration,
                    });
                }
                Err(error) => {
                    error!(pipeline = %completion.name, error = %error, "Pipeline initialization failed");
                    for dependent in graph.transitive_dependents(&completion.name) {
                        if pending.shift_remove(&dependent).is_none() {
                            continue;
                        }
                        warn!(
                            pipeline = %dependent,
                            dependency = %completion.name,
                            "Skipping pipeline blocked by failed dependency"
                        );
                        report.failed.push(FailedPipeline {
                            error: InitializationError::BlockedByDependency {
                                pipeline: dependent.clone(),
                                dependency: completion.name.clone(),
                            },
                            name: dependent,
                            attempts: 0,
                            duration: Duration::ZERO,
                        });
                    }
                    report.failed.push(FailedPipeline {
                        name: completion.name,
                        error,
                        attempts: completion.attempts,
                        duration: completion.duration,
                    });
                }
            }
        }

        if !pending.is_empty() {
            let stuck: Vec<String> = pending.keys().cloned().collect();
            let missing: Vec<String> = stuck
                .iter()
                .filter_map(|name| graph.get(name))
                .flat_map(|node| node.missing.iter().cloned())
                .collect();
            let cycle: Vec<String> = graph
                .cycles()
                .into_iter()
                .flatten()
                .filter(|name| pending.contains_key(name))
                .collect();
            error!(
                stuck = ?stuck,
                cycle = ?cycle,
                missing = ?missing,
                "Circular or missing pipeline dependencies"
            );
            let error = InitializationError::CircularOrMissingDependency {
                pipelines: stuck.clone(),
                cycle,
                missing,
            };
            report.failed.extend(stuck.into_iter().map(|name| FailedPipeline {
                name,
                error: error.clone(),
                attempts: 0,
                duration: Duration::ZERO,
            }));
        }

        report.total_time = started.elapsed();
        let busy: Duration = report
            .successful
            .iter()
            .map(|p| p.duration)
            .chain(report.failed.iter().map(|p| p.duration))
            .sum();
        report.parallel_efficiency = if report.total_time.is_zero() {
            1.0
        } else {
            busy.as_secs_f64() / report.total_time.as_secs_f64()
        };

        info!(
            successful = report.successful.len(),
            failed = report.failed.len(),
            total_ms = report.total_time.as_millis() as u64,
            parallel_efficiency = report.parallel_efficiency,
            "Parallel initialization finished"
        );
        report
    }
}

async fn initialize_with_retry(
    task: &InitializationTask,
    config: &InitializerConfig,
) -> (u32, Result<(), InitializationError>) {
    let name = task.name();
    let timeout = config.timeout();
    let backoff = config.backoff();
    let max_attempts = config.retry_attempts.saturating_add(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let outcome = tokio::time::timeout(
            timeout,
            AssertUnwindSafe(task.pipeline.initialize(&task.config)).catch_unwind(),
        )
        .await;

        let error = match outcome {
            Ok(Ok(Ok(()))) => return (attempt, Ok(())),
            Ok(Ok(Err(e))) => InitializationError::Failed {
                pipeline: name.to_string(),
                attempts: attempt,
                reason: e.to_string(),
            },
            Ok(Err(panic)) => InitializationError::Failed {
                pipeline: name.to_string(),
                attempts: attempt,
                reason: format!("panicked: {}", panic_message(panic.as_ref())),
            },
            Err(_) => InitializationError::Timeout {
                pipeline: name.to_string(),
                timeout,
                attempts: attempt,
            },
        };

        if attempt >= max_attempts {
            return (attempt, Err(error));
        }

        let delay = backoff.delay(attempt - 1);
        warn!(
            pipeline = %name,
            attempt,
            max_attempts,
            retry_in_ms = delay.as_millis() as u64,
            error = %error,
            "Initialization attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::pipeline::simulated::{ConcurrencyGauge, LifecycleEvent, LifecycleLog};
    use crate::pipeline::{SensorFrame, SimulatedPipeline};
    use async_trait::async_trait;
    use std::future::Future;
    use std::pin::Pin;

    /// Panics while building its initialization future, before it is polled.
    struct PanicsBeforePolling;

    #[async_trait]
    impl AnalysisPipeline for PanicsBeforePolling {
        fn descriptor(&self) -> PipelineDescriptor {
            PipelineDescriptor::new("eager")
        }

        fn initialize<'life0, 'life1, 'async_trait>(
            &'life0 self,
            _config: &'life1 PipelineConfig,
        ) -> Pin<Box<dyn Future<Output = Result<(), PipelineError>> + Send + 'async_trait>>
        where
            'life0: 'async_trait,
            'life1: 'async_trait,
            Self: 'async_trait,
        {
            panic!("model file missing")
        }

        async fn process(&self, _frame: Arc<SensorFrame>) -> Result<serde_json::Value, PipelineError> {
            Ok(serde_json::Value::Null)
        }

        async fn cleanup(&self) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    fn task(pipeline: SimulatedPipeline) -> InitializationTask {
        InitializationTask::new(Arc::new(pipeline), PipelineConfig::Null)
    }

    fn initializer(max_concurrency: usize) -> ParallelInitializer {
        ParallelInitializer::new(InitializerConfig {
            max_concurrency,
            timeout_ms: 1_000,
            retry_attempts: 2,
            base_delay_ms: 10,
            max_delay_ms: 100,
            ..InitializerConfig::default()
        })
    }

    fn chain(log: &LifecycleLog) -> Vec<InitializationTask> {
        vec![
            task(
                SimulatedPipeline::new(PipelineDescriptor::new("c").depends_on("b"))
                    .with_log(log.clone()),
            ),
            task(
                SimulatedPipeline::new(PipelineDescriptor::new("b").depends_on("a"))
                    .with_init_delay(Duration::from_millis(5))
                    .with_log(log.clone()),
            ),
            task(
                SimulatedPipeline::new(PipelineDescriptor::new("a"))
                    .with_init_delay(Duration::from_millis(10))
                    .with_log(log.clone()),
            ),
        ]
    }

    fn finished_before_started(log: &LifecycleLog, first: &str, second: &str) -> bool {
        let finished = log.position(&LifecycleEvent::InitFinished(first.to_string()));
        let started = log.position(&LifecycleEvent::InitStarted(second.to_string()));
        matches!((finished, started), (Some(f), Some(s)) if f < s)
    }

    #[tokio::test(start_paused = true)]
    async fn dependencies_initialize_in_order_at_any_concurrency() {
        for max_concurrency in [1, 3] {
            let log = LifecycleLog::new();
            let report = initializer(max_concurrency)
                .initialize_all(chain(&log), &HashSet::new())
                .await;

            assert!(report.is_complete_success(), "{:?}", report.failed);
            assert_eq!(report.successful.len(), 3);
            assert!(finished_before_started(&log, "a", "b"));
            assert!(finished_before_started(&log, "b", "c"));
        }
    }

    #[tokio::test]
    async fn cycle_is_reported_with_every_stuck_pipeline() {
        let tasks = vec![
            task(SimulatedPipeline::new(PipelineDescriptor::new("a").depends_on("b"))),
            task(SimulatedPipeline::new(PipelineDescriptor::new("b").depends_on("a"))),
            task(SimulatedPipeline::new(PipelineDescriptor::new("tail").depends_on("b"))),
            task(SimulatedPipeline::new(PipelineDescriptor::new("free"))),
        ];
        let report = initializer(2).initialize_all(tasks, &HashSet::new()).await;

        assert!(report.succeeded("free"));
        assert_eq!(report.failed.len(), 3);
        for name in ["a", "b", "tail"] {
            match &report.failure(name).map(|f| f.error.clone()) {
                Some(InitializationError::CircularOrMissingDependency { pipelines, cycle, .. }) => {
                    assert_eq!(pipelines, &vec!["a".to_string(), "b".to_string(), "tail".to_string()]);
                    assert_eq!(cycle, &vec!["a".to_string(), "b".to_string()]);
                }
                other => panic!("unexpected outcome for {}: {:?}", name, other),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let flaky = Arc::new(SimulatedPipeline::new(PipelineDescriptor::new("flaky")).failing_init(2));
        let tasks = vec![InitializationTask::new(flaky.clone(), PipelineConfig::Null)];
        let report = initializer(1).initialize_all(tasks, &HashSet::new()).await;

        assert!(report.succeeded("flaky"));
        assert_eq!(report.successful[0].attempts, 3);
        assert_eq!(flaky.init_attempts(), 3);
        assert!(flaky.is_initialized());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_block_dependents_transitively() {
        let tasks = vec![
            task(SimulatedPipeline::new(PipelineDescriptor::new("a")).always_failing_init()),
            task(SimulatedPipeline::new(PipelineDescriptor::new("b").depends_on("a"))),
            task(SimulatedPipeline::new(PipelineDescriptor::new("c").depends_on("b"))),
        ];
        let report = initializer(3).initialize_all(tasks, &HashSet::new()).await;

        assert!(report.successful.is_empty());
        let a = report.failure("a").unwrap();
        assert_eq!(a.attempts, 3);
        assert!(matches!(a.error, InitializationError::Failed { attempts: 3, .. }));
        for name in ["b", "c"] {
            assert_eq!(
                report.failure(name).map(|f| f.error.clone()),
                Some(InitializationError::BlockedByDependency {
                    pipeline: name.to_string(),
                    dependency: "a".to_string(),
                })
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_initialization_times_out() {
        let initializer = ParallelInitializer::new(InitializerConfig {
            timeout_ms: 100,
            retry_attempts: 0,
            ..InitializerConfig::default()
        });
        let tasks = vec![task(
            SimulatedPipeline::new(PipelineDescriptor::new("slow"))
                .with_init_delay(Duration::from_secs(10)),
        )];
        let report = initializer.initialize_all(tasks, &HashSet::new()).await;

        assert_eq!(
            report.failure("slow").map(|f| f.error.clone()),
            Some(InitializationError::Timeout {
                pipeline: "slow".to_string(),
                timeout: Duration::from_millis(100),
                attempts: 1,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_limit() {
        let gauge = ConcurrencyGauge::new();
        let tasks = (0..6)
            .map(|i| {
                task(
                    SimulatedPipeline::new(PipelineDescriptor::new(format!("p{}", i)))
                        .with_init_delay(Duration::from_millis(50))
                        .with_concurrency_gauge(gauge.clone()),
                )
            })
            .collect();
        let report = initializer(2).initialize_all(tasks, &HashSet::new()).await;

        assert_eq!(report.successful.len(), 6);
        assert_eq!(gauge.peak(), 2);
        assert!(report.parallel_efficiency > 1.5);
    }

    #[tokio::test]
    async fn missing_dependency_blocks_unless_best_effort() {
        let make = || vec![task(SimulatedPipeline::new(PipelineDescriptor::new("gaze").depends_on("face")))];

        let report = initializer(1).initialize_all(make(), &HashSet::new()).await;
        assert!(matches!(
            report.failure("gaze").map(|f| &f.error),
            Some(InitializationError::CircularOrMissingDependency { missing, .. }) if missing == &vec!["face".to_string()]
        ));

        let lenient = ParallelInitializer::new(InitializerConfig {
            missing_dependencies: MissingDependencyPolicy::BestEffort,
            ..InitializerConfig::default()
        });
        let report = lenient.initialize_all(make(), &HashSet::new()).await;
        assert!(report.succeeded("gaze"));

        let ready = HashSet::from(["face".to_string()]);
        let report = initializer(1).initialize_all(make(), &ready).await;
        assert!(report.succeeded("gaze"));
    }

    #[tokio::test]
    async fn aborted_task_is_reported_and_blocks_dependents() {
        let tasks = vec![
            InitializationTask::new(Arc::new(PanicsBeforePolling), PipelineConfig::Null),
            task(SimulatedPipeline::new(PipelineDescriptor::new("gaze").depends_on("eager"))),
        ];
        let report = initializer(2).initialize_all(tasks, &HashSet::new()).await;

        assert!(report.successful.is_empty());
        assert!(matches!(
            report.failure("eager").map(|f| &f.error),
            Some(InitializationError::Failed { attempts: 0, reason, .. }) if reason.contains("aborted")
        ));
        assert_eq!(
            report.failure("gaze").map(|f| f.error.clone()),
            Some(InitializationError::BlockedByDependency {
                pipeline: "gaze".to_string(),
                dependency: "eager".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let tasks = vec![
            task(SimulatedPipeline::new(PipelineDescriptor::new("face"))),
            task(SimulatedPipeline::new(PipelineDescriptor::new("face"))),
        ];
        let report = initializer(2).initialize_all(tasks, &HashSet::new()).await;
        assert_eq!(report.successful.len(), 1);
        assert_eq!(
            report.failed[0].error,
            InitializationError::AlreadyRegistered("face".to_string())
        );
    }
}
