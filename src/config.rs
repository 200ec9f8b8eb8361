use crate::error::AppError;
use crate::initialization::InitializerConfig;
use crate::orchestration::OrchestratorConfig;
use crate::reliability::CircuitBreakerConfig;
use crate::resources::PoolConfig;
use crate::scheduling::BatchConfig;
use crate::selection::SelectorConfig;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Environment variables override file values, e.g.
/// `SENSOR__BATCHING__MAX_BATCH_SIZE=20`.
pub const ENV_PREFIX: &str = "SENSOR";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub orchestrator: OrchestratorConfig,
    pub selection: SelectorConfig,
    pub initialization: InitializerConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub batching: BatchConfig,
    pub resources: PoolConfig,
}

impl Configuration {
    /// Defaults, then the optional file, then `SENSOR__*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let configuration: Configuration = settings.try_deserialize()?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn from_toml_str(source: &str) -> Result<Self, AppError> {
        let configuration: Configuration = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let orchestrator = &self.orchestrator;
        require(orchestrator.max_concurrent_analyses > 0, "orchestrator.max_concurrent_analyses must be positive")?;
        require(orchestrator.analysis_timeout_ms > 0, "orchestrator.analysis_timeout_ms must be positive")?;

        require(
            self.selection.max_concurrent_pipelines > 0,
            "selection.max_concurrent_pipelines must be positive",
        )?;
        let adaptive = &self.selection.adaptive;
        require(adaptive.window > 0, "selection.adaptive.window must be positive")?;
        require(
            adaptive.min_samples <= adaptive.window,
            "selection.adaptive.min_samples must not exceed the window",
        )?;
        require(
            adaptive.low_latency_ms <= adaptive.high_latency_ms,
            "selection.adaptive.low_latency_ms must not exceed high_latency_ms",
        )?;

        let initialization = &self.initialization;
        require(initialization.max_concurrency > 0, "initialization.max_concurrency must be positive")?;
        require(initialization.timeout_ms > 0, "initialization.timeout_ms must be positive")?;
        require(
            initialization.base_delay_ms <= initialization.max_delay_ms,
            "initialization.base_delay_ms must not exceed max_delay_ms",
        )?;

        let breaker = &self.circuit_breaker;
        require(breaker.failure_threshold > 0, "circuit_breaker.failure_threshold must be positive")?;
        require(breaker.success_threshold > 0, "circuit_breaker.success_threshold must be positive")?;

        let batching = &self.batching;
        require(batching.min_batch_size > 0, "batching.min_batch_size must be positive")?;
        require(
            batching.min_batch_size <= batching.max_batch_size,
            "batching.min_batch_size must not exceed max_batch_size",
        )?;
        require(
            (0.0..=1.0).contains(&batching.high_confidence_threshold),
            "batching.high_confidence_threshold must be within [0, 1]",
        )?;

        require(self.resources.total_capacity() > 0, "resources need at least one pooled slot")?;
        require(self.resources.gc_interval_ms > 0, "resources.gc_interval_ms must be positive")?;
        Ok(())
    }
}

fn require(condition: bool, message: &str) -> Result<(), AppError> {
    if condition {
        Ok(())
    } else {
        Err(AppError::Config(message.to_string()))
    }
}
