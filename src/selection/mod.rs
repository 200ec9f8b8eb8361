mod adaptive;
mod selector;
mod strategy;
mod telemetry;

pub use adaptive::{AccuracyTier, AdaptiveConfig, AdaptiveState, TierChange};
pub use selector::{SelectorConfig, StrategySelector};
pub use strategy::{RankRole, RankedPipeline, Ranking, SelectionStrategy};
pub use telemetry::{PipelineTelemetry, TelemetrySnapshot, TelemetryStore};
