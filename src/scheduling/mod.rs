pub mod decision;
pub mod load;
pub mod queue;
pub mod scheduler;
pub mod strategy;

pub use decision::{BatchDecision, QualityMetrics, MAX_INTERVAL, MIN_INTERVAL};
pub use load::{LoadProbe, StaticLoadProbe, SystemLoad, SystemLoadProbe};
pub use queue::BatchQueue;
pub use scheduler::{
    AdaptiveBatchScheduler, BatchConfig, BatchItem, BatchProcessor, BatchRun, SchedulerStats,
};
pub use strategy::{BatchStrategy, BatchStrategyKind, Proposal, SchedulingContext};
