pub mod graph;
pub mod initializer;

pub use graph::{DependencyGraph, DependencyGraphNode, MissingDependencyPolicy};
pub use initializer::{
    FailedPipeline, InitializationReport, InitializationTask, InitializedPipeline, InitializerConfig,
    ParallelInitializer,
};
