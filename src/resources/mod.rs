pub mod factory;
pub mod pool;
pub mod resource;

pub use factory::{HeapResourceFactory, ResourceFactory};
pub use pool::{PoolConfig, PoolStats, ReclamationReport, ResourceHandle, ResourcePool};
pub use resource::{
    ContextState, ElementType, ImageBuffer, NumericArray, PoolKey, RenderContext, RenderSurface,
    Resource, ResourceKind, ResourceRequest,
};
