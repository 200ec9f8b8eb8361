use super::resource::{
    rgba_len, ContextState, ElementType, ImageBuffer, NumericArray, RenderSurface, ResourceKind,
};
use crate::error::ResourceError;

/// Creates the underlying resources. Swappable so a GPU-backed factory can
/// replace the heap one.
pub trait ResourceFactory: Send + Sync {
    fn create_surface(&self, width: u32, height: u32) -> Result<RenderSurface, ResourceError>;

    /// Creates the drawing state for an already allocated companion surface.
    fn create_context(&self, surface: &RenderSurface) -> Result<ContextState, ResourceError>;

    fn create_image_buffer(&self, width: u32, height: u32) -> Result<ImageBuffer, ResourceError>;

    fn create_numeric_array(&self, element: ElementType, len: usize) -> Result<NumericArray, ResourceError>;

    /// Gives back a surface that never made it into the pool.
    fn release_surface(&self, _surface: RenderSurface) {}
}

/// Plain heap allocations with a per-allocation size ceiling.
#[derive(Debug, Clone)]
pub struct HeapResourceFactory {
    max_allocation_bytes: usize,
    contexts_available: bool,
}

impl Default for HeapResourceFactory {
    fn default() -> Self {
        Self {
            max_allocation_bytes: 256 * 1024 * 1024,
            contexts_available: true,
        }
    }
}

impl HeapResourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_allocation_bytes(mut self, bytes: usize) -> Self {
        self.max_allocation_bytes = bytes;
        self
    }

    /// Simulates a host where no drawing context can be created.
    pub fn without_contexts(mut self) -> Self {
        self.contexts_available = false;
        self
    }

    fn check(&self, kind: ResourceKind, bytes: usize) -> Result<(), ResourceError> {
        if bytes > self.max_allocation_bytes {
            return Err(ResourceError::Creation {
                kind,
                reason: format!(
                    "{} bytes exceeds allocation limit of {} bytes",
                    bytes, self.max_allocation_bytes
                ),
            });
        }
        Ok(())
    }
}

impl ResourceFactory for HeapResourceFactory {
    fn create_surface(&self, width: u32, height: u32) -> Result<RenderSurface, ResourceError> {
        self.check(ResourceKind::Surface, rgba_len(width, height))?;
        Ok(RenderSurface::new(width, height))
    }

    fn create_context(&self, surface: &RenderSurface) -> Result<ContextState, ResourceError> {
        if !self.contexts_available {
            return Err(ResourceError::Creation {
                kind: ResourceKind::Context,
                reason: format!(
                    "no drawing context available for {}x{} surface",
                    surface.width(),
                    surface.height()
                ),
            });
        }
        Ok(ContextState::new())
    }

    fn create_image_buffer(&self, width: u32, height: u32) -> Result<ImageBuffer, ResourceError> {
        self.check(ResourceKind::ImageBuffer, rgba_len(width, height))?;
        Ok(ImageBuffer::new(width, height))
    }

    fn create_numeric_array(&self, element: ElementType, len: usize) -> Result<NumericArray, ResourceError> {
        self.check(ResourceKind::NumericArray, len.saturating_mul(element.size_bytes()))?;
        Ok(NumericArray::zeroed(element, len))
    }
}
