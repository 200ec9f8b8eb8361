use crate::error::ResourceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Surface,
    Context,
    ImageBuffer,
    NumericArray,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Surface,
        ResourceKind::Context,
        ResourceKind::ImageBuffer,
        ResourceKind::NumericArray,
    ];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Surface => write!(f, "surface"),
            ResourceKind::Context => write!(f, "context"),
            ResourceKind::ImageBuffer => write!(f, "image_buffer"),
            ResourceKind::NumericArray => write!(f, "numeric_array"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    U8,
    I16,
    I32,
    F32,
    F64,
}

impl ElementType {
    pub fn size_bytes(self) -> usize {
        match self {
            ElementType::U8 => 1,
            ElementType::I16 => 2,
            ElementType::I32 | ElementType::F32 => 4,
            ElementType::F64 => 8,
        }
    }
}

/// Kind plus size parameters. Two requests are interchangeable only when
/// they are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ResourceRequest {
    Surface { width: u32, height: u32 },
    Context { width: u32, height: u32 },
    ImageBuffer { width: u32, height: u32 },
    NumericArray { element: ElementType, len: usize },
}

pub type PoolKey = ResourceRequest;

impl ResourceRequest {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceRequest::Surface { .. } => ResourceKind::Surface,
            ResourceRequest::Context { .. } => ResourceKind::Context,
            ResourceRequest::ImageBuffer { .. } => ResourceKind::ImageBuffer,
            ResourceRequest::NumericArray { .. } => ResourceKind::NumericArray,
        }
    }

    pub fn byte_len(&self) -> usize {
        match *self {
            ResourceRequest::Surface { width, height }
            | ResourceRequest::Context { width, height }
            | ResourceRequest::ImageBuffer { width, height } => rgba_len(width, height),
            ResourceRequest::NumericArray { element, len } => len.saturating_mul(element.size_bytes()),
        }
    }

    pub fn validate(&self) -> Result<(), ResourceError> {
        let empty = match *self {
            ResourceRequest::Surface { width, height }
            | ResourceRequest::Context { width, height }
            | ResourceRequest::ImageBuffer { width, height } => width == 0 || height == 0,
            ResourceRequest::NumericArray { len, .. } => len == 0,
        };
        if empty {
            return Err(ResourceError::InvalidRequest(format!(
                "{} request has zero size: {:?}",
                self.kind(),
                self
            )));
        }
        Ok(())
    }
}

pub(crate) fn rgba_len(width: u32, height: u32) -> usize {
    (width as usize)
        .saturating_mul(height as usize)
        .saturating_mul(4)
}

/// Off-screen RGBA drawing target.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RenderSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; rgba_len(width, height)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    fn has_shape(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height && self.pixels.len() == rgba_len(width, height)
    }
}

/// Drawing state of a context. The id survives resets so reuse is traceable.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextState {
    pub id: Uuid,
    pub draw_calls: u64,
    /// 2D affine transform `[a, b, c, d, e, f]`.
    pub transform: [f32; 6],
}

impl ContextState {
    pub const IDENTITY: [f32; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            draw_calls: 0,
            transform: Self::IDENTITY,
        }
    }

    fn reset(&mut self) {
        self.draw_calls = 0;
        self.transform = Self::IDENTITY;
    }
}

impl Default for ContextState {
    fn default() -> Self {
        Self::new()
    }
}

/// A drawing context bound to its own companion surface.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderContext {
    surface: RenderSurface,
    state: ContextState,
}

impl RenderContext {
    pub fn new(surface: RenderSurface, state: ContextState) -> Self {
        Self { surface, state }
    }

    pub fn surface(&self) -> &RenderSurface {
        &self.surface
    }

    pub fn state(&self) -> &ContextState {
        &self.state
    }

    pub fn translate(&mut self, x: f32, y: f32) {
        self.state.transform[4] += x;
        self.state.transform[5] += y;
    }

    /// Fills an axis-aligned rectangle, clipped to the surface.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, rgba: [u8; 4]) {
        let x = x.saturating_add(self.state.transform[4].max(0.0) as u32);
        let y = y.saturating_add(self.state.transform[5].max(0.0) as u32);
        let x_end = x.saturating_add(width).min(self.surface.width);
        let y_end = y.saturating_add(height).min(self.surface.height);
        let stride = self.surface.width as usize * 4;
        for row in y..y_end {
            for col in x..x_end {
                let offset = row as usize * stride + col as usize * 4;
                self.surface.pixels[offset..offset + 4].copy_from_slice(&rgba);
            }
        }
        self.state.draw_calls += 1;
    }

    fn clear(&mut self) {
        self.surface.clear();
        self.state.reset();
    }
}

/// Raw RGBA pixel data.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl ImageBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; rgba_len(width, height)],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NumericArray {
    U8(Vec<u8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl NumericArray {
    pub fn zeroed(element: ElementType, len: usize) -> Self {
        match element {
            ElementType::U8 => NumericArray::U8(vec![0; len]),
            ElementType::I16 => NumericArray::I16(vec![0; len]),
            ElementType::I32 => NumericArray::I32(vec![0; len]),
            ElementType::F32 => NumericArray::F32(vec![0.0; len]),
            ElementType::F64 => NumericArray::F64(vec![0.0; len]),
        }
    }

    pub fn element(&self) -> ElementType {
        match self {
            NumericArray::U8(_) => ElementType::U8,
            NumericArray::I16(_) => ElementType::I16,
            NumericArray::I32(_) => ElementType::I32,
            NumericArray::F32(_) => ElementType::F32,
            NumericArray::F64(_) => ElementType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            NumericArray::U8(v) => v.len(),
            NumericArray::I16(v) => v.len(),
            NumericArray::I32(v) => v.len(),
            NumericArray::F32(v) => v.len(),
            NumericArray::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f32_mut(&mut self) -> Option<&mut [f32]> {
        match self {
            NumericArray::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u8_mut(&mut self) -> Option<&mut [u8]> {
        match self {
            NumericArray::U8(v) => Some(v),
            _ => None,
        }
    }

    fn clear(&mut self) {
        match self {
            NumericArray::U8(v) => v.fill(0),
            NumericArray::I16(v) => v.fill(0),
            NumericArray::I32(v) => v.fill(0),
            NumericArray::F32(v) => v.fill(0.0),
            NumericArray::F64(v) => v.fill(0.0),
        }
    }

    fn is_zeroed(&self) -> bool {
        match self {
            NumericArray::U8(v) => v.iter().all(|x| *x == 0),
            NumericArray::I16(v) => v.iter().all(|x| *x == 0),
            NumericArray::I32(v) => v.iter().all(|x| *x == 0),
            NumericArray::F32(v) => v.iter().all(|x| *x == 0.0),
            NumericArray::F64(v) => v.iter().all(|x| *x == 0.0),
        }
    }
}

/// Anything the pool can hand out.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Surface(RenderSurface),
    Context(RenderContext),
    ImageBuffer(ImageBuffer),
    NumericArray(NumericArray),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Surface(_) => ResourceKind::Surface,
            Resource::Context(_) => ResourceKind::Context,
            Resource::ImageBuffer(_) => ResourceKind::ImageBuffer,
            Resource::NumericArray(_) => ResourceKind::NumericArray,
        }
    }

    /// Wipes prior contents so the next holder sees a fresh resource.
    pub fn clear(&mut self) {
        match self {
            Resource::Surface(surface) => surface.clear(),
            Resource::Context(context) => context.clear(),
            Resource::ImageBuffer(buffer) => buffer.data.fill(0),
            Resource::NumericArray(array) => array.clear(),
        }
    }

    /// Whether the resource still has the kind and size of `key`. Holders
    /// can resize or swap a checked-out resource, so the pool rechecks on release.
    pub fn matches(&self, key: &PoolKey) -> bool {
        match (self, *key) {
            (Resource::Surface(surface), ResourceRequest::Surface { width, height }) => {
                surface.has_shape(width, height)
            }
            (Resource::Context(context), ResourceRequest::Context { width, height }) => {
                context.surface.has_shape(width, height)
            }
            (Resource::ImageBuffer(buffer), ResourceRequest::ImageBuffer { width, height }) => {
                buffer.width == width && buffer.height == height && buffer.data.len() == key.byte_len()
            }
            (Resource::NumericArray(array), ResourceRequest::NumericArray { element, len }) => {
                array.element() == element && array.len() == len
            }
            _ => false,
        }
    }

    pub fn is_zeroed(&self) -> bool {
        match self {
            Resource::Surface(surface) => surface.pixels.iter().all(|b| *b == 0),
            Resource::Context(context) => {
                context.surface.pixels.iter().all(|b| *b == 0) && context.state.draw_calls == 0
            }
            Resource::ImageBuffer(buffer) => buffer.data.iter().all(|b| *b == 0),
            Resource::NumericArray(array) => array.is_zeroed(),
        }
    }

    pub fn as_surface_mut(&mut self) -> Option<&mut RenderSurface> {
        match self {
            Resource::Surface(surface) => Some(surface),
            _ => None,
        }
    }

    pub fn as_context_mut(&mut self) -> Option<&mut RenderContext> {
        match self {
            Resource::Context(context) => Some(context),
            _ => None,
        }
    }

    pub fn as_image_buffer_mut(&mut self) -> Option<&mut ImageBuffer> {
        match self {
            Resource::ImageBuffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_numeric_array_mut(&mut self) -> Option<&mut NumericArray> {
        match self {
            Resource::NumericArray(array) => Some(array),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_requests_are_invalid() {
        assert!(ResourceRequest::Surface { width: 0, height: 10 }.validate().is_err());
        assert!(ResourceRequest::NumericArray {
            element: ElementType::F32,
            len: 0
        }
        .validate()
        .is_err());
        assert!(ResourceRequest::ImageBuffer { width: 2, height: 2 }.validate().is_ok());
    }

    #[test]
    fn resized_or_swapped_resources_no_longer_match() {
        let key = ResourceRequest::ImageBuffer { width: 8, height: 8 };
        let mut resource = Resource::ImageBuffer(ImageBuffer::new(8, 8));
        assert!(resource.matches(&key));

        resource.as_image_buffer_mut().unwrap().data.truncate(3);
        assert!(!resource.matches(&key));

        let swapped = Resource::NumericArray(NumericArray::zeroed(ElementType::U8, 256));
        assert!(!swapped.matches(&key));
        assert!(swapped.matches(&ResourceRequest::NumericArray {
            element: ElementType::U8,
            len: 256
        }));
    }

    #[test]
    fn fill_rect_is_clipped_and_cleared() {
        let mut resource = Resource::Context(RenderContext::new(RenderSurface::new(4, 4), ContextState::new()));
        let context = resource.as_context_mut().unwrap();
        context.translate(2.0, 2.0);
        context.fill_rect(1, 1, 10, 10, [255, 0, 0, 255]);
        assert_eq!(context.state().draw_calls, 1);
        assert_eq!(context.surface().pixels()[(3 * 4 + 3) * 4], 255);
        assert_eq!(context.surface().pixels()[0], 0);

        resource.clear();
        assert!(resource.is_zeroed());
    }
}
