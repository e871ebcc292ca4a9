//! Host-side mirrors of the textures and buffers the compute kernels run on.
//!
//! An [`Image<T>`] is a dense row-major 2D array; a [`Buffer<T>`] is a linear
//! array of plain-old-data records. Both are what a GPU backend would shadow
//! with a texture or storage buffer, which is why every element type must be
//! [`bytemuck::Pod`]: the bytes can be bound to a device resource unchanged.

use crate::backend::ComputeBackend;
use crate::BackendError;

/// Two-channel pixel holding `(magnitude, angle)` of a gradient sample.
/// Matches an `rg32f` texture texel.
pub type Grad = [f32; 2];

/// Element types an [`Image`] can hold: `f32` and [`Grad`].
pub trait Pixel: bytemuck::Pod + Default + Send + Sync + 'static {}

impl Pixel for f32 {}
impl Pixel for Grad {}

/// Dense row-major 2D array with host/device mirror semantics.
///
/// Allocation happens once at construction and never grows; the only
/// failure mode is the allocation itself.
#[derive(Debug, Clone)]
pub struct Image<T: Pixel> {
    data: Vec<T>,
    width: usize,
    height: usize,
}

impl<T: Pixel> Image<T> {
    /// Allocate a zero-initialized `width`×`height` image.
    pub fn new(width: usize, height: usize) -> Result<Self, BackendError> {
        let len = width * height;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| BackendError::Allocation {
                bytes: len * std::mem::size_of::<T>(),
            })?;
        data.resize(len, T::default());
        Ok(Image {
            data,
            width,
            height,
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        debug_assert!(x < self.width && y < self.height);
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        debug_assert!(x < self.width && y < self.height);
        self.data[y * self.width + x] = value;
    }

    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Refresh host contents after a compute dispatch has written the
    /// device-side mirror. No-op on backends that compute in host memory.
    pub fn sync_from_device<B: ComputeBackend>(
        &mut self,
        backend: &mut B,
    ) -> Result<(), BackendError> {
        backend.sync_image(self)
    }
}

/// Linear, host-visible array of `count` POD records, the host mirror of a
/// device storage buffer.
#[derive(Debug, Clone)]
pub struct Buffer<T: bytemuck::Pod> {
    data: Vec<T>,
}

impl<T: bytemuck::Pod> Buffer<T> {
    /// Allocate `count` zeroed records.
    pub fn zeroed(count: usize) -> Result<Self, BackendError> {
        let mut data = Vec::new();
        data.try_reserve_exact(count)
            .map_err(|_| BackendError::Allocation {
                bytes: count * std::mem::size_of::<T>(),
            })?;
        data.resize(count, T::zeroed());
        Ok(Buffer { data })
    }

    pub fn from_records(records: Vec<T>) -> Self {
        Buffer { data: records }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn sync_from_device<B: ComputeBackend>(
        &mut self,
        backend: &mut B,
    ) -> Result<(), BackendError> {
        backend.sync_buffer(self)
    }
}
