//! Device abstraction
//!
//! A [`Device`] owns raw byte allocations addressed by opaque ids, copies
//! between host and device, zeroes allocations and records timing events.
//! [`DeviceBuffer`] layers a typed, owning handle on top that frees its
//! allocation on drop.

mod host;
#[cfg(feature = "cuda")]
mod cuda;

pub use host::HostDevice;
#[cfg(feature = "cuda")]
pub use cuda::CudaDevice;

use bytemuck::Pod;
use kernbench_common::DeviceError;
use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::Arc;
use std::time::Instant;

/// Opaque handle for one device allocation.
pub type BufferId = u64;

/// Device characteristics, queried once at setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperties {
    pub name: String,
    pub compute_capability: (i32, i32),
    pub multiprocessor_count: usize,
    pub max_threads_per_multiprocessor: usize,
    pub l2_cache_bytes: usize,
    /// `None` when the device has no fixed memory bound.
    pub total_memory_bytes: Option<usize>,
}

impl DeviceProperties {
    /// TF32 tensor math is available from compute capability 8.0 (Ampere).
    pub fn supports_tf32(&self) -> bool {
        self.compute_capability.0 >= 8
    }
}

/// A point in a device's execution timeline.
pub enum DeviceEvent {
    Host(Instant),
    #[cfg(feature = "cuda")]
    Cuda(cudarc::driver::CudaEvent),
}

impl fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceEvent::Host(instant) => f.debug_tuple("Host").field(instant).finish(),
            #[cfg(feature = "cuda")]
            DeviceEvent::Cuda(_) => f.write_str("Cuda(..)"),
        }
    }
}

/// Accelerator runtime used by the harness.
pub trait Device: Send + Sync {
    fn properties(&self) -> &DeviceProperties;

    fn name(&self) -> &str {
        &self.properties().name
    }

    /// Allocate `bytes` bytes of zero-initialized device memory.
    fn alloc(&self, bytes: usize) -> Result<BufferId, DeviceError>;

    fn free(&self, id: BufferId) -> Result<(), DeviceError>;

    /// Copy `src` into allocation `dst`. Sizes must match exactly.
    fn copy_htod(&self, dst: BufferId, src: &[u8]) -> Result<(), DeviceError>;

    /// Copy allocation `src` into `dst`. Sizes must match exactly.
    fn copy_dtoh(&self, dst: &mut [u8], src: BufferId) -> Result<(), DeviceError>;

    fn memset_zero(&self, id: BufferId) -> Result<(), DeviceError>;

    fn record_event(&self) -> Result<DeviceEvent, DeviceError>;

    /// Block until all work recorded before `event` has completed.
    fn synchronize_event(&self, event: &DeviceEvent) -> Result<(), DeviceError>;

    /// Milliseconds between two recorded and synchronized events.
    fn elapsed_ms(&self, start: &DeviceEvent, stop: &DeviceEvent) -> Result<f32, DeviceError>;

    fn synchronize(&self) -> Result<(), DeviceError>;
}

/// Typed device allocation holding `len` elements of `T`.
pub struct DeviceBuffer<T: Pod> {
    device: Arc<dyn Device>,
    id: BufferId,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> DeviceBuffer<T> {
    /// Allocate a zeroed buffer of `len` elements.
    pub fn alloc(device: &Arc<dyn Device>, len: usize) -> Result<Self, DeviceError> {
        let bytes = len.checked_mul(size_of::<T>()).ok_or_else(|| {
            DeviceError::AllocationFailed {
                bytes: usize::MAX,
                reason: format!("{} elements of {} bytes overflow usize", len, size_of::<T>()),
            }
        })?;
        let id = device.alloc(bytes)?;
        Ok(Self { device: Arc::clone(device), id, len, _marker: PhantomData })
    }

    /// Allocate a buffer and fill it from `data`.
    pub fn from_host(device: &Arc<dyn Device>, data: &[T]) -> Result<Self, DeviceError> {
        let mut buffer = Self::alloc(device, data.len())?;
        buffer.copy_from_host(data)?;
        Ok(buffer)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn size_in_bytes(&self) -> usize {
        self.len * size_of::<T>()
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn copy_from_host(&mut self, src: &[T]) -> Result<(), DeviceError> {
        self.check_host_len(src.len())?;
        self.device.copy_htod(self.id, bytemuck::cast_slice(src))
    }

    pub fn copy_to_host(&self, dst: &mut [T]) -> Result<(), DeviceError> {
        self.check_host_len(dst.len())?;
        self.device.copy_dtoh(bytemuck::cast_slice_mut(dst), self.id)
    }

    pub fn to_host(&self) -> Result<Vec<T>, DeviceError> {
        let mut host = vec![T::zeroed(); self.len];
        self.copy_to_host(&mut host)?;
        Ok(host)
    }

    pub fn zero(&mut self) -> Result<(), DeviceError> {
        self.device.memset_zero(self.id)
    }

    fn check_host_len(&self, host_len: usize) -> Result<(), DeviceError> {
        if host_len != self.len {
            return Err(DeviceError::SizeMismatch {
                expected: self.size_in_bytes(),
                actual: host_len * size_of::<T>(),
            });
        }
        Ok(())
    }
}

impl<T: Pod> fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("device", &self.device.name())
            .field("id", &self.id)
            .field("len", &self.len)
            .finish()
    }
}

impl<T: Pod> Drop for DeviceBuffer<T> {
    fn drop(&mut self) {
        if let Err(e) = self.device.free(self.id) {
            log::warn!("Failed to free device buffer {} on {}: {}", self.id, self.device.name(), e);
        }
    }
}
