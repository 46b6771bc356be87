//! Host-memory device used when no accelerator is present.

use super::{BufferId, Device, DeviceEvent, DeviceProperties};
use kernbench_common::{DEFAULT_HOST_L2_CACHE_BYTES, DeviceError, HarnessConfig};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

#[derive(Debug, Default)]
struct HostMemory {
    next_id: BufferId,
    allocated_bytes: usize,
    buffers: HashMap<BufferId, Vec<u8>>,
}

/// Emulated device backed by host byte vectors.
///
/// Events are wall-clock instants, so `elapsed_ms` measures the host time
/// spent between two `record_event` calls.
#[derive(Debug)]
pub struct HostDevice {
    properties: DeviceProperties,
    memory_limit: Option<usize>,
    memory: Mutex<HostMemory>,
}

impl HostDevice {
    pub fn new() -> Self {
        let threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            properties: DeviceProperties {
                name: "host".to_string(),
                compute_capability: (0, 0),
                multiprocessor_count: threads,
                max_threads_per_multiprocessor: 1,
                l2_cache_bytes: DEFAULT_HOST_L2_CACHE_BYTES,
                total_memory_bytes: None,
            },
            memory_limit: None,
            memory: Mutex::new(HostMemory::default()),
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        let mut device = Self::new().with_l2_cache_bytes(config.host_l2_cache_bytes);
        if let Some(limit) = config.host_memory_limit_bytes {
            device = device.with_memory_limit(limit);
        }
        device
    }

    /// Size of the cache flush region reported to the benchmarker.
    pub fn with_l2_cache_bytes(mut self, bytes: usize) -> Self {
        self.properties.l2_cache_bytes = bytes;
        self
    }

    /// Fail allocations that would push live memory past `bytes`.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self.properties.total_memory_bytes = Some(bytes);
        self
    }

    pub fn live_allocations(&self) -> usize {
        self.memory().buffers.len()
    }

    pub fn allocated_bytes(&self) -> usize {
        self.memory().allocated_bytes
    }

    fn memory(&self) -> MutexGuard<'_, HostMemory> {
        // Buffers stay consistent even if a holder panicked mid-copy.
        self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for HostDevice {
    fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    fn alloc(&self, bytes: usize) -> Result<BufferId, DeviceError> {
        let mut memory = self.memory();
        if let Some(limit) = self.memory_limit {
            let requested = memory.allocated_bytes.saturating_add(bytes);
            if requested > limit {
                return Err(DeviceError::AllocationFailed {
                    bytes,
                    reason: format!(
                        "host memory limit of {} bytes exceeded ({} bytes live)",
                        limit, memory.allocated_bytes
                    ),
                });
            }
        }

        let id = memory.next_id;
        memory.next_id += 1;
        memory.allocated_bytes += bytes;
        memory.buffers.insert(id, vec![0u8; bytes]);
        log::trace!("host alloc {} bytes as buffer {}", bytes, id);
        Ok(id)
    }

    fn free(&self, id: BufferId) -> Result<(), DeviceError> {
        let mut memory = self.memory();
        let buffer = memory.buffers.remove(&id).ok_or(DeviceError::InvalidBuffer { id })?;
        memory.allocated_bytes -= buffer.len();
        Ok(())
    }

    fn copy_htod(&self, dst: BufferId, src: &[u8]) -> Result<(), DeviceError> {
        let mut memory = self.memory();
        let buffer = memory.buffers.get_mut(&dst).ok_or(DeviceError::InvalidBuffer { id: dst })?;
        if buffer.len() != src.len() {
            return Err(DeviceError::SizeMismatch { expected: buffer.len(), actual: src.len() });
        }
        buffer.copy_from_slice(src);
        Ok(())
    }

    fn copy_dtoh(&self, dst: &mut [u8], src: BufferId) -> Result<(), DeviceError> {
        let memory = self.memory();
        let buffer = memory.buffers.get(&src).ok_or(DeviceError::InvalidBuffer { id: src })?;
        if buffer.len() != dst.len() {
            return Err(DeviceError::SizeMismatch { expected: buffer.len(), actual: dst.len() });
        }
        dst.copy_from_slice(buffer);
        Ok(())
    }

    fn memset_zero(&self, id: BufferId) -> Result<(), DeviceError> {
        let mut memory = self.memory();
        let buffer = memory.buffers.get_mut(&id).ok_or(DeviceError::InvalidBuffer { id })?;
        buffer.fill(0);
        Ok(())
    }

    fn record_event(&self) -> Result<DeviceEvent, DeviceError> {
        Ok(DeviceEvent::Host(Instant::now()))
    }

    fn synchronize_event(&self, event: &DeviceEvent) -> Result<(), DeviceError> {
        match event {
            DeviceEvent::Host(_) => Ok(()),
            #[cfg(feature = "cuda")]
            _ => Err(foreign_event()),
        }
    }

    fn elapsed_ms(&self, start: &DeviceEvent, stop: &DeviceEvent) -> Result<f32, DeviceError> {
        match (start, stop) {
            (DeviceEvent::Host(start), DeviceEvent::Host(stop)) => {
                Ok(stop.saturating_duration_since(*start).as_secs_f32() * 1000.0)
            }
            #[cfg(feature = "cuda")]
            _ => Err(foreign_event()),
        }
    }

    fn synchronize(&self) -> Result<(), DeviceError> {
        Ok(())
    }
}

#[cfg(feature = "cuda")]
fn foreign_event() -> DeviceError {
    DeviceError::Synchronization { reason: "event was not recorded on the host device".into() }
}
