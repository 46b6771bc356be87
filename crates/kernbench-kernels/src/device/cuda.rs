//! CUDA device using cudarc 0.17

use super::{BufferId, Device, DeviceEvent, DeviceProperties};
use cudarc::driver::sys::{CUdevice_attribute, CUevent_flags};
use cudarc::driver::{CudaContext, CudaSlice, CudaStream, DriverError};
use kernbench_common::{CopyDirection, DeviceError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

struct Allocation {
    slice: CudaSlice<u8>,
    /// Requested size. Zero-byte requests are backed by a one-byte slice.
    bytes: usize,
}

/// CUDA device with a single default stream.
pub struct CudaDevice {
    ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    properties: DeviceProperties,
    next_id: AtomicU64,
    allocations: Mutex<HashMap<BufferId, Allocation>>,
}

fn driver(call: &'static str) -> impl FnOnce(DriverError) -> DeviceError {
    move |e| DeviceError::Driver { call, reason: format!("{:?}", e) }
}

impl CudaDevice {
    pub fn new(device_id: usize) -> Result<Self, DeviceError> {
        log::info!("Initializing CUDA device {}", device_id);

        let ctx = CudaContext::new(device_id).map_err(|e| DeviceError::Unavailable {
            reason: format!("Failed to create CUDA context for device {}: {:?}", device_id, e),
        })?;
        let stream = ctx.default_stream();
        let properties = Self::query_properties(&ctx)?;

        Ok(Self {
            ctx,
            stream,
            properties,
            next_id: AtomicU64::new(0),
            allocations: Mutex::new(HashMap::new()),
        })
    }

    fn query_properties(ctx: &Arc<CudaContext>) -> Result<DeviceProperties, DeviceError> {
        let attr = |attrib: CUdevice_attribute| ctx.attribute(attrib).map_err(driver("cuDeviceGetAttribute"));

        let major = attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)?;
        let minor = attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)?;
        let sms = attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT)?;
        let threads = attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_MULTIPROCESSOR)?;
        let l2 = attr(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_L2_CACHE_SIZE)?;

        let name = ctx.name().map_err(driver("cuDeviceGetName"))?;
        ctx.bind_to_thread().map_err(driver("cuCtxSetCurrent"))?;
        let (_free, total) = cudarc::driver::result::mem_get_info().map_err(driver("cuMemGetInfo"))?;

        Ok(DeviceProperties {
            name,
            compute_capability: (major, minor),
            multiprocessor_count: sms.max(0) as usize,
            max_threads_per_multiprocessor: threads.max(0) as usize,
            l2_cache_bytes: l2.max(0) as usize,
            total_memory_bytes: Some(total),
        })
    }

    fn allocations(&self) -> MutexGuard<'_, HashMap<BufferId, Allocation>> {
        self.allocations.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Device for CudaDevice {
    fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    fn alloc(&self, bytes: usize) -> Result<BufferId, DeviceError> {
        let slice = self.stream.alloc_zeros::<u8>(bytes.max(1)).map_err(|e| {
            DeviceError::AllocationFailed { bytes, reason: format!("{:?}", e) }
        })?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.allocations().insert(id, Allocation { slice, bytes });
        Ok(id)
    }

    fn free(&self, id: BufferId) -> Result<(), DeviceError> {
        // Dropping the slice returns the memory to the stream.
        self.allocations().remove(&id).map(drop).ok_or(DeviceError::InvalidBuffer { id })
    }

    fn copy_htod(&self, dst: BufferId, src: &[u8]) -> Result<(), DeviceError> {
        let mut allocations = self.allocations();
        let allocation = allocations.get_mut(&dst).ok_or(DeviceError::InvalidBuffer { id: dst })?;
        if allocation.bytes != src.len() {
            return Err(DeviceError::SizeMismatch { expected: allocation.bytes, actual: src.len() });
        }
        if src.is_empty() {
            return Ok(());
        }
        self.stream.memcpy_htod(src, &mut allocation.slice).map_err(|e| DeviceError::CopyFailed {
            direction: CopyDirection::HostToDevice,
            reason: format!("{:?}", e),
        })
    }

    fn copy_dtoh(&self, dst: &mut [u8], src: BufferId) -> Result<(), DeviceError> {
        let allocations = self.allocations();
        let allocation = allocations.get(&src).ok_or(DeviceError::InvalidBuffer { id: src })?;
        if allocation.bytes != dst.len() {
            return Err(DeviceError::SizeMismatch { expected: allocation.bytes, actual: dst.len() });
        }
        if dst.is_empty() {
            return Ok(());
        }
        self.stream.memcpy_dtoh(&allocation.slice, dst).map_err(|e| DeviceError::CopyFailed {
            direction: CopyDirection::DeviceToHost,
            reason: format!("{:?}", e),
        })
    }

    fn memset_zero(&self, id: BufferId) -> Result<(), DeviceError> {
        let mut allocations = self.allocations();
        let allocation = allocations.get_mut(&id).ok_or(DeviceError::InvalidBuffer { id })?;
        self.stream.memset_zeros(&mut allocation.slice).map_err(driver("cuMemsetD8Async"))
    }

    fn record_event(&self) -> Result<DeviceEvent, DeviceError> {
        let event = self
            .ctx
            .new_event(Some(CUevent_flags::CU_EVENT_DEFAULT))
            .map_err(driver("cuEventCreate"))?;
        event.record(&self.stream).map_err(driver("cuEventRecord"))?;
        Ok(DeviceEvent::Cuda(event))
    }

    fn synchronize_event(&self, event: &DeviceEvent) -> Result<(), DeviceError> {
        match event {
            DeviceEvent::Cuda(event) => event
                .synchronize()
                .map_err(|e| DeviceError::Synchronization { reason: format!("{:?}", e) }),
            DeviceEvent::Host(_) => Err(DeviceError::Synchronization {
                reason: "event was not recorded on a CUDA stream".into(),
            }),
        }
    }

    fn elapsed_ms(&self, start: &DeviceEvent, stop: &DeviceEvent) -> Result<f32, DeviceError> {
        match (start, stop) {
            (DeviceEvent::Cuda(start), DeviceEvent::Cuda(stop)) => {
                start.elapsed_ms(stop).map_err(driver("cuEventElapsedTime"))
            }
            _ => Err(DeviceError::Synchronization {
                reason: "events were not recorded on a CUDA stream".into(),
            }),
        }
    }

    fn synchronize(&self) -> Result<(), DeviceError> {
        self.stream
            .synchronize()
            .map_err(|e| DeviceError::Synchronization { reason: format!("{:?}", e) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // Only run with CUDA available
    fn test_cuda_device_roundtrip() {
        let device = match CudaDevice::new(0) {
            Ok(device) => device,
            Err(e) => {
                println!("CUDA device unavailable: {}", e);
                return;
            }
        };
        println!("CUDA device properties: {:?}", device.properties());
        assert!(device.properties().l2_cache_bytes > 0);

        let id = device.alloc(16).unwrap();
        let data: Vec<u8> = (0..16).collect();
        device.copy_htod(id, &data).unwrap();
        let mut out = vec![0u8; 16];
        device.copy_dtoh(&mut out, id).unwrap();
        assert_eq!(out, data);

        device.memset_zero(id).unwrap();
        device.copy_dtoh(&mut out, id).unwrap();
        assert_eq!(out, vec![0u8; 16]);

        let start = device.record_event().unwrap();
        let stop = device.record_event().unwrap();
        device.synchronize_event(&start).unwrap();
        device.synchronize_event(&stop).unwrap();
        assert!(device.elapsed_ms(&start, &stop).unwrap() >= 0.0);

        device.free(id).unwrap();
    }
}
