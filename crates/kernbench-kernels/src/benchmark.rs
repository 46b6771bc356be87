//! Cache-flushing kernel benchmarking
//!
//! Before every timed trial an L2-sized device buffer is zeroed, so no
//! trial starts with its inputs resident in cache from the previous one.

use crate::device::{BufferId, Device};
use kernbench_common::{KernelError, Result};

/// Per-trial timing summary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchmarkStats {
    pub repeats: usize,
    pub mean_ms: f32,
    pub min_ms: f32,
    pub max_ms: f32,
}

/// Device allocation released when the benchmark returns, on every path.
struct FlushBuffer<'a> {
    device: &'a dyn Device,
    id: BufferId,
}

impl<'a> FlushBuffer<'a> {
    fn new(device: &'a dyn Device) -> Result<Self> {
        let id = device.alloc(device.properties().l2_cache_bytes)?;
        Ok(Self { device, id })
    }

    fn flush(&self) -> Result<()> {
        Ok(self.device.memset_zero(self.id)?)
    }
}

impl Drop for FlushBuffer<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.device.free(self.id) {
            log::warn!("Failed to free flush buffer on {}: {}", self.device.name(), e);
        }
    }
}

/// Mean milliseconds per call of `kernel` over `repeats` flushed trials.
pub fn benchmark_kernel<F>(device: &dyn Device, repeats: usize, kernel: F) -> Result<f32>
where
    F: FnMut() -> Result<()>,
{
    Ok(benchmark_kernel_stats(device, repeats, kernel)?.mean_ms)
}

/// Like [`benchmark_kernel`], also reporting the fastest and slowest trial.
pub fn benchmark_kernel_stats<F>(device: &dyn Device, repeats: usize, mut kernel: F) -> Result<BenchmarkStats>
where
    F: FnMut() -> Result<()>,
{
    if repeats == 0 {
        return Err(KernelError::InvalidArgument { reason: "benchmark repeats must be >= 1".into() }.into());
    }

    let flush_buffer = FlushBuffer::new(device)?;
    let mut elapsed_time = 0.0f32;
    let mut min_ms = f32::INFINITY;
    let mut max_ms = 0.0f32;

    for trial in 0..repeats {
        flush_buffer.flush()?;

        let start = device.record_event()?;
        kernel()?;
        let stop = device.record_event()?;
        device.synchronize_event(&start)?;
        device.synchronize_event(&stop)?;

        let ms = device.elapsed_ms(&start, &stop)?;
        log::debug!("trial {}: {:.4} ms", trial, ms);
        elapsed_time += ms;
        min_ms = min_ms.min(ms);
        max_ms = max_ms.max(ms);
    }

    Ok(BenchmarkStats { repeats, mean_ms: elapsed_time / repeats as f32, min_ms, max_ms })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HostDevice;
    use kernbench_common::{DeviceError, KernbenchError};

    #[test]
    fn test_zero_repeats_rejected() {
        let device = HostDevice::new();
        let err = benchmark_kernel(&device, 0, || Ok(())).unwrap_err();
        assert!(matches!(err, KernbenchError::Kernel(KernelError::InvalidArgument { .. })));
    }

    #[test]
    fn test_kernel_called_once_per_trial() {
        let device = HostDevice::new();
        let mut calls = 0;
        let stats = benchmark_kernel_stats(&device, 7, || {
            calls += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(calls, 7);
        assert_eq!(stats.repeats, 7);
        assert!(stats.min_ms <= stats.mean_ms && stats.mean_ms <= stats.max_ms);
    }

    #[test]
    fn test_flush_buffer_released() {
        let device = HostDevice::new().with_l2_cache_bytes(1 << 16);
        benchmark_kernel(&device, 3, || {
            assert_eq!(device.live_allocations(), 1);
            assert_eq!(device.allocated_bytes(), 1 << 16);
            Ok(())
        })
        .unwrap();
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn test_kernel_error_propagates_and_releases() {
        let device = HostDevice::new();
        let mut calls = 0;
        let err = benchmark_kernel(&device, 5, || {
            calls += 1;
            if calls == 2 {
                return Err(KernelError::InvalidArgument { reason: "boom".into() }.into());
            }
            Ok(())
        })
        .unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(calls, 2);
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn test_flush_allocation_failure() {
        let device = HostDevice::new().with_l2_cache_bytes(4096).with_memory_limit(1024);
        let err = benchmark_kernel(&device, 1, || Ok(())).unwrap_err();
        assert!(matches!(err, KernbenchError::Device(DeviceError::AllocationFailed { bytes: 4096, .. })));
    }
}
