//! Host-to-device copies with element type conversion
//!
//! Reference data is always produced in `f32`. These helpers convert it into
//! the element type a kernel consumes on the way to the device, and back to
//! `f32` on the way out. Failures are returned to the caller.

use crate::device::{Device, DeviceBuffer};
use crate::element::DeviceElement;
use kernbench_common::DeviceError;
use std::sync::Arc;

/// Convert `src` into `T` and copy it into `dst`.
///
/// The conversion goes through a scratch vector, so `src` is never modified.
pub fn memcpy_convert<T: DeviceElement>(
    dst: &mut DeviceBuffer<T>,
    src: &[f32],
) -> Result<(), DeviceError> {
    let converted: Vec<T> = src.iter().map(|&x| T::from_f32(x)).collect();
    dst.copy_from_host(&converted)
}

/// Copy `src` back to the host in reference precision.
pub fn copy_to_host_f32<T: DeviceElement>(src: &DeviceBuffer<T>) -> Result<Vec<f32>, DeviceError> {
    Ok(src.to_host()?.into_iter().map(T::to_f32).collect())
}

/// Allocate a buffer on `device` and fill it with `src` converted to `T`.
pub fn upload_converted<T: DeviceElement>(
    device: &Arc<dyn Device>,
    src: &[f32],
) -> Result<DeviceBuffer<T>, DeviceError> {
    let mut buffer = DeviceBuffer::alloc(device, src.len())?;
    memcpy_convert(&mut buffer, src)?;
    log::trace!("uploaded {} elements as {}", src.len(), T::NAME);
    Ok(buffer)
}
