//! Host kernel variants and the reference implementations they are checked against
//!
//! Every variant here takes plain slices. The dispatcher stages device
//! buffers through the host before calling in, so the same code serves the
//! host device and, as a fallback, real accelerators.

pub mod adamw;
pub mod matmul;

pub use adamw::{adamw_cpu, adamw_fused, adamw_per_element};
pub use matmul::{matmul_forward_cpu, matmul_forward_gemm, matmul_forward_naive, matmul_forward_tiled};

use kernbench_common::KernelError;

pub(crate) fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<(), KernelError> {
    if expected != actual {
        return Err(KernelError::ShapeMismatch { what, expected, actual });
    }
    Ok(())
}
