//! Kernel variant harness for kernbench
//!
//! Selects among interchangeable implementations of `matmul_forward` and
//! `adamw` by integer id, checks their output against a host reference and
//! times them with the L2 cache flushed between trials.

pub mod benchmark;
pub mod buffers;
pub mod context;
pub mod cpu;
pub mod device;
pub mod dispatch;
pub mod element;
pub mod fatal;
pub mod suite;
pub mod transfer;
pub mod validation;

pub use benchmark::{BenchmarkStats, benchmark_kernel, benchmark_kernel_stats};
pub use buffers::{InputGenerator, make_ones_float, make_zeros_float};
pub use context::{HarnessContext, MathLibrary, MathPrecision};
pub use device::{Device, DeviceBuffer, DeviceEvent, DeviceProperties, HostDevice};
pub use dispatch::{AdamWParams, MatmulForwardConfig, Operation, VariantId, adamw, matmul_forward};
pub use element::DeviceElement;
pub use fatal::{fatal, must};
pub use suite::{SuiteReport, VariantReport, print_suite_report, run_adamw_suite, run_matmul_forward_suite};
pub use transfer::{copy_to_host_f32, memcpy_convert, upload_converted};
pub use validation::{
    MAX_FAULTS, ValidationReport, Validator, ValidatorConfig, print_validation_report, validate_result,
};

#[cfg(feature = "cuda")]
pub use device::CudaDevice;
