//! C ABI for kernbench
//!
//! Exposes `matmul_forward_cuda` and `adamw_cuda` with the flat signatures
//! existing harness drivers link against. Callers pass host pointers. Each
//! call stages them into device buffers, dispatches the requested variant
//! and copies results back. Every failure ends the process with a
//! diagnostic, the contract these drivers expect.

pub mod c_api;
mod harness;

pub use c_api::*;
pub use harness::harness;
