//! Error types for the kernbench harness
//!
//! Every device, kernel and validation call returns one of these typed errors.
//! Turning an error into a process exit is left to the caller (see
//! `kernbench_kernels::fatal`), so the low-level routines stay testable.

use std::fmt;
use thiserror::Error;

/// Top-level error type
#[derive(Error, Debug)]
pub enum KernbenchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Result alias used throughout the workspace
pub type Result<T> = std::result::Result<T, KernbenchError>;

/// Direction of a host/device copy, used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    HostToDevice,
    DeviceToHost,
}

impl fmt::Display for CopyDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyDirection::HostToDevice => write!(f, "host-to-device"),
            CopyDirection::DeviceToHost => write!(f, "device-to-host"),
        }
    }
}

/// Accelerator runtime errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Device unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("Allocation of {bytes} bytes failed: {reason}")]
    AllocationFailed { bytes: usize, reason: String },
    #[error("Invalid device buffer handle: {id}")]
    InvalidBuffer { id: u64 },
    #[error("Size mismatch: device buffer holds {expected} bytes, host side has {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("{direction} copy failed: {reason}")]
    CopyFailed { direction: CopyDirection, reason: String },
    #[error("Synchronization failed: {reason}")]
    Synchronization { reason: String },
    #[error("Driver call {call} failed: {reason}")]
    Driver { call: &'static str, reason: String },
}

/// Kernel dispatch and argument errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    #[error("Invalid kernel variant {variant} for {operation}")]
    UnknownVariant { operation: &'static str, variant: i32 },
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },
    #[error("Shape mismatch for {what}: expected {expected} elements, got {actual}")]
    ShapeMismatch { what: &'static str, expected: usize, actual: usize },
}

/// One element that differs from its reference by more than the tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    pub index: usize,
    pub expected: f32,
    pub actual: f32,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {}: CPU_ref: {} vs device: {}", self.index, self.expected, self.actual)
    }
}

/// Result validation failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error(
        "Length mismatch for {name}: {num_elements} elements requested, reference has {reference_len}, device has {device_len}"
    )]
    LengthMismatch { name: String, num_elements: usize, reference_len: usize, device_len: usize },
    #[error("{name}: {} mismatches reached the fault limit of {limit}, first {}", .mismatches.len(), first_mismatch(.mismatches))]
    TooManyFaults { name: String, limit: usize, mismatches: Vec<Mismatch> },
    #[error("{name}: {faults} mismatches in strict mode")]
    NotExact { name: String, faults: usize },
}

fn first_mismatch(mismatches: &[Mismatch]) -> String {
    mismatches.first().map(|m| m.to_string()).unwrap_or_else(|| "none".to_string())
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("{0}")]
    Validation(String),
}
