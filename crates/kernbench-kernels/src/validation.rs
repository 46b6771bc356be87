//! Device result validation against a host reference
//!
//! Elements are compared under a uniform absolute tolerance. A non-finite
//! reference value masks its element. The scan stops at [`MAX_FAULTS`]
//! mismatches and reports failure. Fewer mismatches are reported but the
//! check still passes unless the validator runs in strict mode.

use crate::device::DeviceBuffer;
use crate::element::DeviceElement;
use crate::transfer::copy_to_host_f32;
use kernbench_common::{DEFAULT_TOLERANCE, Mismatch, Result, ValidationError};

/// Mismatch count at which validation stops and fails.
pub const MAX_FAULTS: usize = 10;

/// Number of leading elements whose comparison is logged.
const LOGGED_ELEMENTS: usize = 5;

/// Outcome of a validation that did not hit the fault limit.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub name: String,
    /// Elements compared, masked ones included.
    pub checked: usize,
    /// Elements skipped because the reference is not finite.
    pub masked: usize,
    pub mismatches: Vec<Mismatch>,
    /// Largest absolute difference over unmasked elements.
    pub max_abs_error: f32,
}

impl ValidationReport {
    pub fn faults(&self) -> usize {
        self.mismatches.len()
    }

    pub fn is_exact(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Compare the first `num_elements` of `device_result` against `cpu_reference`.
pub fn validate_result<D: DeviceElement>(
    device_result: &DeviceBuffer<D>,
    cpu_reference: &[f32],
    name: &str,
    num_elements: usize,
    tolerance: f32,
) -> Result<ValidationReport> {
    check_device(device_result, cpu_reference, name, num_elements, tolerance, false)
}

fn check_device<D: DeviceElement>(
    device_result: &DeviceBuffer<D>,
    cpu_reference: &[f32],
    name: &str,
    num_elements: usize,
    tolerance: f32,
    nan_is_fault: bool,
) -> Result<ValidationReport> {
    if num_elements > cpu_reference.len() || num_elements > device_result.len() {
        return Err(ValidationError::LengthMismatch {
            name: name.to_string(),
            num_elements,
            reference_len: cpu_reference.len(),
            device_len: device_result.len(),
        }
        .into());
    }

    let out_gpu = copy_to_host_f32(device_result)?;
    Ok(compare_elements(
        &out_gpu[..num_elements],
        &cpu_reference[..num_elements],
        name,
        tolerance,
        nan_is_fault,
    )?)
}

/// Compare host copies of a result and its reference element by element.
///
/// An element is a mismatch when its difference exceeds `tolerance`, so a NaN
/// result is not counted. [`ValidatorConfig::nan_is_fault`] changes that.
pub fn compare(
    actual: &[f32],
    reference: &[f32],
    name: &str,
    tolerance: f32,
) -> std::result::Result<ValidationReport, ValidationError> {
    compare_elements(actual, reference, name, tolerance, false)
}

fn compare_elements(
    actual: &[f32],
    reference: &[f32],
    name: &str,
    tolerance: f32,
    nan_is_fault: bool,
) -> std::result::Result<ValidationReport, ValidationError> {
    if actual.len() != reference.len() {
        return Err(ValidationError::LengthMismatch {
            name: name.to_string(),
            num_elements: reference.len().max(actual.len()),
            reference_len: reference.len(),
            device_len: actual.len(),
        });
    }

    log::info!("Checking {} ({} elements, tolerance {:e})", name, reference.len(), tolerance);
    let mut mismatches = Vec::new();
    let mut masked = 0;
    let mut max_abs_error = 0.0f32;

    for (i, (&expected, &got)) in reference.iter().zip(actual).enumerate() {
        if i < LOGGED_ELEMENTS {
            log::info!("{} {}", expected, got);
        }
        // a non-finite reference (e.g. a NaN produced by masking) is skipped
        if !expected.is_finite() {
            masked += 1;
            continue;
        }
        let diff = (expected - got).abs();
        max_abs_error = max_abs_error.max(diff);
        if diff > tolerance || (nan_is_fault && diff.is_nan()) {
            let mismatch = Mismatch { index: i, expected, actual: got };
            log::warn!("Mismatch of {} {}", name, mismatch);
            mismatches.push(mismatch);
            if mismatches.len() >= MAX_FAULTS {
                return Err(ValidationError::TooManyFaults {
                    name: name.to_string(),
                    limit: MAX_FAULTS,
                    mismatches,
                });
            }
        }
    }

    Ok(ValidationReport { name: name.to_string(), checked: reference.len(), masked, mismatches, max_abs_error })
}

/// Configuration for [`Validator`]
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorConfig {
    pub tolerance: f32,
    /// Treat any mismatch as a failure instead of only the fault limit.
    pub strict: bool,
    /// Count a NaN result against a finite reference as a mismatch.
    pub nan_is_fault: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self { tolerance: DEFAULT_TOLERANCE, strict: false, nan_is_fault: false }
    }
}

/// Validation with a fixed tolerance and fault policy.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidatorConfig,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn validate<D: DeviceElement>(
        &self,
        device_result: &DeviceBuffer<D>,
        cpu_reference: &[f32],
        name: &str,
    ) -> Result<ValidationReport> {
        let report = check_device(
            device_result,
            cpu_reference,
            name,
            cpu_reference.len(),
            self.config.tolerance,
            self.config.nan_is_fault,
        )?;
        self.apply_policy(report)
    }

    pub fn validate_host(
        &self,
        actual: &[f32],
        reference: &[f32],
        name: &str,
    ) -> Result<ValidationReport> {
        let report = compare_elements(actual, reference, name, self.config.tolerance, self.config.nan_is_fault)?;
        self.apply_policy(report)
    }

    fn apply_policy(&self, report: ValidationReport) -> Result<ValidationReport> {
        if self.config.strict && !report.is_exact() {
            let faults = report.faults();
            return Err(ValidationError::NotExact { name: report.name, faults }.into());
        }
        Ok(report)
    }
}

/// Print a validation report in a human-readable format
pub fn print_validation_report(report: &ValidationReport) {
    let status = if report.is_exact() { "✅ PASS" } else { "⚠️  PASS WITH FAULTS" };
    println!(
        "  {}: {} ({} checked, {} masked, {} faults, max_error: {:.2e})",
        report.name,
        status,
        report.checked,
        report.masked,
        report.faults(),
        report.max_abs_error
    );
    for mismatch in &report.mismatches {
        println!("    Mismatch {}", mismatch);
    }
}
