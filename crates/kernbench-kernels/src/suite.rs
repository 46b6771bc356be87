//! Variant sweeps: validate, then benchmark, every variant of an operation

use crate::benchmark::benchmark_kernel;
use crate::context::HarnessContext;
use crate::cpu::{adamw_cpu, matmul_forward_cpu};
use crate::dispatch::{AdamWParams, MatmulForwardConfig, Operation, VariantId, adamw, matmul_forward};
use crate::device::DeviceBuffer;
use crate::validation::{ValidationReport, Validator, print_validation_report};
use kernbench_common::Result;

/// Validation and timing for one variant.
#[derive(Debug, Clone)]
pub struct VariantReport {
    pub variant: VariantId,
    pub description: &'static str,
    /// One report per validated output, in validation order.
    pub validations: Vec<ValidationReport>,
    pub mean_ms: f32,
    /// TFLOPS for matmul_forward, GB/s for adamw.
    pub throughput: f64,
}

impl VariantReport {
    /// Mismatches summed over every validated output.
    pub fn faults(&self) -> usize {
        self.validations.iter().map(ValidationReport::faults).sum()
    }

    pub fn is_exact(&self) -> bool {
        self.validations.iter().all(ValidationReport::is_exact)
    }

    pub fn max_abs_error(&self) -> f32 {
        self.validations.iter().map(|r| r.max_abs_error).fold(0.0, f32::max)
    }

    pub fn validation(&self, name: &str) -> Option<&ValidationReport> {
        self.validations.iter().find(|r| r.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct SuiteReport {
    pub operation: Operation,
    /// Shape or size summary, e.g. `B=8 T=1024 C=768 OC=768`.
    pub problem: String,
    pub throughput_unit: &'static str,
    pub variants: Vec<VariantReport>,
}

fn resolve_variants(operation: Operation, variants: &[VariantId]) -> Result<Vec<VariantId>> {
    if variants.is_empty() {
        return Ok(operation.variants().to_vec());
    }
    for &variant in variants {
        operation.check_variant(variant)?;
    }
    Ok(variants.to_vec())
}

/// `amount` per second given one call takes `mean_ms`. Zero when the
/// timer resolution rounded the call away.
fn per_second(amount: f64, mean_ms: f32) -> f64 {
    if mean_ms > 0.0 { amount / (mean_ms as f64 / 1e3) } else { 0.0 }
}

/// Run matmul_forward `variants` (all registered ones when empty), timing
/// each over `repeats` trials or the configured `benchmark_repeats`.
pub fn run_matmul_forward_suite(
    ctx: &HarnessContext,
    config: &MatmulForwardConfig,
    variants: &[VariantId],
    repeats: Option<usize>,
) -> Result<SuiteReport> {
    let operation = Operation::MatmulForward;
    let repeats = repeats.unwrap_or(ctx.config().benchmark_repeats);
    let variants = resolve_variants(operation, variants)?;
    config.validate()?;

    let mut generator = ctx.input_generator();
    let inp = generator.make_random_float(config.input_len());
    let weight = generator.make_random_float(config.weight_len());
    let bias = generator.make_random_float(config.oc);

    let mut out_cpu = vec![0.0f32; config.output_len()];
    matmul_forward_cpu(&mut out_cpu, &inp, &weight, Some(&bias), config.b, config.t, config.c, config.oc)?;

    let d_inp = ctx.upload(&inp)?;
    let d_weight = ctx.upload(&weight)?;
    let d_bias = ctx.upload(&bias)?;
    let mut d_out = ctx.alloc(config.output_len())?;
    let validator = ctx.validator();

    let mut reports = Vec::with_capacity(variants.len());
    for variant in variants {
        log::info!("Checking {} kernel {}", operation, variant);
        d_out.zero()?;
        matmul_forward(ctx, variant, &mut d_out, &d_inp, &d_weight, Some(&d_bias), config)?;
        let validation = validator.validate(&d_out, &out_cpu, "out")?;

        let mean_ms = benchmark_kernel(ctx.device().as_ref(), repeats, || {
            matmul_forward(ctx, variant, &mut d_out, &d_inp, &d_weight, Some(&d_bias), config)
        })?;
        let tflops = per_second(config.flops(), mean_ms) / 1e12;
        log::info!("{} kernel {}: {:.4} ms, {:.3} TFLOPS", operation, variant, mean_ms, tflops);

        reports.push(VariantReport {
            variant,
            description: operation.describe(variant).unwrap_or_default(),
            validations: vec![validation],
            mean_ms,
            throughput: tflops,
        });
    }

    Ok(SuiteReport {
        operation,
        problem: format!("B={} T={} C={} OC={}", config.b, config.t, config.c, config.oc),
        throughput_unit: "TFLOPS",
        variants: reports,
    })
}

/// Run adamw `variants` (all registered ones when empty) on `num_parameters`
/// parameters. Optimizer state is re-uploaded before each variant.
pub fn run_adamw_suite(
    ctx: &HarnessContext,
    num_parameters: usize,
    hparams: &AdamWParams,
    variants: &[VariantId],
    repeats: Option<usize>,
) -> Result<SuiteReport> {
    let operation = Operation::AdamW;
    let repeats = repeats.unwrap_or(ctx.config().benchmark_repeats);
    let variants = resolve_variants(operation, variants)?;
    hparams.validate()?;

    let mut generator = ctx.input_generator();
    let params = generator.make_random_float(num_parameters);
    let grads = generator.make_random_float(num_parameters);
    let m = generator.make_random_float_01(num_parameters);
    let v = generator.make_random_float_01(num_parameters);

    let mut params_cpu = params.clone();
    let mut m_cpu = m.clone();
    let mut v_cpu = v.clone();
    adamw_cpu(&mut params_cpu, &grads, &mut m_cpu, &mut v_cpu, hparams)?;

    let d_grads = ctx.upload(&grads)?;
    let mut d_params = ctx.upload(&params)?;
    let mut d_m = ctx.upload(&m)?;
    let mut d_v = ctx.upload(&v)?;
    let validator = ctx.validator();

    // params, grads, m and v are read and params, m, v written: 5 floats per element
    let bytes_per_call = 5.0 * std::mem::size_of::<f32>() as f64 * num_parameters as f64;

    let mut reports = Vec::with_capacity(variants.len());
    for variant in variants {
        log::info!("Checking {} kernel {}", operation, variant);
        d_params.copy_from_host(&params)?;
        d_m.copy_from_host(&m)?;
        d_v.copy_from_host(&v)?;

        adamw(ctx, variant, &mut d_params, &d_grads, &mut d_m, &mut d_v, hparams)?;
        let validations = validate_adamw_state(
            &validator,
            [&d_params, &d_m, &d_v],
            [&params_cpu, &m_cpu, &v_cpu],
        )?;

        let mean_ms = benchmark_kernel(ctx.device().as_ref(), repeats, || {
            adamw(ctx, variant, &mut d_params, &d_grads, &mut d_m, &mut d_v, hparams)
        })?;
        let gbps = per_second(bytes_per_call, mean_ms) / 1e9;
        log::info!("{} kernel {}: {:.4} ms, {:.2} GB/s", operation, variant, mean_ms, gbps);

        reports.push(VariantReport {
            variant,
            description: operation.describe(variant).unwrap_or_default(),
            validations,
            mean_ms,
            throughput: gbps,
        });
    }

    Ok(SuiteReport {
        operation,
        problem: format!("N={} t={}", num_parameters, hparams.t),
        throughput_unit: "GB/s",
        variants: reports,
    })
}

/// Validate updated params, m and v, in that order.
fn validate_adamw_state(
    validator: &Validator,
    state: [&DeviceBuffer<f32>; 3],
    reference: [&[f32]; 3],
) -> Result<Vec<ValidationReport>> {
    ["params", "m", "v"]
        .into_iter()
        .zip(state.into_iter().zip(reference))
        .map(|(name, (device, expected))| validator.validate(device, expected, name))
        .collect()
}

/// Print a suite report as a table
pub fn print_suite_report(report: &SuiteReport) {
    println!("\n=== {} ({}) ===", report.operation, report.problem);
    println!(
        "{:>7}  {:>10}  {:>10}  {:>6}  {:>10}  description",
        "variant", "time (ms)", report.throughput_unit, "faults", "max_error"
    );
    for v in &report.variants {
        let status = if v.is_exact() { "✅" } else { "⚠️" };
        println!(
            "{:>7}  {:>10.4}  {:>10.3}  {:>6}  {:>10.2e}  {} {}",
            v.variant,
            v.mean_ms,
            v.throughput,
            v.faults(),
            v.max_abs_error(),
            status,
            v.description
        );
    }
    for v in report.variants.iter().filter(|v| !v.is_exact()) {
        println!("variant {}:", v.variant);
        for validation in v.validations.iter().filter(|r| !r.is_exact()) {
            print_validation_report(validation);
        }
    }
}
