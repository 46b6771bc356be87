//! Kernel variant dispatch
//!
//! Each operation has a fixed set of integer variant ids. A call names the
//! operation and the id and is routed to exactly one implementation. Nothing
//! is cached between calls.

use crate::context::HarnessContext;
use crate::cpu;
use crate::device::DeviceBuffer;
use kernbench_common::{KernelError, Result};
use std::fmt;

/// Integer id selecting one implementation of an operation.
pub type VariantId = i32;

/// Operations with interchangeable kernel variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    MatmulForward,
    AdamW,
}

impl Operation {
    pub const ALL: [Operation; 2] = [Operation::MatmulForward, Operation::AdamW];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::MatmulForward => "matmul_forward",
            Operation::AdamW => "adamw",
        }
    }

    /// Registered variant ids, ascending.
    pub fn variants(&self) -> &'static [VariantId] {
        match self {
            Operation::MatmulForward => &[1, 2, 3],
            Operation::AdamW => &[1, 2],
        }
    }

    pub fn describe(&self, variant: VariantId) -> Option<&'static str> {
        let description = match (self, variant) {
            (Operation::MatmulForward, 1) => "naive, one dot product per output element",
            (Operation::MatmulForward, 2) => "tiled by sqrt_block_size, parallel row groups",
            (Operation::MatmulForward, 3) => "library GEMM followed by bias add",
            (Operation::AdamW, 1) => "per-element, bias corrections recomputed",
            (Operation::AdamW, 2) => "fused, hoisted corrections, parallel chunks",
            _ => return None,
        };
        Some(description)
    }

    pub fn check_variant(&self, variant: VariantId) -> std::result::Result<(), KernelError> {
        if self.variants().contains(&variant) { Ok(()) } else { Err(self.unknown_variant(variant)) }
    }

    fn unknown_variant(&self, variant: VariantId) -> KernelError {
        KernelError::UnknownVariant { operation: self.name(), variant }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── matmul_forward ──────────────────────────────────────────────────

/// Block edge used when none is given.
pub const DEFAULT_SQRT_BLOCK_SIZE: usize = 16;

/// Shape of a forward matmul. inp is (B,T,C), weight (OC,C), out (B,T,OC).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatmulForwardConfig {
    pub b: usize,
    pub t: usize,
    pub c: usize,
    pub oc: usize,
    /// Edge length of a square block of outputs computed together.
    pub sqrt_block_size: usize,
}

impl MatmulForwardConfig {
    pub fn new(b: usize, t: usize, c: usize, oc: usize) -> Self {
        Self { b, t, c, oc, sqrt_block_size: DEFAULT_SQRT_BLOCK_SIZE }
    }

    pub fn with_sqrt_block_size(mut self, sqrt_block_size: usize) -> Self {
        self.sqrt_block_size = sqrt_block_size;
        self
    }

    /// Number of (b, t) rows.
    pub fn rows(&self) -> usize {
        self.b * self.t
    }

    pub fn input_len(&self) -> usize {
        self.rows() * self.c
    }

    pub fn weight_len(&self) -> usize {
        self.oc * self.c
    }

    pub fn output_len(&self) -> usize {
        self.rows() * self.oc
    }

    /// Floating point operations of one call, `2·B·T·C·OC`.
    pub fn flops(&self) -> f64 {
        2.0 * self.rows() as f64 * self.c as f64 * self.oc as f64
    }

    pub fn validate(&self) -> std::result::Result<(), KernelError> {
        if self.sqrt_block_size == 0 {
            return Err(KernelError::InvalidArgument { reason: "sqrt_block_size must be >= 1".into() });
        }
        let overflow = self
            .b
            .checked_mul(self.t)
            .and_then(|rows| rows.checked_mul(self.c.max(self.oc)))
            .is_none();
        if overflow || self.oc.checked_mul(self.c).is_none() {
            return Err(KernelError::InvalidArgument {
                reason: format!("shape B={} T={} C={} OC={} overflows usize", self.b, self.t, self.c, self.oc),
            });
        }
        Ok(())
    }
}

/// Run matmul_forward variant `variant` on device buffers.
pub fn matmul_forward(
    ctx: &HarnessContext,
    variant: VariantId,
    out: &mut DeviceBuffer<f32>,
    inp: &DeviceBuffer<f32>,
    weight: &DeviceBuffer<f32>,
    bias: Option<&DeviceBuffer<f32>>,
    config: &MatmulForwardConfig,
) -> Result<()> {
    Operation::MatmulForward.check_variant(variant)?;
    config.validate()?;
    cpu::check_len("out", config.output_len(), out.len())?;
    cpu::check_len("inp", config.input_len(), inp.len())?;
    cpu::check_len("weight", config.weight_len(), weight.len())?;
    if let Some(bias) = bias {
        cpu::check_len("bias", config.oc, bias.len())?;
    }
    log::debug!(
        "matmul_forward variant {} B={} T={} C={} OC={} block={}",
        variant,
        config.b,
        config.t,
        config.c,
        config.oc,
        config.sqrt_block_size
    );

    let inp = inp.to_host()?;
    let weight = weight.to_host()?;
    let bias = bias.map(DeviceBuffer::to_host).transpose()?;
    let bias = bias.as_deref();
    let mut host_out = vec![0.0f32; config.output_len()];

    match variant {
        1 => cpu::matmul_forward_naive(&mut host_out, &inp, &weight, bias, config)?,
        2 => cpu::matmul_forward_tiled(&mut host_out, &inp, &weight, bias, config)?,
        3 => {
            let math = ctx.math();
            cpu::matmul_forward_gemm(
                &mut host_out,
                &inp,
                &weight,
                bias,
                config,
                math.precision(),
                math.parallelism(),
            )?
        }
        _ => return Err(Operation::MatmulForward.unknown_variant(variant).into()),
    }

    out.copy_from_host(&host_out)?;
    Ok(())
}

// ── adamw ───────────────────────────────────────────────────────────

/// AdamW hyperparameters for one update step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamWParams {
    /// 1-based step count used for bias correction.
    pub t: i32,
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    pub weight_decay: f32,
}

impl Default for AdamWParams {
    fn default() -> Self {
        Self { t: 1, learning_rate: 1e-3, beta1: 0.9, beta2: 0.999, eps: 1e-8, weight_decay: 0.0 }
    }
}

impl AdamWParams {
    pub fn at_step(t: i32) -> Self {
        Self { t, ..Self::default() }
    }

    pub fn validate(&self) -> std::result::Result<(), KernelError> {
        if self.t < 1 {
            return Err(KernelError::InvalidArgument {
                reason: format!("step t must be >= 1, got {}", self.t),
            });
        }
        Ok(())
    }
}

/// Run adamw variant `variant` on device buffers, updating params, m and v in place.
pub fn adamw(
    _ctx: &HarnessContext,
    variant: VariantId,
    params: &mut DeviceBuffer<f32>,
    grads: &DeviceBuffer<f32>,
    m: &mut DeviceBuffer<f32>,
    v: &mut DeviceBuffer<f32>,
    hparams: &AdamWParams,
) -> Result<()> {
    Operation::AdamW.check_variant(variant)?;
    hparams.validate()?;
    let n = params.len();
    cpu::check_len("grads", n, grads.len())?;
    cpu::check_len("m", n, m.len())?;
    cpu::check_len("v", n, v.len())?;
    log::debug!("adamw variant {} N={} t={}", variant, n, hparams.t);

    let mut host_params = params.to_host()?;
    let host_grads = grads.to_host()?;
    let mut host_m = m.to_host()?;
    let mut host_v = v.to_host()?;

    let run = match variant {
        1 => cpu::adamw_per_element,
        2 => cpu::adamw_fused,
        _ => return Err(Operation::AdamW.unknown_variant(variant).into()),
    };
    run(&mut host_params, &host_grads, &mut host_m, &mut host_v, hparams)?;

    params.copy_from_host(&host_params)?;
    m.copy_from_host(&host_m)?;
    v.copy_from_host(&host_v)?;
    Ok(())
}
