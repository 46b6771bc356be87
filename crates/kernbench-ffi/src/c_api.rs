//! Exported C functions

use crate::harness::harness;
use kernbench_common::{KernelError, Result};
use kernbench_kernels::{AdamWParams, MatmulForwardConfig, Operation, adamw, matmul_forward, must};
use std::os::raw::{c_float, c_int, c_long, c_uint};
use std::slice;

/// ABI version for compatibility checking
pub const KERNBENCH_ABI_VERSION: u32 = 1;

pub const KERNBENCH_SUCCESS: c_int = 0;
pub const KERNBENCH_ERROR_SETUP: c_int = -1;

/// Default AdamW hyperparameters, matching `adamw_cuda_default`.
pub const KERNBENCH_ADAMW_DEFAULT_LEARNING_RATE: c_float = 1e-3;
pub const KERNBENCH_ADAMW_DEFAULT_BETA1: c_float = 0.9;
pub const KERNBENCH_ADAMW_DEFAULT_BETA2: c_float = 0.999;
pub const KERNBENCH_ADAMW_DEFAULT_EPS: c_float = 1e-8;
pub const KERNBENCH_ADAMW_DEFAULT_WEIGHT_DECAY: c_float = 0.0;

#[unsafe(no_mangle)]
pub extern "C" fn kernbench_abi_version() -> c_uint {
    KERNBENCH_ABI_VERSION
}

/// Build the process harness context now instead of on the first kernel call.
///
/// Configuration comes from `KERNBENCH_*` environment variables. Safe to call
/// more than once.
///
/// # Returns
/// KERNBENCH_SUCCESS on success, KERNBENCH_ERROR_SETUP if the device or
/// configuration could not be set up
#[unsafe(no_mangle)]
pub extern "C" fn kernbench_init() -> c_int {
    match harness() {
        Ok(ctx) => {
            log::info!("kernbench initialized on {}", ctx.properties().name);
            KERNBENCH_SUCCESS
        }
        Err(e) => {
            log::error!("kernbench initialization failed: {}", e);
            KERNBENCH_ERROR_SETUP
        }
    }
}

/// Run matmul_forward variant `kernel_num`: `out = inp · weightᵀ + bias`.
///
/// inp is (B,T,C), weight is (OC,C), bias is (OC) or null, out is (B,T,OC).
/// Unknown variants, null required pointers, negative sizes and device
/// failures terminate the process.
///
/// # Safety
/// Every non-null pointer must be valid for the element count implied by the
/// shape: `out` for writes of B·T·OC floats, `inp` for reads of B·T·C,
/// `weight` for OC·C and `bias` for OC.
#[unsafe(no_mangle)]
#[allow(non_snake_case, clippy::too_many_arguments)]
pub unsafe extern "C" fn matmul_forward_cuda(
    kernel_num: c_int,
    out: *mut c_float,
    inp: *const c_float,
    weight: *const c_float,
    bias: *const c_float,
    B: c_int,
    T: c_int,
    C: c_int,
    OC: c_int,
    sqrt_block_size: c_int,
) {
    must(unsafe { matmul_forward_host(kernel_num, out, inp, weight, bias, B, T, C, OC, sqrt_block_size) });
}

/// Run adamw variant `kernel_num`, updating params, m and v in place.
///
/// Unknown variants, null pointers, a negative parameter count and device
/// failures terminate the process.
///
/// # Safety
/// `params_memory`, `m_memory` and `v_memory` must be valid for reads and
/// writes of `num_parameters` floats, `grads_memory` for reads.
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn adamw_cuda(
    kernel_num: c_int,
    params_memory: *mut c_float,
    grads_memory: *const c_float,
    m_memory: *mut c_float,
    v_memory: *mut c_float,
    t: c_int,
    num_parameters: c_long,
    learning_rate: c_float,
    beta1: c_float,
    beta2: c_float,
    eps: c_float,
    weight_decay: c_float,
) {
    let hparams = AdamWParams { t, learning_rate, beta1, beta2, eps, weight_decay };
    must(unsafe {
        adamw_host(kernel_num, params_memory, grads_memory, m_memory, v_memory, num_parameters, &hparams)
    });
}

/// [`adamw_cuda`] with the `KERNBENCH_ADAMW_DEFAULT_*` hyperparameters.
///
/// # Safety
/// Same contract as [`adamw_cuda`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn adamw_cuda_default(
    kernel_num: c_int,
    params_memory: *mut c_float,
    grads_memory: *const c_float,
    m_memory: *mut c_float,
    v_memory: *mut c_float,
    t: c_int,
    num_parameters: c_long,
) {
    unsafe {
        adamw_cuda(
            kernel_num,
            params_memory,
            grads_memory,
            m_memory,
            v_memory,
            t,
            num_parameters,
            KERNBENCH_ADAMW_DEFAULT_LEARNING_RATE,
            KERNBENCH_ADAMW_DEFAULT_BETA1,
            KERNBENCH_ADAMW_DEFAULT_BETA2,
            KERNBENCH_ADAMW_DEFAULT_EPS,
            KERNBENCH_ADAMW_DEFAULT_WEIGHT_DECAY,
        )
    }
}

// ── Host staging ────────────────────────────────────────────────────

fn dim(name: &str, value: c_int) -> std::result::Result<usize, KernelError> {
    usize::try_from(value).map_err(|_| KernelError::InvalidArgument {
        reason: format!("{} must be non-negative, got {}", name, value),
    })
}

fn non_null<T>(name: &str, ptr: *const T) -> std::result::Result<(), KernelError> {
    if ptr.is_null() {
        return Err(KernelError::InvalidArgument { reason: format!("{} must not be null", name) });
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
unsafe fn matmul_forward_host(
    kernel_num: c_int,
    out: *mut c_float,
    inp: *const c_float,
    weight: *const c_float,
    bias: *const c_float,
    b: c_int,
    t: c_int,
    c: c_int,
    oc: c_int,
    sqrt_block_size: c_int,
) -> Result<()> {
    Operation::MatmulForward.check_variant(kernel_num)?;
    let config = MatmulForwardConfig {
        b: dim("B", b)?,
        t: dim("T", t)?,
        c: dim("C", c)?,
        oc: dim("OC", oc)?,
        sqrt_block_size: dim("sqrt_block_size", sqrt_block_size)?,
    };
    config.validate()?;
    non_null("out", out.cast_const())?;
    non_null("inp", inp)?;
    non_null("weight", weight)?;

    let ctx = harness()?;
    let (inp, weight, bias) = unsafe {
        (
            slice::from_raw_parts(inp, config.input_len()),
            slice::from_raw_parts(weight, config.weight_len()),
            (!bias.is_null()).then(|| slice::from_raw_parts(bias, config.oc)),
        )
    };

    let d_inp = ctx.upload(inp)?;
    let d_weight = ctx.upload(weight)?;
    let d_bias = bias.map(|bias| ctx.upload(bias)).transpose()?;
    let mut d_out = ctx.alloc(config.output_len())?;

    matmul_forward(ctx, kernel_num, &mut d_out, &d_inp, &d_weight, d_bias.as_ref(), &config)?;

    let out = unsafe { slice::from_raw_parts_mut(out, config.output_len()) };
    d_out.copy_to_host(out)?;
    Ok(())
}

unsafe fn adamw_host(
    kernel_num: c_int,
    params_memory: *mut c_float,
    grads_memory: *const c_float,
    m_memory: *mut c_float,
    v_memory: *mut c_float,
    num_parameters: c_long,
    hparams: &AdamWParams,
) -> Result<()> {
    Operation::AdamW.check_variant(kernel_num)?;
    hparams.validate()?;
    let n = usize::try_from(num_parameters).map_err(|_| KernelError::InvalidArgument {
        reason: format!("num_parameters must be non-negative, got {}", num_parameters),
    })?;
    non_null("params_memory", params_memory.cast_const())?;
    non_null("grads_memory", grads_memory)?;
    non_null("m_memory", m_memory.cast_const())?;
    non_null("v_memory", v_memory.cast_const())?;

    let ctx = harness()?;
    let (params, grads, m, v) = unsafe {
        (
            slice::from_raw_parts_mut(params_memory, n),
            slice::from_raw_parts(grads_memory, n),
            slice::from_raw_parts_mut(m_memory, n),
            slice::from_raw_parts_mut(v_memory, n),
        )
    };

    let mut d_params = ctx.upload(params)?;
    let d_grads = ctx.upload(grads)?;
    let mut d_m = ctx.upload(m)?;
    let mut d_v = ctx.upload(v)?;

    adamw(ctx, kernel_num, &mut d_params, &d_grads, &mut d_m, &mut d_v, hparams)?;

    d_params.copy_to_host(params)?;
    d_m.copy_to_host(m)?;
    d_v.copy_to_host(v)?;
    Ok(())
}
