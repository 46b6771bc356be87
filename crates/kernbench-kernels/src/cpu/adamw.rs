//! AdamW parameter update

use super::check_len;
use crate::dispatch::AdamWParams;
use kernbench_common::KernelError;
use rayon::prelude::*;

/// Elements handed to one rayon task by the fused variant.
const FUSED_CHUNK: usize = 4096;

/// Reference implementation.
pub fn adamw_cpu(
    params: &mut [f32],
    grads: &[f32],
    m: &mut [f32],
    v: &mut [f32],
    hparams: &AdamWParams,
) -> Result<(), KernelError> {
    check_shapes(params, grads, m, v, hparams)?;
    let AdamWParams { t, learning_rate, beta1, beta2, eps, weight_decay } = *hparams;

    for i in 0..params.len() {
        let param = params[i];
        let grad = grads[i];

        // update the first moment (momentum)
        let mi = beta1 * m[i] + (1.0 - beta1) * grad;
        // update the second moment (RMSprop)
        let vi = beta2 * v[i] + (1.0 - beta2) * grad * grad;
        // bias-correct both moments
        let m_hat = mi / (1.0 - beta1.powi(t));
        let v_hat = vi / (1.0 - beta2.powi(t));

        m[i] = mi;
        v[i] = vi;
        params[i] -= learning_rate * (m_hat / (v_hat.sqrt() + eps) + weight_decay * param);
    }
    Ok(())
}

/// Variant 1: each element recomputes its own bias corrections.
pub fn adamw_per_element(
    params: &mut [f32],
    grads: &[f32],
    m: &mut [f32],
    v: &mut [f32],
    hparams: &AdamWParams,
) -> Result<(), KernelError> {
    check_shapes(params, grads, m, v, hparams)?;
    let hp = *hparams;

    params.iter_mut().zip(grads).zip(m.iter_mut().zip(v.iter_mut())).for_each(
        |((p, &g), (m, v))| {
            *m = hp.beta1 * *m + (1.0 - hp.beta1) * g;
            *v = hp.beta2 * *v + (1.0 - hp.beta2) * g * g;
            let m_hat = *m / (1.0 - hp.beta1.powi(hp.t));
            let v_hat = *v / (1.0 - hp.beta2.powi(hp.t));
            *p -= hp.learning_rate * (m_hat / (v_hat.sqrt() + hp.eps) + hp.weight_decay * *p);
        },
    );
    Ok(())
}

/// Variant 2: corrections hoisted out of the loop, moments updated with
/// fused multiply-adds, chunks processed in parallel.
pub fn adamw_fused(
    params: &mut [f32],
    grads: &[f32],
    m: &mut [f32],
    v: &mut [f32],
    hparams: &AdamWParams,
) -> Result<(), KernelError> {
    check_shapes(params, grads, m, v, hparams)?;
    let hp = *hparams;
    let beta1_correction = 1.0 - hp.beta1.powi(hp.t);
    let beta2_correction = 1.0 - hp.beta2.powi(hp.t);

    params
        .par_chunks_mut(FUSED_CHUNK)
        .zip(grads.par_chunks(FUSED_CHUNK))
        .zip(m.par_chunks_mut(FUSED_CHUNK).zip(v.par_chunks_mut(FUSED_CHUNK)))
        .for_each(|((params, grads), (m, v))| {
            for i in 0..params.len() {
                let g = grads[i];
                // lerp(g, m, beta1) == beta1 * m + (1 - beta1) * g
                let mi = lerp(g, m[i], hp.beta1);
                let vi = lerp(g * g, v[i], hp.beta2);
                m[i] = mi;
                v[i] = vi;
                let m_hat = mi / beta1_correction;
                let v_hat = vi / beta2_correction;
                params[i] -= hp.learning_rate * (m_hat / (v_hat.sqrt() + hp.eps) + hp.weight_decay * params[i]);
            }
        });
    Ok(())
}

#[inline]
fn lerp(start: f32, end: f32, weight: f32) -> f32 {
    weight.mul_add(end, (-weight).mul_add(start, start))
}

fn check_shapes(
    params: &[f32],
    grads: &[f32],
    m: &[f32],
    v: &[f32],
    hparams: &AdamWParams,
) -> Result<(), KernelError> {
    hparams.validate()?;
    let n = params.len();
    check_len("grads", n, grads.len())?;
    check_len("m", n, m.len())?;
    check_len("v", n, v.len())?;
    Ok(())
}
