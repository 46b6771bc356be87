//! Forward matmul: `out = inp · weightᵀ + bias`
//!
//! inp is (B,T,C), weight is (OC,C), bias is (OC), out is (B,T,OC).

use super::check_len;
use crate::context::MathPrecision;
use crate::dispatch::MatmulForwardConfig;
use faer::linalg::matmul::matmul;
use faer::mat::{MatMut, MatRef};
use faer::{Accum, Par};
use kernbench_common::{KernelError, ceil_div};
use rayon::prelude::*;
use std::borrow::Cow;

/// Reference implementation every variant is validated against.
#[allow(clippy::too_many_arguments)]
pub fn matmul_forward_cpu(
    out: &mut [f32],
    inp: &[f32],
    weight: &[f32],
    bias: Option<&[f32]>,
    b: usize,
    t: usize,
    c: usize,
    oc: usize,
) -> Result<(), KernelError> {
    check_shapes(out, inp, weight, bias, &MatmulForwardConfig::new(b, t, c, oc))?;

    for bi in 0..b {
        for ti in 0..t {
            let out_bt = &mut out[(bi * t + ti) * oc..][..oc];
            let inp_bt = &inp[(bi * t + ti) * c..][..c];
            for o in 0..oc {
                let mut val = bias.map_or(0.0, |bias| bias[o]);
                let wrow = &weight[o * c..][..c];
                for i in 0..c {
                    val += inp_bt[i] * wrow[i];
                }
                out_bt[o] = val;
            }
        }
    }
    Ok(())
}

/// Variant 1: one independent dot product per output element.
pub fn matmul_forward_naive(
    out: &mut [f32],
    inp: &[f32],
    weight: &[f32],
    bias: Option<&[f32]>,
    config: &MatmulForwardConfig,
) -> Result<(), KernelError> {
    check_shapes(out, inp, weight, bias, config)?;
    let (c, oc) = (config.c, config.oc);

    for (idx, slot) in out.iter_mut().enumerate() {
        let (row, o) = (idx / oc, idx % oc);
        let x = &inp[row * c..][..c];
        let w = &weight[o * c..][..c];
        let dot = x.iter().zip(w).fold(0.0f32, |acc, (&a, &b)| acc + a * b);
        *slot = bias.map_or(0.0, |bias| bias[o]) + dot;
    }
    Ok(())
}

/// Variant 2: output split into `sqrt_block_size × sqrt_block_size` tiles.
/// Row groups run in parallel, and each weight row is reused across the
/// whole group while it is hot.
pub fn matmul_forward_tiled(
    out: &mut [f32],
    inp: &[f32],
    weight: &[f32],
    bias: Option<&[f32]>,
    config: &MatmulForwardConfig,
) -> Result<(), KernelError> {
    check_shapes(out, inp, weight, bias, config)?;
    if out.is_empty() {
        return Ok(());
    }
    let (c, oc, block) = (config.c, config.oc, config.sqrt_block_size);
    log::trace!("tiled grid {}x{}", ceil_div(config.rows(), block), ceil_div(oc, block));

    out.par_chunks_mut(oc * block).enumerate().for_each(|(group, out_rows)| {
        let first_row = group * block;
        let rows = out_rows.len() / oc;
        for tile in (0..oc).step_by(block) {
            let tile_end = (tile + block).min(oc);
            for r in 0..rows {
                let x = &inp[(first_row + r) * c..][..c];
                let out_row = &mut out_rows[r * oc..][..oc];
                for o in tile..tile_end {
                    let w = &weight[o * c..][..c];
                    let mut val = bias.map_or(0.0, |bias| bias[o]);
                    for i in 0..c {
                        val += x[i] * w[i];
                    }
                    out_row[o] = val;
                }
            }
        }
    });
    Ok(())
}

/// Variant 3: dense GEMM through faer, then a separate bias pass.
pub fn matmul_forward_gemm(
    out: &mut [f32],
    inp: &[f32],
    weight: &[f32],
    bias: Option<&[f32]>,
    config: &MatmulForwardConfig,
    precision: MathPrecision,
    par: Par,
) -> Result<(), KernelError> {
    check_shapes(out, inp, weight, bias, config)?;
    if out.is_empty() {
        return Ok(());
    }
    let (rows, c, oc) = (config.rows(), config.c, config.oc);

    if c == 0 {
        out.fill(0.0);
    } else {
        let (inp, weight) = match precision {
            MathPrecision::Fp32 => (Cow::Borrowed(inp), Cow::Borrowed(weight)),
            MathPrecision::Tf32 => (
                Cow::Owned(inp.iter().copied().map(round_to_tf32).collect::<Vec<_>>()),
                Cow::Owned(weight.iter().copied().map(round_to_tf32).collect::<Vec<_>>()),
            ),
        };

        // out (rows × oc, row-major) has the same layout as outᵀ (oc × rows,
        // column-major), so compute outᵀ = weight · inpᵀ directly into it.
        let inp_view = MatRef::from_row_major_slice(&inp[..], rows, c);
        let weight_view = MatRef::from_row_major_slice(&weight[..], oc, c);
        let mut out_view = MatMut::from_column_major_slice_mut(out, oc, rows);
        matmul(&mut out_view, Accum::Replace, weight_view, inp_view.transpose(), 1.0f32, par);
    }

    if let Some(bias) = bias {
        out.par_chunks_mut(oc).for_each(|row| {
            for (o, b) in row.iter_mut().zip(bias) {
                *o += b;
            }
        });
    }
    Ok(())
}

/// Round to the 10-bit mantissa TF32 tensor cores consume, half to even.
pub fn round_to_tf32(x: f32) -> f32 {
    if !x.is_finite() {
        return x;
    }
    let bits = x.to_bits();
    let lsb = (bits >> 13) & 1;
    f32::from_bits(bits.wrapping_add(0x0fff + lsb) & !0x1fff)
}

fn check_shapes(
    out: &[f32],
    inp: &[f32],
    weight: &[f32],
    bias: Option<&[f32]>,
    config: &MatmulForwardConfig,
) -> Result<(), KernelError> {
    config.validate()?;
    check_len("out", config.output_len(), out.len())?;
    check_len("inp", config.input_len(), inp.len())?;
    check_len("weight", config.weight_len(), weight.len())?;
    if let Some(bias) = bias {
        check_len("bias", config.oc, bias.len())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::InputGenerator;

    fn inputs(config: &MatmulForwardConfig) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
        let mut generator = InputGenerator::new(0);
        (
            generator.make_random_float(config.input_len()),
            generator.make_random_float(config.weight_len()),
            generator.make_random_float(config.oc),
        )
    }

    fn reference(config: &MatmulForwardConfig, bias: Option<&[f32]>) -> Vec<f32> {
        let (inp, weight, _) = inputs(config);
        let mut out = vec![0.0; config.output_len()];
        matmul_forward_cpu(&mut out, &inp, &weight, bias, config.b, config.t, config.c, config.oc)
            .unwrap();
        out
    }

    fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
        assert_eq!(actual.len(), expected.len());
        for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
            assert!((a - e).abs() <= tol, "at {}: {} vs {}", i, a, e);
        }
    }

    #[test]
    fn test_reference_small() {
        // inp (1,2,2), weight (3,2)
        let inp = [1.0, 2.0, 3.0, 4.0];
        let weight = [1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let bias = [0.5, 0.0, -1.0];
        let mut out = [0.0; 6];
        matmul_forward_cpu(&mut out, &inp, &weight, Some(&bias), 1, 2, 2, 3).unwrap();
        assert_eq!(out, [1.5, 2.0, 2.0, 3.5, 4.0, 6.0]);

        matmul_forward_cpu(&mut out, &inp, &weight, None, 1, 2, 2, 3).unwrap();
        assert_eq!(out, [1.0, 2.0, 3.0, 3.0, 4.0, 7.0]);
    }

    #[test]
    fn test_variants_match_reference() {
        let config = MatmulForwardConfig::new(2, 5, 24, 19).with_sqrt_block_size(4);
        let (inp, weight, bias) = inputs(&config);
        let expected = reference(&config, Some(&bias));

        let mut out = vec![0.0; config.output_len()];
        matmul_forward_naive(&mut out, &inp, &weight, Some(&bias), &config).unwrap();
        assert_close(&out, &expected, 1e-5);

        out.fill(0.0);
        matmul_forward_tiled(&mut out, &inp, &weight, Some(&bias), &config).unwrap();
        assert_close(&out, &expected, 1e-5);

        out.fill(0.0);
        matmul_forward_gemm(&mut out, &inp, &weight, Some(&bias), &config, MathPrecision::Fp32, Par::Seq)
            .unwrap();
        assert_close(&out, &expected, 1e-4);
    }

    #[test]
    fn test_variants_without_bias() {
        let config = MatmulForwardConfig::new(1, 3, 8, 6).with_sqrt_block_size(16);
        let (inp, weight, _) = inputs(&config);
        let expected = reference(&config, None);

        let mut out = vec![0.0; config.output_len()];
        matmul_forward_tiled(&mut out, &inp, &weight, None, &config).unwrap();
        assert_close(&out, &expected, 1e-5);

        matmul_forward_gemm(&mut out, &inp, &weight, None, &config, MathPrecision::Fp32, Par::Seq)
            .unwrap();
        assert_close(&out, &expected, 1e-4);
    }

    #[test]
    fn test_tf32_gemm_is_close() {
        let config = MatmulForwardConfig::new(1, 4, 32, 8);
        let (inp, weight, bias) = inputs(&config);
        let expected = reference(&config, Some(&bias));

        let mut out = vec![0.0; config.output_len()];
        matmul_forward_gemm(&mut out, &inp, &weight, Some(&bias), &config, MathPrecision::Tf32, Par::Seq)
            .unwrap();
        assert_close(&out, &expected, 5e-2);
    }

    #[test]
    fn test_round_to_tf32() {
        assert_eq!(round_to_tf32(1.0), 1.0);
        // 1 + 2^-10 is representable, 1 + 2^-12 is not
        assert_eq!(round_to_tf32(1.0 + 2.0f32.powi(-10)), 1.0 + 2.0f32.powi(-10));
        assert_eq!(round_to_tf32(1.0 + 2.0f32.powi(-12)), 1.0);
        assert!(round_to_tf32(f32::NAN).is_nan());
        assert_eq!(round_to_tf32(f32::NEG_INFINITY), f32::NEG_INFINITY);
    }

    #[test]
    fn test_shape_mismatch() {
        let config = MatmulForwardConfig::new(1, 2, 3, 4);
        let mut out = vec![0.0; 8];
        let err = matmul_forward_naive(&mut out, &[0.0; 5], &[0.0; 12], None, &config).unwrap_err();
        assert_eq!(err, KernelError::ShapeMismatch { what: "inp", expected: 6, actual: 5 });

        let err =
            matmul_forward_naive(&mut out, &[0.0; 6], &[0.0; 12], Some(&[0.0; 3]), &config).unwrap_err();
        assert!(matches!(err, KernelError::ShapeMismatch { what: "bias", .. }));
    }

    #[test]
    fn test_empty_shapes() {
        let config = MatmulForwardConfig::new(0, 4, 8, 8);
        let mut out = vec![];
        matmul_forward_tiled(&mut out, &[], &[0.0; 64], None, &config).unwrap();
        matmul_forward_gemm(&mut out, &[], &[0.0; 64], None, &config, MathPrecision::Fp32, Par::Seq)
            .unwrap();

        let config = MatmulForwardConfig::new(1, 2, 0, 3);
        let mut out = vec![9.0; 6];
        matmul_forward_gemm(&mut out, &[], &[], Some(&[1.0, 2.0, 3.0]), &config, MathPrecision::Fp32, Par::Seq)
            .unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
    }
}
