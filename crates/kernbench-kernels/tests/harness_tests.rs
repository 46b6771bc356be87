//! End-to-end harness tests on the host device.

use kernbench_common::{DeviceError, KernbenchError, KernelError, ValidationError};
use kernbench_kernels::{
    AdamWParams, HarnessContext, MatmulForwardConfig, Operation, Validator, ValidatorConfig, adamw,
    benchmark_kernel, benchmark_kernel_stats, cpu, make_ones_float, matmul_forward, must, run_adamw_suite,
    run_matmul_forward_suite, validate_result,
};
use std::env;
use std::process::Command;
use std::thread;
use std::time::Duration;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn ctx() -> HarnessContext {
    init_logger();
    HarnessContext::host().unwrap()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[test]
fn test_ones_validate_clean() {
    let ctx = ctx();
    let reference = make_ones_float(1024);
    let device = ctx.upload(&reference).unwrap();

    let report = validate_result(&device, &reference, "ones", 1024, 1e-4).unwrap();
    assert_eq!(report.faults(), 0);
    assert_eq!(report.checked, 1024);
}

#[test]
fn test_single_corrupted_element() {
    let ctx = ctx();
    let reference = make_ones_float(1024);
    let mut device = ctx.upload(&reference).unwrap();

    let mut host = device.to_host().unwrap();
    host[500] += 0.01;
    device.copy_from_host(&host).unwrap();

    let report = validate_result(&device, &reference, "ones", 1024, 1e-4).unwrap();
    assert_eq!(report.faults(), 1);
    let mismatch = report.mismatches[0];
    assert_eq!(mismatch.index, 500);
    assert_eq!(mismatch.expected, 1.0);
    assert!((mismatch.actual - 1.01).abs() < 1e-6);
}

#[test]
fn test_fault_cap_stops_at_ten() {
    let ctx = ctx();
    let reference = make_ones_float(64);
    let mut corrupted = reference.clone();
    for x in corrupted.iter_mut().take(15) {
        *x = -1.0;
    }
    let device = ctx.upload(&corrupted).unwrap();

    match validate_result(&device, &reference, "out", 64, 1e-4) {
        Err(KernbenchError::Validation(ValidationError::TooManyFaults { mismatches, limit, .. })) => {
            assert_eq!(limit, 10);
            assert_eq!(mismatches.len(), 10);
            assert_eq!(mismatches[9].index, 9);
        }
        other => panic!("expected TooManyFaults, got {:?}", other),
    }
}

#[test]
fn test_partial_validation_and_length_check() {
    let ctx = ctx();
    let mut reference = make_ones_float(16);
    reference[12] = 5.0;
    let device = ctx.upload(&make_ones_float(16)).unwrap();

    // only the first 8 elements are compared
    assert!(validate_result(&device, &reference, "out", 8, 1e-4).unwrap().is_exact());

    let err = validate_result(&device, &reference, "out", 17, 1e-4).unwrap_err();
    assert!(matches!(
        err,
        KernbenchError::Validation(ValidationError::LengthMismatch { num_elements: 17, .. })
    ));
}

#[test]
fn test_strict_validator_on_device() {
    let ctx = ctx();
    let reference = make_ones_float(8);
    let mut host = reference.clone();
    host[3] = 2.0;
    let device = ctx.upload(&host).unwrap();

    let strict = Validator::with_config(ValidatorConfig { tolerance: 1e-4, strict: true, ..Default::default() });
    let err = strict.validate(&device, &reference, "out").unwrap_err();
    assert!(matches!(err, KernbenchError::Validation(ValidationError::NotExact { faults: 1, .. })));
}

// ---------------------------------------------------------------------------
// Benchmarking
// ---------------------------------------------------------------------------

#[test]
fn test_benchmark_mean_tracks_fixed_delay() {
    let ctx = ctx();
    for repeats in [1, 4] {
        let mean = benchmark_kernel(ctx.device().as_ref(), repeats, || {
            thread::sleep(Duration::from_millis(5));
            Ok(())
        })
        .unwrap();
        assert!(mean >= 4.5, "repeats {}: mean {} ms", repeats, mean);
        assert!(mean < 100.0, "repeats {}: mean {} ms", repeats, mean);
    }
}

#[test]
fn test_benchmark_stats_bounds() {
    let ctx = ctx();
    let stats = benchmark_kernel_stats(ctx.device().as_ref(), 3, || {
        thread::sleep(Duration::from_millis(1));
        Ok(())
    })
    .unwrap();
    assert_eq!(stats.repeats, 3);
    assert!(stats.min_ms >= 0.9);
    assert!(stats.min_ms <= stats.mean_ms && stats.mean_ms <= stats.max_ms);
}

#[test]
fn test_benchmark_dispatched_kernel() {
    let ctx = ctx();
    let config = MatmulForwardConfig::new(1, 16, 32, 32);
    let inp = ctx.upload(&vec![0.5; config.input_len()]).unwrap();
    let weight = ctx.upload(&vec![0.25; config.weight_len()]).unwrap();
    let mut out = ctx.alloc(config.output_len()).unwrap();

    let mean = benchmark_kernel(ctx.device().as_ref(), 5, || {
        matmul_forward(&ctx, 2, &mut out, &inp, &weight, None, &config)
    })
    .unwrap();
    assert!(mean >= 0.0);
    assert!(out.to_host().unwrap().iter().all(|&x| x == 4.0));
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

const FATAL_CHILD_ENV: &str = "KERNBENCH_FATAL_CHILD";

#[test]
fn test_unknown_variant_terminates_process() {
    if env::var(FATAL_CHILD_ENV).is_ok() {
        let ctx = HarnessContext::host().unwrap();
        let mut params = ctx.alloc(4).unwrap();
        let grads = ctx.alloc(4).unwrap();
        let mut m = ctx.alloc(4).unwrap();
        let mut v = ctx.alloc(4).unwrap();
        must(adamw(&ctx, 42, &mut params, &grads, &mut m, &mut v, &AdamWParams::default()));
        return;
    }

    let output = Command::new(env::current_exe().unwrap())
        .args(["--exact", "test_unknown_variant_terminates_process", "--nocapture"])
        .env(FATAL_CHILD_ENV, "1")
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[KERNBENCH ERROR]"), "stderr: {}", stderr);
    assert!(stderr.contains("Invalid kernel variant 42 for adamw"), "stderr: {}", stderr);
}

#[test]
fn test_adamw_variants_match_reference() {
    let ctx = ctx();
    let hparams = AdamWParams { t: 10, weight_decay: 0.01, ..AdamWParams::default() };
    let n = 10_000;
    let mut generator = ctx.input_generator();
    let params = generator.make_random_float(n);
    let grads = generator.make_random_float(n);
    let m = generator.make_random_float_01(n);
    let v = generator.make_random_float_01(n);

    let (mut p_ref, mut m_ref, mut v_ref) = (params.clone(), m.clone(), v.clone());
    cpu::adamw_cpu(&mut p_ref, &grads, &mut m_ref, &mut v_ref, &hparams).unwrap();

    let validator = ctx.validator();
    let d_grads = ctx.upload(&grads).unwrap();
    for &variant in Operation::AdamW.variants() {
        let mut d_params = ctx.upload(&params).unwrap();
        let mut d_m = ctx.upload(&m).unwrap();
        let mut d_v = ctx.upload(&v).unwrap();
        adamw(&ctx, variant, &mut d_params, &d_grads, &mut d_m, &mut d_v, &hparams).unwrap();

        assert!(validator.validate(&d_params, &p_ref, "params").unwrap().is_exact());
        assert!(validator.validate(&d_m, &m_ref, "m").unwrap().is_exact());
        assert!(validator.validate(&d_v, &v_ref, "v").unwrap().is_exact());
    }
}

#[test]
fn test_adamw_state_length_mismatch() {
    let ctx = ctx();
    let mut params = ctx.alloc(8).unwrap();
    let grads = ctx.alloc(8).unwrap();
    let mut m = ctx.alloc(7).unwrap();
    let mut v = ctx.alloc(8).unwrap();
    let err = adamw(&ctx, 1, &mut params, &grads, &mut m, &mut v, &AdamWParams::default()).unwrap_err();
    assert!(matches!(
        err,
        KernbenchError::Kernel(KernelError::ShapeMismatch { what: "m", expected: 8, actual: 7 })
    ));
}

// ---------------------------------------------------------------------------
// Suites
// ---------------------------------------------------------------------------

#[test]
fn test_suites_cover_every_variant() {
    let ctx = ctx();
    let matmul = run_matmul_forward_suite(&ctx, &MatmulForwardConfig::new(2, 16, 32, 24), &[], Some(2)).unwrap();
    let ids: Vec<_> = matmul.variants.iter().map(|v| v.variant).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    let adamw = run_adamw_suite(&ctx, 4096, &AdamWParams::at_step(10), &[], Some(2)).unwrap();
    let ids: Vec<_> = adamw.variants.iter().map(|v| v.variant).collect();
    assert_eq!(ids, vec![1, 2]);
    assert!(adamw.variants.iter().all(|v| v.is_exact()));
}

#[test]
fn test_suite_out_of_memory_is_reported() {
    init_logger();
    let config = kernbench_common::HarnessConfig {
        host_memory_limit_bytes: Some(40 * 1024 * 1024),
        ..kernbench_common::HarnessConfig::host()
    };
    let ctx = HarnessContext::setup(&config).unwrap();
    let err = run_matmul_forward_suite(&ctx, &MatmulForwardConfig::new(64, 256, 256, 256), &[1], Some(1))
        .unwrap_err();
    assert!(matches!(err, KernbenchError::Device(DeviceError::AllocationFailed { .. })));
}
