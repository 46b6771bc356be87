//! Harness context, built once at setup and passed by reference

use crate::buffers::InputGenerator;
use crate::device::{Device, DeviceBuffer, DeviceProperties, HostDevice};
use crate::validation::{Validator, ValidatorConfig};
use faer::Par;
use kernbench_common::{DeviceError, DevicePreference, HarnessConfig, Result};
use std::fmt;
use std::sync::Arc;

/// Precision the math library uses for library-backed variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathPrecision {
    /// Full fp32 products and accumulation.
    Fp32,
    /// Operands rounded to a 10-bit mantissa, fp32 accumulation.
    Tf32,
}

impl fmt::Display for MathPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MathPrecision::Fp32 => write!(f, "FP32"),
            MathPrecision::Tf32 => write!(f, "TF32"),
        }
    }
}

/// Math library state shared by every library-backed variant.
pub struct MathLibrary {
    precision: MathPrecision,
    parallelism: Par,
    workspace: DeviceBuffer<u8>,
}

impl MathLibrary {
    fn setup(device: &Arc<dyn Device>, config: &HarnessConfig) -> Result<Self> {
        let properties = device.properties();
        let tf32 = config.enable_tf32.unwrap_or_else(|| properties.supports_tf32());
        let precision = if tf32 { MathPrecision::Tf32 } else { MathPrecision::Fp32 };

        let workspace = DeviceBuffer::alloc(device, config.math_workspace_bytes)?;
        let parallelism = faer_parallelism();

        log::info!(
            "Math library: {} precision, {} byte workspace, {:?}",
            precision,
            workspace.size_in_bytes(),
            parallelism
        );
        Ok(Self { precision, parallelism, workspace })
    }

    pub fn precision(&self) -> MathPrecision {
        self.precision
    }

    pub fn parallelism(&self) -> Par {
        self.parallelism
    }

    pub fn workspace_bytes(&self) -> usize {
        self.workspace.size_in_bytes()
    }
}

fn faer_parallelism() -> Par {
    let par = faer::get_global_parallelism();
    if par.degree() == 1 { Par::Seq } else { par }
}

/// Everything the harness sets up once: device, cached properties, math
/// library state and the input seed.
pub struct HarnessContext {
    config: HarnessConfig,
    device: Arc<dyn Device>,
    properties: DeviceProperties,
    math: MathLibrary,
}

impl HarnessContext {
    pub fn setup(config: &HarnessConfig) -> Result<Self> {
        config.validate()?;
        let device = open_device(config)?;
        let properties = device.properties().clone();

        log::info!("Device {}: {}", config.device_id, properties.name);
        log::info!(
            "  compute capability {}.{}, {} multiprocessors x {} threads, L2 {} bytes",
            properties.compute_capability.0,
            properties.compute_capability.1,
            properties.multiprocessor_count,
            properties.max_threads_per_multiprocessor,
            properties.l2_cache_bytes
        );
        if let Some(total) = properties.total_memory_bytes {
            log::info!("  {} bytes of device memory", total);
        }

        let math = MathLibrary::setup(&device, config)?;
        Ok(Self { config: config.clone(), device, properties, math })
    }

    /// Context on the host device with default settings.
    pub fn host() -> Result<Self> {
        Self::setup(&HarnessConfig::host())
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    pub fn math(&self) -> &MathLibrary {
        &self.math
    }

    pub fn seed(&self) -> u64 {
        self.config.seed
    }

    /// Fresh generator at the configured seed.
    pub fn input_generator(&self) -> InputGenerator {
        InputGenerator::new(self.config.seed)
    }

    pub fn validator(&self) -> Validator {
        Validator::with_config(ValidatorConfig {
            tolerance: self.config.tolerance,
            strict: self.config.strict_validation,
            ..ValidatorConfig::default()
        })
    }

    pub fn upload(&self, data: &[f32]) -> std::result::Result<DeviceBuffer<f32>, DeviceError> {
        DeviceBuffer::from_host(&self.device, data)
    }

    pub fn alloc(&self, len: usize) -> std::result::Result<DeviceBuffer<f32>, DeviceError> {
        DeviceBuffer::alloc(&self.device, len)
    }
}

impl fmt::Debug for HarnessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarnessContext")
            .field("device", &self.properties.name)
            .field("precision", &self.math.precision)
            .field("seed", &self.config.seed)
            .finish()
    }
}

fn open_device(config: &HarnessConfig) -> std::result::Result<Arc<dyn Device>, DeviceError> {
    match config.device {
        DevicePreference::Host => Ok(Arc::new(HostDevice::from_config(config))),
        DevicePreference::Cuda => open_cuda(config.device_id),
        DevicePreference::Auto => match open_cuda(config.device_id) {
            Ok(device) => Ok(device),
            Err(e) => {
                log::info!("No CUDA device ({}), using host device", e);
                Ok(Arc::new(HostDevice::from_config(config)))
            }
        },
    }
}

#[cfg(feature = "cuda")]
fn open_cuda(device_id: usize) -> std::result::Result<Arc<dyn Device>, DeviceError> {
    Ok(Arc::new(crate::device::CudaDevice::new(device_id)?))
}

#[cfg(not(feature = "cuda"))]
fn open_cuda(_device_id: usize) -> std::result::Result<Arc<dyn Device>, DeviceError> {
    Err(DeviceError::Unavailable { reason: "built without the `cuda` feature".into() })
}
