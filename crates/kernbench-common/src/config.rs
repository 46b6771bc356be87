//! Harness configuration with TOML, environment variable, and default sources.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::{env, fmt, fs};

use crate::error::ConfigError;

/// Default absolute tolerance used when comparing against a reference.
pub const DEFAULT_TOLERANCE: f32 = 1e-4;

/// Default per-trial repeat count for benchmarks.
pub const DEFAULT_BENCHMARK_REPEATS: usize = 100;

/// Workspace handed to the math library. 32 MiB covers Hopper, 4 MiB is
/// enough for everything older.
pub const DEFAULT_MATH_WORKSPACE_BYTES: usize = 32 * 1024 * 1024;

/// L2 size reported by the host device when nothing else is configured.
pub const DEFAULT_HOST_L2_CACHE_BYTES: usize = 4 * 1024 * 1024;

// ── DevicePreference ────────────────────────────────────────────────

/// Which device the harness context should open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// CUDA when compiled in and a device opens, host otherwise.
    #[default]
    Auto,
    Host,
    Cuda,
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Host => write!(f, "host"),
            Self::Cuda => write!(f, "cuda"),
        }
    }
}

impl std::str::FromStr for DevicePreference {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "host" | "cpu" => Ok(Self::Host),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(ConfigError::InvalidValue {
                key: "device".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

// ── TOML wrapper ────────────────────────────────────────────────────

/// Wrapper used for the `[harness]` table in TOML files.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TomlWrapper {
    harness: HarnessConfig,
}

// ── HarnessConfig ───────────────────────────────────────────────────

/// Configuration consumed once at harness setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub device: DevicePreference,
    pub device_id: usize,
    /// Seed for every input generator handed out by the context.
    pub seed: u64,
    pub tolerance: f32,
    /// Fail validation on any mismatch instead of only at the fault limit.
    pub strict_validation: bool,
    pub benchmark_repeats: usize,
    /// Force TF32 math on or off. `None` enables it on compute capability 8.0+.
    pub enable_tf32: Option<bool>,
    pub host_l2_cache_bytes: usize,
    pub host_memory_limit_bytes: Option<usize>,
    pub math_workspace_bytes: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            device: DevicePreference::Auto,
            device_id: 0,
            seed: 0,
            tolerance: DEFAULT_TOLERANCE,
            strict_validation: false,
            benchmark_repeats: DEFAULT_BENCHMARK_REPEATS,
            enable_tf32: None,
            host_l2_cache_bytes: DEFAULT_HOST_L2_CACHE_BYTES,
            host_memory_limit_bytes: None,
            math_workspace_bytes: DEFAULT_MATH_WORKSPACE_BYTES,
        }
    }
}

impl HarnessConfig {
    // ── Constructors ────────────────────────────────────────────

    /// Configuration pinned to the host device, used by tests and the
    /// reference path.
    pub fn host() -> Self {
        Self { device: DevicePreference::Host, ..Self::default() }
    }

    /// Load configuration from a TOML file at `path`.
    ///
    /// The file is expected to contain a `[harness]` table. If the file does
    /// not exist, returns `Ok(Self::default())`.
    pub fn from_toml(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::warn!("Config file not found: {}; using defaults", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        let wrapper: TomlWrapper = toml::from_str(&text)?;
        wrapper.harness.validate()?;
        Ok(wrapper.harness)
    }

    /// Serialize to a TOML string (wrapped in `[harness]`).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let wrapper = TomlWrapper { harness: self.clone() };
        Ok(toml::to_string_pretty(&wrapper)?)
    }

    /// Defaults with `KERNBENCH_*` environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Apply `KERNBENCH_*` environment variables on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(v) = env::var("KERNBENCH_DEVICE") {
            self.device = v.parse()?;
        }
        if let Ok(v) = env::var("KERNBENCH_DEVICE_ID") {
            self.device_id = parse_env("KERNBENCH_DEVICE_ID", &v)?;
        }
        if let Ok(v) = env::var("KERNBENCH_SEED") {
            self.seed = parse_env("KERNBENCH_SEED", &v)?;
        }
        if let Ok(v) = env::var("KERNBENCH_TOLERANCE") {
            self.tolerance = parse_env("KERNBENCH_TOLERANCE", &v)?;
        }
        if let Ok(v) = env::var("KERNBENCH_STRICT_VALIDATION") {
            self.strict_validation = parse_env_bool("KERNBENCH_STRICT_VALIDATION", &v)?;
        }
        if let Ok(v) = env::var("KERNBENCH_BENCHMARK_REPEATS") {
            self.benchmark_repeats = parse_env("KERNBENCH_BENCHMARK_REPEATS", &v)?;
        }
        if let Ok(v) = env::var("KERNBENCH_ENABLE_TF32") {
            self.enable_tf32 = Some(parse_env_bool("KERNBENCH_ENABLE_TF32", &v)?);
        }
        if let Ok(v) = env::var("KERNBENCH_HOST_L2_CACHE_BYTES") {
            self.host_l2_cache_bytes = parse_env("KERNBENCH_HOST_L2_CACHE_BYTES", &v)?;
        }
        if let Ok(v) = env::var("KERNBENCH_HOST_MEMORY_LIMIT_BYTES") {
            self.host_memory_limit_bytes =
                Some(parse_env("KERNBENCH_HOST_MEMORY_LIMIT_BYTES", &v)?);
        }
        if let Ok(v) = env::var("KERNBENCH_MATH_WORKSPACE_BYTES") {
            self.math_workspace_bytes = parse_env("KERNBENCH_MATH_WORKSPACE_BYTES", &v)?;
        }

        self.validate()?;
        Ok(self)
    }

    // ── Validation ──────────────────────────────────────────────

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "tolerance must be a positive finite number, got {}",
                self.tolerance
            )));
        }
        if self.benchmark_repeats == 0 {
            return Err(ConfigError::Validation("benchmark_repeats must be >= 1".into()));
        }
        if self.host_l2_cache_bytes == 0 {
            return Err(ConfigError::Validation("host_l2_cache_bytes must be > 0".into()));
        }
        if self.host_memory_limit_bytes == Some(0) {
            return Err(ConfigError::Validation(
                "host_memory_limit_bytes must be > 0 when set".into(),
            ));
        }
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn parse_env<T: std::str::FromStr>(key: &str, val: &str) -> Result<T, ConfigError> {
    val.trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue { key: key.to_string(), value: val.to_string() })
}

fn parse_env_bool(key: &str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key: key.to_string(), value: val.to_string() }),
    }
}
