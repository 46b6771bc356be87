//! Process-wide harness context for C callers, who have no handle to pass.

use kernbench_common::{HarnessConfig, Result};
use kernbench_kernels::HarnessContext;
use std::sync::OnceLock;

static HARNESS: OnceLock<HarnessContext> = OnceLock::new();

/// The process context, built from `KERNBENCH_*` variables on first use.
pub fn harness() -> Result<&'static HarnessContext> {
    if let Some(ctx) = HARNESS.get() {
        return Ok(ctx);
    }
    let config = HarnessConfig::from_env()?;
    let ctx = HarnessContext::setup(&config)?;
    // A racing initializer may have won; its context is kept and ours dropped.
    Ok(HARNESS.get_or_init(|| ctx))
}
