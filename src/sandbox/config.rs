//! Sandbox configuration
//!
//! Limits and box-id range for the isolate sandbox, set once at startup.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Worker ID for box ID allocation (0-9)
    pub worker_id: u32,
    /// Memory limit for learner programs in MB (default: 256MB)
    pub memory_limit_mb: u32,
    /// Process limit for learner programs (default: 16)
    pub processes: u32,
    /// Compile time limit in milliseconds (default: 30000ms = 30s)
    pub compile_time_limit_ms: u32,
    /// Compile memory limit in MB (default: 2048MB)
    pub compile_memory_limit_mb: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            worker_id: 0,
            memory_limit_mb: 256,
            processes: 16,
            compile_time_limit_ms: 30_000,
            compile_memory_limit_mb: 2048,
        }
    }
}

static SANDBOX_CONFIG: OnceLock<SandboxConfig> = OnceLock::new();

pub fn init_config(config: SandboxConfig) -> anyhow::Result<()> {
    SANDBOX_CONFIG
        .set(config)
        .map_err(|_| anyhow::anyhow!("Sandbox configuration already initialized"))
}

pub fn get_config() -> &'static SandboxConfig {
    SANDBOX_CONFIG.get().unwrap_or_else(|| {
        static DEFAULT: OnceLock<SandboxConfig> = OnceLock::new();

        warn!("Sandbox configuration not initialized, using default");
        DEFAULT.get_or_init(SandboxConfig::default)
    })
}

static BOX_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Box ID for the next run of this worker
pub fn next_box_id() -> u32 {
    let counter = BOX_COUNTER.fetch_add(1, Ordering::Relaxed);
    calculate_box_id(get_config().worker_id, counter)
}

/// Isolate only supports box IDs 0-9999; each worker (0-9) owns a range of
/// 1000 IDs and cycles through it.
pub fn calculate_box_id(worker_id: u32, counter: u32) -> u32 {
    (worker_id % 10) * 1000 + counter % 1000
}
