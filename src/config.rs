//! Worker configuration
//!
//! Loaded once from the environment (after `.env`).

use std::time::Duration;

use anyhow::Context;

use crate::engine::controller::RunSettings;
use crate::engine::runtime::{DEFAULT_EVENT_LOOP_STEPS, DEFAULT_TIMEOUT};
use crate::sandbox::SandboxConfig;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_url: String,
    /// Exercise backend; jobs must carry their exercise inline when unset
    pub exercise_api_url: Option<String>,
    /// Rules engine executable; game events are skipped when unset
    pub game_engine_command: Option<String>,
    /// Wall-clock limit per run (default: 180s)
    pub run_timeout_secs: u64,
    /// Scheduler steps between yields (default: 10000)
    pub event_loop_steps: u32,
    pub max_execution_steps: Option<u64>,
    /// Selects this worker's isolate box-id range (0-9)
    pub worker_id: u32,
    /// Memory limit per learner program in MB (default: 256MB)
    pub sandbox_memory_mb: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".into(),
            exercise_api_url: None,
            game_engine_command: None,
            run_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            event_loop_steps: DEFAULT_EVENT_LOOP_STEPS,
            max_execution_steps: None,
            worker_id: 0,
            sandbox_memory_mb: SandboxConfig::default().memory_limit_mb,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            redis_url: var("REDIS_URL").unwrap_or(defaults.redis_url),
            exercise_api_url: var("EXERCISE_API_URL"),
            game_engine_command: var("GAME_ENGINE_COMMAND"),
            run_timeout_secs: var("RUN_TIMEOUT_SECS")
                .map(|v| v.parse::<u64>().context("Invalid RUN_TIMEOUT_SECS"))
                .transpose()?
                .unwrap_or(defaults.run_timeout_secs),
            event_loop_steps: var("EVENT_LOOP_STEPS")
                .map(|v| v.parse::<u32>().context("Invalid EVENT_LOOP_STEPS"))
                .transpose()?
                .unwrap_or(defaults.event_loop_steps),
            max_execution_steps: var("MAX_EXECUTION_STEPS")
                .map(|v| v.parse::<u64>().context("Invalid MAX_EXECUTION_STEPS"))
                .transpose()?,
            worker_id: var("WORKER_ID")
                .map(|v| v.parse::<u32>().context("Invalid WORKER_ID"))
                .transpose()?
                .unwrap_or(defaults.worker_id),
            sandbox_memory_mb: var("SANDBOX_MEMORY_MB")
                .map(|v| v.parse::<u32>().context("Invalid SANDBOX_MEMORY_MB"))
                .transpose()?
                .unwrap_or(defaults.sandbox_memory_mb),
        })
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            timeout: Duration::from_secs(self.run_timeout_secs),
            event_loop_steps: self.event_loop_steps.max(1),
            max_steps: self.max_execution_steps,
        }
    }

    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            worker_id: self.worker_id,
            memory_limit_mb: self.sandbox_memory_mb,
            ..SandboxConfig::default()
        }
    }
}
