//! Game engine executable
//!
//! The rules engine is a trusted program: one event JSON on stdin, one
//! response JSON on stdout. Loading resolves the executable once; each event
//! then runs it directly, without a sandbox.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::game_bridge::{BridgeError, EngineLoader, GameEngine, GameEvent, GameResult};

pub const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CommandEngineLoader {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandEngineLoader {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.split_whitespace().map(|s| s.to_string()).collect(),
            timeout: DEFAULT_ENGINE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl EngineLoader for CommandEngineLoader {
    async fn load(&self) -> Result<Arc<dyn GameEngine>, BridgeError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| BridgeError::Load("no game engine command configured".into()))?;

        let program = resolve(program)
            .ok_or_else(|| BridgeError::Load(format!("{} not found", program)))?;
        debug!("Resolved game engine at {:?}", program);

        Ok(Arc::new(CommandEngine {
            program,
            args: args.to_vec(),
            timeout: self.timeout,
        }))
    }
}

/// Find an executable by path, or by name on `PATH`
fn resolve(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}

pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

#[async_trait]
impl GameEngine for CommandEngine {
    async fn process_event(&self, event: &GameEvent) -> Result<GameResult, BridgeError> {
        let payload = serde_json::to_vec(event)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BridgeError::Process(format!("failed to start engine: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| BridgeError::Process(format!("failed to send event: {}", e)))?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| BridgeError::Process("engine timed out".into()))?
            .map_err(|e| BridgeError::Process(format!("failed to wait for engine: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BridgeError::Process(format!(
                "engine exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}
