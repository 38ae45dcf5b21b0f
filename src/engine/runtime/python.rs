//! Python runtime
//!
//! Runs the assembled program with the configured interpreter. A startup hook
//! replaces `input()` so that every stdin read is announced on stdout with a
//! marker, which the process driver turns into an `InputRequest` event.
//! The interpreter runs inside a fresh isolate box.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::process::{ProcessExecution, ProcessSpec};
use super::{Execution, RunEvent, Runtime, RuntimeConfig, RuntimeFault};
use crate::core::languages::{LanguageConfig, RuntimeKind};
use crate::sandbox::{IsolateBox, Limits, BOX_ROOT};

pub const INPUT_MARKER: &str = "\u{1e}FGPE_INPUT\u{1e}";

const HOOK_DIR: &str = ".hook";

const INPUT_HOOK: &str = r#"import builtins
import sys

_MARKER = "\x1eFGPE_INPUT\x1e"


def _read_line(prompt=""):
    if prompt:
        sys.stdout.write(str(prompt))
    sys.stdout.write(_MARKER)
    sys.stdout.flush()
    line = sys.stdin.readline()
    if not line:
        raise EOFError("EOF when reading a line")
    return line[:-1] if line.endswith("\n") else line


builtins.input = _read_line
"#;

pub struct PythonRuntime {
    config: LanguageConfig,
}

impl PythonRuntime {
    pub fn new(config: LanguageConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Runtime for PythonRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Python
    }

    async fn start(
        &self,
        source: &str,
        config: &RuntimeConfig,
    ) -> Result<Box<dyn Execution>, RuntimeFault> {
        let sandbox = IsolateBox::open()
            .await
            .map_err(|e| RuntimeFault::Spawn(format!("{:#}", e)))?;

        let written = async {
            sandbox
                .write_file(&format!("{}/sitecustomize.py", HOOK_DIR), INPUT_HOOK)
                .await?;
            sandbox.write_file(&self.config.source_file, source).await
        }
        .await;
        written.map_err(|e| RuntimeFault::Spawn(format!("Failed to write program: {:#}", e)))?;

        debug!("Starting Python program in box {}", sandbox.box_id());

        let hook_path = format!("{}/{}", BOX_ROOT, HOOK_DIR);
        let command = sandbox.command(
            &self.config.run_command,
            &Limits::for_run(config.timeout),
            &[
                ("PYTHONPATH", hook_path.as_str()),
                ("PYTHONIOENCODING", "utf-8"),
                ("PYTHONDONTWRITEBYTECODE", "1"),
            ],
        );
        let work_dir = sandbox.work_dir();
        let spec = ProcessSpec {
            command: &command,
            work_dir: &work_dir,
            env: vec![],
            input_marker: Some(INPUT_MARKER),
            meta_file: Some(sandbox.meta_path()),
        };
        let process = ProcessExecution::spawn(spec, config)?;

        Ok(Box::new(PythonExecution {
            process,
            sandbox: Some(sandbox),
        }))
    }
}

struct PythonExecution {
    process: ProcessExecution,
    /// Released once the program has ended
    sandbox: Option<IsolateBox>,
}

#[async_trait]
impl Execution for PythonExecution {
    async fn next_event(&mut self) -> RunEvent {
        let event = match self.process.next_event().await {
            RunEvent::Failed(RuntimeFault::Raised(trace)) if is_syntax_error(&trace) => {
                RunEvent::Failed(RuntimeFault::Syntax(trace))
            }
            event => event,
        };

        if event.is_terminal() {
            if let Some(sandbox) = self.sandbox.take() {
                if let Err(e) = sandbox.cleanup().await {
                    warn!("Failed to clean up isolate box: {}", e);
                }
            }
        }
        event
    }

    async fn send_input(&mut self, line: Option<String>) -> Result<(), RuntimeFault> {
        self.process.send_input(line).await
    }
}

/// Tracebacks end with the exception line, e.g. `SyntaxError: invalid syntax`
fn is_syntax_error(trace: &str) -> bool {
    trace
        .lines()
        .last()
        .map(str::trim_start)
        .is_some_and(|last| {
            ["SyntaxError", "IndentationError", "TabError"]
                .iter()
                .any(|kind| last.starts_with(kind))
        })
}
