//! C/C++ runtime
//!
//! Builds the assembled program, then runs it, both inside one isolate box.
//! Stdin is fed up front: the execution keeps requesting lines until the
//! provider runs dry, then closes stdin. Named files come from the run's
//! [`VirtualFiles`] table and are read back into it once the program exits.

use std::collections::BTreeSet;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, warn};

use super::process::{ProcessExecution, ProcessSpec};
use super::{Execution, RunEvent, Runtime, RuntimeConfig, RuntimeFault, StopFlag, VirtualFiles};
use crate::core::languages::{LanguageConfig, RuntimeKind};
use crate::sandbox::{IsolateBox, IsolateStatus, Limits};

/// Isolate exits with 1 when the boxed command failed and 2 on its own errors
const ISOLATE_PROGRAM_FAILED: i32 = 1;

pub struct CppRuntime {
    config: LanguageConfig,
}

impl CppRuntime {
    pub fn new(config: LanguageConfig) -> Self {
        Self { config }
    }

    async fn compile(&self, sandbox: &IsolateBox) -> Result<(), RuntimeFault> {
        let Some(compile_command) = self.config.compile_command.as_deref() else {
            return Ok(());
        };

        debug!("Compiling {} in box {}", self.config.source_file, sandbox.box_id());

        let command = sandbox.command(compile_command, &Limits::for_compile(), &[]);
        let Some((program, args)) = command.split_first() else {
            return Ok(());
        };

        let output = Command::new(program)
            .args(args)
            .current_dir(sandbox.work_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RuntimeFault::Spawn(format!("{}: {}", program, e)))?;
        let meta = sandbox.take_meta().await;

        if output.status.success() {
            return Ok(());
        }

        let mut message = String::from_utf8_lossy(&output.stderr).into_owned();
        if message.trim().is_empty() {
            message = String::from_utf8_lossy(&output.stdout).into_owned();
        }
        let message = message.trim_end().to_string();

        match meta.map(|m| m.status) {
            Some(IsolateStatus::TimeOut) => Err(RuntimeFault::Syntax("Compilation timed out".into())),
            Some(IsolateStatus::InternalError) => Err(RuntimeFault::Spawn(message)),
            _ if output.status.code() == Some(ISOLATE_PROGRAM_FAILED) => Err(RuntimeFault::Syntax(message)),
            _ => Err(RuntimeFault::Spawn(format!("Sandbox failed during build: {}", message))),
        }
    }

    /// Files the runtime itself puts in the work directory
    fn own_files(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        names.insert(self.config.source_file.clone());
        if let Some(binary) = self.config.run_command.first() {
            names.insert(binary.trim_start_matches("./").to_string());
        }
        names
    }
}

#[async_trait]
impl Runtime for CppRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Cpp
    }

    async fn start(
        &self,
        source: &str,
        config: &RuntimeConfig,
    ) -> Result<Box<dyn Execution>, RuntimeFault> {
        let sandbox = IsolateBox::open()
            .await
            .map_err(|e| RuntimeFault::Spawn(format!("{:#}", e)))?;

        sandbox
            .write_file(&self.config.source_file, source)
            .await
            .map_err(|e| RuntimeFault::Spawn(format!("Failed to write program: {:#}", e)))?;

        if let Err(fault) = self.compile(&sandbox).await {
            if let Err(e) = sandbox.cleanup().await {
                warn!("Failed to clean up isolate box: {}", e);
            }
            return Err(fault);
        }

        let dir = sandbox.work_dir();
        materialize_files(&dir, &config.files).await?;

        let command = sandbox.command(&self.config.run_command, &Limits::for_run(config.timeout), &[]);
        let spec = ProcessSpec {
            command: &command,
            work_dir: &dir,
            env: vec![],
            input_marker: None,
            meta_file: Some(sandbox.meta_path()),
        };
        let process = ProcessExecution::spawn(spec, config)?;

        Ok(Box::new(CppExecution {
            process,
            feeding: true,
            stop: config.stop.clone(),
            files: config.files.clone(),
            own_files: self.own_files(),
            started: Instant::now(),
            terminal: None,
            sandbox: Some(sandbox),
        }))
    }
}

struct CppExecution {
    process: ProcessExecution,
    /// Still pulling stdin lines from the provider
    feeding: bool,
    stop: StopFlag,
    files: VirtualFiles,
    own_files: BTreeSet<String>,
    started: Instant,
    terminal: Option<RunEvent>,
    /// Released once the files are read back
    sandbox: Option<IsolateBox>,
}

impl CppExecution {
    async fn finish(&mut self) {
        let Some(sandbox) = self.sandbox.take() else {
            return;
        };
        self.collect_files(&sandbox.work_dir()).await;
        if let Err(e) = sandbox.cleanup().await {
            warn!("Failed to clean up isolate box: {}", e);
        }
    }

    async fn collect_files(&self, dir: &Path) {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to list program files: {}", e);
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.own_files.contains(&name) || name.starts_with('.') {
                continue;
            }
            if !entry.file_type().await.is_ok_and(|t| t.is_file()) {
                continue;
            }
            match fs::read(entry.path()).await {
                Ok(bytes) => self
                    .files
                    .insert(name, String::from_utf8_lossy(&bytes).into_owned()),
                Err(e) => warn!("Failed to read program file {}: {}", name, e),
            }
        }
    }
}

#[async_trait]
impl Execution for CppExecution {
    async fn next_event(&mut self) -> RunEvent {
        if let Some(event) = &self.terminal {
            return event.clone();
        }
        if self.feeding {
            if self.stop.is_set() {
                self.feeding = false;
                self.process.close_stdin();
            } else {
                return RunEvent::InputRequest;
            }
        }

        match self.process.next_event().await {
            RunEvent::Completed(code) => {
                self.finish().await;
                self.terminal = Some(RunEvent::Completed(code));
                RunEvent::Output(format!(
                    "\nprogram exited with code {}\ndone in {:.3} s",
                    code,
                    self.started.elapsed().as_secs_f64()
                ))
            }
            RunEvent::Failed(fault) => {
                self.finish().await;
                self.terminal = Some(RunEvent::Failed(fault.clone()));
                RunEvent::Failed(fault)
            }
            event => event,
        }
    }

    async fn send_input(&mut self, line: Option<String>) -> Result<(), RuntimeFault> {
        if line.is_none() {
            self.feeding = false;
        }
        self.process.send_input(line).await
    }
}

async fn materialize_files(dir: &Path, files: &VirtualFiles) -> Result<(), RuntimeFault> {
    for (name, content) in files.snapshot() {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            warn!("Skipping virtual file with unsafe name {:?}", name);
            continue;
        }
        let path = dir.join(&name);
        fs::write(&path, content)
            .await
            .map_err(|e| RuntimeFault::Spawn(format!("Failed to create file {}: {}", name, e)))?;
        // The boxed program runs as an unprivileged user and may rewrite its files
        fs::set_permissions(&path, std::fs::Permissions::from_mode(0o666))
            .await
            .map_err(|e| RuntimeFault::Spawn(format!("Failed to open up file {}: {}", name, e)))?;
    }
    Ok(())
}
