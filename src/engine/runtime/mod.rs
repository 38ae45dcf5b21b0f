//! Runtime module - Language runtime adapters
//!
//! A runtime takes an assembled program and runs it, reporting what happens
//! as a stream of [`RunEvent`]s:
//! - `PythonRuntime`: Python programs, interactive stdin via an input hook
//! - `CppRuntime`: C/C++ programs, with named files backed by [`VirtualFiles`]
//!
//! Both run the learner's program inside an isolate box (see `crate::sandbox`).
//!
//! The runtime module does NOT:
//! - Assemble sources or run checksources
//! - Decide verdicts
//! - Own the input provider (the caller answers `InputRequest` events)

pub mod cpp;
pub mod process;
pub mod python;
#[cfg(test)]
pub mod scripted;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::languages::{LanguageConfig, RuntimeKind};
use crate::engine::session::OutputAccumulator;

pub use cpp::CppRuntime;
pub use python::PythonRuntime;

/// Wall-clock limit for a single run (3 minutes)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Scheduler steps between yields to the host event loop
pub const DEFAULT_EVENT_LOOP_STEPS: u32 = 10_000;

/// Failures at the interpreter boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeFault {
    #[error("Failed to start program: {0}")]
    Spawn(String),

    /// Syntax or build error reported before the program ran
    #[error("{0}")]
    Syntax(String),

    /// Unhandled exception or abnormal exit while running
    #[error("{0}")]
    Raised(String),

    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Execution stopped")]
    Cancelled,

    #[error("Execution exceeded {0} steps")]
    StepBudgetExceeded(u64),

    #[error("Input is not available: {0}")]
    InputRejected(String),
}

impl RuntimeFault {
    /// Faults caused by the run environment rather than by what the program computed
    pub fn is_environmental(&self) -> bool {
        matches!(
            self,
            RuntimeFault::Spawn(_)
                | RuntimeFault::Timeout(_)
                | RuntimeFault::Cancelled
                | RuntimeFault::StepBudgetExceeded(_)
                | RuntimeFault::InputRejected(_)
        )
    }
}

/// One thing that happened while a program was running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// A chunk written to stdout, in program order
    Output(String),
    /// The program is blocked reading a line from stdin
    InputRequest,
    /// The program terminated with an exit code
    Completed(i32),
    /// The program failed
    Failed(RuntimeFault),
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Completed(_) | RunEvent::Failed(_))
    }
}

/// Cooperative cancellation flag, created fresh for each session
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Named in-memory files a program can open, shared with the caller
#[derive(Debug, Clone, Default)]
pub struct VirtualFiles(Arc<Mutex<BTreeMap<String, String>>>);

impl VirtualFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, content: impl Into<String>) {
        self.lock().insert(name.into(), content.into());
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.lock().get(name).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        // A poisoned table still holds valid strings
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Limits and shared handles for one run
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Wall-clock limit, independent of the stop flag
    pub timeout: Duration,
    /// Scheduler steps between yields; the stop flag is polled every step
    pub event_loop_steps: u32,
    /// Optional cap on total scheduler steps
    pub max_steps: Option<u64>,
    pub stop: StopFlag,
    pub files: VirtualFiles,
}

impl RuntimeConfig {
    pub fn new(stop: StopFlag) -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            event_loop_steps: DEFAULT_EVENT_LOOP_STEPS,
            max_steps: None,
            stop,
            files: VirtualFiles::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_event_loop_steps(mut self, steps: u32) -> Self {
        self.event_loop_steps = steps.max(1);
        self
    }

    pub fn with_max_steps(mut self, max_steps: Option<u64>) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_files(mut self, files: VirtualFiles) -> Self {
        self.files = files;
        self
    }
}

/// A started program
#[async_trait]
pub trait Execution: Send {
    /// Advance until the next event; after a terminal event the execution is finished
    async fn next_event(&mut self) -> RunEvent;

    /// Answer the pending `InputRequest`; `None` means no input is available
    async fn send_input(&mut self, line: Option<String>) -> Result<(), RuntimeFault>;
}

/// Runtime trait for starting programs of one language family
#[async_trait]
pub trait Runtime: Send + Sync {
    fn kind(&self) -> RuntimeKind;

    async fn start(
        &self,
        source: &str,
        config: &RuntimeConfig,
    ) -> Result<Box<dyn Execution>, RuntimeFault>;
}

/// Supplies lines when a running program reads stdin
#[async_trait]
pub trait InputProvider: Send {
    /// `Ok(None)` signals that no input is available
    async fn next_input(&mut self) -> Result<Option<String>, String>;
}

/// Input provider for runs that have no stdin
pub struct NoInput;

#[async_trait]
impl InputProvider for NoInput {
    async fn next_input(&mut self) -> Result<Option<String>, String> {
        Ok(None)
    }
}

/// Serves the lines of one test-input block in order
#[derive(Debug, Clone)]
pub struct BlockInput {
    lines: Vec<String>,
    next: usize,
}

impl BlockInput {
    pub fn new(block: &str) -> Self {
        Self {
            lines: block.split('\n').map(|s| s.to_string()).collect(),
            next: 0,
        }
    }
}

#[async_trait]
impl InputProvider for BlockInput {
    async fn next_input(&mut self) -> Result<Option<String>, String> {
        let line = self.lines.get(self.next).cloned();
        self.next += 1;
        // An empty line ends the block just like running out of lines
        Ok(line.filter(|l| !l.is_empty()))
    }
}

/// How a run ended
#[derive(Debug, Clone)]
pub struct RunReport {
    pub exit_code: Option<i32>,
    pub fault: Option<RuntimeFault>,
    pub started_at: Instant,
    pub finished_at: Instant,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.fault.is_none() && self.exit_code == Some(0)
    }

    /// Human-readable failure, None for a successful run
    pub fn failure_message(&self) -> Option<String> {
        match (&self.fault, self.exit_code) {
            (Some(fault), _) => Some(fault.to_string()),
            (None, Some(0)) => None,
            (None, Some(code)) => Some(format!("Program exited with code {}", code)),
            (None, None) => Some("Program did not finish".to_string()),
        }
    }
}

/// Run a program to its terminal event under the wall-clock timeout.
///
/// Output chunks are appended to `output` in receipt order. Every failure,
/// including a failure to start, is folded into the returned report.
pub async fn run_program(
    runtime: &dyn Runtime,
    source: &str,
    config: &RuntimeConfig,
    input: &mut dyn InputProvider,
    output: &mut OutputAccumulator,
) -> RunReport {
    let started_at = Instant::now();

    let driven = tokio::time::timeout(config.timeout, drive(runtime, source, config, input, output)).await;

    let (exit_code, fault) = match driven {
        Ok(Ok(code)) => (Some(code), None),
        Ok(Err(fault)) => (None, Some(fault)),
        Err(_) => {
            warn!("Run exceeded wall-clock limit of {:?}", config.timeout);
            (None, Some(RuntimeFault::Timeout(config.timeout)))
        }
    };

    RunReport {
        exit_code,
        fault,
        started_at,
        finished_at: Instant::now(),
    }
}

async fn drive(
    runtime: &dyn Runtime,
    source: &str,
    config: &RuntimeConfig,
    input: &mut dyn InputProvider,
    output: &mut OutputAccumulator,
) -> Result<i32, RuntimeFault> {
    let mut execution = runtime.start(source, config).await?;

    loop {
        match execution.next_event().await {
            RunEvent::Output(chunk) => output.push(chunk),
            RunEvent::InputRequest => {
                let line = input
                    .next_input()
                    .await
                    .map_err(RuntimeFault::InputRejected)?;
                debug!("Answering input request (available={})", line.is_some());
                execution.send_input(line).await?;
            }
            RunEvent::Completed(code) => return Ok(code),
            RunEvent::Failed(fault) => return Err(fault),
        }
    }
}

/// Runtimes by language name
#[derive(Clone, Default)]
pub struct RuntimeRegistry {
    runtimes: HashMap<String, Arc<dyn Runtime>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build runtimes for every configured language name and alias
    pub fn from_languages<'a>(
        languages: impl IntoIterator<Item = (&'a String, &'a LanguageConfig)>,
    ) -> Self {
        let mut registry = Self::new();
        for (name, config) in languages {
            let runtime: Arc<dyn Runtime> = match config.runtime {
                RuntimeKind::Python => Arc::new(PythonRuntime::new(config.clone())),
                RuntimeKind::Cpp => Arc::new(CppRuntime::new(config.clone())),
            };
            registry.register(name, runtime);
        }
        registry
    }

    pub fn register(&mut self, language: &str, runtime: Arc<dyn Runtime>) {
        self.runtimes.insert(language.trim().to_lowercase(), runtime);
    }

    pub fn resolve(&self, language: &str) -> Option<Arc<dyn Runtime>> {
        self.runtimes.get(&language.trim().to_lowercase()).cloned()
    }
}
