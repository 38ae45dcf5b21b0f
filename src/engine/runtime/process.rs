//! Process-backed executions
//!
//! Drives a child process as a stepped scheduler: each step either consumes
//! a chunk of output or waits one poll tick, and polls the stop flag and the
//! step budget before doing so. The child is terminated when the execution
//! is stopped and killed when it is dropped.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::debug;

use super::{Execution, RunEvent, RuntimeConfig, RuntimeFault, StopFlag};
use crate::sandbox::isolate_box::take_meta;
use crate::sandbox::{IsolateMeta, IsolateStatus};

/// Longest wait between two stop-flag checks while the child is silent
const POLL_INTERVAL: Duration = Duration::from_millis(10);

const READ_CHUNK: usize = 4096;

enum Stream {
    Stdout(String),
    Stderr(String),
}

/// Piece of program output after input-request markers are cut out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Text(String),
    Marker,
}

/// Finds input-request markers in a stdout stream split at arbitrary points
#[derive(Debug)]
pub struct MarkerScanner {
    marker: &'static str,
    held: String,
}

impl MarkerScanner {
    pub fn new(marker: &'static str) -> Self {
        Self {
            marker,
            held: String::new(),
        }
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<Piece> {
        let mut buf = std::mem::take(&mut self.held);
        buf.push_str(chunk);

        let mut pieces = Vec::new();
        while let Some(pos) = buf.find(self.marker) {
            if pos > 0 {
                pieces.push(Piece::Text(buf[..pos].to_string()));
            }
            pieces.push(Piece::Marker);
            buf = buf[pos + self.marker.len()..].to_string();
        }

        // Keep back a tail that could be the start of a marker
        let split = buf.len() - self.partial_marker_len(&buf);
        if split > 0 {
            pieces.push(Piece::Text(buf[..split].to_string()));
        }
        self.held = buf[split..].to_string();

        pieces
    }

    /// Text still held back when the stream ends
    pub fn finish(&mut self) -> Option<String> {
        let held = std::mem::take(&mut self.held);
        (!held.is_empty()).then_some(held)
    }

    fn partial_marker_len(&self, buf: &str) -> usize {
        let max = (self.marker.len() - 1).min(buf.len());
        (1..=max)
            .rev()
            .find(|&k| {
                let start = buf.len() - k;
                buf.is_char_boundary(start) && self.marker.starts_with(&buf[start..])
            })
            .unwrap_or(0)
    }
}

/// How to launch a child process
#[derive(Debug, Clone)]
pub struct ProcessSpec<'a> {
    pub command: &'a [String],
    pub work_dir: &'a Path,
    pub env: Vec<(String, String)>,
    /// Marker the program prints on stdout right before it blocks on stdin
    pub input_marker: Option<&'static str>,
    /// Isolate meta file describing how the boxed program ended
    pub meta_file: Option<PathBuf>,
}

pub struct ProcessExecution {
    child: Child,
    stdin: Option<ChildStdin>,
    rx: mpsc::UnboundedReceiver<Stream>,
    scanner: Option<MarkerScanner>,
    pending: VecDeque<RunEvent>,
    stderr: String,
    stop: StopFlag,
    event_loop_steps: u64,
    max_steps: Option<u64>,
    steps: u64,
    meta_file: Option<PathBuf>,
    terminal: Option<RunEvent>,
}

impl ProcessExecution {
    pub fn spawn(spec: ProcessSpec<'_>, config: &RuntimeConfig) -> Result<Self, RuntimeFault> {
        let (program, args) = spec
            .command
            .split_first()
            .ok_or_else(|| RuntimeFault::Spawn("No command specified for execution".into()))?;

        debug!("Spawning {:?} in {:?}", spec.command, spec.work_dir);

        let mut cmd = Command::new(resolve_program(program, spec.work_dir));
        cmd.args(args)
            .current_dir(spec.work_dir)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| RuntimeFault::Spawn(format!("{}: {}", program, e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, tx.clone(), Stream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, tx, Stream::Stderr));
        }

        Ok(Self {
            stdin: child.stdin.take(),
            child,
            rx,
            scanner: spec.input_marker.map(MarkerScanner::new),
            pending: VecDeque::new(),
            stderr: String::new(),
            stop: config.stop.clone(),
            event_loop_steps: config.event_loop_steps.max(1) as u64,
            max_steps: config.max_steps,
            steps: 0,
            meta_file: spec.meta_file,
            terminal: None,
        })
    }

    /// Close stdin so further reads see end-of-file
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Isolate tears down its box on SIGTERM; a plain kill is the fallback
    fn terminate(&mut self) {
        let signalled = self
            .child
            .id()
            .and_then(|pid| i32::try_from(pid).ok())
            .is_some_and(|pid| kill(Pid::from_raw(pid), Signal::SIGTERM).is_ok());
        if !signalled {
            let _ = self.child.start_kill();
        }
    }

    fn halt(&mut self, fault: RuntimeFault) -> RunEvent {
        self.terminate();
        let event = RunEvent::Failed(fault);
        self.terminal = Some(event.clone());
        event
    }

    fn push_stdout(&mut self, text: String) {
        match self.scanner.as_mut() {
            Some(scanner) => {
                for piece in scanner.feed(&text) {
                    self.pending.push_back(match piece {
                        Piece::Text(t) => RunEvent::Output(t),
                        Piece::Marker => RunEvent::InputRequest,
                    });
                }
            }
            None => self.pending.push_back(RunEvent::Output(text)),
        }
    }

    async fn conclude(&mut self) -> RunEvent {
        if let Some(tail) = self.scanner.as_mut().and_then(MarkerScanner::finish) {
            self.pending.push_back(RunEvent::Output(tail));
        }

        let event = match self.child.wait().await {
            Ok(status) => match self.meta_file.as_deref() {
                Some(path) => match take_meta(path).await {
                    Some(meta) => classify_meta(&meta, &self.stderr),
                    None => RunEvent::Failed(RuntimeFault::Spawn(format!(
                        "Sandbox reported no result (exit status {})",
                        status
                    ))),
                },
                None => classify_exit(status, &self.stderr),
            },
            Err(e) => RunEvent::Failed(RuntimeFault::Raised(format!(
                "Failed to wait for program: {}",
                e
            ))),
        };
        debug!("Process finished: {:?}", event);

        self.terminal = Some(event.clone());
        event
    }
}

#[async_trait]
impl Execution for ProcessExecution {
    async fn next_event(&mut self) -> RunEvent {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }
            if let Some(event) = &self.terminal {
                return event.clone();
            }

            self.steps += 1;
            if self.stop.is_set() {
                return self.halt(RuntimeFault::Cancelled);
            }
            if let Some(max) = self.max_steps {
                if self.steps > max {
                    return self.halt(RuntimeFault::StepBudgetExceeded(max));
                }
            }
            if self.steps % self.event_loop_steps == 0 {
                tokio::task::yield_now().await;
            }

            tokio::select! {
                message = self.rx.recv() => match message {
                    Some(Stream::Stdout(text)) => self.push_stdout(text),
                    Some(Stream::Stderr(text)) => self.stderr.push_str(&text),
                    None => {
                        let event = self.conclude().await;
                        if self.pending.is_empty() {
                            return event;
                        }
                    }
                },
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }

    async fn send_input(&mut self, line: Option<String>) -> Result<(), RuntimeFault> {
        let Some(line) = line else {
            self.close_stdin();
            return Ok(());
        };

        if let Some(stdin) = self.stdin.as_mut() {
            let written = async {
                stdin.write_all(line.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.flush().await
            }
            .await;
            // The program may already have exited; its exit status tells the rest
            if let Err(e) = written {
                debug!("Failed to write program input: {}", e);
            }
        }
        Ok(())
    }
}

fn classify_exit(status: ExitStatus, stderr: &str) -> RunEvent {
    let stderr = stderr.trim_end();
    match status.code() {
        Some(0) => RunEvent::Completed(0),
        Some(code) if stderr.is_empty() => RunEvent::Completed(code),
        Some(_) => RunEvent::Failed(RuntimeFault::Raised(stderr.to_string())),
        None if stderr.is_empty() => RunEvent::Failed(RuntimeFault::Raised(
            "Program terminated by a signal".to_string(),
        )),
        None => RunEvent::Failed(RuntimeFault::Raised(stderr.to_string())),
    }
}

fn classify_meta(meta: &IsolateMeta, stderr: &str) -> RunEvent {
    let stderr = stderr.trim_end();
    match &meta.status {
        IsolateStatus::Ok => RunEvent::Completed(0),
        IsolateStatus::RuntimeError if stderr.is_empty() => RunEvent::Completed(meta.exit_code),
        IsolateStatus::RuntimeError => RunEvent::Failed(RuntimeFault::Raised(stderr.to_string())),
        IsolateStatus::TimeOut => RunEvent::Failed(RuntimeFault::Timeout(meta.wall_time)),
        IsolateStatus::Signal(sig) if stderr.is_empty() => RunEvent::Failed(RuntimeFault::Raised(
            format!("Program terminated by signal {}", sig),
        )),
        IsolateStatus::Signal(_) => RunEvent::Failed(RuntimeFault::Raised(stderr.to_string())),
        IsolateStatus::InternalError => RunEvent::Failed(RuntimeFault::Spawn(format!(
            "Sandbox error: {}",
            meta.message
        ))),
    }
}

/// Programs given as `./name` live in the work directory
fn resolve_program(program: &str, work_dir: &Path) -> std::path::PathBuf {
    match program.strip_prefix("./") {
        Some(local) => work_dir.join(local),
        None => std::path::PathBuf::from(program),
    }
}

async fn pump<R>(mut reader: R, tx: mpsc::UnboundedSender<Stream>, wrap: fn(String) -> Stream)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_CHUNK];
    let mut carry: Vec<u8> = Vec::new();

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        carry.extend_from_slice(&buf[..n]);

        let text = take_utf8(&mut carry);
        if !text.is_empty() && tx.send(wrap(text)).is_err() {
            return;
        }
    }

    if !carry.is_empty() {
        let _ = tx.send(wrap(String::from_utf8_lossy(&carry).into_owned()));
    }
}

/// Take the decodable prefix of `carry`, leaving an incomplete trailing sequence
fn take_utf8(carry: &mut Vec<u8>) -> String {
    match std::str::from_utf8(carry) {
        Ok(text) => {
            let text = text.to_string();
            carry.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let text = String::from_utf8_lossy(&carry[..valid]).into_owned();
            carry.drain(..valid);
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(carry).into_owned();
            carry.clear();
            text
        }
    }
}
