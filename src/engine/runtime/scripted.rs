//! Scripted runtime for tests
//!
//! Replays a fixed list of steps instead of running a program, and records
//! every invocation so tests can assert call counts and sequencing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{Execution, RunEvent, Runtime, RuntimeConfig, RuntimeFault, StopFlag};
use crate::core::languages::RuntimeKind;

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Output(String),
    /// Request one line; the answer is echoed back as `input:<line>`
    Input,
    Complete(i32),
    Fail(RuntimeFault),
    /// Spin forever, polling the stop flag and step budget every step
    Loop,
    /// Never produce another event
    Hang,
    Sleep(Duration),
}

#[derive(Debug, Clone)]
pub struct CallRecord {
    pub source: String,
    pub started_at: Instant,
    pub finished_at: Option<Instant>,
}

type ScriptFn = dyn Fn(&str) -> Vec<ScriptStep> + Send + Sync;

#[derive(Clone)]
pub struct ScriptedRuntime {
    kind: RuntimeKind,
    script: Arc<ScriptFn>,
    calls: Arc<Mutex<Vec<CallRecord>>>,
    steps: Arc<AtomicU64>,
}

impl ScriptedRuntime {
    /// Every run replays the same steps
    pub fn fixed(steps: Vec<ScriptStep>) -> Self {
        Self::with_script(move |_| steps.clone())
    }

    /// Steps chosen from the assembled source of each run
    pub fn with_script(script: impl Fn(&str) -> Vec<ScriptStep> + Send + Sync + 'static) -> Self {
        Self {
            kind: RuntimeKind::Python,
            script: Arc::new(script),
            calls: Arc::new(Mutex::new(Vec::new())),
            steps: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_kind(mut self, kind: RuntimeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn steps_taken(&self) -> u64 {
        self.steps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Runtime for ScriptedRuntime {
    fn kind(&self) -> RuntimeKind {
        self.kind
    }

    async fn start(
        &self,
        source: &str,
        config: &RuntimeConfig,
    ) -> Result<Box<dyn Execution>, RuntimeFault> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(CallRecord {
                source: source.to_string(),
                started_at: Instant::now(),
                finished_at: None,
            });
            calls.len() - 1
        };

        Ok(Box::new(ScriptedExecution {
            steps: (self.script)(source).into(),
            pending: VecDeque::new(),
            awaiting_input: false,
            stop: config.stop.clone(),
            event_loop_steps: config.event_loop_steps.max(1) as u64,
            max_steps: config.max_steps,
            step_counter: self.steps.clone(),
            calls: self.calls.clone(),
            index,
        }))
    }
}

struct ScriptedExecution {
    steps: VecDeque<ScriptStep>,
    pending: VecDeque<RunEvent>,
    awaiting_input: bool,
    stop: StopFlag,
    event_loop_steps: u64,
    max_steps: Option<u64>,
    step_counter: Arc<AtomicU64>,
    calls: Arc<Mutex<Vec<CallRecord>>>,
    index: usize,
}

impl ScriptedExecution {
    fn finish(&self) {
        let mut calls = self.calls.lock().unwrap();
        if let Some(call) = calls.get_mut(self.index) {
            call.finished_at.get_or_insert_with(Instant::now);
        }
    }

    async fn spin(&self) -> RunEvent {
        let mut steps = 0u64;
        loop {
            steps += 1;
            self.step_counter.fetch_add(1, Ordering::SeqCst);
            if self.stop.is_set() {
                return RunEvent::Failed(RuntimeFault::Cancelled);
            }
            if let Some(max) = self.max_steps {
                if steps > max {
                    return RunEvent::Failed(RuntimeFault::StepBudgetExceeded(max));
                }
            }
            if steps % self.event_loop_steps == 0 {
                tokio::task::yield_now().await;
            }
        }
    }
}

#[async_trait]
impl Execution for ScriptedExecution {
    async fn next_event(&mut self) -> RunEvent {
        let event = loop {
            if let Some(event) = self.pending.pop_front() {
                break event;
            }

            match self.steps.pop_front() {
                Some(ScriptStep::Output(chunk)) => break RunEvent::Output(chunk),
                Some(ScriptStep::Input) => {
                    self.awaiting_input = true;
                    break RunEvent::InputRequest;
                }
                Some(ScriptStep::Complete(code)) => break RunEvent::Completed(code),
                Some(ScriptStep::Fail(fault)) => break RunEvent::Failed(fault),
                Some(ScriptStep::Loop) => break self.spin().await,
                Some(ScriptStep::Hang) => std::future::pending::<()>().await,
                Some(ScriptStep::Sleep(duration)) => tokio::time::sleep(duration).await,
                None => break RunEvent::Completed(0),
            }
        };

        if event.is_terminal() {
            self.finish();
        }
        event
    }

    async fn send_input(&mut self, line: Option<String>) -> Result<(), RuntimeFault> {
        if self.awaiting_input {
            self.awaiting_input = false;
            let shown = line.unwrap_or_else(|| "<none>".to_string());
            self.pending.push_back(RunEvent::Output(format!("input:{}", shown)));
        }
        Ok(())
    }
}

impl Drop for ScriptedExecution {
    fn drop(&mut self) {
        self.finish();
    }
}
