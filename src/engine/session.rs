//! Execution session state
//!
//! An `ExecutionSession` holds what the learner sees for one exercise: the
//! output accumulator, the verdict and the stop flag. `restart` gives it a
//! fresh stop flag and empty output whenever the learner launches a new run.

use tracing::debug;

use crate::components::assembler::RunMode;
use crate::core::verdict::Verdict;
use crate::engine::runtime::{StopFlag, VirtualFiles};

/// Append-only output of a run, in receipt order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputAccumulator {
    chunks: Vec<String>,
}

impl OutputAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: impl Into<String>) {
        self.chunks.push(chunk.into());
    }

    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    pub fn joined(&self) -> String {
        self.chunks.concat()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Checking,
    Assembling,
    Running,
    Scoring,
    Succeeded(Verdict),
    Failed(Verdict),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Succeeded(_) | SessionState::Failed(_))
    }
}

/// Transient state of one Evaluate or Validate run
#[derive(Debug)]
pub struct ExecutionSession {
    pub mode: RunMode,
    pub language: String,
    pub code: String,
    /// Validate only; each block feeds successive stdin requests line by line
    pub test_inputs: Vec<String>,
    pub output: OutputAccumulator,
    pub result: Option<Verdict>,
    pub feedback: String,
    /// Named files visible to C/C++ programs
    pub files: VirtualFiles,
    stop: StopFlag,
    state: SessionState,
}

impl ExecutionSession {
    pub fn new(mode: RunMode, language: &str, code: &str, test_inputs: Vec<String>) -> Self {
        Self {
            mode,
            language: language.to_string(),
            code: code.to_string(),
            test_inputs,
            output: OutputAccumulator::new(),
            result: None,
            feedback: String::new(),
            files: VirtualFiles::new(),
            stop: StopFlag::new(),
            state: SessionState::Idle,
        }
    }

    /// Handle the learner uses to cancel this run
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Start over for a newly launched run and return its stop handle.
    ///
    /// A stop requested during an earlier run does not carry over.
    pub fn restart(&mut self) -> StopFlag {
        self.stop = StopFlag::new();
        self.reset();
        self.stop_flag()
    }

    /// Clear results of a previous run; the stop flag is kept
    pub fn reset(&mut self) {
        self.output = OutputAccumulator::new();
        self.result = None;
        self.feedback.clear();
        self.state = SessionState::Idle;
    }

    pub fn transition(&mut self, next: SessionState) {
        debug!("Session {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Enter a terminal state; the feedback is never left empty
    pub fn finish(&mut self, verdict: Verdict, feedback: impl Into<String>) {
        let mut feedback = feedback.into();
        if feedback.trim().is_empty() {
            feedback = verdict.to_string();
        }

        self.result = Some(verdict);
        self.feedback = feedback;
        self.transition(if verdict.is_accept() {
            SessionState::Succeeded(verdict)
        } else {
            SessionState::Failed(verdict)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_keeps_order() {
        let mut output = OutputAccumulator::new();
        output.push("1");
        output.push(String::from("2"));
        output.push("");
        assert_eq!(output.chunks(), &["1", "2", ""]);
        assert_eq!(output.joined(), "12");
    }

    #[test]
    fn test_finish_sets_terminal_state() {
        let mut session = ExecutionSession::new(RunMode::Evaluate, "python", "x", vec![]);
        assert_eq!(session.state(), SessionState::Idle);

        session.finish(Verdict::WrongAnswer, "");
        assert_eq!(session.state(), SessionState::Failed(Verdict::WrongAnswer));
        assert!(session.state().is_terminal());
        assert_eq!(session.feedback, "WRONG_ANSWER");
    }

    #[test]
    fn test_restart_clears_stop_and_output() {
        let mut session = ExecutionSession::new(RunMode::Validate, "python", "x", vec![]);
        let old = session.stop_flag();
        old.request_stop();
        session.output.push("stale");
        session.finish(Verdict::RuntimeError, "Execution stopped");

        let fresh = session.restart();

        assert!(!fresh.is_set());
        assert!(!session.stop_flag().is_set());
        assert!(old.is_set());
        assert!(session.output.is_empty());
        assert_eq!(session.result, None);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_sessions_get_independent_stop_flags() {
        let first = ExecutionSession::new(RunMode::Validate, "python", "x", vec![]);
        let second = ExecutionSession::new(RunMode::Validate, "python", "x", vec![]);
        first.stop_flag().request_stop();
        assert!(first.stop_flag().is_set());
        assert!(!second.stop_flag().is_set());
    }
}
