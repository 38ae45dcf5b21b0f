//! Execution session controller
//!
//! Drives one Evaluate or Validate run through its states:
//!
//! ```text
//! Idle -> Checking -> Assembling -> Running [-> Scoring] -> Succeeded | Failed
//! ```
//!
//! Every path ends in a terminal state with exactly one verdict and a
//! non-empty feedback string. Interpreter faults never escape as errors; only
//! preconditions checked before a run (`SessionError`) do.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::components::assembler::{assemble, RunMode};
use crate::components::checksource::{check, CheckOutcome};
use crate::core::exercise::{ExerciseDescriptor, LanguageFragment};
use crate::core::verdict::Verdict;
use crate::engine::runtime::{
    run_program, BlockInput, NoInput, RunReport, Runtime, RuntimeConfig, RuntimeRegistry,
    DEFAULT_EVENT_LOOP_STEPS, DEFAULT_TIMEOUT,
};
use crate::engine::session::{ExecutionSession, OutputAccumulator, SessionState};
use crate::infra::cipher::UserKey;
use crate::infra::game_bridge::{EventIds, GameEventBridge, ACCEPTED_RESULT};
use crate::infra::persistence::{submission_key, SubmissionSnapshot, SubmissionStore};

pub const ALL_TESTS_PASSED: &str = "All tests passed!";
pub const UNSUPPORTED_FEEDBACK: &str = "This language is not supported for in-browser execution yet";
pub const UNSUPPORTED_OUTPUT: &str = "Language not supported for in-browser execution";

/// Preconditions that stop a run before anything executes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("No code to run")]
    NoCode,

    #[error("Exercise is not available: {0}")]
    ExerciseUnavailable(String),

    #[error("No exercise data for exercise {0}")]
    ExerciseMissing(String),
}

/// Collaborators notified by the controller; all optional
pub trait SessionHooks: Send + Sync {
    /// Human-readable message for the learner (e.g. from the game engine)
    fn notify(&self, _message: &str) {}

    /// An accepted evaluation changed the learner's progress
    fn challenge_refetch(&self) {}
}

pub struct NoHooks;

impl SessionHooks for NoHooks {}

/// Who is submitting, for persistence and game events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionContext {
    pub username: String,
    pub email: String,
    pub player_id: String,
    pub game_id: String,
    pub exercise_id: String,
}

impl SubmissionContext {
    pub fn storage_key(&self) -> String {
        submission_key(&self.username, &self.game_id, &self.exercise_id)
    }

    pub fn user_key(&self) -> UserKey {
        UserKey::from_email(&self.email)
    }

    pub fn event_ids(&self) -> EventIds {
        EventIds::parse(&self.player_id, &self.exercise_id, &self.game_id)
    }
}

/// Limits applied to every run the controller starts
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub timeout: Duration,
    pub event_loop_steps: u32,
    pub max_steps: Option<u64>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            event_loop_steps: DEFAULT_EVENT_LOOP_STEPS,
            max_steps: None,
        }
    }
}

/// What the learner sees once a run is over
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionOutcome {
    pub verdict: Verdict,
    pub feedback: String,
    pub outputs: Vec<String>,
    /// Messages relayed from the game engine
    pub messages: Vec<String>,
}

pub struct Controller {
    runtimes: RuntimeRegistry,
    submissions: Option<SubmissionStore>,
    bridge: Option<Arc<GameEventBridge>>,
    hooks: Arc<dyn SessionHooks>,
    settings: RunSettings,
}

impl Controller {
    pub fn new(runtimes: RuntimeRegistry) -> Self {
        Self {
            runtimes,
            submissions: None,
            bridge: None,
            hooks: Arc::new(NoHooks),
            settings: RunSettings::default(),
        }
    }

    pub fn with_submissions(mut self, submissions: SubmissionStore) -> Self {
        self.submissions = Some(submissions);
        self
    }

    pub fn with_bridge(mut self, bridge: Arc<GameEventBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn SessionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Run a session to a terminal state
    pub async fn run(
        &self,
        exercise: &ExerciseDescriptor,
        session: &mut ExecutionSession,
        context: Option<&SubmissionContext>,
    ) -> Result<SessionOutcome, SessionError> {
        if !exercise.is_available() {
            return Err(SessionError::ExerciseUnavailable(exercise.title.clone()));
        }
        if session.code.trim().is_empty() {
            return Err(SessionError::NoCode);
        }

        session.reset();
        info!(
            "Starting {:?} run of '{}' in {}",
            session.mode, exercise.title, session.language
        );

        let (fragment, runtime) = match (
            exercise.fragment(&session.language),
            self.runtimes.resolve(&session.language),
        ) {
            (Some(fragment), Some(runtime)) => (fragment, runtime),
            (fragment, runtime) => {
                warn!(
                    "Language {} is not supported (fragment={}, runtime={}, exercise offers {:?})",
                    session.language,
                    fragment.is_some(),
                    runtime.is_some(),
                    exercise.languages().collect::<Vec<_>>()
                );
                session.output.push(UNSUPPORTED_OUTPUT);
                session.finish(Verdict::WrongAnswer, UNSUPPORTED_FEEDBACK);
                return Ok(self.conclude(session, context, Vec::new()).await);
            }
        };

        session.transition(SessionState::Checking);
        if let CheckOutcome::Failed(message) = check(&session.code, &fragment.checksource, runtime.kind()) {
            info!("Checksource rejected submission: {}", message);
            session.finish(Verdict::CompilationError, message);
            return Ok(self.conclude(session, context, Vec::new()).await);
        }

        match session.mode {
            RunMode::Evaluate => self.evaluate(fragment, runtime.as_ref(), session).await,
            RunMode::Validate => self.validate(fragment, runtime.as_ref(), session).await,
        }

        let messages = match (session.mode, session.result) {
            (RunMode::Evaluate, Some(Verdict::Accept)) => self.reward(context).await,
            _ => Vec::new(),
        };

        Ok(self.conclude(session, context, messages).await)
    }

    fn runtime_config(&self, session: &ExecutionSession) -> RuntimeConfig {
        RuntimeConfig::new(session.stop_flag())
            .with_timeout(self.settings.timeout)
            .with_event_loop_steps(self.settings.event_loop_steps)
            .with_max_steps(self.settings.max_steps)
            .with_files(session.files.clone())
    }

    /// Primary run of the plain program, then the hidden tests
    async fn evaluate(
        &self,
        fragment: &LanguageFragment,
        runtime: &dyn Runtime,
        session: &mut ExecutionSession,
    ) {
        session.transition(SessionState::Assembling);
        let primary = assemble(RunMode::Validate, fragment, &session.code);
        let scoring = assemble(RunMode::Evaluate, fragment, &session.code);
        let config = self.runtime_config(session);

        session.transition(SessionState::Running);
        let report = run_program(runtime, &primary, &config, &mut NoInput, &mut session.output).await;
        if !report.is_success() {
            let message = failure_feedback(&report);
            session.output.push(format!("{}\n", message));
            session.finish(Verdict::RuntimeError, message);
            return;
        }

        session.transition(SessionState::Scoring);
        let mut hidden = OutputAccumulator::new();
        let report = run_program(runtime, &scoring, &config, &mut NoInput, &mut hidden).await;
        debug!("Scoring run produced {} output chunks", hidden.chunks().len());

        match &report.fault {
            None if report.is_success() => session.finish(Verdict::Accept, ALL_TESTS_PASSED),
            Some(fault) if fault.is_environmental() => {
                session.finish(Verdict::RuntimeError, failure_feedback(&report))
            }
            _ => session.finish(Verdict::WrongAnswer, failure_feedback(&report)),
        }
    }

    /// One run per input block, strictly one after another
    async fn validate(
        &self,
        fragment: &LanguageFragment,
        runtime: &dyn Runtime,
        session: &mut ExecutionSession,
    ) {
        session.transition(SessionState::Assembling);
        let source = assemble(RunMode::Validate, fragment, &session.code);
        let config = self.runtime_config(session);

        let blocks = if session.test_inputs.is_empty() {
            vec![String::new()]
        } else {
            session.test_inputs.clone()
        };

        session.transition(SessionState::Running);
        let mut errors = Vec::new();
        for (index, block) in blocks.iter().enumerate() {
            let mut input = BlockInput::new(block);
            let report = run_program(runtime, &source, &config, &mut input, &mut session.output).await;

            if !report.is_success() {
                let message = failure_feedback(&report);
                debug!("Input block {} failed: {}", index, message);
                session.output.push(format!("{}\n", message));
                errors.push(message);
            }
            if session.stop_flag().is_set() {
                info!("Run stopped after input block {}", index);
                break;
            }
        }

        if errors.is_empty() {
            session.finish(Verdict::Accept, ALL_TESTS_PASSED);
        } else {
            session.finish(Verdict::RuntimeError, errors.join("\n"));
        }
    }

    /// Forward an accepted evaluation to the game engine; never fails
    async fn reward(&self, context: Option<&SubmissionContext>) -> Vec<String> {
        let messages = match (&self.bridge, context) {
            (Some(bridge), Some(context)) => bridge
                .submit(context.event_ids(), ACCEPTED_RESULT)
                .await
                .map(|result| result.messages())
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        for message in &messages {
            self.hooks.notify(message);
        }
        self.hooks.challenge_refetch();
        messages
    }

    async fn conclude(
        &self,
        session: &ExecutionSession,
        context: Option<&SubmissionContext>,
        messages: Vec<String>,
    ) -> SessionOutcome {
        let verdict = session.result.unwrap_or(Verdict::RuntimeError);
        info!("Run finished: {} ({})", verdict, session.feedback);

        if let (Some(submissions), Some(context)) = (&self.submissions, context) {
            let snapshot = SubmissionSnapshot {
                code: session.code.clone(),
                submission_feedback: session.feedback.clone(),
                submission_result: Some(verdict),
                validation_outputs: session.output.chunks().to_vec(),
                is_validation: session.mode == RunMode::Validate,
                time: Utc::now(),
                language: session.language.clone(),
            };
            if let Err(e) = submissions
                .save(&context.storage_key(), &context.user_key(), &snapshot)
                .await
            {
                warn!("Failed to save submission snapshot: {}", e);
            }
        }

        SessionOutcome {
            verdict,
            feedback: session.feedback.clone(),
            outputs: session.output.chunks().to_vec(),
            messages,
        }
    }
}

fn failure_feedback(report: &RunReport) -> String {
    report
        .failure_message()
        .unwrap_or_else(|| "Program failed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::exercise::example_exercise;
    use crate::core::languages::RuntimeKind;
    use crate::engine::runtime::scripted::{ScriptStep, ScriptedRuntime};
    use crate::engine::runtime::RuntimeFault;
    use crate::infra::game_bridge::{BridgeError, EngineLoader, GameEngine, GameEvent, GameResult};
    use crate::infra::store::{KeyValueStore, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const FACTORIAL: &str =
        "def factorial(n):\n    return 1 if n <= 1 else n * factorial(n - 1)\n\nprint(factorial(5))";

    fn controller(runtime: &ScriptedRuntime) -> Controller {
        let mut registry = RuntimeRegistry::new();
        registry.register("python", Arc::new(runtime.clone()));
        Controller::new(registry)
    }

    fn context() -> SubmissionContext {
        SubmissionContext {
            username: "ana".into(),
            email: "ana@example.com".into(),
            player_id: "3".into(),
            game_id: "7".into(),
            exercise_id: "42".into(),
        }
    }

    fn passing() -> ScriptedRuntime {
        ScriptedRuntime::fixed(vec![ScriptStep::Output("120\n".into()), ScriptStep::Complete(0)])
    }

    #[derive(Default)]
    struct RecordingHooks {
        messages: Mutex<Vec<String>>,
        refetches: AtomicUsize,
    }

    impl SessionHooks for RecordingHooks {
        fn notify(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }

        fn challenge_refetch(&self) {
            self.refetches.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FailingLoader;

    #[async_trait]
    impl EngineLoader for FailingLoader {
        async fn load(&self) -> Result<Arc<dyn GameEngine>, BridgeError> {
            Err(BridgeError::Load("wasm module missing".into()))
        }
    }

    struct PraisingEngine;

    #[async_trait]
    impl GameEngine for PraisingEngine {
        async fn process_event(&self, _event: &GameEvent) -> Result<GameResult, BridgeError> {
            Ok(GameResult {
                game_state: "next".into(),
                results: vec![serde_json::json!(["Message", ["nicely_done_simple_rule"]])],
            })
        }
    }

    struct PraisingLoader;

    #[async_trait]
    impl EngineLoader for PraisingLoader {
        async fn load(&self) -> Result<Arc<dyn GameEngine>, BridgeError> {
            Ok(Arc::new(PraisingEngine))
        }
    }

    #[tokio::test]
    async fn test_correct_factorial_is_accepted() {
        let runtime = passing();
        let exercise = example_exercise();
        let mut session = ExecutionSession::new(RunMode::Evaluate, "python", FACTORIAL, vec![]);

        let outcome = controller(&runtime).run(&exercise, &mut session, None).await.unwrap();

        assert_eq!(outcome.verdict, Verdict::Accept);
        assert_eq!(outcome.feedback, ALL_TESTS_PASSED);
        assert_eq!(outcome.outputs, vec!["120\n".to_string()]);
        assert_eq!(session.state(), SessionState::Succeeded(Verdict::Accept));

        let fragment = exercise.fragment("python").unwrap();
        let calls = runtime.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].source, format!("{}{}{}", fragment.precode, FACTORIAL, fragment.postcode));
        assert_eq!(
            calls[1].source,
            format!("{}{}{}", fragment.pretestcode, FACTORIAL, fragment.posttestcode)
        );
    }

    #[tokio::test]
    async fn test_checksource_failure_never_runs_code() {
        let runtime = passing();
        let mut session = ExecutionSession::new(
            RunMode::Evaluate,
            "python",
            "def fact(n):\n    return 1\n",
            vec![],
        );

        let outcome = controller(&runtime)
            .run(&example_exercise(), &mut session, None)
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::CompilationError);
        assert_eq!(outcome.feedback, "Function factorial is not defined");
        assert_eq!(runtime.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failing_hidden_tests_are_wrong_answer() {
        let runtime = ScriptedRuntime::with_script(|source| {
            if source.contains("assert") {
                vec![ScriptStep::Fail(RuntimeFault::Raised(
                    "AssertionError: factorial(5) should be 120".into(),
                ))]
            } else {
                vec![ScriptStep::Complete(0)]
            }
        });
        let mut session = ExecutionSession::new(RunMode::Evaluate, "python", FACTORIAL, vec![]);

        let outcome = controller(&runtime)
            .run(&example_exercise(), &mut session, None)
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::WrongAnswer);
        assert!(outcome.feedback.contains("factorial(5) should be 120"));
    }

    #[tokio::test]
    async fn test_primary_crash_is_runtime_error() {
        let runtime = ScriptedRuntime::fixed(vec![
            ScriptStep::Output("partial".into()),
            ScriptStep::Fail(RuntimeFault::Raised("ZeroDivisionError: division by zero".into())),
        ]);
        let mut session = ExecutionSession::new(RunMode::Evaluate, "python", FACTORIAL, vec![]);

        let outcome = controller(&runtime)
            .run(&example_exercise(), &mut session, None)
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::RuntimeError);
        assert_eq!(outcome.feedback, "ZeroDivisionError: division by zero");
        assert_eq!(
            outcome.outputs,
            vec!["partial".to_string(), "ZeroDivisionError: division by zero\n".to_string()]
        );
        assert_eq!(runtime.call_count(), 1);
    }

    #[tokio::test]
    async fn test_validate_error_is_shown_in_output() {
        let runtime = ScriptedRuntime::fixed(vec![ScriptStep::Fail(RuntimeFault::Raised(
            "ZeroDivisionError: division by zero".into(),
        ))]);
        let mut session =
            ExecutionSession::new(RunMode::Validate, "python", FACTORIAL, vec!["1".into()]);

        let outcome = controller(&runtime)
            .run(&example_exercise(), &mut session, None)
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::RuntimeError);
        assert_eq!(outcome.feedback, "ZeroDivisionError: division by zero");
        assert_eq!(
            outcome.outputs,
            vec!["ZeroDivisionError: division by zero\n".to_string()]
        );
    }

    #[tokio::test]
    async fn test_wall_clock_timeout_is_runtime_error() {
        let runtime = ScriptedRuntime::fixed(vec![ScriptStep::Output("tick".into()), ScriptStep::Hang]);
        let controller = controller(&runtime).with_settings(RunSettings {
            timeout: Duration::from_millis(50),
            ..RunSettings::default()
        });
        let mut session = ExecutionSession::new(RunMode::Evaluate, "python", FACTORIAL, vec![]);

        let outcome = controller
            .run(&example_exercise(), &mut session, None)
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::RuntimeError);
        assert!(!outcome.feedback.trim().is_empty());
        assert!(outcome.feedback.contains("timed out"));
        assert_eq!(runtime.call_count(), 1);
        assert!(session.state().is_terminal());
    }

    fn cpp_controller(runtime: &ScriptedRuntime) -> Controller {
        let mut registry = RuntimeRegistry::new();
        registry.register("cpp", Arc::new(runtime.clone()));
        Controller::new(registry)
    }

    const CPP_FACTORIAL: &str =
        "long long factorial(int n) {\n    return n <= 1 ? 1 : n * factorial(n - 1);\n}\n";

    #[tokio::test]
    async fn test_cpp_failed_assert_is_wrong_answer() {
        let runtime = ScriptedRuntime::with_script(|source| {
            if source.contains("assert(") {
                vec![ScriptStep::Fail(RuntimeFault::Raised(
                    "main: main.cpp:9: int main(): Assertion `factorial(5) == 120' failed.".into(),
                ))]
            } else {
                vec![ScriptStep::Output("120\n".into()), ScriptStep::Complete(0)]
            }
        })
        .with_kind(RuntimeKind::Cpp);
        let mut session = ExecutionSession::new(RunMode::Evaluate, "cpp", CPP_FACTORIAL, vec![]);

        let outcome = cpp_controller(&runtime)
            .run(&example_exercise(), &mut session, None)
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::WrongAnswer);
        assert!(outcome.feedback.contains("Assertion"));
        assert_eq!(outcome.outputs, vec!["120\n".to_string()]);
        assert_eq!(runtime.call_count(), 2);
    }

    #[tokio::test]
    async fn test_cpp_build_failure_is_runtime_error() {
        let runtime = ScriptedRuntime::fixed(vec![ScriptStep::Fail(RuntimeFault::Syntax(
            "main.cpp:4:1: error: expected ';' before '}' token".into(),
        ))])
        .with_kind(RuntimeKind::Cpp);
        let mut session = ExecutionSession::new(RunMode::Evaluate, "cpp", CPP_FACTORIAL, vec![]);

        let outcome = cpp_controller(&runtime)
            .run(&example_exercise(), &mut session, None)
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::RuntimeError);
        assert!(outcome.feedback.contains("expected ';'"));
        assert_eq!(runtime.call_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_before_run_ends_in_runtime_error() {
        let runtime = ScriptedRuntime::fixed(vec![ScriptStep::Loop]);
        let mut session = ExecutionSession::new(RunMode::Evaluate, "python", FACTORIAL, vec![]);
        session.stop_flag().request_stop();

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            controller(&runtime).run(&example_exercise(), &mut session, None),
        )
        .await
        .expect("stopped run must terminate")
        .unwrap();

        assert_eq!(outcome.verdict, Verdict::RuntimeError);
        assert_eq!(outcome.feedback, RuntimeFault::Cancelled.to_string());
        assert!(session.state().is_terminal());
    }

    #[tokio::test]
    async fn test_rerun_after_stop_is_not_cancelled() {
        let counter = Arc::new(AtomicUsize::new(0));
        let runtime = ScriptedRuntime::with_script({
            let counter = counter.clone();
            move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    vec![ScriptStep::Loop]
                } else {
                    vec![ScriptStep::Output("120\n".into()), ScriptStep::Complete(0)]
                }
            }
        });
        let controller = controller(&runtime);
        let mut session = ExecutionSession::new(RunMode::Evaluate, "python", FACTORIAL, vec![]);

        session.restart().request_stop();
        let stopped = controller
            .run(&example_exercise(), &mut session, None)
            .await
            .unwrap();
        assert_eq!(stopped.feedback, RuntimeFault::Cancelled.to_string());

        session.restart();
        let rerun = controller
            .run(&example_exercise(), &mut session, None)
            .await
            .unwrap();

        assert_eq!(rerun.verdict, Verdict::Accept);
        assert_eq!(rerun.outputs, vec!["120\n".to_string()]);
        assert_eq!(runtime.call_count(), 3);
    }

    #[tokio::test]
    async fn test_validate_runs_blocks_sequentially() {
        let runtime = ScriptedRuntime::fixed(vec![
            ScriptStep::Input,
            ScriptStep::Sleep(Duration::from_millis(5)),
            ScriptStep::Input,
            ScriptStep::Complete(0),
        ]);
        let blocks = vec!["1\n2".to_string(), "3".to_string(), "".to_string()];
        let mut session = ExecutionSession::new(RunMode::Validate, "python", FACTORIAL, blocks);

        let outcome = controller(&runtime)
            .run(&example_exercise(), &mut session, None)
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::Accept);
        assert_eq!(
            outcome.outputs,
            vec!["input:1", "input:2", "input:3", "input:<none>", "input:<none>", "input:<none>"]
        );

        let calls = runtime.calls();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            let finished = pair[0].finished_at.expect("run must finish");
            assert!(finished <= pair[1].started_at);
        }
    }

    #[tokio::test]
    async fn test_validate_block_error_does_not_stop_later_blocks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let runtime = ScriptedRuntime::with_script({
            let counter = counter.clone();
            move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                    vec![ScriptStep::Fail(RuntimeFault::Raised("ValueError: bad input".into()))]
                } else {
                    vec![ScriptStep::Output("ok".into()), ScriptStep::Complete(0)]
                }
            }
        });
        let blocks = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut session = ExecutionSession::new(RunMode::Validate, "python", FACTORIAL, blocks);

        let outcome = controller(&runtime)
            .run(&example_exercise(), &mut session, None)
            .await
            .unwrap();

        assert_eq!(runtime.call_count(), 3);
        assert_eq!(outcome.verdict, Verdict::RuntimeError);
        assert_eq!(outcome.feedback, "ValueError: bad input");
        assert_eq!(
            outcome.outputs,
            vec!["ok".to_string(), "ValueError: bad input\n".to_string(), "ok".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unsupported_language_short_circuits() {
        let runtime = passing();
        let mut session = ExecutionSession::new(RunMode::Evaluate, "java", "class A {}", vec![]);

        let outcome = controller(&runtime)
            .run(&example_exercise(), &mut session, None)
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::WrongAnswer);
        assert_eq!(outcome.feedback, UNSUPPORTED_FEEDBACK);
        assert_eq!(outcome.outputs, vec![UNSUPPORTED_OUTPUT.to_string()]);
        assert_eq!(runtime.call_count(), 0);
    }

    #[tokio::test]
    async fn test_preconditions() {
        let runtime = passing();
        let controller = controller(&runtime);

        let mut empty = ExecutionSession::new(RunMode::Evaluate, "python", "  \n", vec![]);
        assert_eq!(
            controller.run(&example_exercise(), &mut empty, None).await,
            Err(SessionError::NoCode)
        );

        let mut locked = example_exercise();
        locked.locked = true;
        let mut session = ExecutionSession::new(RunMode::Evaluate, "python", FACTORIAL, vec![]);
        assert!(matches!(
            controller.run(&locked, &mut session, None).await,
            Err(SessionError::ExerciseUnavailable(_))
        ));
        assert_eq!(runtime.call_count(), 0);
    }

    #[tokio::test]
    async fn test_engine_load_failure_keeps_accept() {
        let runtime = passing();
        let hooks = Arc::new(RecordingHooks::default());
        let bridge = Arc::new(GameEventBridge::new(
            Arc::new(FailingLoader),
            Arc::new(MemoryStore::new()),
        ));
        let controller = controller(&runtime).with_bridge(bridge).with_hooks(hooks.clone());
        let mut session = ExecutionSession::new(RunMode::Evaluate, "python", FACTORIAL, vec![]);

        let outcome = controller
            .run(&example_exercise(), &mut session, Some(&context()))
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::Accept);
        assert!(outcome.messages.is_empty());
        assert!(hooks.messages.lock().unwrap().is_empty());
        assert_eq!(hooks.refetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_accept_persists_and_relays_messages() {
        let runtime = passing();
        let store = Arc::new(MemoryStore::new());
        let hooks = Arc::new(RecordingHooks::default());
        let bridge = Arc::new(GameEventBridge::new(Arc::new(PraisingLoader), store.clone()));
        let controller = controller(&runtime)
            .with_submissions(SubmissionStore::new(store.clone()))
            .with_bridge(bridge)
            .with_hooks(hooks.clone());
        let mut session = ExecutionSession::new(RunMode::Evaluate, "python", FACTORIAL, vec![]);
        let context = context();

        let outcome = controller
            .run(&example_exercise(), &mut session, Some(&context))
            .await
            .unwrap();

        assert_eq!(outcome.messages, vec!["nicely_done_simple_rule".to_string()]);
        assert_eq!(*hooks.messages.lock().unwrap(), outcome.messages);
        assert_eq!(
            store.get("game_state_7_3").await.unwrap().as_deref(),
            Some("next")
        );

        let snapshot = SubmissionStore::new(store)
            .restore("FGPE_ana_game_7_chall_42", &context.user_key())
            .await
            .unwrap();
        assert_eq!(snapshot.code, FACTORIAL);
        assert_eq!(snapshot.submission_result, Some(Verdict::Accept));
        assert!(!snapshot.is_validation);
    }

    #[tokio::test]
    async fn test_validation_is_persisted_but_not_rewarded() {
        let runtime = passing();
        let store = Arc::new(MemoryStore::new());
        let hooks = Arc::new(RecordingHooks::default());
        let controller = controller(&runtime)
            .with_submissions(SubmissionStore::new(store.clone()))
            .with_hooks(hooks.clone());
        let mut session =
            ExecutionSession::new(RunMode::Validate, "python", FACTORIAL, vec!["5".into()]);
        let context = context();

        controller
            .run(&example_exercise(), &mut session, Some(&context))
            .await
            .unwrap();

        assert_eq!(hooks.refetches.load(Ordering::SeqCst), 0);
        let snapshot = SubmissionStore::new(store)
            .restore(&context.storage_key(), &context.user_key())
            .await
            .unwrap();
        assert!(snapshot.is_validation);
        assert_eq!(snapshot.validation_outputs, vec!["120\n".to_string()]);
        assert_eq!(snapshot.displayed_result(), None);
    }
}
