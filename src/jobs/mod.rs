//! Worker jobs
//!
//! Jobs arrive as JSON tagged by `job_type` (`evaluate` | `validate`). Each
//! job becomes one execution session; the outcome goes back as a `JobResult`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::components::assembler::RunMode;
use crate::core::exercise::ExerciseDescriptor;
use crate::core::verdict::Verdict;
use crate::engine::controller::{Controller, SessionError, SubmissionContext};
use crate::engine::session::ExecutionSession;
use crate::infra::exercise_client::ExerciseClient;

/// Worker job enum - represents different types of jobs the worker can process
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "job_type")]
pub enum WorkerJob {
    /// Graded run against the hidden tests
    #[serde(rename = "evaluate")]
    Evaluate(RunJob),
    /// Run against learner-supplied input blocks
    #[serde(rename = "validate")]
    Validate(RunJob),
}

impl WorkerJob {
    pub fn into_parts(self) -> (RunMode, RunJob) {
        match self {
            WorkerJob::Evaluate(job) => (RunMode::Evaluate, job),
            WorkerJob::Validate(job) => (RunMode::Validate, job),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunJob {
    pub job_id: String,
    pub exercise_id: String,
    pub game_id: String,
    pub player_id: String,
    /// Snapshots and game events are skipped for anonymous jobs
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub test_inputs: Vec<String>,
    /// Inline exercise; fetched from the backend when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exercise: Option<ExerciseDescriptor>,
    /// Named files for C/C++ programs
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl RunJob {
    fn submission_context(&self) -> Option<SubmissionContext> {
        if self.username.trim().is_empty() {
            return None;
        }
        Some(SubmissionContext {
            username: self.username.clone(),
            email: self.email.clone(),
            player_id: self.player_id.clone(),
            game_id: self.game_id.clone(),
            exercise_id: self.exercise_id.clone(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    pub feedback: String,
    pub outputs: Vec<String>,
    pub messages: Vec<String>,
    /// Virtual files after the run
    pub files: BTreeMap<String, String>,
    /// Reason the job could not be run at all
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobResult {
    fn rejected(job_id: &str, error: &SessionError) -> Self {
        Self {
            job_id: job_id.to_string(),
            verdict: None,
            feedback: error.to_string(),
            outputs: Vec::new(),
            messages: Vec::new(),
            files: BTreeMap::new(),
            error_message: Some(error.to_string()),
        }
    }
}

async fn resolve_exercise(
    job: &RunJob,
    exercises: Option<&ExerciseClient>,
) -> Result<ExerciseDescriptor, SessionError> {
    if let Some(exercise) = &job.exercise {
        return Ok(exercise.clone());
    }
    match exercises {
        Some(client) => Ok(client
            .fetch(&job.exercise_id, &job.game_id, &job.player_id)
            .await),
        None => Err(SessionError::ExerciseMissing(job.exercise_id.clone())),
    }
}

/// Run one job through the controller
pub async fn process_run_job(
    mode: RunMode,
    job: &RunJob,
    controller: &Controller,
    exercises: Option<&ExerciseClient>,
) -> JobResult {
    info!(
        "Processing {:?} job {}: exercise={}, language={}",
        mode, job.job_id, job.exercise_id, job.language
    );

    let exercise = match resolve_exercise(job, exercises).await {
        Ok(exercise) => exercise,
        Err(e) => {
            warn!("Job {} rejected: {}", job.job_id, e);
            return JobResult::rejected(&job.job_id, &e);
        }
    };

    let mut session = ExecutionSession::new(mode, &job.language, &job.code, job.test_inputs.clone());
    for (name, content) in &job.files {
        session.files.insert(name.clone(), content.clone());
    }

    let context = job.submission_context();
    match controller.run(&exercise, &mut session, context.as_ref()).await {
        Ok(outcome) => JobResult {
            job_id: job.job_id.clone(),
            verdict: Some(outcome.verdict),
            feedback: outcome.feedback,
            outputs: outcome.outputs,
            messages: outcome.messages,
            files: session.files.snapshot(),
            error_message: None,
        },
        Err(e) => {
            warn!("Job {} rejected: {}", job.job_id, e);
            JobResult::rejected(&job.job_id, &e)
        }
    }
}
