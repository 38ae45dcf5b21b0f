//! Engine module - runtimes and the session controller

pub mod controller;
pub mod runtime;
pub mod session;

pub use controller::{
    Controller, NoHooks, RunSettings, SessionError, SessionHooks, SessionOutcome, SubmissionContext,
};
pub use runtime::{RuntimeConfig, RuntimeRegistry, StopFlag, VirtualFiles};
pub use session::{ExecutionSession, OutputAccumulator, SessionState};
