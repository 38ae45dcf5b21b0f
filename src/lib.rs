//! FGPE exercise judge
//!
//! Runs learner submissions for Evaluate (graded) and Validate (free input)
//! requests: structural pre-check, source assembly, execution under the
//! Python or C/C++ runtime, verdict classification, encrypted snapshot
//! persistence and game-engine rewards. Learner code only ever runs inside
//! an isolate box.

pub mod components;
pub mod config;
pub mod core;
pub mod engine;
pub mod infra;
pub mod jobs;
pub mod sandbox;
