//! Core domain types shared by every other module

pub mod exercise;
pub mod languages;
pub mod verdict;

pub use exercise::{example_exercise, Difficulty, ExerciseDescriptor, LanguageFragment};
pub use languages::{get_supported_languages, init_languages, LanguageConfig, RuntimeKind};
pub use verdict::Verdict;
