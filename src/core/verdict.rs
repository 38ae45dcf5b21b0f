use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of an Evaluate or Validate run, as shown to the learner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Accept,
    WrongAnswer,
    RuntimeError,
    CompilationError,
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Accept => "ACCEPT",
            Verdict::WrongAnswer => "WRONG_ANSWER",
            Verdict::RuntimeError => "RUNTIME_ERROR",
            Verdict::CompilationError => "COMPILATION_ERROR",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_display_matches_wire_name() {
        for verdict in [
            Verdict::Accept,
            Verdict::WrongAnswer,
            Verdict::RuntimeError,
            Verdict::CompilationError,
        ] {
            let json = serde_json::to_string(&verdict).unwrap();
            assert_eq!(json, format!("\"{}\"", verdict));
        }
    }
}
