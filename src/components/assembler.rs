//! Source assembly
//!
//! Builds the program that is actually executed by wrapping learner code in
//! the exercise fragments of the active language. Concatenation is exact:
//! nothing is trimmed and no separators are added.

use crate::core::exercise::LanguageFragment;

/// Which kind of run a program is assembled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Graded run against hidden tests
    Evaluate,
    /// Ungraded run against learner-supplied input
    Validate,
}

/// Assemble the executable program for a run
pub fn assemble(mode: RunMode, fragment: &LanguageFragment, learner_code: &str) -> String {
    let (before, after) = match mode {
        RunMode::Evaluate => (&fragment.pretestcode, &fragment.posttestcode),
        RunMode::Validate => (&fragment.precode, &fragment.postcode),
    };

    let mut source = String::with_capacity(before.len() + learner_code.len() + after.len());
    source.push_str(before);
    source.push_str(learner_code);
    source.push_str(after);
    source
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment() -> LanguageFragment {
        LanguageFragment {
            initcode: "init".into(),
            precode: "PRE\n".into(),
            postcode: "\nPOST".into(),
            pretestcode: "PRETEST\n".into(),
            posttestcode: "\nPOSTTEST".into(),
            checksource: String::new(),
        }
    }

    #[test]
    fn test_evaluate_uses_test_fragments() {
        let f = fragment();
        for code in ["X", "", "  spaced  \n"] {
            assert_eq!(
                assemble(RunMode::Evaluate, &f, code),
                format!("{}{}{}", f.pretestcode, code, f.posttestcode)
            );
        }
    }

    #[test]
    fn test_validate_uses_plain_fragments() {
        let f = fragment();
        assert_eq!(assemble(RunMode::Validate, &f, "X"), "PRE\nX\nPOST");
        assert_eq!(assemble(RunMode::Validate, &f, ""), "PRE\n\nPOST");
    }

    #[test]
    fn test_empty_fragments_leave_code_untouched() {
        let f = LanguageFragment::default();
        assert_eq!(assemble(RunMode::Evaluate, &f, "print(1)\n"), "print(1)\n");
    }
}
