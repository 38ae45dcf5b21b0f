//! Exercise descriptors
//!
//! Normalized exercise metadata: display fields, availability flags and the
//! per-language code fragments that surround learner code.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Sentinel checksource meaning "no structural check"
pub const CHECKSOURCE_OK: &str = "return 'OK'";

/// Default execution mode for exercises that do not declare one
pub const DEFAULT_MODE: &str = "NORMAL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EASY" => Ok(Difficulty::Easy),
            "MEDIUM" => Ok(Difficulty::Medium),
            "HARD" => Ok(Difficulty::Hard),
            other => Err(format!("Unknown difficulty: {}", other)),
        }
    }
}

impl<'de> Deserialize<'de> for Difficulty {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Difficulty::Easy => "EASY",
            Difficulty::Medium => "MEDIUM",
            Difficulty::Hard => "HARD",
        };
        write!(f, "{}", s)
    }
}

/// Code injected around learner code for one language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageFragment {
    /// Skeleton shown to the learner on first load
    #[serde(default)]
    pub initcode: String,
    /// Injected before learner code in Validate runs
    #[serde(default)]
    pub precode: String,
    /// Injected after learner code in Validate runs
    #[serde(default)]
    pub postcode: String,
    /// Injected before learner code in Evaluate runs
    #[serde(default)]
    pub pretestcode: String,
    /// Injected after learner code in Evaluate runs (hidden assertions)
    #[serde(default)]
    pub posttestcode: String,
    #[serde(default = "default_checksource")]
    pub checksource: String,
}

impl Default for LanguageFragment {
    fn default() -> Self {
        Self {
            initcode: String::new(),
            precode: String::new(),
            postcode: String::new(),
            pretestcode: String::new(),
            posttestcode: String::new(),
            checksource: default_checksource(),
        }
    }
}

fn default_checksource() -> String {
    CHECKSOURCE_OK.to_string()
}

fn default_mode() -> String {
    DEFAULT_MODE.to_string()
}

/// Normalized exercise metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseDescriptor {
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub mode_parameters: serde_json::Value,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub language_data: BTreeMap<String, LanguageFragment>,
}

impl ExerciseDescriptor {
    /// Hidden or locked exercises must not be offered for editing
    pub fn is_available(&self) -> bool {
        !self.hidden && !self.locked
    }

    /// Fragment for a language identifier; exact key first, then case-insensitive
    pub fn fragment(&self, language: &str) -> Option<&LanguageFragment> {
        self.language_data.get(language).or_else(|| {
            self.language_data
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(language))
                .map(|(_, fragment)| fragment)
        })
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.language_data.keys().map(|k| k.as_str())
    }
}

/// Built-in exercise used whenever the backend cannot provide one
pub fn example_exercise() -> ExerciseDescriptor {
    let checksource = "# Check if the solution meets requirements\n\
        if 'factorial' not in globals():\n    \
        raise Exception('Function factorial is not defined')\n\
        if not callable(factorial):\n    \
        raise Exception('factorial is not a function')\n\
        return 'OK'"
        .to_string();

    let python = LanguageFragment {
        initcode: "def factorial(n):\n    # Your code here\n    pass\n\n# Test your code\nprint(factorial(5))"
            .into(),
        precode: "# This code runs before student's code\nimport sys\n\ndef get_input():\n    return input()\n\n"
            .into(),
        postcode: "\n\n# This code runs after student's code\n".into(),
        pretestcode: "import sys\n\n".into(),
        posttestcode: "\n\n# Test code to verify the solution\n\
            assert factorial(0) == 1, 'factorial(0) should be 1'\n\
            assert factorial(1) == 1, 'factorial(1) should be 1'\n\
            assert factorial(5) == 120, 'factorial(5) should be 120'\n\
            assert factorial(10) == 3628800, 'factorial(10) should be 3628800'\n\
            print('All tests passed!')\n"
            .into(),
        checksource: checksource.clone(),
    };

    let cpp = LanguageFragment {
        initcode: "long long factorial(int n) {\n    // Your code here\n    return 0;\n}\n".into(),
        precode: "#include <iostream>\nusing namespace std;\n\n".into(),
        postcode: "\nint main() {\n    cout << factorial(5) << endl;\n    return 0;\n}\n".into(),
        pretestcode: "#include <cassert>\n#include <iostream>\nusing namespace std;\n\n".into(),
        posttestcode: "\nint main() {\n    \
            assert(factorial(0) == 1);\n    \
            assert(factorial(1) == 1);\n    \
            assert(factorial(5) == 120);\n    \
            assert(factorial(10) == 3628800);\n    \
            cout << \"All tests passed!\" << endl;\n    \
            return 0;\n}\n"
            .into(),
        checksource,
    };

    let mut language_data = BTreeMap::new();
    language_data.insert("python".to_string(), python);
    language_data.insert("cpp".to_string(), cpp);

    ExerciseDescriptor {
        order: 1,
        title: "Calculate Factorial".into(),
        description:
            "Write a function `factorial(n)` that calculates the factorial of a non-negative integer n."
                .into(),
        hidden: false,
        locked: false,
        mode: DEFAULT_MODE.into(),
        mode_parameters: serde_json::json!({}),
        difficulty: Difficulty::Easy,
        language_data,
    }
}
