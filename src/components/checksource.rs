//! Checksource validation
//!
//! A checksource is a short snippet attached to an exercise that states the
//! structural requirements learner code must meet before it is executed,
//! e.g. "a function named `factorial` must exist". The snippet is read as a
//! list of rules and checked statically against the raw learner code, so no
//! interpreter is started when a requirement is missing.
//!
//! Recognized rule forms (Python-flavoured, one condition per `if`):
//!
//! ```text
//! if 'name' not in globals():          # symbol must be defined
//! if not callable(name):               # symbol must be a function or class
//! if 'text' not in user_code:          # raw text must appear in the code
//!     raise Exception('message')       # or: return 'message'
//! return 'OK'
//! ```

use std::fmt;

use tracing::debug;

use crate::core::exercise::CHECKSOURCE_OK;
use crate::core::languages::RuntimeKind;

/// Result of checking learner code against a checksource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Ok,
    Failed(String),
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckOutcome::Ok => write!(f, "OK"),
            CheckOutcome::Failed(message) => write!(f, "{}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Defines(String),
    Callable(String),
    Contains(String),
}

impl Requirement {
    fn default_message(&self) -> String {
        match self {
            Requirement::Defines(name) => format!("Function {} is not defined", name),
            Requirement::Callable(name) => format!("{} is not a function", name),
            Requirement::Contains(text) => format!("Your code must contain '{}'", text),
        }
    }

    fn holds(&self, code: &str, runtime: RuntimeKind) -> bool {
        match self {
            Requirement::Contains(text) => code.contains(text.as_str()),
            Requirement::Defines(name) => match runtime {
                RuntimeKind::Python => python_defines(code, name, false),
                RuntimeKind::Cpp => cpp_declares(code, name, false),
            },
            Requirement::Callable(name) => match runtime {
                RuntimeKind::Python => python_defines(code, name, true),
                RuntimeKind::Cpp => cpp_declares(code, name, true),
            },
        }
    }
}

#[derive(Debug)]
struct Rule {
    requirement: Requirement,
    message: String,
}

/// Check raw learner code against an exercise checksource
pub fn check(learner_code: &str, checksource: &str, runtime: RuntimeKind) -> CheckOutcome {
    let trimmed = checksource.trim();
    if trimmed.is_empty() || trimmed == CHECKSOURCE_OK {
        return CheckOutcome::Ok;
    }

    let rules = parse_rules(checksource);
    if rules.is_empty() {
        debug!("Checksource has no recognized rules, accepting");
        return CheckOutcome::Ok;
    }

    for rule in rules {
        if !rule.requirement.holds(learner_code, runtime) {
            debug!("Checksource rule failed: {:?}", rule.requirement);
            return CheckOutcome::Failed(rule.message);
        }
    }

    CheckOutcome::Ok
}

fn parse_rules(checksource: &str) -> Vec<Rule> {
    let mut rules = Vec::new();
    let mut pending: Option<Requirement> = None;

    for line in checksource.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(condition) = line.strip_prefix("if ") {
            if let Some(requirement) = pending.take() {
                let message = requirement.default_message();
                rules.push(Rule { requirement, message });
            }
            pending = parse_condition(condition.trim_end_matches(':').trim());
            continue;
        }

        if let Some(requirement) = pending.take() {
            let message = parse_message(line).unwrap_or_else(|| requirement.default_message());
            rules.push(Rule { requirement, message });
        }
    }

    if let Some(requirement) = pending {
        let message = requirement.default_message();
        rules.push(Rule { requirement, message });
    }

    rules
}

fn parse_condition(condition: &str) -> Option<Requirement> {
    if let Some(target) = condition.strip_prefix("not callable(") {
        let name = target.trim_end_matches(')').trim();
        return is_identifier(name).then(|| Requirement::Callable(name.to_string()));
    }

    let (needle, rest) = split_quoted(condition)?;
    let haystack = rest.trim().strip_prefix("not in")?.trim();

    match haystack {
        "globals()" | "locals()" | "dir()" => {
            is_identifier(&needle).then(|| Requirement::Defines(needle))
        }
        _ => Some(Requirement::Contains(needle)),
    }
}

/// Extract the message of a `raise ...('msg')` or `return 'msg'` line
fn parse_message(line: &str) -> Option<String> {
    if !(line.starts_with("raise") || line.starts_with("return")) {
        return None;
    }
    split_quoted(line).map(|(message, _)| message)
}

/// Split out the first quoted literal, returning it and the text after it
fn split_quoted(text: &str) -> Option<(String, &str)> {
    let start = text.find(['\'', '"'])?;
    let quote = text[start..].chars().next()?;
    let body = &text[start + 1..];
    let end = body.find(quote)?;
    Some((body[..end].to_string(), &body[end + 1..]))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn python_defines(code: &str, name: &str, callable_only: bool) -> bool {
    code.lines()
        .map(str::trim_start)
        .filter(|line| !line.starts_with('#'))
        .any(|line| {
            let line = line.strip_prefix("async ").unwrap_or(line);
            if let Some(rest) = line
                .strip_prefix("def ")
                .or_else(|| line.strip_prefix("class "))
            {
                return word_at_start(rest) == Some(name);
            }

            let Some(rest) = line.strip_prefix(name) else {
                return false;
            };
            let rest = rest.trim_start();
            if !rest.starts_with('=') || rest.starts_with("==") {
                return false;
            }
            !callable_only || rest[1..].trim_start().starts_with("lambda")
        })
}

const CPP_NON_TYPES: &[&str] = &[
    "return", "if", "while", "for", "switch", "else", "do", "case", "throw", "new", "delete",
    "sizeof", "using", "namespace",
];

fn cpp_declares(code: &str, name: &str, callable_only: bool) -> bool {
    code.lines()
        .map(str::trim_start)
        .filter(|line| !line.starts_with("//"))
        .any(|line| {
            identifier_positions(line, name).any(|pos| {
                let before = line[..pos].trim_end();
                let after = line[pos + name.len()..].trim_start();

                let type_before = before
                    .rsplit(|c: char| c.is_whitespace())
                    .next()
                    .map(|tok| tok.trim_start_matches('(').trim_end_matches(['*', '&']))
                    .filter(|tok| !tok.is_empty())
                    .is_some_and(|tok| {
                        (is_identifier(tok) || tok.ends_with('>') || tok.contains("::"))
                            && !CPP_NON_TYPES.contains(&tok)
                    });
                if !type_before {
                    return false;
                }

                if after.starts_with('(') {
                    true
                } else {
                    !callable_only && (after.starts_with('=') || after.starts_with(';'))
                }
            })
        })
}

fn word_at_start(text: &str) -> Option<&str> {
    let end = text
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    (end > 0).then(|| &text[..end])
}

/// Byte offsets where `name` occurs as a whole identifier
fn identifier_positions<'a>(line: &'a str, name: &'a str) -> impl Iterator<Item = usize> + 'a {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    line.match_indices(name).filter_map(move |(pos, _)| {
        let prev_ok = line[..pos].chars().next_back().map_or(true, |c| !is_ident(c));
        let next_ok = line[pos + name.len()..]
            .chars()
            .next()
            .map_or(true, |c| !is_ident(c));
        (prev_ok && next_ok).then_some(pos)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::exercise::example_exercise;

    const FACTORIAL_CHECK: &str = "if 'factorial' not in globals():\n    raise Exception('Function factorial is not defined')\nif not callable(factorial):\n    raise Exception('factorial is not a function')\nreturn 'OK'";

    #[test]
    fn test_sentinel_and_empty_always_pass() {
        for code in ["", "garbage ((", "def x(): pass"] {
            assert_eq!(check(code, "", RuntimeKind::Python), CheckOutcome::Ok);
            assert_eq!(check(code, "   \n", RuntimeKind::Cpp), CheckOutcome::Ok);
            assert_eq!(check(code, "return 'OK'", RuntimeKind::Python), CheckOutcome::Ok);
            assert_eq!(check(code, "  return 'OK'\n", RuntimeKind::Cpp), CheckOutcome::Ok);
        }
        assert_eq!(CheckOutcome::Ok.to_string(), "OK");
    }

    #[test]
    fn test_python_function_present() {
        let code = "def factorial(n):\n    return 1 if n <= 1 else n * factorial(n-1)\n";
        assert_eq!(check(code, FACTORIAL_CHECK, RuntimeKind::Python), CheckOutcome::Ok);
    }

    #[test]
    fn test_python_function_missing() {
        let code = "def fact(n):\n    return 1\n";
        assert_eq!(
            check(code, FACTORIAL_CHECK, RuntimeKind::Python),
            CheckOutcome::Failed("Function factorial is not defined".into())
        );
    }

    #[test]
    fn test_python_assignment_is_not_callable() {
        let code = "factorial = 5\n";
        assert_eq!(
            check(code, FACTORIAL_CHECK, RuntimeKind::Python),
            CheckOutcome::Failed("factorial is not a function".into())
        );

        let lambda = "factorial = lambda n: 1 if n <= 1 else n * factorial(n - 1)\n";
        assert_eq!(check(lambda, FACTORIAL_CHECK, RuntimeKind::Python), CheckOutcome::Ok);
    }

    #[test]
    fn test_commented_definition_does_not_count() {
        let code = "# def factorial(n):\nprint(1)\n";
        assert_ne!(check(code, FACTORIAL_CHECK, RuntimeKind::Python), CheckOutcome::Ok);
    }

    #[test]
    fn test_contains_rule_with_return_message() {
        let checksource =
            "if 'def add' not in user_code:\n    return 'You must define a function named add()'";
        assert_eq!(check("def add(a, b):\n    return a + b", checksource, RuntimeKind::Python), CheckOutcome::Ok);
        assert_eq!(
            check("def sub(a, b): pass", checksource, RuntimeKind::Python),
            CheckOutcome::Failed("You must define a function named add()".into())
        );
    }

    #[test]
    fn test_cpp_function_definition() {
        let code = "long long factorial(int n) {\n    return n <= 1 ? 1 : n * factorial(n - 1);\n}\n";
        assert_eq!(check(code, FACTORIAL_CHECK, RuntimeKind::Cpp), CheckOutcome::Ok);

        let call_only = "int main() {\n    return factorial(3);\n}\n";
        assert_ne!(check(call_only, FACTORIAL_CHECK, RuntimeKind::Cpp), CheckOutcome::Ok);
    }

    #[test]
    fn test_cpp_variable_is_not_callable() {
        let code = "int factorial = 3;\n";
        assert_eq!(
            check(code, FACTORIAL_CHECK, RuntimeKind::Cpp),
            CheckOutcome::Failed("factorial is not a function".into())
        );
    }

    #[test]
    fn test_unrecognized_rules_pass() {
        let checksource = "result = run_hidden_check()\nreturn result";
        assert_eq!(check("", checksource, RuntimeKind::Python), CheckOutcome::Ok);
    }

    #[test]
    fn test_example_exercise_checksource() {
        let exercise = example_exercise();
        let fragment = exercise.fragment("python").unwrap();
        assert_ne!(check(&fragment.initcode.replace("factorial", "f"), &fragment.checksource, RuntimeKind::Python), CheckOutcome::Ok);
        assert_eq!(check(&fragment.initcode, &fragment.checksource, RuntimeKind::Python), CheckOutcome::Ok);
    }
}
