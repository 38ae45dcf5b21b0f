//! Language configuration for in-browser style execution

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::Context;
use serde::Deserialize;

/// Which runtime adapter drives programs of a language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    Python,
    Cpp,
}

/// Configuration for a supported programming language
#[derive(Debug, Clone)]
pub struct LanguageConfig {
    /// Canonical language name (table key in languages.toml)
    pub name: String,
    pub runtime: RuntimeKind,
    /// Name of the source file (e.g., "main.py")
    pub source_file: String,
    /// Build command (None if the program is interpreted directly)
    pub compile_command: Option<Vec<String>>,
    /// Run command
    pub run_command: Vec<String>,
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageConfig {
    runtime: RuntimeKind,
    source_file: String,
    compile_command: Option<String>,
    run_command: String,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Global language configurations
static LANGUAGES: OnceLock<HashMap<String, LanguageConfig>> = OnceLock::new();

/// Parse a languages table, registering every alias under its lowercase name
pub fn parse_languages(content: &str) -> anyhow::Result<HashMap<String, LanguageConfig>> {
    let raw_configs: HashMap<String, RawLanguageConfig> =
        toml::from_str(content).context("Invalid languages.toml")?;

    let mut languages = HashMap::new();

    for (name, raw) in raw_configs {
        if raw.run_command.trim().is_empty() {
            anyhow::bail!("Empty run_command for {}", name);
        }

        let config = LanguageConfig {
            name: name.to_lowercase(),
            runtime: raw.runtime,
            source_file: raw.source_file,
            compile_command: raw.compile_command.map(|cmd| into_command(&cmd)),
            run_command: into_command(&raw.run_command),
        };

        for alias in raw.aliases {
            languages.insert(alias.to_lowercase(), config.clone());
        }

        languages.insert(name.to_lowercase(), config);
    }

    Ok(languages)
}

/// Initialize language configurations from the embedded TOML file
pub fn init_languages() -> anyhow::Result<()> {
    let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));
    let languages = parse_languages(content)?;

    LANGUAGES
        .set(languages)
        .map_err(|_| anyhow::anyhow!("Languages already initialized"))?;

    Ok(())
}

/// Every configured name and alias with its configuration
pub fn all_languages() -> impl Iterator<Item = (&'static String, &'static LanguageConfig)> {
    LANGUAGES.get().into_iter().flat_map(|langs| langs.iter())
}

/// Get all supported language names
pub fn get_supported_languages() -> Vec<String> {
    LANGUAGES
        .get()
        .map(|langs| langs.keys().cloned().collect())
        .unwrap_or_default()
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}
