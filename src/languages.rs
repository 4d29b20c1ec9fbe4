//! Language configuration for compilation and execution
//!
//! Maps a requested language identifier (case-insensitive, aliases included)
//! to the source file it is written to and the commands that build and run it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::harness::HarnessKind;
use crate::sandbox::{CommandSpec, SANDBOX_WORK_DIR};

/// Entry class used when a Java source declares no `public class`
pub const DEFAULT_ENTRY_CLASS: &str = "Main";

const BUILTIN_LANGUAGES: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));

/// Configuration for a supported programming language
#[derive(Debug, Clone)]
pub struct LanguageConfig {
    /// Canonical name (the TOML table key)
    pub name: String,
    /// Source file name template (e.g., "main.py" or "{class}.java")
    pub source_file: String,
    /// Compile command template (None if not needed)
    pub compile_command: Option<Vec<String>>,
    /// Upper bound for the compile step, applied on top of the request timeout
    pub compile_timeout_cap: Option<Duration>,
    /// Run command template
    pub run_command: Vec<String>,
    /// Test harness flavor, if grading is supported
    pub harness: Option<HarnessKind>,
}

/// Compile invocation with its own timeout
#[derive(Debug, Clone, PartialEq)]
pub struct CompileStep {
    pub command: CommandSpec,
    pub timeout: Duration,
}

/// Everything needed to materialize and run one submission
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    /// Absolute in-sandbox path of the source file
    pub source_path: String,
    pub compile: Option<CompileStep>,
    pub run: CommandSpec,
}

impl LanguageConfig {
    fn uses_entry_class(&self) -> bool {
        self.source_file.contains("{class}")
            || self.run_command.iter().any(|part| part.contains("{class}"))
    }

    /// Resolve file name and commands for `code` under the given run timeout
    pub fn plan(&self, code: &str, timeout: Duration) -> ExecutionPlan {
        let class = if self.uses_entry_class() {
            detect_entry_class(code)
        } else {
            DEFAULT_ENTRY_CLASS.to_string()
        };

        let file_name = self.source_file.replace("{class}", &class);
        let source_path = format!("{}/{}", SANDBOX_WORK_DIR, file_name);

        let compile = self.compile_command.as_ref().map(|cmd| CompileStep {
            command: render_command(cmd, &source_path, &class),
            timeout: match self.compile_timeout_cap {
                Some(cap) => timeout.min(cap),
                None => timeout,
            },
        });

        ExecutionPlan {
            run: render_command(&self.run_command, &source_path, &class),
            source_path,
            compile,
        }
    }

    /// Run command pointed at an arbitrary source path (used for harnesses)
    pub fn run_command_for(&self, source_path: &str) -> CommandSpec {
        render_command(&self.run_command, source_path, DEFAULT_ENTRY_CLASS)
    }
}

fn render_command(template: &[String], source_path: &str, class: &str) -> CommandSpec {
    let parts: Vec<String> = template
        .iter()
        .map(|part| {
            part.replace("{source}", source_path)
                .replace("{class}", class)
                .replace("{dir}", SANDBOX_WORK_DIR)
        })
        .collect();
    CommandSpec::from_vec(&parts)
}

/// Find the entry class of a Java source.
///
/// Takes the first line starting with `public class `; its third token, minus any
/// trailing braces, is the class name. Anything that is not a plain Java
/// identifier falls back to [`DEFAULT_ENTRY_CLASS`], so the name is always safe
/// to use as a file name.
pub fn detect_entry_class(code: &str) -> String {
    let declared = code
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("public class "))
        .and_then(|line| line.split_whitespace().nth(2))
        .map(|token| token.trim_end_matches('{'));

    match declared {
        Some(name) if is_java_identifier(name) => name.to_string(),
        _ => DEFAULT_ENTRY_CLASS.to_string(),
    }
}

fn is_java_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' || first == '$' => {
            chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageConfig {
    source_file: String,
    compile_command: Option<String>,
    compile_timeout_secs: Option<u64>,
    run_command: String,
    #[serde(default)]
    aliases: Vec<String>,
    harness: Option<HarnessKind>,
}

/// Language table keyed by lowercase name and alias
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    languages: HashMap<String, Arc<LanguageConfig>>,
}

impl LanguageRegistry {
    /// Load from `path`, or the built-in table when no path is given
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read language config {:?}", path))?;
                Self::from_toml_str(&content)
            }
            None => Self::builtin(),
        }
    }

    /// Built-in toolchain table (files/languages.toml)
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_toml_str(BUILTIN_LANGUAGES)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let raw_configs: HashMap<String, RawLanguageConfig> =
            toml::from_str(content).context("Invalid language config")?;

        let mut languages = HashMap::new();

        for (name, raw) in raw_configs {
            let name = name.to_lowercase();
            let run_command = into_command(&raw.run_command);
            if run_command.is_empty() {
                anyhow::bail!("Empty run_command for {}", name);
            }
            if raw.source_file.is_empty() || raw.source_file.contains('/') {
                anyhow::bail!("Invalid source_file for {}: {:?}", name, raw.source_file);
            }

            let config = Arc::new(LanguageConfig {
                name: name.clone(),
                source_file: raw.source_file,
                compile_command: raw.compile_command.map(|cmd| into_command(&cmd)),
                compile_timeout_cap: raw.compile_timeout_secs.map(Duration::from_secs),
                run_command,
                harness: raw.harness,
            });

            for key in std::iter::once(name.clone()).chain(raw.aliases.iter().map(|a| a.to_lowercase())) {
                if languages.insert(key.clone(), config.clone()).is_some() {
                    anyhow::bail!("Duplicate language name or alias: {}", key);
                }
            }
        }

        Ok(Self { languages })
    }

    /// Get language configuration by language name or alias
    pub fn resolve(&self, language: &str) -> Option<&LanguageConfig> {
        self.languages
            .get(&language.trim().to_lowercase())
            .map(|config| config.as_ref())
    }

    /// Get all accepted language identifiers, aliases included
    pub fn supported_languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.languages.keys().cloned().collect();
        names.sort();
        names
    }
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}
