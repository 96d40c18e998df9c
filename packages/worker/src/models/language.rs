//! Toolchain registry: language tag to compile/run command templates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config::{LimitsConfig, WorkerAppConfig};
use crate::models::sandbox::ResourceLimits;

/// Placeholder replaced by the source file name.
const SOURCE_PLACEHOLDER: &str = "{source}";
/// Placeholder replaced by the compiled artifact name.
const BINARY_PLACEHOLDER: &str = "{binary}";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolchainError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("invalid command template for '{tag}': {reason}")]
    InvalidTemplate { tag: String, reason: String },
}

/// The closed set of supported languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    Python,
    Cpp,
    C,
    Java,
}

impl Language {
    pub const ALL: &'static [Language] = &[Self::Python, Self::Cpp, Self::C, Self::Java];

    /// Wire tag used by submissions.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Python => "py",
            Self::Cpp => "cpp",
            Self::C => "c",
            Self::Java => "java",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|l| l.tag() == tag)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Python => "Python 3",
            Self::Cpp => "C++",
            Self::C => "C",
            Self::Java => "Java",
        }
    }

    fn source_file(&self) -> &'static str {
        match self {
            Self::Python => "main.py",
            Self::Cpp => "main.cpp",
            Self::C => "main.c",
            Self::Java => "Main.java",
        }
    }

    fn binary_name(&self) -> &'static str {
        match self {
            Self::Java => "Main",
            _ => "main",
        }
    }

    fn default_compile(&self) -> Option<&'static str> {
        match self {
            Self::Python => None,
            Self::Cpp => Some("g++ -O2 -std=c++17 -o {binary} {source}"),
            Self::C => Some("gcc -O2 -std=c17 -o {binary} {source}"),
            Self::Java => Some("javac -encoding UTF-8 {source}"),
        }
    }

    fn default_run(&self) -> &'static str {
        match self {
            Self::Python => "python3 {source}",
            Self::Cpp | Self::C => "./{binary}",
            Self::Java => "java -Xss64m -cp . {binary}",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Whitespace-separated argv with `{source}` / `{binary}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate(String);

impl CommandTemplate {
    fn parse(tag: &str, template: &str) -> Result<Self, ToolchainError> {
        if template.split_whitespace().next().is_none() {
            return Err(ToolchainError::InvalidTemplate {
                tag: tag.to_string(),
                reason: "template is empty".into(),
            });
        }
        Ok(Self(template.to_string()))
    }

    pub fn render(&self, source: &str, binary: &str) -> Vec<String> {
        self.0
            .split_whitespace()
            .map(|arg| {
                arg.replace(SOURCE_PLACEHOLDER, source)
                    .replace(BINARY_PLACEHOLDER, binary)
            })
            .collect()
    }
}

/// Compile/run contract for one language.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub language: Language,
    compile: Option<CommandTemplate>,
    run: CommandTemplate,
    /// Limits applied to the compile step, independent of the problem.
    pub compile_limits: ResourceLimits,
}

impl Toolchain {
    /// File name the source code is written to.
    pub fn source_file(&self) -> &'static str {
        self.language.source_file()
    }

    pub fn binary_name(&self) -> &'static str {
        self.language.binary_name()
    }

    pub fn compile_command(&self) -> Option<Vec<String>> {
        self.compile
            .as_ref()
            .map(|t| t.render(self.source_file(), self.binary_name()))
    }

    pub fn run_command(&self) -> Vec<String> {
        self.run.render(self.source_file(), self.binary_name())
    }
}

/// Maps language tags to toolchains. Unknown tags are always an error.
#[derive(Debug, Clone)]
pub struct ToolchainRegistry {
    toolchains: HashMap<Language, Toolchain>,
}

impl ToolchainRegistry {
    /// Built-in toolchains with the given compile limits.
    pub fn with_defaults(limits: &LimitsConfig) -> Self {
        let compile_limits = ResourceLimits {
            time_limit: Duration::from_millis(limits.compile_time_limit_ms as u64),
            memory_limit_kb: limits.compile_memory_limit_kb as u64,
        };

        let toolchains = Language::ALL
            .iter()
            .map(|&language| {
                let toolchain = Toolchain {
                    language,
                    compile: language
                        .default_compile()
                        .map(|t| CommandTemplate(t.to_string())),
                    run: CommandTemplate(language.default_run().to_string()),
                    compile_limits: compile_limits.clone(),
                };
                (language, toolchain)
            })
            .collect();

        Self { toolchains }
    }

    /// Built-in toolchains with `[toolchains.<tag>]` overrides applied.
    pub fn from_config(config: &WorkerAppConfig) -> Result<Self, ToolchainError> {
        let mut registry = Self::with_defaults(&config.limits);

        for (tag, overrides) in &config.toolchains {
            let language = Language::from_tag(tag)
                .ok_or_else(|| ToolchainError::UnsupportedLanguage(tag.clone()))?;
            let toolchain = registry
                .toolchains
                .get_mut(&language)
                .ok_or_else(|| ToolchainError::UnsupportedLanguage(tag.clone()))?;

            if let Some(compile) = &overrides.compile {
                if toolchain.compile.is_none() {
                    return Err(ToolchainError::InvalidTemplate {
                        tag: tag.clone(),
                        reason: "interpreted languages have no compile step".into(),
                    });
                }
                toolchain.compile = Some(CommandTemplate::parse(tag, compile)?);
            }
            if let Some(run) = &overrides.run {
                toolchain.run = CommandTemplate::parse(tag, run)?;
            }
        }

        Ok(registry)
    }

    pub fn resolve(&self, tag: &str) -> Result<&Toolchain, ToolchainError> {
        Language::from_tag(tag)
            .and_then(|language| self.toolchains.get(&language))
            .ok_or_else(|| ToolchainError::UnsupportedLanguage(tag.to_string()))
    }

    pub fn languages(&self) -> impl Iterator<Item = Language> + '_ {
        self.toolchains.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolchainOverride;

    fn registry() -> ToolchainRegistry {
        ToolchainRegistry::with_defaults(&LimitsConfig::default())
    }

    #[test]
    fn resolves_known_tags() {
        let registry = registry();
        assert_eq!(registry.resolve("py").unwrap().language, Language::Python);
        assert_eq!(registry.resolve("cpp").unwrap().language, Language::Cpp);
        assert_eq!(registry.resolve("c").unwrap().language, Language::C);
        assert_eq!(registry.resolve("java").unwrap().language, Language::Java);
    }

    #[test]
    fn unknown_tag_is_rejected_not_defaulted() {
        let registry = registry();
        assert_eq!(
            registry.resolve("rust").unwrap_err(),
            ToolchainError::UnsupportedLanguage("rust".into())
        );
        assert!(registry.resolve("Python").is_err());
        assert!(registry.resolve("").is_err());
    }

    #[test]
    fn python_skips_compilation() {
        let registry = registry();
        let python = registry.resolve("py").unwrap();
        assert_eq!(python.compile_command(), None);
        assert_eq!(python.run_command(), ["python3", "main.py"]);
    }

    #[test]
    fn cpp_renders_compile_and_run() {
        let registry = registry();
        let cpp = registry.resolve("cpp").unwrap();
        assert_eq!(
            cpp.compile_command().unwrap(),
            ["g++", "-O2", "-std=c++17", "-o", "main", "main.cpp"]
        );
        assert_eq!(cpp.run_command(), ["./main"]);
        assert_eq!(cpp.compile_limits.time_limit, Duration::from_secs(10));
    }

    #[test]
    fn config_overrides_templates() {
        let mut config = WorkerAppConfig::default();
        config.toolchains.insert(
            "c".into(),
            ToolchainOverride {
                compile: Some("clang -o {binary} {source}".into()),
                run: None,
            },
        );
        let registry = ToolchainRegistry::from_config(&config).unwrap();
        assert_eq!(
            registry.resolve("c").unwrap().compile_command().unwrap(),
            ["clang", "-o", "main", "main.c"]
        );
    }

    #[test]
    fn config_rejects_unknown_tag_and_bad_templates() {
        let mut config = WorkerAppConfig::default();
        config
            .toolchains
            .insert("go".into(), ToolchainOverride::default());
        assert_eq!(
            ToolchainRegistry::from_config(&config).unwrap_err(),
            ToolchainError::UnsupportedLanguage("go".into())
        );

        let mut config = WorkerAppConfig::default();
        config.toolchains.insert(
            "py".into(),
            ToolchainOverride {
                compile: Some("python3 -m py_compile {source}".into()),
                run: None,
            },
        );
        assert!(matches!(
            ToolchainRegistry::from_config(&config),
            Err(ToolchainError::InvalidTemplate { .. })
        ));

        let mut config = WorkerAppConfig::default();
        config.toolchains.insert(
            "cpp".into(),
            ToolchainOverride {
                compile: None,
                run: Some("   ".into()),
            },
        );
        assert!(matches!(
            ToolchainRegistry::from_config(&config),
            Err(ToolchainError::InvalidTemplate { .. })
        ));
    }
}
