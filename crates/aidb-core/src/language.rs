//! Debuggee languages

use serde::{Deserialize, Serialize};
use std::fmt;

/// Language of the program being debugged.
///
/// Selects which adapter command line is used from configuration; the engine
/// itself is language-agnostic past that point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Java,
}

impl Language {
    pub const ALL: &'static [Language] = &[Self::Python, Self::JavaScript, Self::Java];

    /// Lowercase name used in config keys and API payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::Java => "java",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Python => "Python",
            Self::JavaScript => "JavaScript",
            Self::Java => "Java",
        }
    }

    /// Determine language from a source file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "py" => Some(Self::Python),
            "js" | "mjs" | "cjs" | "ts" | "jsx" | "tsx" => Some(Self::JavaScript),
            "java" => Some(Self::Java),
            _ => None,
        }
    }

    fn supported_list() -> String {
        Self::ALL
            .iter()
            .map(|l| l.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = ParseLanguageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "python" | "py" => Ok(Self::Python),
            "javascript" | "js" | "node" | "typescript" | "ts" => Ok(Self::JavaScript),
            "java" => Ok(Self::Java),
            _ => Err(ParseLanguageError::new(s)),
        }
    }
}

/// Error type for Language parsing failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLanguageError {
    pub invalid_value: String,
}

impl ParseLanguageError {
    pub fn new(invalid_value: impl Into<String>) -> Self {
        Self {
            invalid_value: invalid_value.into(),
        }
    }
}

impl fmt::Display for ParseLanguageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unsupported language '{}'. Supported: {}",
            self.invalid_value,
            Language::supported_list()
        )
    }
}

impl std::error::Error for ParseLanguageError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("Python".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("node".parse::<Language>().unwrap(), Language::JavaScript);
        assert_eq!(" java ".parse::<Language>().unwrap(), Language::Java);
    }

    #[test]
    fn test_parse_unknown_lists_supported() {
        let err = "cobol".parse::<Language>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("cobol"));
        assert!(msg.contains("python, javascript, java"));
    }

    #[test]
    fn test_from_extension() {
        assert_eq!(Language::from_extension("PY"), Some(Language::Python));
        assert_eq!(Language::from_extension("tsx"), Some(Language::JavaScript));
        assert_eq!(Language::from_extension("rs"), None);
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Language::JavaScript).unwrap();
        assert_eq!(json, "\"javascript\"");
    }
}
