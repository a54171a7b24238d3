/// Build-state error types
use std::path::PathBuf;
use thiserror::Error;

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Malformed {kind} key '{key}': {reason}")]
    MalformedKey {
        kind: &'static str,
        key: String,
        reason: String,
    },

    #[error("Build state syntax error on line {line}: {reason}")]
    LedgerSyntax { line: usize, reason: String },

    /// Two different objects claimed the same key, or the graph is otherwise
    /// inconsistent. Never recovered from.
    #[error("Internal consistency violation: {0}")]
    Invariant(String),

    #[error("Compilation of chunk '{chunk}' failed: {error}")]
    CompilationError { chunk: String, error: String },

    #[error("Source scan failed: {0}")]
    ScanError(String),

    #[error("Invalid glob pattern '{pattern}': {error}")]
    InvalidPattern { pattern: String, error: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error at {path}: {error}")]
    IoError {
        path: PathBuf,
        error: std::io::Error,
    },
}

impl BuildError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            error,
        }
    }

    /// Create a malformed key error
    pub fn malformed_key(
        kind: &'static str,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedKey {
            kind,
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a ledger syntax error for a 1-based line number
    pub fn ledger_syntax(line: usize, reason: impl Into<String>) -> Self {
        Self::LedgerSyntax {
            line,
            reason: reason.into(),
        }
    }

    /// Create an internal consistency violation
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }

    /// Create a compilation error
    pub fn compilation(chunk: impl Into<String>, error: impl ToString) -> Self {
        Self::CompilationError {
            chunk: chunk.into(),
            error: error.to_string(),
        }
    }

    /// Whether this error must abort the build instead of being recovered
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_key_display() {
        let err = BuildError::malformed_key("package", "nocolon", "missing ':'");
        let msg = err.to_string();
        assert!(msg.contains("package"));
        assert!(msg.contains("nocolon"));
        assert!(msg.contains("missing ':'"));
    }

    #[test]
    fn test_ledger_syntax_display() {
        let err = BuildError::ledger_syntax(7, "package outside module");
        assert_eq!(
            err.to_string(),
            "Build state syntax error on line 7: package outside module"
        );
    }

    #[test]
    fn test_only_invariant_is_fatal() {
        assert!(BuildError::invariant("dup").is_fatal());
        assert!(!BuildError::ledger_syntax(1, "x").is_fatal());
        assert!(!BuildError::compilation("chunk-0", "boom").is_fatal());
    }

    #[test]
    fn test_config_error_wraps() {
        let err: BuildError = ConfigError::InvalidValue {
            field: "parallelism".to_string(),
            reason: "must be at least 1".to_string(),
        }
        .into();
        assert!(err.to_string().contains("parallelism"));
    }
}
