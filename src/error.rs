//! Error types for reposerve
//!
//! All modules use `RepoServeResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Prefix carried by every error replayed from a cached failure record.
///
/// Callers tell a throttled failure from a fresh one by string-prefix inspection.
pub const CACHED_ERROR_PREFIX: &str = "Manifest generation error (cached)";

/// Result type alias for reposerve operations
pub type RepoServeResult<T> = Result<T, RepoServeError>;

/// Coarse classification of render failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A reference escaped the repository root or used a disallowed scheme
    PathEscape,
    /// Backend output could not be parsed as manifests
    MalformedOutput,
    /// A declared value or parameter file does not exist
    MissingReference,
    /// Replay of a cached failure while generation is paused
    BreakerThrottled,
    /// Deadline or cancellation; never cached
    Transient,
    /// Backend tool failed
    Tool,
    /// Everything that is not a render failure (IO, config, internal)
    Other,
}

/// All errors that can occur in reposerve
#[derive(Error, Debug)]
pub enum RepoServeError {
    // Sandbox errors
    #[error("{reference} {reason}")]
    PathEscape { reference: String, reason: String },

    #[error("{path}: no such file or directory")]
    MissingReference { path: String },

    // Render errors
    #[error("failed to parse manifests from {source_path}: {reason}")]
    MalformedOutput { source_path: String, reason: String },

    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("config management plugin '{0}' is not configured")]
    PluginNotFound(String),

    #[error("no chart version of '{chart}' satisfies '{constraint}'")]
    ChartVersionNotFound { chart: String, constraint: String },

    // Breaker errors
    #[error("{}: {}", CACHED_ERROR_PREFIX, .0)]
    BreakerThrottled(String),

    #[error("manifest generation interrupted: {0}")]
    Transient(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl RepoServeError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a path escape error naming only the offending reference
    pub fn path_escape(reference: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::PathEscape {
            reference: reference.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a tool failure error
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a malformed output error
    pub fn malformed(source_path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::MalformedOutput {
            source_path: source_path.into(),
            reason: reason.to_string(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PathEscape { .. } => ErrorKind::PathEscape,
            Self::MalformedOutput { .. } | Self::Yaml(_) => ErrorKind::MalformedOutput,
            Self::MissingReference { .. } => ErrorKind::MissingReference,
            Self::BreakerThrottled(_) => ErrorKind::BreakerThrottled,
            Self::Transient(_) => ErrorKind::Transient,
            Self::Tool { .. } | Self::PluginNotFound(_) | Self::ChartVersionNotFound { .. } => {
                ErrorKind::Tool
            }
            _ => ErrorKind::Other,
        }
    }

    /// Transient errors must never be written to the failure cache
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Whether this error was replayed from a failure record
    pub fn is_cached(&self) -> bool {
        self.kind() == ErrorKind::BreakerThrottled
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::PathEscape { .. } => {
                Some("Keep value files, file parameters and libraries inside the repository")
            }
            Self::BreakerThrottled(_) => {
                Some("Generation is paused after repeated failures. Retry with --no-cache to force a render")
            }
            Self::PluginNotFound(_) => Some("Declare the plugin under [[plugins]] in config.toml"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = RepoServeError::MissingReference {
            path: "values-prod.yaml".to_string(),
        };
        assert_eq!(err.to_string(), "values-prod.yaml: no such file or directory");
    }

    #[test]
    fn cached_error_carries_prefix() {
        let err = RepoServeError::BreakerThrottled("helm failed: boom".to_string());
        assert!(err.to_string().starts_with(CACHED_ERROR_PREFIX));
        assert!(err.to_string().ends_with("helm failed: boom"));
        assert!(err.is_cached());
    }

    #[test]
    fn error_kinds() {
        assert_eq!(
            RepoServeError::path_escape("../x", "resolved to outside repository root").kind(),
            ErrorKind::PathEscape
        );
        assert_eq!(RepoServeError::tool("helm", "exit 1").kind(), ErrorKind::Tool);
        assert!(RepoServeError::Transient("deadline exceeded".into()).is_transient());
        assert!(!RepoServeError::tool("helm", "exit 1").is_transient());
    }

    #[test]
    fn error_hint() {
        let err = RepoServeError::PluginNotFound("cmp".to_string());
        assert!(err.hint().unwrap().contains("[[plugins]]"));
        assert_eq!(RepoServeError::Internal("x".into()).hint(), None);
    }
}
