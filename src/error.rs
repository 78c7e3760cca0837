//! Error types for the gpuscout controller

use thiserror::Error;

/// Main error type for gpuscout operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid or missing configuration; unrecoverable at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Network/stream failure talking to the cluster or a sink endpoint
    #[error("transport error: {0}")]
    Transport(String),

    /// The diagnostic tool or a sink backend refused the operation
    #[error("backend error: {0}")]
    Backend(String),

    /// The diagnostic command ran but exited non-zero
    #[error("diagnostic command exited with code {code}: {stderr}")]
    CommandExit {
        /// Exit code reported on the exec status channel
        code: i32,
        /// Tail of the captured stderr stream
        stderr: String,
    },

    /// Malformed input that could not be decoded
    #[error("parse error: {0}")]
    Parse(String),

    /// Sink write/health/close failure
    #[error("sink error: {0}")]
    Sink(String),

    /// A record or label value failed validation
    #[error("validation error: {0}")]
    Validation(String),

    /// A per-pod deadline elapsed before the pipeline finished
    #[error("deadline exceeded: {0}")]
    Timeout(String),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a transport error with the given message
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a backend error with the given message
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a parse error with the given message
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a sink error with the given message
    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Coarse failure kind used as the `reason` label on the failure counter
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Kube(_) => "kube_api",
            Error::Transport(_) => "transport",
            Error::Backend(_) => "backend",
            Error::CommandExit { .. } => "command_exit",
            Error::Parse(_) => "parse",
            Error::Sink(_) => "sink",
            Error::Validation(_) => "validation",
            Error::Timeout(_) => "timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = Error::config("CLUSTER_NAME must be set");
        assert!(err.to_string().contains("configuration error"));
        assert!(err.to_string().contains("CLUSTER_NAME"));

        let err = Error::backend("nvidia-smi: command not found");
        assert!(err.to_string().contains("backend error"));

        let err = Error::CommandExit {
            code: 127,
            stderr: "sh: nvidia-smi: not found".into(),
        };
        assert!(err.to_string().contains("127"));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn reason_labels_are_stable() {
        assert_eq!(Error::transport("eof").reason(), "transport");
        assert_eq!(Error::parse("bad xml").reason(), "parse");
        assert_eq!(
            Error::CommandExit {
                code: 1,
                stderr: String::new()
            }
            .reason(),
            "command_exit"
        );
        assert_eq!(Error::Timeout("30s".into()).reason(), "timeout");
    }
}
