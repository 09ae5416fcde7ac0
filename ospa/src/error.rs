//! Error types for the ospa runtime.
//!
//! [`Error`] is the taxonomy every fallible runtime operation reports
//! through; each variant is a distinct failure mode the caller can
//! discriminate on. Tool failures are the one exception: they are captured
//! as [`ToolError`] inside the action's result and never cross a turn
//! boundary.

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for runtime operations.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Missing or invalid configuration (bad URL, missing key, illegal
    /// state machine).
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration issue.
        message: String,
    },

    /// Two tools with the same name were registered for one request.
    #[error("Duplicate tool name: '{name}'")]
    DuplicateToolName {
        /// The offending tool name.
        name: String,
    },

    /// An agent prompt template was rendered without all of its variables.
    #[error("Agent '{agent}' is missing template variables: {variables:?}")]
    MissingTemplateVariable {
        /// Name of the agent whose template was not satisfied.
        agent: String,
        /// The variables that were not supplied.
        variables: Vec<String>,
    },

    /// State selection produced a name outside the allowed set twice.
    #[error("Invalid state selection '{got}', allowed: {allowed:?}")]
    InvalidStateSelection {
        /// The name the model produced.
        got: String,
        /// The names that were allowed.
        allowed: Vec<String>,
    },

    /// A structured-output response could not be parsed after one repair
    /// attempt.
    #[error("Schema violation: expected {expected}, got: {got}")]
    SchemaViolation {
        /// Description of the expected shape.
        expected: String,
        /// The offending output (possibly truncated).
        got: String,
    },

    /// An LLM, HTTP, or vector-store call exceeded its time budget.
    #[error("Upstream timeout during {operation}")]
    UpstreamTimeout {
        /// The operation that timed out.
        operation: String,
    },

    /// A non-timeout upstream failure (status >= 400 or network error).
    #[error("Upstream error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Upstream {
        /// HTTP status code, when one was received.
        status: Option<u16>,
        /// Error description.
        message: String,
    },

    /// The operation was cooperatively cancelled.
    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    /// Create a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a duplicate-tool-name error.
    #[must_use]
    pub fn duplicate_tool(name: impl Into<String>) -> Self {
        Self::DuplicateToolName { name: name.into() }
    }

    /// Create a missing-template-variable error.
    #[must_use]
    pub fn missing_template_vars(agent: impl Into<String>, variables: Vec<String>) -> Self {
        Self::MissingTemplateVariable {
            agent: agent.into(),
            variables,
        }
    }

    /// Create an invalid-state-selection error.
    #[must_use]
    pub fn invalid_state(got: impl Into<String>, allowed: Vec<String>) -> Self {
        Self::InvalidStateSelection {
            got: got.into(),
            allowed,
        }
    }

    /// Create a schema-violation error. The offending output is truncated
    /// to keep error strings readable.
    #[must_use]
    pub fn schema(expected: impl Into<String>, got: impl Into<String>) -> Self {
        let mut got = got.into();
        if got.len() > 512 {
            got.truncate(512);
            got.push_str("...");
        }
        Self::SchemaViolation {
            expected: expected.into(),
            got,
        }
    }

    /// Create an upstream timeout error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::UpstreamTimeout {
            operation: operation.into(),
        }
    }

    /// Create an upstream error without an HTTP status.
    #[must_use]
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            status: None,
            message: message.into(),
        }
    }

    /// Create an upstream error carrying an HTTP status code.
    #[must_use]
    pub fn upstream_status(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Whether this error is worth retrying at a higher level.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamTimeout { .. }
                | Self::Upstream {
                    status: None | Some(429 | 500..=599),
                    ..
                }
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(
                err.url()
                    .map_or_else(|| "http request".to_owned(), ToString::to_string),
            )
        } else {
            Self::Upstream {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }
}

/// Error type for tool execution.
///
/// Tool errors are contained: the executor stores them inside the action's
/// `result` as `{"error": ...}` and the step continues.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ToolError {
    /// The model-supplied arguments do not satisfy the tool's schema.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool's own execution failed.
    #[error("{0}")]
    Execution(String),

    /// The tool's network call exceeded its budget.
    #[error("timeout")]
    Timeout,
}

impl ToolError {
    /// Create an invalid-arguments error.
    #[must_use]
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }

    /// Create an execution error.
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Execution(err.to_string())
        }
    }
}
