//! Error types for the stackup deployment system.
//!
//! Pre-flight failures (configuration, malformed descriptor sets) abort a run
//! before any resource is touched. Provider and remote failures are recorded
//! per resource by the orchestrator and only affect that resource's
//! descendants.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the stackup deployment system.
#[derive(Debug, Error)]
pub enum StackupError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Descriptor set errors found while building the dependency graph.
    #[error("Dependency graph error: {0}")]
    Graph(#[from] GraphError),

    /// Provider adapter errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Remote execution errors.
    #[error("Remote execution error: {0}")]
    Remote(#[from] RemoteError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// One or more required environment variables are absent or empty.
    #[error("Missing required environment variables: {}", names.join(", "))]
    MissingConfiguration {
        /// Names of every missing variable, in declaration order.
        names: Vec<String>,
    },

    /// A referenced configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// A configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// The deployment stage name cannot be used.
    #[error("Invalid stage name '{stage}': {reason}")]
    InvalidStage {
        /// The rejected stage name.
        stage: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Errors raised while turning descriptors into a dependency graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// No topological ordering exists.
    #[error("Dependency cycle detected between: {}", ids.join(", "))]
    CycleDetected {
        /// Resource ids participating in the cycle, sorted.
        ids: Vec<String>,
    },

    /// A descriptor names a resource that is not part of the set.
    #[error("Resource '{resource}' references unknown resource '{target}'")]
    DanglingReference {
        /// The descriptor holding the reference.
        resource: String,
        /// The id that could not be found.
        target: String,
    },

    /// Two descriptors share the same id.
    #[error("Duplicate resource id: {id}")]
    DuplicateId {
        /// The duplicated id.
        id: String,
    },
}

/// Errors raised by provider adapters.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No adapter is registered for a resource kind.
    #[error("No adapter registered for resource kind '{kind}'")]
    NoAdapter {
        /// The resource kind tag.
        kind: String,
    },

    /// Resolved inputs do not match what the adapter expects.
    #[error("Invalid inputs for '{resource}': {message}")]
    InvalidInput {
        /// Resource id.
        resource: String,
        /// Description of the problem.
        message: String,
    },

    /// A dependency completed without producing a referenced output.
    #[error("Resource '{resource}' has no output named '{output}'")]
    MissingOutput {
        /// Resource that was expected to produce the output.
        resource: String,
        /// The missing output name.
        output: String,
    },

    /// The backend API rejected a request.
    #[error("{provider} API request failed: {status} - {message}")]
    Api {
        /// Backend name.
        provider: &'static str,
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// The backend could not be reached.
    #[error("Network error communicating with {provider}: {message}")]
    Network {
        /// Backend name.
        provider: &'static str,
        /// Description of the network error.
        message: String,
    },

    /// The backend answered with something unexpected.
    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse {
        /// Backend name.
        provider: &'static str,
        /// Description of the response issue.
        message: String,
    },

    /// A resource did not become ready.
    #[error("Resource '{resource}' did not become ready: {message}")]
    NotReady {
        /// Resource id.
        resource: String,
        /// Last observed condition.
        message: String,
    },

    /// A local operation (key generation, build context) failed.
    #[error("{message}")]
    Local {
        /// Description of the failure.
        message: String,
    },
}

/// Remote execution errors.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The host stayed unreachable for the whole retry budget.
    #[error("Host {host} unreachable after {attempts} attempt(s): {message}")]
    Connection {
        /// Target `user@host:port`.
        host: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last transport error.
        message: String,
    },

    /// A command ran but exited non-zero.
    #[error("Command on {host} exited with status {exit_code}: {stderr}")]
    CommandFailed {
        /// Target `user@host:port`.
        host: String,
        /// Exit code reported by the remote shell.
        exit_code: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// The local SSH client could not be started.
    #[error("Failed to start remote shell client: {message}")]
    Spawn {
        /// Description of the failure.
        message: String,
    },

    /// A remote-domain resource lacks usable connection inputs.
    #[error("Invalid connection for '{resource}': {message}")]
    InvalidConnection {
        /// Resource id.
        resource: String,
        /// Description of the problem.
        message: String,
    },
}

/// Result type alias for stackup operations.
pub type Result<T> = std::result::Result<T, StackupError>;

impl StackupError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable by an HTTP client.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(ProviderError::Network { .. }) => true,
            Self::Provider(ProviderError::Api { status, .. }) => {
                *status == 429 || *status >= 500
            }
            _ => false,
        }
    }

    /// Returns true if this error means a remote host could not be reached.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Remote(RemoteError::Connection { .. }))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl ProviderError {
    /// Creates an input error for a resource.
    #[must_use]
    pub fn invalid_input(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Creates an error for a failed local operation.
    #[must_use]
    pub fn local(message: impl Into<String>) -> Self {
        Self::Local {
            message: message.into(),
        }
    }
}
