//! Error types for directory operations.
//!
//! Every failure surfaced by the directory client is one variant of [`Error`]. Nothing in the
//! client retries: each variant carries enough context (operation, distinguished name, cause) to
//! diagnose the failure without querying the directory again.

use thiserror::Error;

/// Main error type for directory operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The directory server could not be reached.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The bind request was rejected.
    #[error("Authentication failed for `{principal}`: {message}")]
    Authentication {
        /// Principal used for the bind
        principal: String,
        /// Server or transport message
        message: String,
    },

    /// A search, add, modify, modify-DN or delete request failed.
    #[error("Directory {operation} on `{dn}` failed: {message}")]
    Transport {
        /// Protocol operation that failed (e.g. `search`, `modify`)
        operation: String,
        /// Target distinguished name of the operation
        dn: String,
        /// Underlying cause
        message: String,
    },

    /// Operation timed out
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A lookup that must be unique matched several entries.
    #[error("Ambiguous result: {count} {kind} entries named `{name}` under `{base}`")]
    AmbiguousResult {
        /// Entity kind searched for
        kind: String,
        /// Name searched for
        name: String,
        /// Search base
        base: String,
        /// Number of matching entries
        count: usize,
    },

    /// An entity with the requested name exists in a different container.
    #[error("Conflict: {kind} `{name}` already exists at `{existing}`, requested `{requested}`")]
    Conflict {
        /// Entity kind
        kind: String,
        /// Requested name
        name: String,
        /// Distinguished name of the existing entry
        existing: String,
        /// Distinguished name that was requested
        requested: String,
    },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Delete refused because the target still has subordinate entries.
    #[error("Refusing to delete `{dn}`: it has child entries (e.g. `{child}`)")]
    HasChildren {
        /// Entry that was to be deleted
        dn: String,
        /// First child entry found
        child: String,
    },

    /// The entry was created but a follow-up step failed.
    ///
    /// The entry is left in whatever state the server reached; for users this means a disabled
    /// account that may lack a password or uid number. Callers must repair or delete it.
    #[error("Entry `{dn}` was created but {step} failed: {source}")]
    IncompleteCreate {
        /// Distinguished name of the created entry
        dn: String,
        /// Post-create step that failed
        step: String,
        /// Failure of that step
        #[source]
        source: Box<Error>,
    },

    /// Malformed security identifier
    #[error("Invalid security identifier: {0}")]
    InvalidSid(String),

    /// Malformed object GUID
    #[error("Invalid GUID: {0}")]
    InvalidGuid(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Specialized result type for directory operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Builds a [`Error::Transport`] for the given operation and target.
    #[must_use]
    pub fn transport(
        operation: impl Into<String>,
        dn: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        Self::Transport {
            operation: operation.into(),
            dn: dn.into(),
            message: message.to_string(),
        }
    }

    /// Wraps a post-create failure, keeping the created DN and the failing step.
    #[must_use]
    pub fn incomplete_create(dn: impl Into<String>, step: impl Into<String>, source: Self) -> Self {
        Self::IncompleteCreate {
            dn: dn.into(),
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Authentication { .. } => "AUTHENTICATION_ERROR",
            Self::Transport { .. } => "TRANSPORT_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::AmbiguousResult { .. } => "AMBIGUOUS_RESULT",
            Self::Conflict { .. } => "CONFLICT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::HasChildren { .. } => "HAS_CHILDREN",
            Self::IncompleteCreate { .. } => "INCOMPLETE_CREATE",
            Self::InvalidSid(_) => "INVALID_SID",
            Self::InvalidGuid(_) => "INVALID_GUID",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// Returns true if this error should be logged as a serious error.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Transport { .. }
                | Self::AmbiguousResult { .. }
                | Self::IncompleteCreate { .. }
                | Self::ConfigError(_)
        )
    }
}

// Conversions from external error types
impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::ConfigError(format!("invalid directory URL: {err}"))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ValidationError(err.to_string())
    }
}

impl From<uuid::Error> for Error {
    fn from(err: uuid::Error) -> Self {
        Self::InvalidGuid(err.to_string())
    }
}
