//! Error types for the machine actuator
//!
//! Every reconciliation failure is one of these variants. The variants map onto
//! the machine-status error reasons the control plane understands, see
//! [`Error::status_reason`].

use thiserror::Error;

/// Result type alias for actuator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Machine-status reason for a configuration the actuator refuses to act on
pub const INVALID_CONFIGURATION_REASON: &str = "InvalidConfiguration";
/// Machine-status reason for a failed instance creation
pub const CREATE_ERROR_REASON: &str = "CreateError";
/// Machine-status reason for a failed update
pub const UPDATE_ERROR_REASON: &str = "UpdateError";
/// Machine-status reason for a failed instance deletion
pub const DELETE_ERROR_REASON: &str = "DeleteError";

/// Core error type for the machine actuator
#[derive(Error, Debug)]
pub enum Error {
    /// The machine spec, labels or referenced cloud resources are invalid
    #[error("invalid machine configuration: {0}")]
    InvalidConfiguration(String),

    /// Creating the instance (or anything it depends on) failed
    #[error("{0}")]
    Create(String),

    /// Updating the machine failed
    #[error("{0}")]
    Update(String),

    /// Deleting the instance failed
    #[error("{0}")]
    Delete(String),

    /// A cloud collaborator call failed
    #[error("cloud provider error ({operation}): {message}")]
    Provider {
        /// Operation that was attempted
        operation: String,
        /// Error message
        message: String,
    },

    /// A named object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The machine record was modified concurrently
    #[error("conflict: {0}")]
    Conflict(String),

    /// The machine record store rejected a read or write
    #[error("machine store error: {0}")]
    Store(String),

    /// The user data could not be assembled
    #[error("user data error: {0}")]
    UserData(String),

    /// The named postprocessor is not registered
    #[error("Postprocessor error: unknown postprocessor: '{0}'")]
    UnknownPostprocessor(String),

    /// The postprocessor rejected the rendered user data
    #[error("Postprocessor error: {0}")]
    Postprocessor(String),

    /// A bounded wait ran out of time
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout {
        /// What was being waited for
        what: String,
        /// How long the wait lasted
        waited: std::time::Duration,
    },

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// A programming invariant does not hold. Never retried.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an invalid configuration error
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a create error
    pub fn create(msg: impl Into<String>) -> Self {
        Self::Create(msg.into())
    }

    /// Create an update error
    pub fn update(msg: impl Into<String>) -> Self {
        Self::Update(msg.into())
    }

    /// Create a delete error
    pub fn delete(msg: impl Into<String>) -> Self {
        Self::Delete(msg.into())
    }

    /// Create a cloud provider error
    pub fn provider(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a user data error
    pub fn user_data(msg: impl Into<String>) -> Self {
        Self::UserData(msg.into())
    }

    /// Create a postprocessor error
    pub fn postprocessor(msg: impl Into<String>) -> Self {
        Self::Postprocessor(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invariant violation
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolated(msg.into())
    }

    /// Machine-status reason this error is recorded under, if it is recorded
    /// explicitly. Errors without an explicit reason take the reason of the
    /// operation that failed.
    pub fn status_reason(&self) -> Option<&'static str> {
        match self {
            Error::InvalidConfiguration(_) => Some(INVALID_CONFIGURATION_REASON),
            Error::Create(_) => Some(CREATE_ERROR_REASON),
            Error::Update(_) => Some(UPDATE_ERROR_REASON),
            Error::Delete(_) => Some(DELETE_ERROR_REASON),
            _ => None,
        }
    }

    /// True for programming errors the control loop must not retry
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InvariantViolated(_))
    }

    /// True when the machine record changed underneath a write
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// True for errors that never reach the machine status: fatal invariant
    /// violations and cancellation
    pub fn bypasses_status(&self) -> bool {
        self.is_fatal() || matches!(self, Error::Cancelled)
    }
}

/// Helper for converting anyhow::Error from collaborators to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
