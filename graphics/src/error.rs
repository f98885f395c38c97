//! Graphics error types.

use thiserror::Error;

/// Errors that can occur in the graphics runtime.
///
/// Variants documented as fatal describe conditions the runtime does not try
/// to survive. They are logged where they are detected and returned so the
/// caller can shut down in an orderly way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphicsError {
    /// Failed to initialize the device or one of its subsystems.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),
    /// Failed to create a resource. Fatal for the resource in question.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),
    /// A requested feature is not supported.
    #[error("feature not supported: {0}")]
    FeatureNotSupported(String),
    /// Out of GPU memory. Fatal.
    #[error("out of GPU memory")]
    OutOfMemory,
    /// A descriptor pool has no room left for another set.
    ///
    /// Recovered internally by growing the pool; only surfaces when the
    /// retry on a fresh pool fails as well.
    #[error("descriptor pool out of memory")]
    OutOfPoolMemory,
    /// The GPU device was lost. Fatal.
    #[error("GPU device lost")]
    DeviceLost,
    /// A fence did not signal within the configured timeout. Fatal.
    #[error("fence wait timed out after {0:?}")]
    FenceTimeout(std::time::Duration),
    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// The caller broke the usage contract of the API.
    #[error("contract violation: {0}")]
    ContractViolation(String),
    /// Declared command list dependencies form a cycle.
    #[error("command list dependency cycle detected: {0}")]
    DependencyCycle(String),
    /// The swap target is out of date and must be recreated.
    #[error("swap target outdated, needs recreation")]
    SurfaceOutdated,
    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GraphicsError {
    /// Whether the runtime treats this error as unrecoverable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::OutOfMemory
                | Self::OutOfPoolMemory
                | Self::DeviceLost
                | Self::FenceTimeout(_)
                | Self::Internal(_)
        )
    }
}

/// Report a broken usage contract.
///
/// With validation enabled this panics at the caller; otherwise the
/// violation is logged and the caller skips the offending operation.
#[track_caller]
pub(crate) fn contract_violation(validation: bool, message: &str) {
    if validation {
        panic!("contract violation: {message}");
    }
    log::error!("contract violation: {message}");
}

/// Report a broken usage contract from an operation that returns a `Result`.
///
/// Panics like [`contract_violation`] with validation enabled; otherwise the
/// violation is logged and handed back as [`GraphicsError::ContractViolation`].
#[track_caller]
pub(crate) fn contract_error(validation: bool, message: String) -> GraphicsError {
    contract_violation(validation, &message);
    GraphicsError::ContractViolation(message)
}
