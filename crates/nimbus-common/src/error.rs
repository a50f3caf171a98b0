use thiserror::Error;

/// Failure taxonomy for a deployment run.
///
/// Every failure a caller can observe maps onto one of these variants, and
/// each variant maps onto exactly one [`FailureCategory`] so the command
/// surface can pick an exit status without inspecting messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeployError {
    #[error("unknown model '{name}', expected one of: {available}")]
    UnknownModel { name: String, available: String },

    /// Bad registry entry, bad user input, or missing staged model files.
    /// Always raised before any cluster call.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// Network errors and 5xx-class responses. Retried by the cluster client
    /// and only surfaced once the retry ceiling is exhausted.
    #[error("transient cluster error: {0}")]
    Transient(String),

    /// The cluster rejected the request or reported a permanent failure.
    #[error("permanent cluster error: {0}")]
    Permanent(String),

    #[error("apply of {resource} failed: {reason}")]
    ApplyFailed { resource: String, reason: String },

    #[error("deployment '{deployment}' not ready after {timeout_secs}s")]
    TimedOut { deployment: String, timeout_secs: u64 },

    #[error("validation request failed: {0}")]
    ValidationFailed(String),

    #[error("deployment cancelled by caller")]
    Cancelled,

    /// Local artifact staging failed for a reason other than bad input
    /// (permissions, full disk, ...).
    #[error("staging failed: {0}")]
    Staging(String),
}

/// Coarse grouping used for exit statuses and summary lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// Rejected before any cluster interaction.
    InvalidInput,
    /// Provisioning, apply, readiness, or cancellation.
    Provisioning,
    /// The deployment came up but the smoke test failed.
    Validation,
}

impl DeployError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn missing_credential(msg: impl Into<String>) -> Self {
        Self::MissingCredential(msg.into())
    }

    pub fn category(&self) -> FailureCategory {
        match self {
            Self::UnknownModel { .. } | Self::InvalidConfig(_) | Self::MissingCredential(_) => {
                FailureCategory::InvalidInput
            }
            Self::ValidationFailed(_) => FailureCategory::Validation,
            Self::Transient(_)
            | Self::Permanent(_)
            | Self::ApplyFailed { .. }
            | Self::TimedOut { .. }
            | Self::Cancelled
            | Self::Staging(_) => FailureCategory::Provisioning,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
