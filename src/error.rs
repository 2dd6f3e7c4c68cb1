//! Error types shared by the parsers, probes and the scan controller.

/// A malformed address or port specification.
///
/// Each variant carries the offending fragment so the controller can echo it
/// back to the caller as a synthetic result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    #[error("invalid range: {fragment} ({reason})")]
    InvalidRange { fragment: String, reason: String },

    #[error("invalid port: {fragment}")]
    InvalidPort { fragment: String },

    #[error("port out of range (1-65535): {fragment}")]
    OutOfRange { fragment: String },
}

impl SpecError {
    pub(crate) fn invalid_range(fragment: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRange {
            fragment: fragment.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_port(fragment: &str) -> Self {
        Self::InvalidPort {
            fragment: fragment.to_string(),
        }
    }

    pub(crate) fn out_of_range(fragment: &str) -> Self {
        Self::OutOfRange {
            fragment: fragment.to_string(),
        }
    }

    /// The comma-separated segment that failed to parse.
    pub fn fragment(&self) -> &str {
        match self {
            Self::InvalidRange { fragment, .. }
            | Self::InvalidPort { fragment }
            | Self::OutOfRange { fragment } => fragment,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error("raw probing requires root privileges; re-run with sudo or use connect probing")]
    Permission,

    #[error("probe backend {backend} failed: {message}")]
    Backend { backend: String, message: String },

    #[error("backend timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

impl ScanError {
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
