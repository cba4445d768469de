use std::time::Duration;

/// Failure of a gateway call.
///
/// `Clone` because every caller joined to a single-flight slot receives the
/// same outcome.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    /// HTTP 500/502. The backend itself is unreachable or broken.
    #[error("backend unavailable (HTTP {status})")]
    Infrastructure { status: u16 },
    #[error("{message}")]
    Application { status: u16, message: String },
    #[error("request timed out after {}s", after.as_secs_f64())]
    Timeout { after: Duration },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Infrastructure { .. })
    }

    /// HTTP status, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Infrastructure { status } | Self::Application { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
