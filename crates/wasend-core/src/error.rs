//! Error taxonomy shared across the workspace.

/// Result alias used throughout Wasend.
pub type Result<T> = std::result::Result<T, WasendError>;

/// All errors Wasend can produce.
#[derive(Debug, thiserror::Error)]
pub enum WasendError {
    /// Bad input, rejected before any side effect.
    #[error("validation error: {0}")]
    Validation(String),

    /// A bounded resource (session pool slot) is currently exhausted.
    /// Callers retry with backoff.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The underlying automation host for a session died or the session
    /// was closed; dependent work must be failed and the session recreated.
    #[error("session lost: {0}")]
    SessionLost(String),

    /// A single send attempt failed. `transient` decides whether the
    /// dispatch worker retries it.
    #[error("send failed: {message}")]
    SendFailed { message: String, transient: bool },

    /// Persistence layer unavailable or misbehaving. Transient.
    #[error("storage error: {0}")]
    Storage(String),

    /// Requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Messenger automation host returned an error or was unreachable.
    #[error("host error: {0}")]
    Host(String),

    /// Configuration problem.
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WasendError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn host(msg: impl Into<String>) -> Self {
        Self::Host(msg.into())
    }

    /// A send failure worth retrying (host busy, rate limited, network).
    pub fn send_transient(msg: impl Into<String>) -> Self {
        Self::SendFailed { message: msg.into(), transient: true }
    }

    /// A send failure that will not improve on retry (invalid recipient,
    /// rejected payload).
    pub fn send_permanent(msg: impl Into<String>) -> Self {
        Self::SendFailed { message: msg.into(), transient: false }
    }

    /// Whether a retry with backoff is reasonable.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ResourceExhausted(_) | Self::Storage(_) | Self::Host(_) => true,
            Self::SendFailed { transient, .. } => *transient,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(WasendError::send_transient("busy").is_transient());
        assert!(!WasendError::send_permanent("bad number").is_transient());
        assert!(WasendError::storage("locked").is_transient());
        assert!(!WasendError::SessionLost("host died".into()).is_transient());
        assert!(!WasendError::validation("empty").is_transient());
    }
}
