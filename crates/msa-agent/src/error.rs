use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SupervisorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    AlreadyRunning,
    NotRunning,
    AlreadyStopping,
    AlreadyAgreed,
    StillRunning,
}

impl ConflictReason {
    pub fn message(&self) -> &'static str {
        match self {
            ConflictReason::AlreadyRunning => "server already started",
            ConflictReason::NotRunning => "server is not started",
            ConflictReason::AlreadyStopping => "server already attempted to stop",
            ConflictReason::AlreadyAgreed => "eula already agreed",
            ConflictReason::StillRunning => "server is running",
        }
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("server not exist: {0}")]
    NotFound(String),

    #[error("server already exist: {0}")]
    AlreadyExists(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{}", .0.message())]
    Conflict(ConflictReason),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server took too much time when starting ({}ms)", .0.as_millis())]
    Timeout(Duration),
}

impl SupervisorError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        SupervisorError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        SupervisorError::InvalidArgument(message.into())
    }

    /// Stable machine-readable code for the boundary layer.
    pub fn code(&self) -> &'static str {
        match self {
            SupervisorError::NotFound(_) => "not_found",
            SupervisorError::AlreadyExists(_) => "already_exists",
            SupervisorError::InvalidArgument(_) => "invalid_argument",
            SupervisorError::Conflict(_) => "conflict",
            SupervisorError::Io { .. } => "io_failure",
            SupervisorError::Timeout(_) => "timeout",
        }
    }

    pub fn conflict_reason(&self) -> Option<ConflictReason> {
        match self {
            SupervisorError::Conflict(r) => Some(*r),
            _ => None,
        }
    }
}

/// Attaches a short description to an `io::Error`, like `anyhow::Context`.
pub(crate) trait IoContext<T> {
    fn io_context(self, context: impl FnOnce() -> String) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context(self, context: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|e| SupervisorError::io(context(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(SupervisorError::NotFound("x".into()).code(), "not_found");
        assert_eq!(
            SupervisorError::Conflict(ConflictReason::AlreadyAgreed).code(),
            "conflict"
        );
        assert_eq!(
            SupervisorError::Timeout(Duration::from_secs(120)).code(),
            "timeout"
        );
    }

    #[test]
    fn io_context_keeps_source() {
        let res: std::io::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let err = res.io_context(|| "open msa.std".to_string()).unwrap_err();
        assert_eq!(err.code(), "io_failure");
        assert_eq!(err.to_string(), "open msa.std: denied");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn conflict_messages() {
        let err = SupervisorError::Conflict(ConflictReason::AlreadyStopping);
        assert_eq!(err.to_string(), "server already attempted to stop");
        assert_eq!(err.conflict_reason(), Some(ConflictReason::AlreadyStopping));
    }
}
