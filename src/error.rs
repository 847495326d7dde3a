use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("ALREADY_RUNNING: A daemon is already running (or starting) on port {0}.")]
    AlreadyRunning(u16),

    #[error("SPAWN_FAILED: Could not start daemon on port {port}: {reason}")]
    SpawnFailed { port: u16, reason: String },

    #[error("TERMINATION_FAILED: Daemon on port {port} could not be confirmed stopped: {reason}")]
    TerminationFailed { port: u16, reason: String },

    #[error("INTROSPECTION_UNAVAILABLE: {0}")]
    IntrospectionUnavailable(String),

    #[error("CANCELLED: Daemon on port {0} came up after stop-all and was torn down.")]
    Cancelled(u16),

    #[error("INVALID_RANGE: Port range {start}..={end} is empty or out of bounds.")]
    InvalidRange { start: u32, end: u32 },

    #[error("PROTOCOL: {0}")]
    Protocol(String),

    /// Error reported by the control daemon. `message` already carries the
    /// daemon-side code prefix.
    #[error("{message}")]
    Daemon { code: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable machine-readable code, used in control protocol error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Error::AlreadyRunning(_) => "ALREADY_RUNNING",
            Error::SpawnFailed { .. } => "SPAWN_FAILED",
            Error::TerminationFailed { .. } => "TERMINATION_FAILED",
            Error::IntrospectionUnavailable(_) => "INTROSPECTION_UNAVAILABLE",
            Error::Cancelled(_) => "CANCELLED",
            Error::InvalidRange { .. } => "INVALID_RANGE",
            Error::Protocol(_) => "PROTOCOL",
            Error::Daemon { .. } => "DAEMON",
            Error::Io(_) => "IO",
            Error::Json(_) => "JSON",
        }
    }

    /// Port the error refers to, when it is a per-port failure.
    pub fn port(&self) -> Option<u16> {
        match self {
            Error::AlreadyRunning(port)
            | Error::Cancelled(port)
            | Error::SpawnFailed { port, .. }
            | Error::TerminationFailed { port, .. } => Some(*port),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code_prefix() {
        let err = Error::SpawnFailed { port: 5556, reason: "address in use".to_string() };
        let text = err.to_string();
        assert!(text.starts_with(err.code()));
        assert!(text.contains("5556"));
    }

    #[test]
    fn test_port_only_for_per_port_errors() {
        assert_eq!(Error::AlreadyRunning(5555).port(), Some(5555));
        assert_eq!(Error::Cancelled(5557).port(), Some(5557));
        assert_eq!(Error::IntrospectionUnavailable("dumpsys".into()).port(), None);
    }
}
