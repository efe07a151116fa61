use thiserror::Error;
use tracing::{error, warn};

/// Error severity, used to decide whether an error is surfaced to the user
/// or only logged (spec §7: "recover locally... surface only kinds the user
/// must act on").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Domain errors for the capture/enrichment/summarization pipeline.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("permission denied for {capability}: {detail}")]
    PermissionDenied { capability: String, detail: String },

    #[error("capture source '{source_name}' failed transiently: {message}")]
    SourceTransient { source_name: String, message: String },

    #[error("semantic enrichment timed out after {elapsed_ms}ms")]
    EnrichmentTimeout { elapsed_ms: u64 },

    #[error("persistence operation failed transiently: {0}")]
    PersistenceTransient(String),

    #[error("LLM or embedding call failed: {0}")]
    LlmFailure(String),

    #[error("fatal error, session cannot continue: {0}")]
    Fatal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON (de)serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// Maps each error kind to the severity policy described in spec §7.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::PermissionDenied { .. } => ErrorSeverity::Critical,
            Self::SourceTransient { .. } => ErrorSeverity::Warning,
            Self::EnrichmentTimeout { .. } => ErrorSeverity::Info,
            Self::PersistenceTransient(_) => ErrorSeverity::Warning,
            Self::LlmFailure(_) => ErrorSeverity::Warning,
            Self::Fatal(_) => ErrorSeverity::Critical,
            Self::Io(_) => ErrorSeverity::Error,
            Self::Json(_) => ErrorSeverity::Error,
            Self::Rusqlite(_) => ErrorSeverity::Error,
            Self::Config(_) => ErrorSeverity::Warning,
        }
    }

    /// Whether this error kind must be surfaced to the user rather than
    /// recovered from silently (spec §7).
    pub fn is_user_actionable(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. } | Self::Fatal(_))
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::PermissionDenied { capability, .. } => {
                format!("Grant the '{capability}' permission to continue capturing activity")
            }
            Self::SourceTransient { source_name, .. } => {
                format!("The {source_name} capture source hiccuped and will retry")
            }
            Self::EnrichmentTimeout { .. } => "Enrichment took too long and was skipped".into(),
            Self::PersistenceTransient(_) => "Could not save a summary, will retry".into(),
            Self::LlmFailure(_) => "Summary generation failed, falling back to local summary".into(),
            Self::Fatal(msg) => msg.clone(),
            Self::Io(e) => format!("I/O error: {e}"),
            Self::Json(e) => format!("Malformed data: {e}"),
            Self::Rusqlite(e) => format!("Local storage error: {e}"),
            Self::Config(msg) => format!("Configuration issue: {msg}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Extension trait for error logging with caller location tracking.
/// Use when the operation is recoverable and the caller doesn't need the
/// error value, only the fact that something failed.
pub trait ResultExt<T> {
    /// Log error with caller location and return None. Use for recoverable failures.
    fn log_err(self) -> Option<T>;
    /// Log as warning with caller location and return None. Use for expected failures.
    fn warn_on_err(self) -> Option<T>;
}

impl<T, E: std::fmt::Debug> ResultExt<T> for std::result::Result<T, E> {
    #[track_caller]
    fn log_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                error!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "operation failed"
                );
                None
            }
        }
    }

    #[track_caller]
    fn warn_on_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                warn!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "operation had warning"
                );
                None
            }
        }
    }
}

/// Log an error from a background task without propagating it. Used by
/// capture pollers and flush timers that must keep running after a single
/// failed tick (spec §5: source failures must not halt the session).
pub fn log_async_err<T, E: std::fmt::Debug>(
    result: std::result::Result<T, E>,
    operation: &str,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            error!(error = ?err, operation = operation, "background operation failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_is_critical_and_actionable() {
        let err = CoreError::PermissionDenied {
            capability: "accessibility".into(),
            detail: "not granted".into(),
        };
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert!(err.is_user_actionable());
    }

    #[test]
    fn source_transient_is_warning_and_not_actionable() {
        let err = CoreError::SourceTransient {
            source_name: "clipboard".into(),
            message: "poll failed".into(),
        };
        assert_eq!(err.severity(), ErrorSeverity::Warning);
        assert!(!err.is_user_actionable());
    }

    #[test]
    fn log_err_passes_through_ok() {
        let result: std::result::Result<u32, &str> = Ok(7);
        assert_eq!(result.log_err(), Some(7));
    }
}
