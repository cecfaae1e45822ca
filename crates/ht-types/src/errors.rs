use thiserror::Error;

/// Main error type for the Hypertrack system
#[derive(Error, Debug)]
pub enum HtError {
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Trial evaluation failed: {0}")]
    Trial(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl HtError {
    /// Errors that must stop the whole search rather than a single trial.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HtError::Config(_) | HtError::Tracking(TrackingError::Unavailable { .. })
        )
    }
}

/// Data-related errors
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Data file not found: {0}")]
    SourceNotFound(String),

    #[error("Column not found: {column}")]
    ColumnNotFound { column: String },

    #[error("Invalid data format: {message}")]
    InvalidFormat { message: String },

    #[error("Insufficient data: {message}")]
    InsufficientData { message: String },

    #[error("Data loading failed: {message}")]
    LoadingFailed { message: String },

    #[error("Data parsing error: {message}")]
    ParseError { message: String },

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
}

/// Tracking-store errors
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Tracking store unavailable at {endpoint}: {message}")]
    Unavailable { endpoint: String, message: String },

    #[error("Experiment not found: {experiment}")]
    ExperimentNotFound { experiment: String },

    #[error("Experiment already exists: {name}")]
    ExperimentAlreadyExists { name: String },

    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("Run already finalized: {run_id}")]
    RunFinalized { run_id: String },

    #[error("Key {key} already logged for run {run_id}")]
    DuplicateKey { run_id: String, key: String },

    #[error("Tracking request failed: {message}")]
    Request { message: String },
}

/// Result type alias for Hypertrack operations
pub type HtResult<T> = Result<T, HtError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::HtError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::HtError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::HtError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = TrackingError::Unavailable {
            endpoint: "http://127.0.0.1:5050".to_string(),
            message: "connection refused".to_string(),
        };

        assert!(error.to_string().contains("unavailable"));
        assert!(error.to_string().contains("127.0.0.1:5050"));
        assert!(error.to_string().contains("connection refused"));
    }

    #[test]
    fn test_error_conversion() {
        let tracking_error = TrackingError::RunNotFound {
            run_id: "abc".to_string(),
        };
        let ht_error: HtError = tracking_error.into();

        match ht_error {
            HtError::Tracking(TrackingError::RunNotFound { .. }) => (),
            _ => panic!("Expected Tracking error"),
        }
    }

    #[test]
    fn test_fatal_classification() {
        assert!(config_error!("low {} > high {}", 5, 1).is_fatal());
        assert!(HtError::from(TrackingError::Unavailable {
            endpoint: "memory://".into(),
            message: "down".into(),
        })
        .is_fatal());
        assert!(!HtError::Trial("fit failed".into()).is_fatal());
        assert!(!validation_error!("bad value: {}", 42).is_fatal());
        assert!(!internal_error!("oops").is_fatal());
    }
}
