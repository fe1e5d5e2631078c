//! Error types for the leak detection engine
//!
//! Analysis never fails: insufficient or noisy data degrades to low
//! confidence instead. Only operator-facing calls (`dismiss`, `reconfigure`)
//! and the file helpers return these errors.

use thiserror::Error;

/// Engine-wide error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No live entry exists for the process id
    #[error("process {pid} is not tracked")]
    NotFound { pid: u64 },

    /// A configuration value is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Alert delivery failed (logged and swallowed by the engine)
    #[error("notification failed: {0}")]
    Notify(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = EngineError::NotFound { pid: 42 };
        assert_eq!(err.to_string(), "process 42 is not tracked");
    }

    #[test]
    fn test_io_conversion() {
        fn open() -> EngineResult<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"))?;
            Ok(())
        }
        assert!(matches!(open(), Err(EngineError::Io(_))));
    }
}
