use std::path::PathBuf;

/// Result type alias for derived data cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for derived data cache operations
///
/// Cache misses are never reported through this type. A miss is a
/// [`Status::Error`](crate::Status::Error) on the response; this enum is
/// reserved for misuse of the API and for configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Policy bits or names outside the fixed flag set
    #[error("invalid cache policy '{value}': {message}")]
    InvalidPolicy { value: String, message: String },

    /// Malformed bucket, hash or legacy key
    #[error("invalid cache key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// A legacy handle that was never issued or has already been retrieved
    #[error("unknown request handle {handle}")]
    UnknownHandle { handle: u32 },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// File system operations
    #[error("file system {operation} operation failed for '{path}': {source}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::FileSystem {
            path: PathBuf::new(),
            operation: "unknown".to_string(),
            source: error,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Json {
            message: error.to_string(),
            source: error,
        }
    }
}

impl Error {
    /// Create an invalid policy error
    #[must_use]
    pub fn invalid_policy(value: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidPolicy {
            value: value.into(),
            message: message.into(),
        }
    }

    /// Create an invalid key error
    #[must_use]
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Create a file system error
    #[must_use]
    pub fn file_system(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Error::FileSystem {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::UnknownHandle { handle: 19249 };
        assert_eq!(err.to_string(), "unknown request handle 19249");

        let err = Error::invalid_policy("0x80", "unknown flag bits");
        assert_eq!(
            err.to_string(),
            "invalid cache policy '0x80': unknown flag bits"
        );
    }

    #[test]
    fn test_io_conversion_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::FileSystem { .. }));
        assert!(std::error::Error::source(&err).is_some());
    }
}
