//! Error types for Bloom

use thiserror::Error;

/// Result type alias for Bloom operations
pub type Result<T> = std::result::Result<T, BloomError>;

/// Startup errors shared by the Bloom binaries.
///
/// Runtime failures have their own types next to the code that raises them
/// (`FetchError`, `StoreError`, `WriteError`); an error here means the
/// process cannot start.
#[derive(Error, Debug)]
pub enum BloomError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BloomError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = BloomError::config("missing endpoint");
        assert_eq!(err.to_string(), "Configuration error: missing endpoint");
    }
}
