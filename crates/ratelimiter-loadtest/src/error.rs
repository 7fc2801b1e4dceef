//! Error types for the load testing harness

use thiserror::Error;

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, LoadTestError>;

/// Errors that can occur while driving or validating the rate limiter
#[derive(Error, Debug)]
pub enum LoadTestError {
    // === Service Interaction ===
    /// Connection, timeout or HTTP protocol failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body did not have the expected shape
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// A configuration call was rejected by the service
    #[error("Configuration rejected for {target}: HTTP {status}")]
    Configuration { target: String, status: u16 },

    // === Local Configuration ===
    /// Run configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration file: {0}")]
    ConfigFile(#[from] toml::de::Error),

    // === Output ===
    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV dump error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    // === Metrics ===
    /// Prometheus registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Latency histogram error
    #[error("Histogram error: {0}")]
    Histogram(String),

    // === Runtime ===
    /// A spawned task panicked or was cancelled
    #[error("Task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl From<reqwest::Error> for LoadTestError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_mismatch_display() {
        let err = LoadTestError::ProtocolMismatch("missing field `allowed`".into());
        assert_eq!(err.to_string(), "Protocol mismatch: missing field `allowed`");
    }

    #[test]
    fn test_configuration_display() {
        let err = LoadTestError::Configuration {
            target: "token_bucket:*".into(),
            status: 500,
        };
        assert_eq!(
            err.to_string(),
            "Configuration rejected for token_bucket:*: HTTP 500"
        );
    }
}
