//! Error types for the balancer

use thiserror::Error;

/// Balancer error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Precondition violated: {0}")]
    Precondition(String),

    #[error("Invalid node index: {0}")]
    InvalidNode(usize),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn precondition<S: Into<String>>(msg: S) -> Self {
        Error::Precondition(msg.into())
    }

    pub fn invalid_node(idx: usize) -> Self {
        Error::InvalidNode(idx)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let e = Error::config("test error");
        assert!(matches!(e, Error::Config(_)));
    }

    #[test]
    fn test_error_display() {
        let e = Error::precondition("not finalized");
        assert_eq!(e.to_string(), "Precondition violated: not finalized");
    }
}
