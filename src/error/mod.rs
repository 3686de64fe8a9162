//! Error types and handlers for registry operations

pub mod handlers;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Transport failures, timeouts and unexpected HTTP statuses
    #[error("Network error: {0}")]
    Network(String),
    /// Token acquisition failed
    #[error("Authentication error: {0}")]
    Auth(String),
    /// Repository, tag or blob does not exist
    #[error("Not found: {0}")]
    NotFound(String),
    /// Response did not have the expected shape
    #[error("Parse error: {0}")]
    Parse(String),
    /// Invalid user input or configuration
    #[error("Validation error: {0}")]
    Validation(String),
    /// File IO errors
    #[error("IO error: {0}")]
    Io(String),
    /// A batch worker panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),
}

impl RegistryError {
    /// Transport-level failures that may succeed if repeated later
    pub fn is_transient(&self) -> bool {
        matches!(self, RegistryError::Network(_))
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Parse(err.to_string())
    }
}

impl From<serde_yaml::Error> for RegistryError {
    fn from(err: serde_yaml::Error) -> Self {
        RegistryError::Parse(format!("YAML: {}", err))
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        handlers::NetworkErrorHandler::handle_network_error(&err, "request")
    }
}

impl From<url::ParseError> for RegistryError {
    fn from(err: url::ParseError) -> Self {
        RegistryError::Validation(format!("Invalid URL: {}", err))
    }
}

impl From<regex::Error> for RegistryError {
    fn from(err: regex::Error) -> Self {
        RegistryError::Validation(format!("Invalid tag pattern: {}", err))
    }
}
