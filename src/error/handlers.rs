//! Standardized mapping of HTTP and transport failures onto [`RegistryError`]

use crate::error::RegistryError;
use reqwest::StatusCode;

/// Standard error handler for HTTP responses
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Handle a non-success status from a registry API endpoint.
    ///
    /// 404 is reported as [`RegistryError::NotFound`]; every other status,
    /// including 401 after a failed token exchange, is a network failure.
    pub fn handle_registry_error(
        status: StatusCode,
        error_text: &str,
        operation: &str,
    ) -> RegistryError {
        let error_text = Self::truncate(error_text);
        match status.as_u16() {
            404 => RegistryError::NotFound(format!("{}: {}", operation, error_text)),
            401 => RegistryError::Network(format!(
                "Unauthorized during {} (HTTP 401): {}",
                operation, error_text
            )),
            403 => RegistryError::Network(format!(
                "Forbidden during {} (HTTP 403): {}",
                operation, error_text
            )),
            429 => RegistryError::Network(format!(
                "Rate limited during {} (HTTP 429): {}",
                operation, error_text
            )),
            500..=599 => RegistryError::Network(format!(
                "Registry server error during {} (HTTP {}): {}",
                operation, status, error_text
            )),
            _ => RegistryError::Network(format!(
                "{} failed (HTTP {}): {}",
                operation, status, error_text
            )),
        }
    }

    /// Handle a non-success status from a token endpoint
    pub fn handle_auth_error(status: StatusCode, error_text: &str) -> RegistryError {
        let error_msg = match status.as_u16() {
            400 => "Invalid token request parameters".to_string(),
            401 => "Token endpoint rejected anonymous request".to_string(),
            403 => "Access denied - insufficient permissions".to_string(),
            404 => "Authentication endpoint not found".to_string(),
            _ => format!(
                "Token request failed (status {}): {}",
                status,
                Self::truncate(error_text)
            ),
        };

        RegistryError::Auth(error_msg)
    }

    // Registry error bodies can be whole HTML pages.
    fn truncate(text: &str) -> String {
        const MAX: usize = 200;
        let text = text.trim();
        match text.char_indices().nth(MAX) {
            Some((idx, _)) => format!("{}...", &text[..idx]),
            None => text.to_string(),
        }
    }
}

/// Network error categorization and handling
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    /// Categorize and format network errors with helpful context
    pub fn handle_network_error(error: &reqwest::Error, context: &str) -> RegistryError {
        if error.is_timeout() {
            RegistryError::Network(format!("{} timed out: {}", context, error))
        } else if error.is_connect() {
            RegistryError::Network(format!("Connection error during {}: {}", context, error))
        } else if error.is_decode() {
            RegistryError::Parse(format!("Malformed response during {}: {}", context, error))
        } else if let Some(status) = error.status() {
            HttpErrorHandler::handle_registry_error(status, &error.to_string(), context)
        } else {
            RegistryError::Network(format!("{} network error: {}", context, error))
        }
    }
}
