//! Throttled HTTP transport shared by the registry clients
//!
//! Every outbound request, token requests included, goes through
//! [`HttpTransport::get`], which waits on the client's [`RequestThrottle`]
//! and carries a bounded timeout.

use crate::config::RegistryEndpoint;
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::registry::throttle::RequestThrottle;
use reqwest::header::{ACCEPT, HeaderMap, LINK};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// One outbound GET
#[derive(Debug, Clone, Default)]
pub struct Request<'a> {
    pub url: &'a str,
    pub query: &'a [(&'a str, String)],
    pub token: Option<&'a str>,
    pub accept: &'a [&'a str],
    /// Overrides the transport's default timeout
    pub timeout: Option<Duration>,
}

impl<'a> Request<'a> {
    pub fn get(url: &'a str) -> Self {
        Self {
            url,
            ..Self::default()
        }
    }

    pub fn query(mut self, query: &'a [(&'a str, String)]) -> Self {
        self.query = query;
        self
    }

    pub fn token(mut self, token: Option<&'a str>) -> Self {
        self.token = token;
        self
    }

    pub fn accept(mut self, accept: &'a [&'a str]) -> Self {
        self.accept = accept;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// HTTP session plus the per-instance throttle
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    throttle: RequestThrottle,
    output: Logger,
}

impl HttpTransport {
    pub fn new(endpoint: &RegistryEndpoint, output: Logger) -> Result<Self> {
        let client = Client::builder()
            .user_agent(endpoint.user_agent.clone())
            .timeout(endpoint.timeout)
            .build()
            .map_err(|e| RegistryError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            throttle: RequestThrottle::new(endpoint.min_delay),
            output,
        })
    }

    /// Send a throttled GET and return the response whatever its status
    pub async fn get(&self, request: Request<'_>, operation: &str) -> Result<Response> {
        self.throttle.wait().await;
        self.output.trace(&format!("GET {} ({})", request.url, operation));

        let mut builder = self.client.get(request.url);
        if !request.query.is_empty() {
            builder = builder.query(request.query);
        }
        if let Some(token) = request.token {
            builder = builder.bearer_auth(token);
        }
        if !request.accept.is_empty() {
            builder = builder.header(ACCEPT, request.accept.join(", "));
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        builder
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, operation))
    }

    /// Throttled GET that must succeed, decoded as JSON
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        request: Request<'_>,
        operation: &str,
    ) -> Result<(T, HeaderMap)> {
        let response = self.get(request, operation).await?;
        let response = ensure_success(response, operation).await?;
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, operation))?;
        let value = serde_json::from_str(&body).map_err(|e| {
            RegistryError::Parse(format!("Malformed response during {}: {}", operation, e))
        })?;
        Ok((value, headers))
    }
}

/// Turn a non-success response into the matching [`RegistryError`]
pub async fn ensure_success(response: Response, operation: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(HttpErrorHandler::handle_registry_error(status, &body, operation))
}

/// Target of an RFC 5988 `Link: <...>; rel="next"` header, resolved against `base_url`
pub fn next_link(headers: &HeaderMap, base_url: &str) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(|entry| {
            let (target, params) = entry.trim().split_once(';')?;
            let is_next = params.split(';').any(|param| {
                let param = param.trim().replace(' ', "");
                param == "rel=\"next\"" || param == "rel=next"
            });
            if !is_next {
                return None;
            }
            let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
            url::Url::parse(base_url)
                .ok()?
                .join(target)
                .ok()
                .map(|u| u.to_string())
        })
}
