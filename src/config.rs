//! Registry endpoint configuration and per-registry presets

use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// How a registry expects clients to authenticate pulls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    /// Requests are sent without credentials
    None,
    /// A pull-scoped token is requested up front from `token_path` on the registry host
    AnonymousToken { token_path: String },
    /// A 401 `WWW-Authenticate: Bearer` challenge names the token realm
    ChallengeBearer,
}

/// Supported registry families
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    #[default]
    #[serde(rename = "docker", alias = "dockerhub", alias = "docker_hub")]
    DockerHub,
    Mcr,
    Chainguard,
    Oci,
}

impl RegistryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryKind::DockerHub => "docker",
            RegistryKind::Mcr => "mcr",
            RegistryKind::Chainguard => "chainguard",
            RegistryKind::Oci => "oci",
        }
    }

    /// Preset endpoint for this registry family, if it has a well-known host
    pub fn default_endpoint(&self) -> Option<RegistryEndpoint> {
        match self {
            RegistryKind::DockerHub => Some(RegistryEndpoint::docker_hub()),
            RegistryKind::Mcr => Some(RegistryEndpoint::mcr()),
            RegistryKind::Chainguard => Some(RegistryEndpoint::chainguard()),
            RegistryKind::Oci => None,
        }
    }
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistryKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" | "dockerhub" | "docker_hub" | "docker.io" => Ok(RegistryKind::DockerHub),
            "mcr" | "mcr.microsoft.com" => Ok(RegistryKind::Mcr),
            "chainguard" | "cgr" | "cgr.dev" => Ok(RegistryKind::Chainguard),
            "oci" => Ok(RegistryKind::Oci),
            other => Err(RegistryError::Validation(format!(
                "Unsupported registry: {}. Expected one of: docker, mcr, chainguard, oci",
                other
            ))),
        }
    }
}

/// Everything a client instance needs to talk to one registry
#[derive(Debug, Clone)]
pub struct RegistryEndpoint {
    pub base_url: String,
    pub auth: AuthScheme,
    /// Minimum spacing between consecutive requests of one client instance
    pub min_delay: Duration,
    pub timeout: Duration,
    pub token_timeout: Duration,
    pub user_agent: String,
    /// Namespace prepended to bare repository names
    pub default_namespace: Option<String>,
    pub page_size: u32,
}

impl RegistryEndpoint {
    pub fn new(base_url: impl Into<String>, auth: AuthScheme) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            min_delay: Duration::from_millis(500),
            timeout: DEFAULT_TIMEOUT,
            token_timeout: DEFAULT_TOKEN_TIMEOUT,
            user_agent: format!("image-tag-crawler/{}", env!("CARGO_PKG_VERSION")),
            default_namespace: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn docker_hub() -> Self {
        Self::new("https://hub.docker.com", AuthScheme::None)
            .with_min_delay(Duration::from_secs(1))
            .with_default_namespace("library")
    }

    pub fn mcr() -> Self {
        Self::new("https://mcr.microsoft.com", AuthScheme::ChallengeBearer)
            .with_min_delay(Duration::from_millis(500))
    }

    pub fn chainguard() -> Self {
        Self::new(
            "https://cgr.dev",
            AuthScheme::AnonymousToken {
                token_path: "/token".to_string(),
            },
        )
        .with_min_delay(Duration::from_secs(1))
        .with_default_namespace("chainguard")
    }

    /// Any OCI Distribution registry using challenge-response auth
    pub fn oci(base_url: impl Into<String>) -> Self {
        Self::new(base_url, AuthScheme::ChallengeBearer)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_token_timeout(mut self, timeout: Duration) -> Self {
        self.token_timeout = timeout;
        self
    }

    pub fn with_default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = Some(namespace.into());
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(RegistryError::Validation(
                "Registry address cannot be empty".to_string(),
            ));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(RegistryError::Validation(format!(
                "Invalid registry address: {}. Must start with http:// or https://",
                self.base_url
            )));
        }
        url::Url::parse(&self.base_url)?;

        if self.timeout.is_zero() || self.token_timeout.is_zero() {
            return Err(RegistryError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if self.page_size == 0 {
            return Err(RegistryError::Validation(
                "Page size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Prefix a bare repository name with the default namespace, if any
    pub fn qualify_repository(&self, repository: &str) -> String {
        match &self.default_namespace {
            Some(ns) if !repository.contains('/') => format!("{}/{}", ns, repository),
            _ => repository.to_string(),
        }
    }
}
