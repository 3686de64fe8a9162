//! Client construction per registry kind

use crate::config::{RegistryEndpoint, RegistryKind};
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::registry::{DockerHubClient, OciClient, RegistryClient};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Produces registry clients on demand.
///
/// Every call returns a new instance with its own throttle and token cache,
/// so batch workers never contend on each other's rate limit.
pub trait ClientFactory: Send + Sync {
    fn client_for(&self, kind: RegistryKind) -> Result<Arc<dyn RegistryClient>>;
}

/// Factory for the real registries, with per-kind endpoint overrides
#[derive(Debug, Clone)]
pub struct RegistryClients {
    endpoints: HashMap<RegistryKind, RegistryEndpoint>,
    rate_limit: Option<Duration>,
    output: Logger,
}

impl RegistryClients {
    pub fn new(output: Logger) -> Self {
        Self {
            endpoints: HashMap::new(),
            rate_limit: None,
            output,
        }
    }

    /// Use `endpoint` instead of the preset for `kind`
    pub fn with_endpoint(mut self, kind: RegistryKind, endpoint: RegistryEndpoint) -> Self {
        self.endpoints.insert(kind, endpoint);
        self
    }

    /// Request spacing for every client; MCR clients use half of it
    pub fn with_rate_limit(mut self, delay: Duration) -> Self {
        self.rate_limit = Some(delay);
        self
    }

    /// Endpoint a client of `kind` would be built with
    pub fn endpoint_for(&self, kind: RegistryKind) -> Result<RegistryEndpoint> {
        let mut endpoint = self
            .endpoints
            .get(&kind)
            .cloned()
            .or_else(|| kind.default_endpoint())
            .ok_or_else(|| {
                RegistryError::Validation(format!(
                    "No endpoint configured for {} registry; a registry URL is required",
                    kind
                ))
            })?;

        if let Some(delay) = self.rate_limit {
            endpoint.min_delay = match kind {
                RegistryKind::Mcr => delay / 2,
                _ => delay,
            };
        }
        Ok(endpoint)
    }
}

impl ClientFactory for RegistryClients {
    fn client_for(&self, kind: RegistryKind) -> Result<Arc<dyn RegistryClient>> {
        let endpoint = self.endpoint_for(kind)?;
        let output = self.output.clone();
        let client: Arc<dyn RegistryClient> = match kind {
            RegistryKind::DockerHub => Arc::new(DockerHubClient::new(endpoint, output)?),
            RegistryKind::Mcr | RegistryKind::Chainguard | RegistryKind::Oci => {
                Arc::new(OciClient::new(kind, endpoint, output)?)
            }
        };
        Ok(client)
    }
}
