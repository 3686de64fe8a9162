//! Registry clients
//!
//! [`RegistryClient`] hides pagination and authentication behind two
//! operations: list a repository's tags, and fetch one tag's metadata.
//! Clients that can enumerate repositories also implement discovery.
//! Filtering, sorting and date resolution are free functions over the
//! returned [`ImageTag`]s and never live in a client.
//!
//! Variants:
//! - [`DockerHubClient`]: Docker Hub's REST API (`/v2/repositories/...`)
//! - [`OciClient`]: OCI Distribution endpoints, used for MCR, Chainguard
//!   and any other compliant registry

pub mod auth;
pub mod docker_hub;
pub mod factory;
pub mod oci;
pub mod throttle;
pub mod transport;

pub use auth::{AuthState, AuthTokenCache, BearerChallenge, parse_bearer_challenge};
pub use docker_hub::DockerHubClient;
pub use factory::{ClientFactory, RegistryClients};
pub use oci::OciClient;
pub use throttle::RequestThrottle;

use crate::config::RegistryKind;
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::tags::{ImageTag, TagQuery};
use async_trait::async_trait;

#[async_trait]
pub trait RegistryClient: Send + Sync {
    fn kind(&self) -> RegistryKind;

    fn logger(&self) -> &Logger;

    /// Every tag of the query's repository whose name passes the query,
    /// across all pages, without duplicate names, in listing order.
    ///
    /// A failure to fetch one tag's metadata yields a name-only tag. A
    /// failure of the listing itself is returned as an error.
    async fn try_list_tags(&self, query: &TagQuery) -> Result<Vec<ImageTag>>;

    /// Authoritative metadata for a single tag
    async fn get_tag_metadata(&self, repository: &str, tag: &str) -> Result<ImageTag>;

    /// Like [`try_list_tags`](Self::try_list_tags), but a failed listing is
    /// logged and reported as no tags at all.
    async fn list_tags(&self, query: &TagQuery) -> Vec<ImageTag> {
        match self.try_list_tags(query).await {
            Ok(tags) => tags,
            Err(e) => {
                self.logger().warning(&format!(
                    "Error fetching tags for {}: {}",
                    query.qualified_repository(),
                    e
                ));
                Vec::new()
            }
        }
    }

    /// Up to `limit` repository names under `namespace` (the registry's
    /// default namespace when `None`), in the order the registry lists them.
    async fn try_list_repositories(
        &self,
        _namespace: Option<&str>,
        _limit: usize,
    ) -> Result<Vec<String>> {
        Err(RegistryError::Validation(format!(
            "{} registry does not support repository discovery",
            self.kind()
        )))
    }

    /// Discovery that logs a failure and reports no repositories
    async fn list_repositories(&self, namespace: Option<&str>, limit: usize) -> Vec<String> {
        match self.try_list_repositories(namespace, limit).await {
            Ok(repositories) => repositories,
            Err(e) => {
                self.logger()
                    .warning(&format!("Error fetching repository list: {}", e));
                Vec::new()
            }
        }
    }
}
