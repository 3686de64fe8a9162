//! Docker Hub client
//!
//! Docker Hub exposes tag metadata directly in its paginated REST listing
//! (`/v2/repositories/{namespace}/{repo}/tags`), so unlike the OCI variant no
//! per-tag manifest fetches are needed.

use crate::config::{RegistryEndpoint, RegistryKind};
use crate::error::Result;
use crate::logging::Logger;
use crate::registry::RegistryClient;
use crate::registry::transport::{HttpTransport, Request};
use crate::tags::{ImageTag, TagQuery, dedup_by_name, parse_timestamp};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct TagPage {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Option<Vec<HubTag>>,
}

#[derive(Debug, Deserialize)]
struct HubTag {
    name: Option<String>,
    last_updated: Option<String>,
    tag_last_pushed: Option<String>,
    full_size: Option<u64>,
    v2: Option<bool>,
    #[serde(default)]
    images: Option<Vec<HubImage>>,
}

#[derive(Debug, Deserialize)]
struct RepositoryPage {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Option<Vec<HubRepository>>,
}

#[derive(Debug, Deserialize)]
struct HubRepository {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HubImage {
    digest: Option<String>,
    size: Option<u64>,
}

impl HubTag {
    fn into_image_tag(self) -> ImageTag {
        let mut tag = ImageTag::new(self.name.unwrap_or_else(|| "unknown".to_string()));

        tag.created = [self.last_updated, self.tag_last_pushed]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
            .and_then(|s| parse_timestamp(&s));

        let images = self.images.unwrap_or_default();
        tag.digest = images.first().and_then(|img| img.digest.clone());

        let total: u64 = images.iter().filter_map(|img| img.size).sum();
        if total > 0 {
            tag.size = Some(total);
        }

        tag.with_metadata("full_size", json!(self.full_size))
            .with_metadata("v2", json!(self.v2.unwrap_or(true)))
            .with_metadata("images", json!(images.len()))
    }
}

pub struct DockerHubClient {
    endpoint: RegistryEndpoint,
    transport: HttpTransport,
    output: Logger,
}

impl DockerHubClient {
    pub fn new(endpoint: RegistryEndpoint, output: Logger) -> Result<Self> {
        endpoint.validate()?;
        let transport = HttpTransport::new(&endpoint, output.clone())?;
        Ok(Self {
            endpoint,
            transport,
            output,
        })
    }

    /// Split into `(namespace, repository)`.
    ///
    /// An explicit namespace wins; otherwise `ns/repo` is split at the first
    /// slash, and bare names fall back to the default namespace (`library`).
    pub fn split_repository(&self, namespace: Option<&str>, repository: &str) -> (String, String) {
        if let Some(ns) = namespace {
            return (ns.to_string(), repository.to_string());
        }
        if let Some((ns, repo)) = repository.split_once('/') {
            return (ns.to_string(), repo.to_string());
        }
        (self.default_namespace().to_string(), repository.to_string())
    }

    fn default_namespace(&self) -> &str {
        self.endpoint.default_namespace.as_deref().unwrap_or("library")
    }

    fn tags_url(&self, namespace: &str, repository: &str) -> String {
        format!(
            "{}/v2/repositories/{}/{}/tags",
            self.endpoint.base_url, namespace, repository
        )
    }
}

#[async_trait]
impl RegistryClient for DockerHubClient {
    fn kind(&self) -> RegistryKind {
        RegistryKind::DockerHub
    }

    fn logger(&self) -> &Logger {
        &self.output
    }

    async fn try_list_tags(&self, query: &TagQuery) -> Result<Vec<ImageTag>> {
        let (namespace, repository) =
            self.split_repository(query.namespace.as_deref(), &query.repository);
        let url = self.tags_url(&namespace, &repository);
        let operation = format!("tag listing for {}/{}", namespace, repository);

        let mut tags = Vec::new();
        let mut page: u32 = 1;
        loop {
            let params = [
                ("page", page.to_string()),
                ("page_size", self.endpoint.page_size.to_string()),
            ];
            let (body, _): (TagPage, _) = self
                .transport
                .get_json(Request::get(&url).query(&params), &operation)
                .await?;

            let results = body.results.unwrap_or_default();
            if results.is_empty() {
                break;
            }
            self.output.verbose(&format!(
                "{}/{}: page {} returned {} tags",
                namespace,
                repository,
                page,
                results.len()
            ));

            tags.extend(
                results
                    .into_iter()
                    .map(HubTag::into_image_tag)
                    .filter(|t| query.matches_name(&t.name)),
            );

            if body.next.as_deref().is_none_or(str::is_empty) {
                break;
            }
            page += 1;
        }

        Ok(dedup_by_name(tags))
    }

    async fn get_tag_metadata(&self, repository: &str, tag: &str) -> Result<ImageTag> {
        let (namespace, repository) = self.split_repository(None, repository);
        let url = format!("{}/{}", self.tags_url(&namespace, &repository), tag);
        let operation = format!("tag lookup for {}/{}:{}", namespace, repository, tag);

        let (body, _): (HubTag, _) = self.transport.get_json(Request::get(&url), &operation).await?;
        Ok(body.into_image_tag())
    }

    /// Names are bare for the default namespace and `ns/name` otherwise, so
    /// each one can be passed straight back as a repository.
    async fn try_list_repositories(
        &self,
        namespace: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let namespace = namespace.unwrap_or(self.default_namespace());
        let url = format!("{}/v2/repositories/{}", self.endpoint.base_url, namespace);
        let operation = format!("repository listing for {}", namespace);
        let page_size = self.endpoint.page_size.min(u32::try_from(limit).unwrap_or(u32::MAX));

        let mut repositories = Vec::new();
        let mut page: u32 = 1;
        while repositories.len() < limit {
            let params = [("page", page.to_string()), ("page_size", page_size.to_string())];
            let (body, _): (RepositoryPage, _) = self
                .transport
                .get_json(Request::get(&url).query(&params), &operation)
                .await?;

            let results = body.results.unwrap_or_default();
            if results.is_empty() {
                break;
            }
            repositories.extend(results.into_iter().filter_map(|repo| repo.name).map(|name| {
                if namespace == self.default_namespace() {
                    name
                } else {
                    format!("{}/{}", namespace, name)
                }
            }));

            if body.next.as_deref().is_none_or(str::is_empty) {
                break;
            }
            page += 1;
        }

        repositories.truncate(limit);
        self.output
            .verbose(&format!("{}: {} repositories", namespace, repositories.len()));
        Ok(repositories)
    }
}
