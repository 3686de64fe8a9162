//! OCI Distribution client (MCR, Chainguard, generic registries)
//!
//! Tags come from `GET /v2/{repo}/tags/list`, followed through `Link`
//! pagination. The tag list carries names only, so each surviving tag costs a
//! manifest fetch plus a config-blob fetch for its creation time.
//! Repository discovery reads `GET /v2/_catalog` with a catalog-scoped token.

use crate::config::{AuthScheme, RegistryEndpoint, RegistryKind};
use crate::error::handlers::HttpErrorHandler;
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::registry::RegistryClient;
use crate::registry::auth::{AuthState, AuthTokenCache, TokenResponse, parse_bearer_challenge};
use crate::registry::transport::{HttpTransport, Request, next_link};
use crate::tags::{ImageTag, TagQuery, parse_timestamp};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::WWW_AUTHENTICATE;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;

const MANIFEST_ACCEPT: &[&str] = &[
    "application/vnd.docker.distribution.manifest.v2+json",
    "application/vnd.oci.image.manifest.v1+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
    "application/vnd.oci.image.index.v1+json",
];

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(rename = "schemaVersion")]
    schema_version: Option<u32>,
    #[serde(rename = "mediaType")]
    media_type: Option<String>,
    config: Option<Descriptor>,
    layers: Option<Vec<Descriptor>>,
    /// Present on manifest lists and OCI indexes
    manifests: Option<Vec<PlatformEntry>>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: Option<String>,
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PlatformEntry {
    digest: String,
    platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
struct Platform {
    architecture: String,
    os: String,
}

#[derive(Debug, Deserialize)]
struct ImageConfig {
    created: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default)]
    repositories: Option<Vec<String>>,
}

/// What a token is requested for
#[derive(Debug, Clone, Copy)]
enum Access<'a> {
    Pull(&'a str),
    Catalog,
}

impl<'a> Access<'a> {
    /// Token cache key. Repository names never start with `_`.
    fn cache_key(self) -> &'a str {
        match self {
            Access::Pull(repository) => repository,
            Access::Catalog => "_catalog",
        }
    }

    fn scope(self) -> String {
        match self {
            Access::Pull(repository) => format!("repository:{}:pull", repository),
            Access::Catalog => "registry:catalog:*".to_string(),
        }
    }

    /// Endpoint whose 401 carries the challenge for this access
    fn challenge_url(self, base_url: &str) -> String {
        match self {
            Access::Pull(repository) => format!("{}/v2/{}/tags/list", base_url, repository),
            Access::Catalog => format!("{}/v2/_catalog", base_url),
        }
    }
}

/// `linux/amd64` if the index has it, else its first entry
fn select_platform(entries: &[PlatformEntry]) -> Option<String> {
    entries
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .is_some_and(|p| p.os == "linux" && p.architecture == "amd64")
        })
        .or_else(|| entries.first())
        .map(|entry| entry.digest.clone())
}

pub struct OciClient {
    kind: RegistryKind,
    endpoint: RegistryEndpoint,
    transport: HttpTransport,
    tokens: AuthTokenCache,
    output: Logger,
}

impl OciClient {
    pub fn new(kind: RegistryKind, endpoint: RegistryEndpoint, output: Logger) -> Result<Self> {
        endpoint.validate()?;
        let transport = HttpTransport::new(&endpoint, output.clone())?;
        Ok(Self {
            kind,
            endpoint,
            transport,
            tokens: AuthTokenCache::new(output.clone()),
            output,
        })
    }

    /// Full repository path on this registry, default namespace applied
    pub fn repository_for(&self, query: &TagQuery) -> String {
        self.endpoint.qualify_repository(&query.qualified_repository())
    }

    pub fn token_cache(&self) -> &AuthTokenCache {
        &self.tokens
    }

    async fn token_for(&self, repository: &str) -> Option<String> {
        self.token_with(Access::Pull(repository)).await
    }

    async fn token_with(&self, access: Access<'_>) -> Option<String> {
        self.tokens
            .authorize(access.cache_key(), || self.acquire_token(access))
            .await
    }

    async fn acquire_token(&self, access: Access<'_>) -> Result<AuthState> {
        match &self.endpoint.auth {
            AuthScheme::None => Ok(AuthState::NoAuthNeeded),
            AuthScheme::AnonymousToken { token_path } => {
                let url = format!("{}{}", self.endpoint.base_url, token_path);
                let params = [("scope", access.scope())];
                let token = self.fetch_token(&url, &params).await?;
                self.output.debug(&format!(
                    "Anonymous token obtained for {}",
                    access.cache_key()
                ));
                Ok(AuthState::Bearer(token))
            }
            AuthScheme::ChallengeBearer => self.answer_challenge(access).await,
        }
    }

    async fn answer_challenge(&self, access: Access<'_>) -> Result<AuthState> {
        let repository = access.cache_key();
        let url = access.challenge_url(&self.endpoint.base_url);
        let response = self
            .transport
            .get(
                Request::get(&url).timeout(self.endpoint.token_timeout),
                "auth challenge",
            )
            .await?;

        let status = response.status();
        if status.is_success() {
            self.output
                .debug(&format!("{} requires no authentication", repository));
            return Ok(AuthState::NoAuthNeeded);
        }
        if status != StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_registry_error(
                status,
                &body,
                "auth challenge",
            ));
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_bearer_challenge)
            .ok_or_else(|| {
                RegistryError::Auth(format!(
                    "{} answered 401 without a bearer challenge",
                    repository
                ))
            })?;

        self.output.detail(&format!(
            "Auth challenge for {}: realm={}, service={:?}",
            repository, challenge.realm, challenge.service
        ));

        let mut params = Vec::with_capacity(2);
        if let Some(service) = challenge.service {
            params.push(("service", service));
        }
        params.push((
            "scope",
            challenge.scope.unwrap_or_else(|| access.scope()),
        ));

        let token = self.fetch_token(&challenge.realm, &params).await?;
        Ok(AuthState::Bearer(token))
    }

    async fn fetch_token(&self, url: &str, params: &[(&str, String)]) -> Result<String> {
        let response = self
            .transport
            .get(
                Request::get(url)
                    .query(params)
                    .timeout(self.endpoint.token_timeout),
                "token request",
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_auth_error(status, &body));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::Parse(format!("Malformed token response: {}", e)))?;
        body.into_token()
            .ok_or_else(|| RegistryError::Auth("Token response did not contain a token".to_string()))
    }

    async fn list_tag_names(&self, repository: &str, token: Option<&str>) -> Result<Vec<String>> {
        let operation = format!("tag listing for {}", repository);
        let mut names = Vec::new();
        let mut next = Some(format!(
            "{}/v2/{}/tags/list?n={}",
            self.endpoint.base_url, repository, self.endpoint.page_size
        ));

        while let Some(url) = next.take() {
            let (page, headers): (TagList, _) = self
                .transport
                .get_json(Request::get(&url).token(token), &operation)
                .await?;
            names.extend(page.tags.unwrap_or_default());
            next = next_link(&headers, &self.endpoint.base_url).filter(|link| *link != url);
        }

        let mut seen = HashSet::with_capacity(names.len());
        names.retain(|name| seen.insert(name.clone()));
        Ok(names)
    }

    async fn fetch_metadata(&self, repository: &str, tag: &str) -> Result<ImageTag> {
        let token = self.token_for(repository).await;
        let token = token.as_deref();
        let url = format!("{}/v2/{}/manifests/{}", self.endpoint.base_url, repository, tag);
        let operation = format!("manifest fetch for {}:{}", repository, tag);

        let (manifest, headers): (Manifest, _) = self
            .transport
            .get_json(Request::get(&url).token(token).accept(MANIFEST_ACCEPT), &operation)
            .await?;

        let mut image_tag = ImageTag::new(tag)
            .with_metadata("schemaVersion", json!(manifest.schema_version))
            .with_metadata("mediaType", json!(manifest.media_type));
        image_tag.digest = headers
            .get("docker-content-digest")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        // Indexes carry no config; follow one platform entry. The tag keeps the index digest.
        let child = manifest.manifests.as_deref().and_then(select_platform);
        let image = match child {
            Some(digest) => {
                self.output
                    .detail(&format!("{}:{} is an index, following {}", repository, tag, digest));
                let url = format!("{}/v2/{}/manifests/{}", self.endpoint.base_url, repository, digest);
                let (child, _): (Manifest, _) = self
                    .transport
                    .get_json(Request::get(&url).token(token).accept(MANIFEST_ACCEPT), &operation)
                    .await?;
                child
            }
            None => manifest,
        };

        if let Some(layers) = image.layers.as_ref().filter(|layers| !layers.is_empty()) {
            image_tag.size = Some(layers.iter().filter_map(|layer| layer.size).sum());
        }

        let config_digest = image.config.and_then(|config| config.digest);
        if let Some(digest) = &config_digest {
            image_tag.created = self.fetch_created(repository, digest, token).await;
        }

        Ok(image_tag.with_metadata("config_digest", json!(config_digest)))
    }

    /// Creation time from the image config blob; missing on any failure
    async fn fetch_created(
        &self,
        repository: &str,
        config_digest: &str,
        token: Option<&str>,
    ) -> Option<chrono::DateTime<chrono::Utc>> {
        let url = format!("{}/v2/{}/blobs/{}", self.endpoint.base_url, repository, config_digest);
        let operation = format!("config fetch for {}@{}", repository, config_digest);

        match self
            .transport
            .get_json::<ImageConfig>(Request::get(&url).token(token), &operation)
            .await
        {
            Ok((config, _)) => config.created.as_deref().and_then(parse_timestamp),
            Err(e) => {
                self.output.debug(&format!("No creation time: {}", e));
                None
            }
        }
    }
}

#[async_trait]
impl RegistryClient for OciClient {
    fn kind(&self) -> RegistryKind {
        self.kind
    }

    fn logger(&self) -> &Logger {
        &self.output
    }

    async fn try_list_tags(&self, query: &TagQuery) -> Result<Vec<ImageTag>> {
        let repository = self.repository_for(query);
        let token = self.token_for(&repository).await;

        let names = self.list_tag_names(&repository, token.as_deref()).await?;
        let total = names.len();
        let selected: Vec<String> = names
            .into_iter()
            .filter(|name| query.matches_name(name))
            .collect();

        self.output.verbose(&format!(
            "{}: {} tags listed, fetching metadata for {}",
            repository,
            total,
            selected.len()
        ));

        let mut tags = Vec::with_capacity(selected.len());
        for name in selected {
            match self.fetch_metadata(&repository, &name).await {
                Ok(tag) => tags.push(tag),
                Err(e) => {
                    self.output.warning(&format!(
                        "Error fetching metadata for {}:{}: {}",
                        repository, name, e
                    ));
                    tags.push(ImageTag::new(name));
                }
            }
        }

        Ok(tags)
    }

    async fn get_tag_metadata(&self, repository: &str, tag: &str) -> Result<ImageTag> {
        let repository = self.endpoint.qualify_repository(repository);
        self.fetch_metadata(&repository, tag).await
    }

    /// Walks `/v2/_catalog` and keeps names under `namespace/`. Registries
    /// without a default namespace list everything when `namespace` is `None`.
    async fn try_list_repositories(
        &self,
        namespace: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let prefix = namespace
            .or(self.endpoint.default_namespace.as_deref())
            .map(|ns| format!("{}/", ns.trim_end_matches('/')));
        let token = self.token_with(Access::Catalog).await;

        let mut repositories = Vec::new();
        let mut next = Some(format!(
            "{}/v2/_catalog?n={}",
            self.endpoint.base_url, self.endpoint.page_size
        ));
        while let Some(url) = next.take() {
            if repositories.len() >= limit {
                break;
            }
            let (page, headers): (Catalog, _) = self
                .transport
                .get_json(Request::get(&url).token(token.as_deref()), "repository catalog")
                .await?;
            repositories.extend(
                page.repositories
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|name| prefix.as_deref().is_none_or(|p| name.starts_with(p))),
            );
            next = next_link(&headers, &self.endpoint.base_url).filter(|link| *link != url);
        }

        repositories.truncate(limit);
        self.output.verbose(&format!(
            "{}: {} repositories in catalog",
            self.endpoint.base_url,
            repositories.len()
        ));
        Ok(repositories)
    }
}
