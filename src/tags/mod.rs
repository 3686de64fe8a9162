//! Tag records, name classification, and query parameters
//!
//! [`ImageTag`] is the common currency between registry clients and the
//! resolver. Everything here is pure; network access lives in [`crate::registry`].

pub mod classify;
pub mod filter;

pub use classify::{is_dev, is_semver};
pub use filter::{dedup_by_name, filter_tags, sort_tags_by_date};

use crate::error::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single tag of a repository plus whatever the registry told us about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTag {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Registry-specific extras (schema version, media type, image count...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ImageTag {
    /// Name-only tag, used when metadata could not be fetched
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created: None,
            digest: None,
            size: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_semver(&self) -> bool {
        classify::is_semver(&self.name)
    }

    pub fn is_dev(&self) -> bool {
        classify::is_dev(&self.name)
    }
}

impl fmt::Display for ImageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.created {
            Some(created) => write!(f, "{} ({})", self.name, created.to_rfc3339()),
            None => write!(f, "{} (unknown)", self.name),
        }
    }
}

/// Parse a registry timestamp into an absolute UTC instant.
///
/// Offset-less values are taken as UTC, so callers never see a naive time.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// What to list and which names to keep
#[derive(Debug, Clone)]
pub struct TagQuery {
    pub repository: String,
    /// Explicit namespace, overriding any namespace in `repository`
    pub namespace: Option<String>,
    pub pattern: Option<Regex>,
    pub only_semver: bool,
    pub exclude_dev: bool,
}

impl TagQuery {
    /// Query with the resolver defaults: releases only
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            namespace: None,
            pattern: None,
            only_semver: true,
            exclude_dev: true,
        }
    }

    /// Query that keeps every tag
    pub fn all(repository: impl Into<String>) -> Self {
        Self {
            only_semver: false,
            exclude_dev: false,
            ..Self::new(repository)
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Keep only names the regex finds a match in (search, not full match)
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        self.pattern = Some(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn only_semver(mut self, only_semver: bool) -> Self {
        self.only_semver = only_semver;
        self
    }

    pub fn exclude_dev(mut self, exclude_dev: bool) -> Self {
        self.exclude_dev = exclude_dev;
        self
    }

    /// Whether a tag with this name survives the query's filters
    pub fn matches_name(&self, name: &str) -> bool {
        if self.exclude_dev && classify::is_dev(name) {
            return false;
        }
        if self.only_semver && !classify::is_semver(name) {
            return false;
        }
        match &self.pattern {
            Some(re) => re.is_match(name),
            None => true,
        }
    }

    /// Apply the query's filters to an already fetched listing
    pub fn apply(&self, tags: Vec<ImageTag>) -> Vec<ImageTag> {
        filter::filter_tags(tags, !self.exclude_dev, self.only_semver, self.pattern.as_ref())
    }

    /// `namespace/repository` when a namespace was given explicitly
    pub fn qualified_repository(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, self.repository),
            None => self.repository.clone(),
        }
    }
}
