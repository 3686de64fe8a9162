//! Batch resolution of upstream/target image pairs
//!
//! Each [`Mapping`] is resolved end to end by one worker: a fresh client per
//! registry, one listing per image, every period evaluated against it. A
//! failing mapping is recorded as failed and never affects its neighbours.

pub mod pool;

pub use pool::WorkerPool;

use crate::config::RegistryKind;
use crate::error::Result;
use crate::logging::Logger;
use crate::registry::ClientFactory;
use crate::resolver::{HistoricalResolver, Period, PeriodResolution};
use crate::tags::TagQuery;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// An image on a specific registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCoordinate {
    #[serde(default, alias = "registry_type")]
    pub registry: RegistryKind,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Tag the mapping was written against, kept for reporting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_pattern: Option<String>,
}

impl ImageCoordinate {
    pub fn new(registry: RegistryKind, image: impl Into<String>) -> Self {
        Self {
            registry,
            image: image.into(),
            namespace: None,
            tag: None,
            tag_pattern: None,
        }
    }

    pub fn with_tag_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.tag_pattern = Some(pattern.into());
        self
    }

    /// Release-only query for this image
    pub fn query(&self) -> Result<TagQuery> {
        let mut query = TagQuery::new(&self.image);
        if let Some(ns) = &self.namespace {
            query = query.with_namespace(ns);
        }
        if let Some(pattern) = &self.tag_pattern {
            query = query.with_pattern(pattern)?;
        }
        Ok(query)
    }
}

impl fmt::Display for ImageCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let image = match &self.namespace {
            Some(ns) => format!("{}/{}", ns, self.image),
            None => self.image.clone(),
        };
        match self.registry {
            RegistryKind::DockerHub => write!(f, "{}", image)?,
            RegistryKind::Mcr => write!(f, "mcr.microsoft.com/{}", image)?,
            RegistryKind::Chainguard if image.contains('/') => write!(f, "cgr.dev/{}", image)?,
            RegistryKind::Chainguard => write!(f, "cgr.dev/chainguard/{}", image)?,
            RegistryKind::Oci => write!(f, "oci://{}", image)?,
        }
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        Ok(())
    }
}

/// Upstream image and its replacement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Anything other than `mapped` skips resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub upstream: ImageCoordinate,
    #[serde(alias = "chainguard")]
    pub target: ImageCoordinate,
}

impl Mapping {
    pub fn new(upstream: ImageCoordinate, target: ImageCoordinate) -> Self {
        Self {
            name: None,
            status: None,
            upstream,
            target,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.status.as_deref().is_none_or(|s| s == "mapped")
    }
}

/// Outcome for one mapping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionResult {
    #[serde(flatten)]
    pub mapping: Mapping,
    pub upstream_versions: Option<PeriodResolution>,
    pub target_versions: Option<PeriodResolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResolutionResult {
    /// Original mapping, no version data, and why
    pub fn failed(mapping: Mapping, error: impl Into<String>) -> Self {
        Self {
            mapping,
            upstream_versions: None,
            target_versions: None,
            error: Some(error.into()),
        }
    }

    fn skipped(mapping: Mapping) -> Self {
        Self {
            mapping,
            upstream_versions: None,
            target_versions: None,
            error: None,
        }
    }

    /// At least one upstream period produced a tag
    pub fn is_resolved(&self) -> bool {
        self.upstream_versions
            .as_ref()
            .is_some_and(PeriodResolution::any_resolved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchStatistics {
    pub total: usize,
    pub resolved: usize,
    pub failed: usize,
}

/// Results in input order plus counts
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    #[serde(rename = "mappings")]
    pub results: Vec<ResolutionResult>,
    pub statistics: BatchStatistics,
}

impl BatchReport {
    pub fn new(results: Vec<ResolutionResult>) -> Self {
        let total = results.len();
        let resolved = results.iter().filter(|r| r.is_resolved()).count();
        Self {
            results,
            statistics: BatchStatistics {
                total,
                resolved,
                failed: total - resolved,
            },
        }
    }
}

struct Worker {
    factory: Arc<dyn ClientFactory>,
    periods: Vec<Period>,
    now: DateTime<Utc>,
    total: usize,
    output: Logger,
}

impl Worker {
    async fn resolve(&self, index: usize, mapping: Mapping) -> ResolutionResult {
        let position = format!("[{}/{}]", index + 1, self.total);

        if !mapping.is_mapped() {
            self.output
                .verbose(&format!("{} Skipping unmapped: {}", position, mapping.upstream));
            return ResolutionResult::skipped(mapping);
        }

        self.output
            .info(&format!("{} Processing: {}", position, mapping.upstream));
        let start = Instant::now();

        match self.resolve_pair(&mapping).await {
            Ok((upstream, target)) => {
                self.output.success(&format!(
                    "{} Completed {} in {}",
                    position,
                    mapping.upstream,
                    self.output.format_duration(start.elapsed())
                ));
                ResolutionResult {
                    mapping,
                    upstream_versions: Some(upstream),
                    target_versions: Some(target),
                    error: None,
                }
            }
            Err(e) => {
                self.output.warning(&format!(
                    "{} Error resolving {} after {}: {}",
                    position,
                    mapping.upstream,
                    self.output.format_duration(start.elapsed()),
                    e
                ));
                ResolutionResult::failed(mapping, e.to_string())
            }
        }
    }

    async fn resolve_pair(&self, mapping: &Mapping) -> Result<(PeriodResolution, PeriodResolution)> {
        self.output.detail(&format!("upstream: {}", mapping.upstream));
        let upstream = self.resolve_image(&mapping.upstream).await?;
        self.output.detail(&format!("target: {}", mapping.target));
        let target = self.resolve_image(&mapping.target).await?;
        Ok((upstream, target))
    }

    async fn resolve_image(&self, image: &ImageCoordinate) -> Result<PeriodResolution> {
        let query = image.query()?;
        let client = self.factory.client_for(image.registry)?;
        HistoricalResolver::new(client, self.output.clone())
            .find_for_periods(&query, &self.periods, self.now)
            .await
    }
}

/// Resolves many mappings concurrently with per-mapping failure isolation
pub struct BatchResolutionDriver {
    factory: Arc<dyn ClientFactory>,
    periods: Vec<Period>,
    workers: usize,
    now: Option<DateTime<Utc>>,
    output: Logger,
}

impl BatchResolutionDriver {
    pub fn new(factory: Arc<dyn ClientFactory>, output: Logger) -> Self {
        Self {
            factory,
            periods: Period::defaults(),
            workers: 5,
            now: None,
            output,
        }
    }

    pub fn with_periods(mut self, periods: Vec<Period>) -> Self {
        self.periods = periods;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Fix the instant periods are counted back from
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    /// Resolve every mapping. `report.results[i]` always belongs to `mappings[i]`.
    pub async fn resolve_all(&self, mappings: Vec<Mapping>) -> BatchReport {
        let total = mappings.len();
        let worker = Arc::new(Worker {
            factory: Arc::clone(&self.factory),
            periods: self.periods.clone(),
            now: self.now.unwrap_or_else(Utc::now),
            total,
            output: self.output.clone(),
        });

        if self.workers > 1 {
            self.output.info(&format!(
                "Resolving {} mappings with {} parallel workers",
                total, self.workers
            ));
        } else {
            self.output
                .info(&format!("Resolving {} mappings sequentially", total));
        }

        let originals = mappings.clone();
        let outcomes = WorkerPool::new(self.workers)
            .run(mappings, move |index, mapping| {
                let worker = Arc::clone(&worker);
                async move { worker.resolve(index, mapping).await }
            })
            .await;

        let results = outcomes
            .into_iter()
            .zip(originals)
            .map(|(outcome, mapping)| {
                outcome.unwrap_or_else(|e| {
                    self.output.error(&format!("Task failed: {}", e));
                    ResolutionResult::failed(mapping, e.to_string())
                })
            })
            .collect();

        BatchReport::new(results)
    }
}
