//! Historical tag resolution
//!
//! Answers "which tag was the newest applicable one on date X" for a
//! repository, optionally for several named periods at once.

use crate::error::Result;
use crate::logging::Logger;
use crate::registry::RegistryClient;
use crate::tags::{ImageTag, TagQuery};
use chrono::{DateTime, Duration, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::sync::Arc;

/// A named offset into the past, in days before "now"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub name: String,
    pub offset_days: i64,
}

impl Period {
    pub fn new(name: impl Into<String>, offset_days: i64) -> Self {
        Self {
            name: name.into(),
            offset_days,
        }
    }

    /// `current`, `six_months_ago` and `one_year_ago`
    pub fn defaults() -> Vec<Period> {
        vec![
            Period::new("current", 0),
            Period::new("six_months_ago", 180),
            Period::new("one_year_ago", 365),
        ]
    }

    /// `now` minus the offset, or `None` if that falls outside the representable range
    pub fn target_date(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        Duration::try_days(self.offset_days).and_then(|offset| now.checked_sub_signed(offset))
    }
}

/// Resolved tag (or nothing) per period, in period order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodResolution {
    entries: Vec<(String, Option<ImageTag>)>,
}

impl PeriodResolution {
    /// Every period with no tag
    pub fn unresolved(periods: &[Period]) -> Self {
        Self {
            entries: periods.iter().map(|p| (p.name.clone(), None)).collect(),
        }
    }

    pub fn get(&self, period: &str) -> Option<&ImageTag> {
        self.entries
            .iter()
            .find(|(name, _)| name == period)
            .and_then(|(_, tag)| tag.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&ImageTag>)> {
        self.entries
            .iter()
            .map(|(name, tag)| (name.as_str(), tag.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if at least one period found a tag
    pub fn any_resolved(&self) -> bool {
        self.entries.iter().any(|(_, tag)| tag.is_some())
    }
}

#[derive(Serialize)]
struct ResolvedVersion<'a> {
    tag: &'a str,
    created: Option<String>,
    digest: Option<&'a str>,
    size: Option<u64>,
}

impl<'a> From<&'a ImageTag> for ResolvedVersion<'a> {
    fn from(tag: &'a ImageTag) -> Self {
        Self {
            tag: &tag.name,
            created: tag.created.map(|c| c.to_rfc3339()),
            digest: tag.digest.as_deref(),
            size: tag.size,
        }
    }
}

// Serialized as an ordered map: period name -> {tag, created, digest, size} or null.
impl Serialize for PeriodResolution {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, tag) in &self.entries {
            map.serialize_entry(name, &tag.as_ref().map(ResolvedVersion::from))?;
        }
        map.end()
    }
}

/// Newest tag created at or before `target`.
///
/// Undated tags never qualify. On equal creation times the tag listed first wins.
pub fn latest_at(tags: &[ImageTag], target: DateTime<Utc>) -> Option<&ImageTag> {
    let mut best: Option<&ImageTag> = None;
    for tag in tags {
        let Some(created) = tag.created else { continue };
        if created > target {
            continue;
        }
        if best.is_none_or(|b| b.created < Some(created)) {
            best = Some(tag);
        }
    }
    best
}

pub struct HistoricalResolver {
    client: Arc<dyn RegistryClient>,
    output: Logger,
}

impl HistoricalResolver {
    pub fn new(client: Arc<dyn RegistryClient>, output: Logger) -> Self {
        Self { client, output }
    }

    /// Listing filtered by the query, fetched once
    async fn candidates(&self, query: &TagQuery) -> Result<Vec<ImageTag>> {
        let tags = self.client.try_list_tags(query).await?;
        let listed = tags.len();
        let filtered = query.apply(tags);
        self.output.detail(&format!(
            "{}: {} of {} tags qualify",
            query.qualified_repository(),
            filtered.len(),
            listed
        ));
        Ok(filtered)
    }

    /// Newest qualifying tag that existed at `target`, or `None`.
    ///
    /// A failed listing is an error here so callers can tell it apart from a
    /// repository without qualifying tags.
    pub async fn find_latest_at_date(
        &self,
        query: &TagQuery,
        target: DateTime<Utc>,
    ) -> Result<Option<ImageTag>> {
        let candidates = self.candidates(query).await?;
        Ok(latest_at(&candidates, target).cloned())
    }

    /// Resolve every period against one listing, all anchored to `now`
    pub async fn find_for_periods(
        &self,
        query: &TagQuery,
        periods: &[Period],
        now: DateTime<Utc>,
    ) -> Result<PeriodResolution> {
        let candidates = self.candidates(query).await?;

        let entries = periods
            .iter()
            .map(|period| {
                let found = period
                    .target_date(now)
                    .and_then(|target| latest_at(&candidates, target))
                    .cloned();
                if let Some(tag) = &found {
                    self.output.debug(&format!(
                        "{} @ {}: {}",
                        query.qualified_repository(),
                        period.name,
                        tag
                    ));
                }
                (period.name.clone(), found)
            })
            .collect();

        Ok(PeriodResolution { entries })
    }

    /// [`find_for_periods`](Self::find_for_periods) anchored to the current time
    pub async fn find_for_periods_now(
        &self,
        query: &TagQuery,
        periods: &[Period],
    ) -> Result<PeriodResolution> {
        self.find_for_periods(query, periods, Utc::now()).await
    }
}
