//! Filtering and ordering of tag collections

use super::ImageTag;
use regex::Regex;
use std::collections::HashSet;

/// Drop dev tags unless `include_dev`, keep only semver names if `only_semver`,
/// and keep only names `pattern` finds a match in.
pub fn filter_tags(
    tags: Vec<ImageTag>,
    include_dev: bool,
    only_semver: bool,
    pattern: Option<&Regex>,
) -> Vec<ImageTag> {
    let mut filtered = tags;

    if !include_dev {
        filtered.retain(|t| !t.is_dev());
    }

    if only_semver {
        filtered.retain(|t| t.is_semver());
    }

    if let Some(re) = pattern {
        filtered.retain(|t| re.is_match(&t.name));
    }

    filtered
}

/// Order tags by creation time.
///
/// Undated tags always come after every dated tag, in input order. Dated tags
/// with equal instants also keep their input order, in either direction.
pub fn sort_tags_by_date(tags: Vec<ImageTag>, descending: bool) -> Vec<ImageTag> {
    let (mut dated, undated): (Vec<_>, Vec<_>) =
        tags.into_iter().partition(|t| t.created.is_some());

    dated.sort_by(|a, b| {
        let ord = a.created.cmp(&b.created);
        if descending { ord.reverse() } else { ord }
    });

    dated.extend(undated);
    dated
}

/// Remove repeated names, keeping the first occurrence
pub fn dedup_by_name(tags: Vec<ImageTag>) -> Vec<ImageTag> {
    let mut seen = HashSet::with_capacity(tags.len());
    tags.into_iter()
        .filter(|t| seen.insert(t.name.clone()))
        .collect()
}
