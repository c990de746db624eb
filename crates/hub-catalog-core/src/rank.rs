//! Relevance ordering and client-side pagination.
//!
//! Multi-keyword searches are ranked locally: each artifact scores one
//! hit per distinct keyword found (case-insensitive substring) in its
//! display name or description. Ties fall back to display name, then
//! technical name, so equal inputs always produce the same order.

use serde::Serialize;
use std::cmp::Ordering;

use crate::models::NormalizedArtifact;

/// Number of distinct keywords found in the artifact's display name or
/// description.
pub fn keyword_hits(artifact: &NormalizedArtifact, keywords: &[String]) -> usize {
    let haystacks: Vec<String> = [&artifact.display_name, &artifact.description]
        .into_iter()
        .flatten()
        .map(|s| s.to_lowercase())
        .collect();

    let mut seen: Vec<String> = Vec::new();
    for keyword in keywords {
        let needle = keyword.trim().to_lowercase();
        if needle.is_empty() || seen.contains(&needle) {
            continue;
        }
        if haystacks.iter().any(|h| h.contains(&needle)) {
            seen.push(needle);
        }
    }
    seen.len()
}

/// Order artifacts by keyword relevance.
///
/// With fewer than two distinct keywords the service order is kept.
pub fn rank(mut items: Vec<NormalizedArtifact>, keywords: &[String]) -> Vec<NormalizedArtifact> {
    let mut distinct: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    distinct.sort();
    distinct.dedup();
    if distinct.len() < 2 {
        return items;
    }

    let mut scored: Vec<(usize, NormalizedArtifact)> = items
        .drain(..)
        .map(|a| (keyword_hits(&a, &distinct), a))
        .collect();
    scored.sort_by(|(ha, a), (hb, b)| hb.cmp(ha).then_with(|| tie_break(a, b)));
    scored.into_iter().map(|(_, a)| a).collect()
}

fn tie_break(a: &NormalizedArtifact, b: &NormalizedArtifact) -> Ordering {
    cmp_absent_last(
        a.display_name.as_deref().map(str::to_lowercase),
        b.display_name.as_deref().map(str::to_lowercase),
    )
    .then_with(|| cmp_absent_last(a.name.clone(), b.name.clone()))
    .then_with(|| cmp_absent_last(a.artifact_type.clone(), b.artifact_type.clone()))
}

fn cmp_absent_last(a: Option<String>, b: Option<String>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// One page of results with enough context to request the next one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub top: usize,
    pub skip: usize,
    /// Size of the ranked set the page was cut from.
    pub total: usize,
    /// `skip` for the following page, absent on the last page.
    pub next_skip: Option<usize>,
}

/// Items `skip + 1 ..= skip + top` of `source`, lazily.
pub fn paginate<T>(source: &[T], top: usize, skip: usize) -> impl Iterator<Item = &T> {
    source.iter().skip(skip).take(top)
}

impl<T: Clone> Page<T> {
    pub fn cut(source: &[T], top: usize, skip: usize) -> Self {
        let items: Vec<T> = paginate(source, top, skip).cloned().collect();
        let end = skip.saturating_add(items.len());
        Self {
            next_skip: (top > 0 && end < source.len()).then_some(end),
            items,
            top,
            skip,
            total: source.len(),
        }
    }
}
