//! Catalog operations.
//!
//! [`CatalogService`] turns caller intent (search, detail lookup, counts,
//! package comparison, ...) into [`QueryRequest`]s, runs them through the
//! [`QueryDispatcher`], and shapes the normalized results for the tool
//! layer. It owns no state besides the dispatcher; caching, retries and
//! single-flight all happen below it.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hub_catalog_core::criteria::{build, SearchCriteria};
use hub_catalog_core::filter::FilterClause;
use hub_catalog_core::models::{
    EntitySet, GroupCount, NormalizationNote, NormalizedArtifact, NormalizedPackage,
    NormalizedResult,
};
use hub_catalog_core::query::{Aggregation, QueryRequest, Target};
use hub_catalog_core::rank::{rank, Page};
use hub_catalog_core::{CatalogError, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::dispatch::QueryDispatcher;

/// Page size used by `search` when the caller gives none.
pub const DEFAULT_TOP: i64 = 50;

/// Upper bound on package ids accepted by `compare_packages`.
pub const MAX_COMPARE: usize = 10;

/// A page of artifacts plus paging hints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactPage {
    pub items: Vec<NormalizedArtifact>,
    /// Server-side total when `$count` was requested, or the size of the
    /// locally ranked set.
    pub total: Option<u64>,
    pub top: u32,
    pub skip: u32,
    pub next_skip: Option<u32>,
    /// True when the order comes from local keyword ranking.
    pub ranked: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<NormalizationNote>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountSummary {
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<GroupCount>>,
}

/// Per-package outcome of `compare_packages`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageComparison {
    pub package: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_type: Option<Vec<GroupCount>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PackageError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageError {
    pub code: String,
    pub message: String,
}

pub struct CatalogService {
    dispatcher: QueryDispatcher,
    ranking_window: u32,
}

impl CatalogService {
    pub fn new(dispatcher: QueryDispatcher, ranking_window: u32) -> Self {
        Self {
            dispatcher,
            ranking_window: ranking_window.max(1),
        }
    }

    pub fn dispatcher(&self) -> &QueryDispatcher {
        &self.dispatcher
    }

    async fn run(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<Arc<NormalizedResult>> {
        self.dispatcher.execute(request, cancel).await
    }

    /// Filtered artifact search, optionally scoped to one package.
    ///
    /// Multi-keyword searches fetch up to `ranking_window` candidates from
    /// offset 0, rank them by distinct keyword hits, and cut the requested
    /// page locally. Everything else is paged by the service.
    pub async fn search(
        &self,
        package: Option<&str>,
        criteria: &SearchCriteria,
        cancel: &CancellationToken,
    ) -> Result<ArtifactPage> {
        let mut criteria = criteria.clone();
        if criteria.top.is_none() {
            criteria.top = Some(DEFAULT_TOP);
        }
        let requested = build(EntitySet::Artifacts, package, &criteria)?;
        let top = requested.top.unwrap_or(DEFAULT_TOP as u32);
        let skip = requested.skip.unwrap_or(0);

        if criteria.is_multi_keyword() && criteria.order_by.is_none() {
            let mut window = requested;
            window.top = Some(self.ranking_window);
            window.skip = None;
            window.count = false;

            let result = self.run(&window, cancel).await?;
            let (items, notes) = artifacts_of(&result)?;
            let ranked = rank(items, &criteria.distinct_keywords());
            let page = Page::cut(&ranked, top as usize, skip as usize);
            return Ok(ArtifactPage {
                total: Some(page.total as u64),
                next_skip: page.next_skip.and_then(|s| u32::try_from(s).ok()),
                items: page.items,
                top,
                skip,
                ranked: true,
                notes,
            });
        }

        let result = self.run(&requested, cancel).await?;
        let total = result.total_count();
        let (items, notes) = artifacts_of(&result)?;
        let returned = items.len() as u64;
        let end = u64::from(skip) + returned;
        let has_more = match total {
            Some(total) => end < total,
            None => returned == u64::from(top),
        };
        // No hint when the next offset would not fit a `$skip`.
        let next_skip = if has_more {
            u32::try_from(end).ok()
        } else {
            None
        };
        Ok(ArtifactPage {
            items,
            total,
            top,
            skip,
            next_skip,
            ranked: false,
            notes,
        })
    }

    /// One artifact by its composite key.
    pub async fn get_details(
        &self,
        name: &str,
        artifact_type: &str,
        cancel: &CancellationToken,
    ) -> Result<NormalizedArtifact> {
        let name = required("name", name)?;
        let artifact_type = required("type", artifact_type)?;
        let request = QueryRequest::artifact(name, artifact_type);
        let result = self.run(&request, cancel).await?;
        let (mut items, _) = artifacts_of(&result)?;
        if items.is_empty() {
            return Err(CatalogError::NotFound(request.path()));
        }
        Ok(items.swap_remove(0))
    }

    /// Artifacts modified on or after midnight UTC `days` days ago, newest
    /// first.
    pub async fn find_recent(
        &self,
        days: i64,
        criteria: &SearchCriteria,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ArtifactPage> {
        let since = recent_cutoff(now, days)?;
        let criteria = SearchCriteria {
            modified_after: Some(since.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
            order_by: Some("ModifiedAt desc".to_string()),
            ..criteria.clone()
        };
        self.search(None, &criteria, cancel).await
    }

    /// `$count`, or a `$apply` groupby aggregation when `group_by` is set.
    pub async fn count(
        &self,
        package: Option<&str>,
        criteria: &SearchCriteria,
        group_by: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<CountSummary> {
        let mut request = build(EntitySet::Artifacts, package, criteria)?;
        request.top = None;
        request.skip = None;
        request.order_by = None;
        request.select = None;
        request.count = false;

        match group_by.map(str::trim).filter(|g| !g.is_empty()) {
            None => {
                request.target = Target::Count;
                let result = self.run(&request, cancel).await?;
                let total = result.total_count().ok_or_else(|| {
                    CatalogError::EnvelopeFormat("count response carried no count".to_string())
                })?;
                Ok(CountSummary {
                    total,
                    group_by: None,
                    groups: None,
                })
            }
            Some(field) => {
                if !EntitySet::Artifacts.has_field(field) {
                    return Err(CatalogError::validation(format!(
                        "cannot group by unknown field '{}'",
                        field
                    )));
                }
                request.apply = Some(Aggregation {
                    group_by: field.to_string(),
                });
                let result = self.run(&request, cancel).await?;
                let mut rows = match result.as_ref() {
                    NormalizedResult::Groups { rows, .. } => rows.clone(),
                    other => return Err(unexpected("aggregation rows", other)),
                };
                rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
                Ok(CountSummary {
                    total: rows.iter().map(|r| r.count).sum(),
                    group_by: Some(field.to_string()),
                    groups: Some(rows),
                })
            }
        }
    }

    /// One content package by technical name.
    pub async fn get_package_info(
        &self,
        package: &str,
        cancel: &CancellationToken,
    ) -> Result<NormalizedPackage> {
        let package = required("package", package)?;
        let request = QueryRequest::package(package);
        let result = self.run(&request, cancel).await?;
        let mut items = packages_of(&result)?;
        if items.is_empty() {
            return Err(CatalogError::NotFound(request.path()));
        }
        Ok(items.swap_remove(0))
    }

    /// Artifacts named `name` together with the packages that ship them.
    pub async fn get_artifact_packages(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<NormalizedArtifact>> {
        let name = required("name", name)?;
        let mut request = QueryRequest::collection(EntitySet::Artifacts);
        request.filters = vec![FilterClause::eq("Name", name)];
        request.expand = Some("ContentPackages".to_string());
        let result = self.run(&request, cancel).await?;
        let (items, _) = artifacts_of(&result)?;
        Ok(items)
    }

    /// The service's `$metadata` document, verbatim.
    pub async fn service_metadata(&self, cancel: &CancellationToken) -> Result<String> {
        let result = self.run(&QueryRequest::metadata(), cancel).await?;
        match result.as_ref() {
            NormalizedResult::Raw { body } => Ok(body.clone()),
            other => Err(unexpected("metadata document", other)),
        }
    }

    /// Every content package (slim projection, cached as a package list),
    /// optionally narrowed by a case-insensitive term matched against the
    /// display name and technical name.
    pub async fn list_packages(
        &self,
        search_term: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<NormalizedPackage>> {
        let mut request = QueryRequest::collection(EntitySet::ContentPackages);
        request.select = Some(
            ["TechnicalName", "DisplayName", "Version"]
                .into_iter()
                .map(str::to_string)
                .collect::<BTreeSet<_>>(),
        );
        let result = self.run(&request, cancel).await?;
        let packages = packages_of(&result)?;

        let term = match search_term.map(str::trim).filter(|t| !t.is_empty()) {
            Some(term) => term.to_lowercase(),
            None => return Ok(packages),
        };
        let hit = |field: &Option<String>| {
            field
                .as_deref()
                .is_some_and(|v| v.to_lowercase().contains(&term))
        };
        Ok(packages
            .into_iter()
            .filter(|p| hit(&p.display_name) || hit(&p.technical_name))
            .collect())
    }

    /// Artifact counts by type for several packages, fetched concurrently.
    ///
    /// A package that fails is reported inline; cancellation fails the
    /// whole comparison.
    pub async fn compare_packages(
        &self,
        packages: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<PackageComparison>> {
        let mut seen = BTreeSet::new();
        let ids: Vec<&str> = packages
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty() && seen.insert(p.to_string()))
            .collect();
        if ids.len() < 2 {
            return Err(CatalogError::validation(
                "compare_packages needs at least two distinct package ids",
            ));
        }
        if ids.len() > MAX_COMPARE {
            return Err(CatalogError::validation(format!(
                "compare_packages accepts at most {} package ids",
                MAX_COMPARE
            )));
        }

        let no_criteria = &SearchCriteria::default();
        let lookups = ids
            .iter()
            .map(move |id| self.count(Some(*id), no_criteria, Some("Type"), cancel));
        let outcomes = futures::future::join_all(lookups).await;

        let mut comparisons = Vec::with_capacity(ids.len());
        for (id, outcome) in ids.into_iter().zip(outcomes) {
            comparisons.push(match outcome {
                Ok(summary) => PackageComparison {
                    package: id.to_string(),
                    total: Some(summary.total),
                    by_type: summary.groups,
                    error: None,
                },
                Err(CatalogError::Cancelled) => return Err(CatalogError::Cancelled),
                Err(e) => PackageComparison {
                    package: id.to_string(),
                    total: None,
                    by_type: None,
                    error: Some(PackageError {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    }),
                },
            });
        }
        Ok(comparisons)
    }
}

/// Midnight UTC of the day `days` days before `now`.
pub fn recent_cutoff(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>> {
    if !(1..=3650).contains(&days) {
        return Err(CatalogError::validation(format!(
            "days must be between 1 and 3650, got {}",
            days
        )));
    }
    let day = (now - ChronoDuration::days(days)).date_naive();
    day.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| CatalogError::validation("days is out of range"))
}

fn required<'a>(name: &str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        Err(CatalogError::validation(format!("{} must not be empty", name)))
    } else {
        Ok(value)
    }
}

fn artifacts_of(
    result: &NormalizedResult,
) -> Result<(Vec<NormalizedArtifact>, Vec<NormalizationNote>)> {
    match result {
        NormalizedResult::Artifacts { items, notes, .. } => Ok((items.clone(), notes.clone())),
        other => Err(unexpected("artifact collection", other)),
    }
}

fn packages_of(result: &NormalizedResult) -> Result<Vec<NormalizedPackage>> {
    match result {
        NormalizedResult::Packages { items, .. } => Ok(items.clone()),
        other => Err(unexpected("package collection", other)),
    }
}

fn unexpected(wanted: &str, got: &NormalizedResult) -> CatalogError {
    let kind = match got {
        NormalizedResult::Artifacts { .. } => "artifacts",
        NormalizedResult::Packages { .. } => "packages",
        NormalizedResult::Groups { .. } => "groups",
        NormalizedResult::Count { .. } => "a scalar count",
        NormalizedResult::Raw { .. } => "a raw document",
    };
    CatalogError::EnvelopeFormat(format!("expected {}, got {}", wanted, kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_recent_cutoff_truncates_to_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 15, 45, 0).unwrap();
        assert_eq!(
            recent_cutoff(now, 7).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap()
        );
        assert!(recent_cutoff(now, 0).is_err());
        assert!(recent_cutoff(now, -1).is_err());
    }

    #[test]
    fn test_required_trims() {
        assert_eq!(required("name", "  X ").unwrap(), "X");
        assert!(matches!(
            required("name", "   "),
            Err(CatalogError::Validation(m)) if m == "name must not be empty"
        ));
    }
}
