//! Canonical data model for catalog entities.
//!
//! Upstream records arrive in OData v2 or v4 envelopes with PascalCase
//! keys. [`normalize`](crate::normalize) maps them into the types here;
//! nothing downstream of the normalizer sees a raw record.
//!
//! Optional fields are `Option`s and serialize as `null` when absent. A
//! field that was omitted (for example by `$select`) is `None`, while a
//! field the service returned as an empty string is `Some("")`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// An entity set exposed by the catalog service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntitySet {
    ContentPackages,
    Artifacts,
}

impl EntitySet {
    /// The entity set name as it appears in request paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntitySet::ContentPackages => "ContentPackages",
            EntitySet::Artifacts => "Artifacts",
        }
    }

    /// Properties that may appear in `$filter`, `$select`, and `$orderby`.
    pub fn known_fields(&self) -> &'static [&'static str] {
        match self {
            EntitySet::ContentPackages => &[
                "TechnicalName",
                "DisplayName",
                "Version",
                "Description",
                "ShortText",
            ],
            EntitySet::Artifacts => &[
                "Name",
                "DisplayName",
                "Type",
                "SubType",
                "Version",
                "State",
                "Description",
                "CreatedAt",
                "ModifiedAt",
                "CreatedBy",
                "ModifiedBy",
            ],
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.known_fields().contains(&field)
    }
}

impl fmt::Display for EntitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an artifact.
///
/// `Unknown` means the service returned a state this crate does not
/// recognize. A missing `State` property is `None` on the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactState {
    Active,
    Deprecated,
    Unknown,
}

impl ArtifactState {
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => ArtifactState::Active,
            "DEPRECATED" => ArtifactState::Deprecated,
            _ => ArtifactState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactState::Active => "ACTIVE",
            ArtifactState::Deprecated => "DEPRECATED",
            ArtifactState::Unknown => "UNKNOWN",
        }
    }
}

/// A catalog artifact (API, integration flow, event, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedArtifact {
    pub name: Option<String>,
    pub display_name: Option<String>,
    #[serde(rename = "type")]
    pub artifact_type: Option<String>,
    pub sub_type: Option<String>,
    pub version: Option<String>,
    pub state: Option<ArtifactState>,
    pub description: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub modified_by: Option<String>,
    /// Owning packages, present only when `$expand=ContentPackages` was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages: Option<Vec<NormalizedPackage>>,
}

/// A content package grouping related artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedPackage {
    pub technical_name: Option<String>,
    pub display_name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
}

/// One row of a `$apply=groupby(...)` aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCount {
    pub key: Option<String>,
    pub count: u64,
}

/// Diagnostic for a record (or field) the normalizer could not map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationNote {
    /// Position of the record within the response batch.
    pub index: usize,
    pub field: String,
    pub message: String,
}

/// Canonical result of one catalog request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedResult {
    Artifacts {
        items: Vec<NormalizedArtifact>,
        total_count: Option<u64>,
        notes: Vec<NormalizationNote>,
    },
    Packages {
        items: Vec<NormalizedPackage>,
        total_count: Option<u64>,
        notes: Vec<NormalizationNote>,
    },
    Groups {
        rows: Vec<GroupCount>,
        notes: Vec<NormalizationNote>,
    },
    /// Scalar `$count` response.
    Count { count: u64 },
    /// Verbatim `$value` or `$metadata` body.
    Raw { body: String },
}

impl NormalizedResult {
    pub fn artifacts(&self) -> Option<&[NormalizedArtifact]> {
        match self {
            NormalizedResult::Artifacts { items, .. } => Some(items),
            _ => None,
        }
    }

    pub fn packages(&self) -> Option<&[NormalizedPackage]> {
        match self {
            NormalizedResult::Packages { items, .. } => Some(items),
            _ => None,
        }
    }

    pub fn notes(&self) -> &[NormalizationNote] {
        match self {
            NormalizedResult::Artifacts { notes, .. }
            | NormalizedResult::Packages { notes, .. }
            | NormalizedResult::Groups { notes, .. } => notes,
            NormalizedResult::Count { .. } | NormalizedResult::Raw { .. } => &[],
        }
    }

    /// True when some records were skipped or some fields were unreadable.
    pub fn is_partial(&self) -> bool {
        !self.notes().is_empty()
    }

    pub fn total_count(&self) -> Option<u64> {
        match self {
            NormalizedResult::Artifacts { total_count, .. }
            | NormalizedResult::Packages { total_count, .. } => *total_count,
            NormalizedResult::Count { count } => Some(*count),
            NormalizedResult::Groups { rows, .. } => Some(rows.iter().map(|r| r.count).sum()),
            NormalizedResult::Raw { .. } => None,
        }
    }
}

/// Freshness bucket that decides how long a cached result stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TtlClass {
    PackageList,
    ArtifactDetail,
    Search,
    Metadata,
}

impl TtlClass {
    /// Default lifetime when no configuration overrides it.
    pub fn default_ttl(&self) -> Duration {
        match self {
            TtlClass::PackageList | TtlClass::Metadata => Duration::from_secs(24 * 60 * 60),
            TtlClass::ArtifactDetail => Duration::from_secs(7 * 24 * 60 * 60),
            TtlClass::Search => Duration::from_secs(5 * 60),
        }
    }
}
