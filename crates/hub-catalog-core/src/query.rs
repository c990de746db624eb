//! Catalog requests and their wire rendering.
//!
//! A [`QueryRequest`] is the structured description of one call to the
//! catalog service. [`QueryRequest::render`] produces the full URL and the
//! [`Fingerprint`] used for cache addressing and single-flight
//! deduplication. Options are rendered from a `BTreeMap`, so their order is
//! fixed by option name and two requests with the same wire text always
//! share a fingerprint.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{CatalogError, Result};
use crate::filter::{escape_literal, render, FilterClause};
use crate::models::{EntitySet, TtlClass};

/// What part of the service a request addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The entity set, or `ContentPackages('<scope>')/Artifacts` when scoped.
    Collection,
    /// A single entity by key.
    Entity(EntityKey),
    /// `<collection>/$count`, answered with a bare integer.
    Count,
    /// The `$metadata` document.
    Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKey {
    /// `ContentPackages('<technical name>')`
    Package(String),
    /// `Artifacts(Name='<name>',Type='<type>')`
    Artifact { name: String, artifact_type: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    /// Parse `"Field"`, `"Field asc"`, or `"Field desc"`, checking the field
    /// against `entity_set`.
    pub fn parse(spec: &str, entity_set: EntitySet) -> Result<Self> {
        let mut parts = spec.split_whitespace();
        let field = parts
            .next()
            .ok_or_else(|| CatalogError::validation("order_by must not be empty"))?;
        if !entity_set.has_field(field) {
            return Err(CatalogError::validation(format!(
                "cannot order by unknown field '{}' for {}",
                field, entity_set
            )));
        }
        let direction = match parts.next().map(|d| d.to_ascii_lowercase()) {
            None => Direction::Asc,
            Some(d) if d == "asc" => Direction::Asc,
            Some(d) if d == "desc" => Direction::Desc,
            Some(d) => {
                return Err(CatalogError::validation(format!(
                    "unknown sort direction '{}': use asc or desc",
                    d
                )))
            }
        };
        if parts.next().is_some() {
            return Err(CatalogError::validation(format!(
                "malformed order_by '{}'",
                spec
            )));
        }
        Ok(Self {
            field: field.to_string(),
            direction,
        })
    }

    fn render(&self) -> String {
        match self.direction {
            Direction::Asc => format!("{} asc", self.field),
            Direction::Desc => format!("{} desc", self.field),
        }
    }
}

/// `$apply=groupby((Field),aggregate($count as Count))`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    pub group_by: String,
}

impl Aggregation {
    fn render(&self) -> String {
        format!("groupby(({}),aggregate($count as Count))", self.group_by)
    }
}

/// How the normalizer should read the response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expect {
    Entities(EntitySet),
    Groups { field: String },
    Count,
    Document,
}

/// Structured description of a single catalog request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub entity_set: EntitySet,
    /// Package technical name for `ContentPackages('<id>')/Artifacts`.
    pub scope: Option<String>,
    pub target: Target,
    pub filters: Vec<FilterClause>,
    pub order_by: Option<OrderBy>,
    pub top: Option<u32>,
    pub skip: Option<u32>,
    pub select: Option<BTreeSet<String>>,
    pub count: bool,
    /// Single navigation property to expand.
    pub expand: Option<String>,
    pub apply: Option<Aggregation>,
}

impl QueryRequest {
    /// An unfiltered collection request against `entity_set`.
    pub fn collection(entity_set: EntitySet) -> Self {
        Self {
            entity_set,
            scope: None,
            target: Target::Collection,
            filters: Vec::new(),
            order_by: None,
            top: None,
            skip: None,
            select: None,
            count: false,
            expand: None,
            apply: None,
        }
    }

    pub fn package(technical_name: impl Into<String>) -> Self {
        Self {
            target: Target::Entity(EntityKey::Package(technical_name.into())),
            ..Self::collection(EntitySet::ContentPackages)
        }
    }

    pub fn artifact(name: impl Into<String>, artifact_type: impl Into<String>) -> Self {
        Self {
            target: Target::Entity(EntityKey::Artifact {
                name: name.into(),
                artifact_type: artifact_type.into(),
            }),
            ..Self::collection(EntitySet::Artifacts)
        }
    }

    pub fn metadata() -> Self {
        Self {
            target: Target::Metadata,
            ..Self::collection(EntitySet::Artifacts)
        }
    }

    /// Check the structural invariants the builder guarantees, for requests
    /// assembled by hand.
    pub fn validate(&self) -> Result<()> {
        if self.top == Some(0) {
            return Err(CatalogError::validation("top must be a positive integer"));
        }
        if let Some(select) = &self.select {
            if select.is_empty() {
                return Err(CatalogError::validation("select must not be empty"));
            }
        }
        if self.scope.is_some() && self.entity_set != EntitySet::Artifacts {
            return Err(CatalogError::validation(
                "a package scope only applies to Artifacts",
            ));
        }
        Ok(())
    }

    /// Freshness bucket implied by what the request addresses.
    pub fn ttl_class(&self) -> TtlClass {
        match (&self.target, self.entity_set) {
            (Target::Metadata, _) => TtlClass::Metadata,
            (Target::Entity(EntityKey::Artifact { .. }), _) => TtlClass::ArtifactDetail,
            (Target::Entity(EntityKey::Package(_)), _) => TtlClass::PackageList,
            (Target::Collection, EntitySet::ContentPackages) if self.filters.is_empty() => {
                TtlClass::PackageList
            }
            _ => TtlClass::Search,
        }
    }

    pub fn expect(&self) -> Expect {
        match (&self.target, &self.apply) {
            (Target::Metadata, _) => Expect::Document,
            (Target::Count, _) => Expect::Count,
            (_, Some(apply)) => Expect::Groups {
                field: apply.group_by.clone(),
            },
            _ => Expect::Entities(self.entity_set),
        }
    }

    /// Resource path relative to the service root.
    pub fn path(&self) -> String {
        let collection = match &self.scope {
            Some(scope) => format!("ContentPackages('{}')/Artifacts", key_segment(scope)),
            None => self.entity_set.as_str().to_string(),
        };
        match &self.target {
            Target::Collection => collection,
            Target::Count => format!("{}/$count", collection),
            Target::Metadata => "$metadata".to_string(),
            Target::Entity(EntityKey::Package(id)) => {
                format!("ContentPackages('{}')", key_segment(id))
            }
            Target::Entity(EntityKey::Artifact {
                name,
                artifact_type,
            }) => format!(
                "Artifacts(Name='{}',Type='{}')",
                key_segment(name),
                key_segment(artifact_type)
            ),
        }
    }

    /// Query options keyed by option name, values not yet percent-encoded.
    ///
    /// `$format=json` is always present except for `$count` and `$metadata`,
    /// whose responses are not JSON.
    pub fn options(&self) -> BTreeMap<&'static str, String> {
        let mut options = BTreeMap::new();

        if !matches!(self.target, Target::Count | Target::Metadata) {
            options.insert("$format", "json".to_string());
        }
        if !self.filters.is_empty() {
            options.insert("$filter", render(&self.filters));
        }
        if matches!(self.target, Target::Metadata) {
            return options;
        }
        if let Some(select) = &self.select {
            options.insert("$select", select.iter().cloned().collect::<Vec<_>>().join(","));
        }
        if let Some(order_by) = &self.order_by {
            options.insert("$orderby", order_by.render());
        }
        if let Some(top) = self.top {
            options.insert("$top", top.to_string());
        }
        if let Some(skip) = self.skip {
            options.insert("$skip", skip.to_string());
        }
        if self.count {
            options.insert("$count", "true".to_string());
        }
        if let Some(expand) = &self.expand {
            options.insert("$expand", expand.clone());
        }
        if let Some(apply) = &self.apply {
            options.insert("$apply", apply.render());
        }
        options
    }

    /// Render the full URL under `base_url` and fingerprint it.
    pub fn render(&self, base_url: &str) -> RenderedRequest {
        let path = self.path();
        let query = self
            .options()
            .iter()
            .map(|(name, value)| format!("{}={}", name, urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");

        let mut url = format!("{}/{}", base_url.trim_end_matches('/'), path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }

        RenderedRequest {
            fingerprint: Fingerprint::of(&url),
            path,
            url,
        }
    }
}

/// Escape and percent-encode a key value inside `('...')`.
fn key_segment(value: &str) -> String {
    urlencoding::encode(&escape_literal(value)).into_owned()
}

/// A request rendered to wire text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRequest {
    pub url: String,
    pub path: String,
    pub fingerprint: Fingerprint,
}

/// SHA-256 of the fully rendered URL, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(url: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterClause;

    const BASE: &str = "https://api.sap.com/odata/1.0/catalog.svc/";

    #[test]
    fn test_scoped_collection_path() {
        let req = QueryRequest {
            scope: Some("SAPS4HANACloud".into()),
            ..QueryRequest::collection(EntitySet::Artifacts)
        };
        assert_eq!(req.path(), "ContentPackages('SAPS4HANACloud')/Artifacts");
    }

    #[test]
    fn test_composite_key_path_escapes_quotes() {
        let req = QueryRequest::artifact("O'Brien API", "API");
        assert_eq!(req.path(), "Artifacts(Name='O%27%27Brien%20API',Type='API')");
        assert_eq!(req.ttl_class(), TtlClass::ArtifactDetail);
    }

    #[test]
    fn test_options_sorted_and_format_forced() {
        let req = QueryRequest {
            filters: vec![FilterClause::eq("Type", "API")],
            top: Some(50),
            skip: Some(10),
            select: Some(["Name".to_string(), "DisplayName".to_string()].into()),
            ..QueryRequest::collection(EntitySet::Artifacts)
        };
        let rendered = req.render(BASE);
        assert_eq!(
            rendered.url,
            "https://api.sap.com/odata/1.0/catalog.svc/Artifacts?\
             $filter=Type%20eq%20%27API%27&$format=json&$select=DisplayName%2CName&$skip=10&$top=50"
        );
    }

    #[test]
    fn test_identical_wire_text_identical_fingerprint() {
        let a = QueryRequest {
            select: Some(["Version", "Name"].iter().map(|s| s.to_string()).collect()),
            top: Some(5),
            ..QueryRequest::collection(EntitySet::Artifacts)
        };
        let b = QueryRequest {
            top: Some(5),
            select: Some(["Name", "Version"].iter().map(|s| s.to_string()).collect()),
            ..QueryRequest::collection(EntitySet::Artifacts)
        };
        assert_eq!(a.render(BASE).fingerprint, b.render(BASE).fingerprint);

        let c = QueryRequest {
            top: Some(6),
            ..b.clone()
        };
        assert_ne!(a.render(BASE).fingerprint, c.render(BASE).fingerprint);
        assert_eq!(a.render(BASE).fingerprint.as_str().len(), 64);
    }

    #[test]
    fn test_count_and_metadata_skip_format() {
        let count = QueryRequest {
            target: Target::Count,
            ..QueryRequest::collection(EntitySet::Artifacts)
        };
        assert_eq!(count.render(BASE).url, format!("{}Artifacts/$count", BASE));
        assert_eq!(count.expect(), Expect::Count);

        let meta = QueryRequest::metadata();
        assert_eq!(meta.render(BASE).url, format!("{}$metadata", BASE));
        assert_eq!(meta.ttl_class(), TtlClass::Metadata);
        assert_eq!(meta.expect(), Expect::Document);
    }

    #[test]
    fn test_apply_renders_groupby() {
        let req = QueryRequest {
            apply: Some(Aggregation {
                group_by: "Type".into(),
            }),
            ..QueryRequest::collection(EntitySet::Artifacts)
        };
        assert_eq!(
            req.options().get("$apply").map(String::as_str),
            Some("groupby((Type),aggregate($count as Count))")
        );
        assert_eq!(
            req.expect(),
            Expect::Groups {
                field: "Type".into()
            }
        );
    }

    #[test]
    fn test_ttl_classes() {
        assert_eq!(
            QueryRequest::collection(EntitySet::ContentPackages).ttl_class(),
            TtlClass::PackageList
        );
        assert_eq!(QueryRequest::package("X").ttl_class(), TtlClass::PackageList);
        let filtered = QueryRequest {
            filters: vec![FilterClause::eq("Type", "API")],
            ..QueryRequest::collection(EntitySet::Artifacts)
        };
        assert_eq!(filtered.ttl_class(), TtlClass::Search);
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        let zero_top = QueryRequest {
            top: Some(0),
            ..QueryRequest::collection(EntitySet::Artifacts)
        };
        assert!(zero_top.validate().is_err());

        let empty_select = QueryRequest {
            select: Some(BTreeSet::new()),
            ..QueryRequest::collection(EntitySet::Artifacts)
        };
        assert!(empty_select.validate().is_err());

        let scoped_packages = QueryRequest {
            scope: Some("X".into()),
            ..QueryRequest::collection(EntitySet::ContentPackages)
        };
        assert!(scoped_packages.validate().is_err());
    }

    #[test]
    fn test_order_by_parse() {
        let ob = OrderBy::parse("ModifiedAt desc", EntitySet::Artifacts).unwrap();
        assert_eq!(ob.direction, Direction::Desc);
        assert_eq!(ob.render(), "ModifiedAt desc");
        assert!(OrderBy::parse("Colour", EntitySet::Artifacts).is_err());
        assert!(OrderBy::parse("Name sideways", EntitySet::Artifacts).is_err());
    }
}
