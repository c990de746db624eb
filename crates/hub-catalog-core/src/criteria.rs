//! Structured search criteria and the builder that turns them into a
//! [`QueryRequest`].
//!
//! # Canonical clause order
//!
//! Clauses are always emitted in this order, joined with `and`:
//!
//! 1. `Type`, 2. `SubType`, 3. `State`, 4. `Version`,
//! 5. `CreatedAt` range, 6. `ModifiedAt` range,
//! 7. free-text query, 8. keyword group, 9. caller-supplied raw filter.
//!
//! Alternatives within one field are joined with `or` (or `and` for a
//! match-all keyword list) and parenthesized as a single clause.
//!
//! No state criterion means every state is returned; deprecated artifacts
//! are only excluded when `state = "ACTIVE"` is passed explicitly.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{CatalogError, Result};
use crate::filter::{join, parse_filter, Combinator, FilterClause, Literal, Operator, Predicate};
use crate::models::{ArtifactState, EntitySet};
use crate::query::{OrderBy, QueryRequest};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordMatch {
    #[default]
    Any,
    All,
}

/// Validated tool parameters for a filtered catalog query.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchCriteria {
    /// Free text matched against `DisplayName` and `Description`.
    pub query: Option<String>,
    #[serde(rename = "type")]
    pub artifact_type: Option<String>,
    #[serde(alias = "sub_type")]
    pub subtype: Option<String>,
    pub state: Option<String>,
    pub version: Option<String>,
    /// `eq`, `gte`, `gt`, `lte`, or `lt`. Defaults to `eq`.
    pub version_op: Option<String>,
    pub created_after: Option<String>,
    pub created_before: Option<String>,
    pub modified_after: Option<String>,
    pub modified_before: Option<String>,
    pub keywords: Vec<String>,
    #[serde(rename = "match")]
    pub keyword_match: KeywordMatch,
    /// Raw `$filter` text, parsed and re-rendered before use.
    pub filter: Option<String>,
    /// `"Field"` or `"Field asc|desc"`.
    pub order_by: Option<String>,
    pub top: Option<i64>,
    pub skip: Option<i64>,
    pub select: Vec<String>,
    pub count: bool,
}

impl SearchCriteria {
    /// Keywords with blanks removed and case-insensitive duplicates dropped,
    /// in first-seen order.
    pub fn distinct_keywords(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .filter(|k| seen.insert(k.to_lowercase()))
            .map(str::to_string)
            .collect()
    }

    /// A multi-keyword search is ranked client-side by keyword hits.
    pub fn is_multi_keyword(&self) -> bool {
        self.distinct_keywords().len() > 1
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn require_field(entity_set: EntitySet, field: &str) -> Result<()> {
    if entity_set.has_field(field) {
        Ok(())
    } else {
        Err(CatalogError::validation(format!(
            "field '{}' is not defined on {}",
            field, entity_set
        )))
    }
}

/// Parse `YYYY-MM-DD` (midnight UTC) or an RFC 3339 timestamp.
pub fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| {
            CatalogError::validation(format!(
                "invalid date '{}': expected YYYY-MM-DD or an RFC 3339 timestamp",
                value
            ))
        })
}

/// `(contains(DisplayName,'t') or contains(Description,'t'))`
pub fn text_match(term: &str) -> Predicate {
    Predicate::Group(join(
        vec![
            FilterClause::contains("DisplayName", term).predicate,
            FilterClause::contains("Description", term).predicate,
        ],
        Combinator::Or,
    ))
}

fn date_range(
    entity_set: EntitySet,
    field: &str,
    after: &Option<String>,
    before: &Option<String>,
    out: &mut Vec<Predicate>,
) -> Result<()> {
    if let Some(after) = non_blank(after) {
        require_field(entity_set, field)?;
        let ts = parse_date(after)?;
        out.push(FilterClause::compare(field, Operator::Ge, Literal::Timestamp(ts)).predicate);
    }
    if let Some(before) = non_blank(before) {
        require_field(entity_set, field)?;
        let ts = parse_date(before)?;
        out.push(FilterClause::compare(field, Operator::Lt, Literal::Timestamp(ts)).predicate);
    }
    Ok(())
}

/// Build a [`QueryRequest`] from criteria.
///
/// Pure: no network or cache access. Fails with
/// [`CatalogError::Validation`] on unknown fields or operators, `top <= 0`,
/// `skip < 0`, or an unparsable date.
pub fn build(
    entity_set: EntitySet,
    scope: Option<&str>,
    criteria: &SearchCriteria,
) -> Result<QueryRequest> {
    let mut predicates = Vec::new();

    if let Some(t) = non_blank(&criteria.artifact_type) {
        require_field(entity_set, "Type")?;
        predicates.push(FilterClause::eq("Type", t).predicate);
    }
    if let Some(st) = non_blank(&criteria.subtype) {
        require_field(entity_set, "SubType")?;
        predicates.push(FilterClause::eq("SubType", st).predicate);
    }
    if let Some(state) = non_blank(&criteria.state) {
        require_field(entity_set, "State")?;
        let parsed = ArtifactState::from_raw(state);
        if parsed == ArtifactState::Unknown {
            return Err(CatalogError::validation(format!(
                "unknown state '{}': use ACTIVE or DEPRECATED",
                state
            )));
        }
        predicates.push(FilterClause::eq("State", parsed.as_str()).predicate);
    }
    if let Some(version) = non_blank(&criteria.version) {
        require_field(entity_set, "Version")?;
        let op = match non_blank(&criteria.version_op) {
            Some(op) => Operator::from_comparator(op)?,
            None => Operator::Eq,
        };
        predicates.push(
            FilterClause::compare("Version", op, Literal::Text(version.to_string())).predicate,
        );
    } else if non_blank(&criteria.version_op).is_some() {
        return Err(CatalogError::validation("version_op requires version"));
    }

    date_range(
        entity_set,
        "CreatedAt",
        &criteria.created_after,
        &criteria.created_before,
        &mut predicates,
    )?;
    date_range(
        entity_set,
        "ModifiedAt",
        &criteria.modified_after,
        &criteria.modified_before,
        &mut predicates,
    )?;

    if let Some(query) = non_blank(&criteria.query) {
        predicates.push(text_match(query));
    }

    let keywords = criteria.distinct_keywords();
    match keywords.len() {
        0 => {}
        1 => predicates.push(text_match(&keywords[0])),
        _ => {
            let combinator = match criteria.keyword_match {
                KeywordMatch::Any => Combinator::Or,
                KeywordMatch::All => Combinator::And,
            };
            let alternatives = keywords.iter().map(|k| text_match(k)).collect();
            predicates.push(Predicate::Group(join(alternatives, combinator)));
        }
    }

    if let Some(raw) = non_blank(&criteria.filter) {
        let mut parsed = parse_filter(raw, entity_set)?;
        if parsed.len() == 1 {
            predicates.push(parsed.remove(0).predicate);
        } else {
            predicates.push(Predicate::Group(parsed));
        }
    }

    let top = match criteria.top {
        Some(t) if t <= 0 => {
            return Err(CatalogError::validation(format!(
                "top must be a positive integer, got {}",
                t
            )))
        }
        Some(t) => Some(u32::try_from(t).map_err(|_| {
            CatalogError::validation(format!("top {} is too large", t))
        })?),
        None => None,
    };
    let skip = match criteria.skip {
        Some(s) if s < 0 => {
            return Err(CatalogError::validation(format!(
                "skip must not be negative, got {}",
                s
            )))
        }
        Some(s) => Some(u32::try_from(s).map_err(|_| {
            CatalogError::validation(format!("skip {} is too large", s))
        })?),
        None => None,
    };

    let select = if criteria.select.is_empty() {
        None
    } else {
        for field in &criteria.select {
            require_field(entity_set, field)?;
        }
        Some(criteria.select.iter().cloned().collect::<BTreeSet<_>>())
    };

    let order_by = non_blank(&criteria.order_by)
        .map(|spec| OrderBy::parse(spec, entity_set))
        .transpose()?;

    let scope = scope.map(str::trim).filter(|s| !s.is_empty());
    if scope.is_some() && entity_set != EntitySet::Artifacts {
        return Err(CatalogError::validation(
            "a package scope only applies to Artifacts",
        ));
    }

    Ok(QueryRequest {
        scope: scope.map(str::to_string),
        filters: join(predicates, Combinator::And),
        order_by,
        top,
        skip,
        select,
        count: criteria.count,
        ..QueryRequest::collection(entity_set)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{parse_filter, render};

    fn criteria() -> SearchCriteria {
        SearchCriteria::default()
    }

    #[test]
    fn test_end_to_end_scoped_search() {
        let c = SearchCriteria {
            query: Some("Order".into()),
            artifact_type: Some("API".into()),
            subtype: Some("ODATAV4".into()),
            state: Some("ACTIVE".into()),
            top: Some(50),
            ..criteria()
        };
        let req = build(EntitySet::Artifacts, Some("SAPS4HANACloud"), &c).unwrap();
        assert_eq!(req.path(), "ContentPackages('SAPS4HANACloud')/Artifacts");
        assert_eq!(
            render(&req.filters),
            "Type eq 'API' and SubType eq 'ODATAV4' and State eq 'ACTIVE' and \
             (contains(DisplayName,'Order') or contains(Description,'Order'))"
        );
        assert_eq!(req.options().get("$top").map(String::as_str), Some("50"));
    }

    #[test]
    fn test_no_state_means_all_states() {
        let c = SearchCriteria {
            artifact_type: Some("API".into()),
            ..criteria()
        };
        let req = build(EntitySet::Artifacts, None, &c).unwrap();
        assert!(!render(&req.filters).contains("State"));
    }

    #[test]
    fn test_query_escapes_quotes() {
        let c = SearchCriteria {
            query: Some("O'Brien".into()),
            ..criteria()
        };
        let req = build(EntitySet::Artifacts, None, &c).unwrap();
        assert_eq!(
            render(&req.filters),
            "(contains(DisplayName,'O''Brien') or contains(Description,'O''Brien'))"
        );
    }

    #[test]
    fn test_version_comparators() {
        for (op, rendered) in [
            ("eq", "eq"),
            ("gte", "ge"),
            ("gt", "gt"),
            ("lte", "le"),
            ("lt", "lt"),
        ] {
            let c = SearchCriteria {
                version: Some("2.0".into()),
                version_op: Some(op.into()),
                ..criteria()
            };
            let req = build(EntitySet::Artifacts, None, &c).unwrap();
            assert_eq!(render(&req.filters), format!("Version {} '2.0'", rendered));
        }
    }

    #[test]
    fn test_keywords_any_and_all() {
        let any = SearchCriteria {
            keywords: vec!["sales".into(), "order".into(), "SALES".into()],
            ..criteria()
        };
        let req = build(EntitySet::Artifacts, None, &any).unwrap();
        assert_eq!(
            render(&req.filters),
            "((contains(DisplayName,'sales') or contains(Description,'sales')) or \
             (contains(DisplayName,'order') or contains(Description,'order')))"
        );

        let all = SearchCriteria {
            keyword_match: KeywordMatch::All,
            ..any
        };
        let req = build(EntitySet::Artifacts, None, &all).unwrap();
        assert!(render(&req.filters).contains("'sales')) and ("));
    }

    #[test]
    fn test_date_range_renders_timestamps() {
        let c = SearchCriteria {
            modified_after: Some("2024-03-01".into()),
            modified_before: Some("2024-04-01T12:00:00+02:00".into()),
            ..criteria()
        };
        let req = build(EntitySet::Artifacts, None, &c).unwrap();
        assert_eq!(
            render(&req.filters),
            "ModifiedAt ge 2024-03-01T00:00:00Z and ModifiedAt lt 2024-04-01T10:00:00Z"
        );
    }

    #[test]
    fn test_round_trip_through_parser() {
        let c = SearchCriteria {
            query: Some("Business Partner".into()),
            artifact_type: Some("API".into()),
            state: Some("deprecated".into()),
            version: Some("1.2".into()),
            version_op: Some("gte".into()),
            created_after: Some("2022-01-01".into()),
            modified_before: Some("2024-01-01T00:00:00.750Z".into()),
            keywords: vec!["bp".into(), "it's".into()],
            keyword_match: KeywordMatch::All,
            ..criteria()
        };
        let req = build(EntitySet::Artifacts, None, &c).unwrap();
        let rendered = render(&req.filters);
        assert!(
            rendered.contains("ModifiedAt lt 2024-01-01T00:00:00.750Z"),
            "{}",
            rendered
        );
        let reparsed = parse_filter(&rendered, EntitySet::Artifacts).unwrap();
        assert_eq!(reparsed, req.filters);
    }

    #[test]
    fn test_raw_filter_is_validated_and_appended() {
        let c = SearchCriteria {
            artifact_type: Some("API".into()),
            filter: Some("Name eq 'A' or Name eq 'B'".into()),
            ..criteria()
        };
        let req = build(EntitySet::Artifacts, None, &c).unwrap();
        assert_eq!(
            render(&req.filters),
            "Type eq 'API' and (Name eq 'A' or Name eq 'B')"
        );

        let bad = SearchCriteria {
            filter: Some("Secret eq 'x'".into()),
            ..criteria()
        };
        assert!(matches!(
            build(EntitySet::Artifacts, None, &bad),
            Err(CatalogError::Validation(_))
        ));
    }

    #[test]
    fn test_validation_failures() {
        let cases = vec![
            SearchCriteria {
                top: Some(0),
                ..criteria()
            },
            SearchCriteria {
                top: Some(-3),
                ..criteria()
            },
            SearchCriteria {
                skip: Some(-1),
                ..criteria()
            },
            SearchCriteria {
                created_after: Some("last tuesday".into()),
                ..criteria()
            },
            SearchCriteria {
                version: Some("1".into()),
                version_op: Some("approx".into()),
                ..criteria()
            },
            SearchCriteria {
                state: Some("RETIRED".into()),
                ..criteria()
            },
            SearchCriteria {
                select: vec!["Name".into(), "Colour".into()],
                ..criteria()
            },
            SearchCriteria {
                order_by: Some("Colour desc".into()),
                ..criteria()
            },
        ];
        for c in cases {
            assert!(
                matches!(
                    build(EntitySet::Artifacts, None, &c),
                    Err(CatalogError::Validation(_))
                ),
                "expected validation error for {:?}",
                c
            );
        }
    }

    #[test]
    fn test_artifact_fields_rejected_for_packages() {
        let c = SearchCriteria {
            artifact_type: Some("API".into()),
            ..criteria()
        };
        assert!(build(EntitySet::ContentPackages, None, &c).is_err());
        assert!(build(EntitySet::ContentPackages, Some("X"), &criteria()).is_err());
    }

    #[test]
    fn test_skip_zero_is_allowed() {
        let c = SearchCriteria {
            skip: Some(0),
            ..criteria()
        };
        let req = build(EntitySet::Artifacts, None, &c).unwrap();
        assert_eq!(req.skip, Some(0));
    }

    #[test]
    fn test_criteria_deserialize_from_tool_params() {
        let c: SearchCriteria = serde_json::from_value(serde_json::json!({
            "query": "order",
            "type": "API",
            "subtype": "REST",
            "keywords": ["a", "b"],
            "match": "all",
            "top": 10
        }))
        .unwrap();
        assert_eq!(c.artifact_type.as_deref(), Some("API"));
        assert_eq!(c.keyword_match, KeywordMatch::All);
        assert!(c.is_multi_keyword());
    }
}
