//! Response envelope detection and record normalization.
//!
//! The catalog service answers in either an OData v2 envelope
//! (`{"d": {"results": [...], "__count": "12"}}`) or an OData v4 envelope
//! (`{"value": [...], "@odata.count": 12}`). The variant is resolved once,
//! here, into a [`RawEnvelope`]; callers only ever see a
//! [`NormalizedResult`].
//!
//! Normalization is per record. A record that is not an object is skipped
//! and a field that cannot be read (an unparsable timestamp, say) becomes
//! `None`; both are reported as [`NormalizationNote`]s and never fail the
//! rest of the batch.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::error::{CatalogError, Result};
use crate::models::{
    ArtifactState, EntitySet, GroupCount, NormalizationNote, NormalizedArtifact,
    NormalizedPackage, NormalizedResult,
};
use crate::query::Expect;

/// The two envelope shapes the service uses, plus single-entity bodies.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEnvelope {
    V2 {
        results: Vec<Value>,
        count: Option<u64>,
    },
    V4 {
        value: Vec<Value>,
        count: Option<u64>,
    },
    /// A key lookup answered with one bare entity.
    Single(Map<String, Value>),
}

impl RawEnvelope {
    /// Detect the envelope by its top-level keys.
    pub fn detect(body: Value) -> Result<Self> {
        let mut obj = match body {
            Value::Object(obj) => obj,
            other => {
                return Err(CatalogError::EnvelopeFormat(format!(
                    "expected a JSON object, got {}",
                    json_type_name(&other)
                )))
            }
        };

        if let Some(d) = obj.remove("d") {
            return match d {
                Value::Object(mut d) => match d.remove("results") {
                    Some(Value::Array(results)) => Ok(RawEnvelope::V2 {
                        results,
                        count: d.get("__count").and_then(read_count),
                    }),
                    Some(other) => Err(CatalogError::EnvelopeFormat(format!(
                        "d.results must be an array, got {}",
                        json_type_name(&other)
                    ))),
                    None => Ok(RawEnvelope::Single(d)),
                },
                Value::Array(results) => Ok(RawEnvelope::V2 {
                    results,
                    count: None,
                }),
                other => Err(CatalogError::EnvelopeFormat(format!(
                    "d must be an object, got {}",
                    json_type_name(&other)
                ))),
            };
        }

        if let Some(value) = obj.remove("value") {
            return match value {
                Value::Array(value) => Ok(RawEnvelope::V4 {
                    value,
                    count: obj.get("@odata.count").and_then(read_count),
                }),
                other => Err(CatalogError::EnvelopeFormat(format!(
                    "value must be an array, got {}",
                    json_type_name(&other)
                ))),
            };
        }

        if obj.contains_key("@odata.context") {
            obj.retain(|k, _| !k.starts_with("@odata."));
            return Ok(RawEnvelope::Single(obj));
        }

        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        Err(CatalogError::EnvelopeFormat(format!(
            "neither 'd' nor 'value' present (keys: [{}])",
            keys.join(", ")
        )))
    }

    fn into_parts(self) -> (Vec<Value>, Option<u64>) {
        match self {
            RawEnvelope::V2 { results, count } => (results, count),
            RawEnvelope::V4 { value, count } => (value, count),
            RawEnvelope::Single(obj) => (vec![Value::Object(obj)], None),
        }
    }
}

/// Normalize a response body for a collection or entity request.
///
/// A bare integer body (a `$count` response) is passed through as
/// [`NormalizedResult::Count`].
pub fn normalize(body: &[u8], entity_set: EntitySet) -> Result<NormalizedResult> {
    normalize_response(body, &Expect::Entities(entity_set))
}

/// Normalize a response body according to what the request expects.
pub fn normalize_response(body: &[u8], expect: &Expect) -> Result<NormalizedResult> {
    match expect {
        Expect::Document => Ok(NormalizedResult::Raw {
            body: String::from_utf8_lossy(body).into_owned(),
        }),
        Expect::Count => scalar_count(body)
            .map(|count| NormalizedResult::Count { count })
            .ok_or_else(|| {
                CatalogError::EnvelopeFormat("expected an integer $count body".to_string())
            }),
        Expect::Entities(entity_set) => {
            if let Some(count) = scalar_count(body) {
                return Ok(NormalizedResult::Count { count });
            }
            let (records, total_count) = RawEnvelope::detect(parse_json(body)?)?.into_parts();
            Ok(match entity_set {
                EntitySet::Artifacts => {
                    let (items, notes) = map_records(records, artifact_from);
                    NormalizedResult::Artifacts {
                        items,
                        total_count,
                        notes,
                    }
                }
                EntitySet::ContentPackages => {
                    let (items, notes) = map_records(records, |obj, _, _| package_from(obj));
                    NormalizedResult::Packages {
                        items,
                        total_count,
                        notes,
                    }
                }
            })
        }
        Expect::Groups { field } => {
            let (records, _) = RawEnvelope::detect(parse_json(body)?)?.into_parts();
            let (rows, notes) = map_records(records, |obj, index, notes| GroupCount {
                key: read_string(obj.get(field.as_str())),
                count: match obj.get("Count").and_then(read_count) {
                    Some(count) => count,
                    None => {
                        notes.push(NormalizationNote {
                            index,
                            field: "Count".to_string(),
                            message: "missing or non-numeric aggregate count".to_string(),
                        });
                        0
                    }
                },
            });
            Ok(NormalizedResult::Groups { rows, notes })
        }
    }
}

fn parse_json(body: &[u8]) -> Result<Value> {
    serde_json::from_slice(body)
        .map_err(|e| CatalogError::EnvelopeFormat(format!("response body is not JSON: {}", e)))
}

/// A `$count`/`$value` body: optional whitespace around a bare integer.
fn scalar_count(body: &[u8]) -> Option<u64> {
    std::str::from_utf8(body).ok()?.trim().parse().ok()
}

fn map_records<T>(
    records: Vec<Value>,
    mut map: impl FnMut(&Map<String, Value>, usize, &mut Vec<NormalizationNote>) -> T,
) -> (Vec<T>, Vec<NormalizationNote>) {
    let mut items = Vec::with_capacity(records.len());
    let mut notes = Vec::new();
    for (index, record) in records.iter().enumerate() {
        match record {
            Value::Object(obj) => items.push(map(obj, index, &mut notes)),
            other => notes.push(NormalizationNote {
                index,
                field: "*".to_string(),
                message: format!("record skipped: expected an object, got {}", json_type_name(other)),
            }),
        }
    }
    (items, notes)
}

fn artifact_from(
    obj: &Map<String, Value>,
    index: usize,
    notes: &mut Vec<NormalizationNote>,
) -> NormalizedArtifact {
    let mut timestamp = |field: &str| match obj.get(field) {
        None | Some(Value::Null) => None,
        Some(raw) => match parse_timestamp(raw) {
            Some(ts) => Some(ts),
            None => {
                notes.push(NormalizationNote {
                    index,
                    field: field.to_string(),
                    message: format!("unparsable timestamp {}", raw),
                });
                None
            }
        },
    };
    let created_at = timestamp("CreatedAt");
    let modified_at = timestamp("ModifiedAt");

    NormalizedArtifact {
        name: read_string(obj.get("Name")),
        display_name: read_string(obj.get("DisplayName")),
        artifact_type: read_string(obj.get("Type")),
        sub_type: read_string(obj.get("SubType")),
        version: read_string(obj.get("Version")),
        state: read_string(obj.get("State")).map(|s| ArtifactState::from_raw(&s)),
        description: read_string(obj.get("Description")),
        created_at,
        modified_at,
        created_by: read_string(obj.get("CreatedBy")),
        modified_by: read_string(obj.get("ModifiedBy")),
        packages: obj.get("ContentPackages").and_then(expanded_packages),
    }
}

fn package_from(obj: &Map<String, Value>) -> NormalizedPackage {
    NormalizedPackage {
        technical_name: read_string(obj.get("TechnicalName")),
        display_name: read_string(obj.get("DisplayName")),
        version: read_string(obj.get("Version")),
        description: read_string(obj.get("Description")),
    }
}

/// An expanded navigation: v2 `{"results": [...]}` or a v4 array.
///
/// A v2 deferred link (`{"__deferred": {...}}`) is treated as not expanded.
fn expanded_packages(raw: &Value) -> Option<Vec<NormalizedPackage>> {
    let records = match raw {
        Value::Array(records) => records,
        Value::Object(obj) => match obj.get("results") {
            Some(Value::Array(records)) => records,
            _ => return None,
        },
        _ => return None,
    };
    Some(
        records
            .iter()
            .filter_map(Value::as_object)
            .map(package_from)
            .collect(),
    )
}

/// Strings pass through, numbers and booleans are stringified, anything
/// else (including `null`) is absent.
fn read_string(raw: Option<&Value>) -> Option<String> {
    match raw? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// v2 sends counts as strings, v4 as numbers.
fn read_count(raw: &Value) -> Option<u64> {
    match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse any timestamp notation the service uses into UTC.
///
/// Accepts RFC 3339 (`2024-01-02T03:04:05Z`, `...+02:00`), OData v2
/// `/Date(1704164645000)/` with an optional `+0000` offset suffix, naive
/// `YYYY-MM-DDTHH:MM:SS[.fff]` (read as UTC), and epoch milliseconds.
pub fn parse_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Some(inner) = s.strip_prefix("/Date(").and_then(|r| r.strip_suffix(")/")) {
        // The optional offset only annotates the instant; the millis are already UTC.
        let millis_end = inner
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '+' || *c == '-')
            .map(|(i, _)| i)
            .unwrap_or(inner.len());
        let millis: i64 = inner[..millis_end].parse().ok()?;
        return Utc.timestamp_millis_opt(millis).single();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Extract a human-readable message from an OData error body.
///
/// Handles v4 `{"error":{"message":"..."}}`, v2
/// `{"error":{"message":{"lang":"en","value":"..."}}}`, and falls back to
/// the trimmed body text.
pub fn error_message(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<Value>(body) {
        let message = &json["error"]["message"];
        if let Some(text) = message.as_str() {
            return text.to_string();
        }
        if let Some(text) = message["value"].as_str() {
            return text.to_string();
        }
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return "no error details in response".to_string();
    }
    text.chars().take(500).collect()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn artifacts(result: &NormalizedResult) -> &[NormalizedArtifact] {
        result.artifacts().expect("artifact result")
    }

    #[test]
    fn test_v2_and_v4_normalize_identically() {
        let v2 = br#"{"d":{"results":[{"Name":"X","Type":"API"}]}}"#;
        let v4 = br#"{"value":[{"Name":"X","Type":"API"}]}"#;
        let a = normalize(v2, EntitySet::Artifacts).unwrap();
        let b = normalize(v4, EntitySet::Artifacts).unwrap();
        assert_eq!(artifacts(&a), artifacts(&b));
        assert_eq!(artifacts(&a)[0].name.as_deref(), Some("X"));
        assert_eq!(artifacts(&a)[0].artifact_type.as_deref(), Some("API"));
    }

    #[test]
    fn test_missing_fields_are_absent_not_empty() {
        let body = br#"{"value":[{"Name":"X","Description":""}]}"#;
        let result = normalize(body, EntitySet::Artifacts).unwrap();
        let item = &artifacts(&result)[0];
        assert_eq!(item.display_name, None);
        assert_eq!(item.description.as_deref(), Some(""));
        assert_eq!(item.state, None);
        assert!(!result.is_partial());
    }

    #[test]
    fn test_counts_from_both_envelopes() {
        let v2 = br#"{"d":{"results":[],"__count":"42"}}"#;
        let v4 = br#"{"value":[],"@odata.count":42}"#;
        assert_eq!(normalize(v2, EntitySet::Artifacts).unwrap().total_count(), Some(42));
        assert_eq!(normalize(v4, EntitySet::Artifacts).unwrap().total_count(), Some(42));
    }

    #[test]
    fn test_empty_collection_is_success() {
        let result = normalize(br#"{"value":[]}"#, EntitySet::Artifacts).unwrap();
        assert!(artifacts(&result).is_empty());
    }

    #[test]
    fn test_timestamp_notations_agree() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        for raw in [
            serde_json::json!("2024-01-02T03:04:05Z"),
            serde_json::json!("2024-01-02T05:04:05+02:00"),
            serde_json::json!("/Date(1704164645000)/"),
            serde_json::json!("/Date(1704164645000+0000)/"),
            serde_json::json!("2024-01-02T03:04:05"),
            serde_json::json!("2024-01-02T03:04:05.000"),
            serde_json::json!(1704164645000i64),
        ] {
            assert_eq!(parse_timestamp(&raw), Some(expected), "raw: {}", raw);
        }
        assert_eq!(parse_timestamp(&serde_json::json!("yesterday")), None);
    }

    #[test]
    fn test_bad_record_does_not_fail_batch() {
        let body = br#"{"value":[
            {"Name":"A","ModifiedAt":"not a date"},
            "garbage",
            {"Name":"C","State":"ACTIVE","CreatedAt":"/Date(0)/"}
        ]}"#;
        let result = normalize(body, EntitySet::Artifacts).unwrap();
        let items = artifacts(&result);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name.as_deref(), Some("A"));
        assert_eq!(items[0].modified_at, None);
        assert_eq!(items[1].state, Some(ArtifactState::Active));
        assert_eq!(items[1].created_at, Utc.timestamp_millis_opt(0).single());

        let notes = result.notes();
        assert_eq!(notes.len(), 2);
        assert_eq!((notes[0].index, notes[0].field.as_str()), (0, "ModifiedAt"));
        assert_eq!((notes[1].index, notes[1].field.as_str()), (1, "*"));
        assert!(result.is_partial());
    }

    #[test]
    fn test_unknown_fields_dropped_and_state_unknown() {
        let body = br#"{"value":[{"Name":"A","State":"BETA","Extra":{"x":1}}]}"#;
        let result = normalize(body, EntitySet::Artifacts).unwrap();
        assert_eq!(artifacts(&result)[0].state, Some(ArtifactState::Unknown));
    }

    #[test]
    fn test_single_entity_bodies() {
        let v2 = br#"{"d":{"TechnicalName":"SAPS4HANACloud","DisplayName":"S/4HANA Cloud"}}"#;
        let v4 = br#"{"@odata.context":"$metadata#ContentPackages/$entity","TechnicalName":"SAPS4HANACloud","DisplayName":"S/4HANA Cloud"}"#;
        let a = normalize(v2, EntitySet::ContentPackages).unwrap();
        let b = normalize(v4, EntitySet::ContentPackages).unwrap();
        assert_eq!(a.packages(), b.packages());
        assert_eq!(
            a.packages().unwrap()[0].technical_name.as_deref(),
            Some("SAPS4HANACloud")
        );
    }

    #[test]
    fn test_expanded_packages_v2_and_v4() {
        let v2 = br#"{"d":{"results":[{"Name":"A","ContentPackages":{"results":[{"TechnicalName":"P1"}]}}]}}"#;
        let v4 = br#"{"value":[{"Name":"A","ContentPackages":[{"TechnicalName":"P1"}]}]}"#;
        let deferred = br#"{"d":{"results":[{"Name":"A","ContentPackages":{"__deferred":{"uri":"x"}}}]}}"#;
        let a = normalize(v2, EntitySet::Artifacts).unwrap();
        let b = normalize(v4, EntitySet::Artifacts).unwrap();
        assert_eq!(artifacts(&a), artifacts(&b));
        let pkgs = artifacts(&a)[0].packages.as_ref().unwrap();
        assert_eq!(pkgs[0].technical_name.as_deref(), Some("P1"));
        let c = normalize(deferred, EntitySet::Artifacts).unwrap();
        assert_eq!(artifacts(&c)[0].packages, None);
    }

    #[test]
    fn test_unknown_envelope_is_error() {
        let err = normalize(br#"{"items":[]}"#, EntitySet::Artifacts).unwrap_err();
        assert!(matches!(err, CatalogError::EnvelopeFormat(ref m) if m.contains("items")));
        assert!(normalize(b"<html>", EntitySet::Artifacts).is_err());
        assert!(normalize(br#"[1,2]"#, EntitySet::Artifacts).is_err());
    }

    #[test]
    fn test_scalar_bodies_pass_through() {
        assert_eq!(
            normalize(b"  1234\n", EntitySet::Artifacts).unwrap(),
            NormalizedResult::Count { count: 1234 }
        );
        assert_eq!(
            normalize_response(b"17", &Expect::Count).unwrap(),
            NormalizedResult::Count { count: 17 }
        );
        assert!(normalize_response(b"lots", &Expect::Count).is_err());
        let xml = b"<edmx:Edmx Version=\"1.0\"/>";
        assert_eq!(
            normalize_response(xml, &Expect::Document).unwrap(),
            NormalizedResult::Raw {
                body: "<edmx:Edmx Version=\"1.0\"/>".to_string()
            }
        );
    }

    #[test]
    fn test_groups() {
        let body = br#"{"value":[{"Type":"API","Count":12},{"Type":"EVENT","Count":"3"},{"Type":"X"}]}"#;
        let result = normalize_response(
            body,
            &Expect::Groups {
                field: "Type".into(),
            },
        )
        .unwrap();
        match &result {
            NormalizedResult::Groups { rows, notes } => {
                assert_eq!(rows.len(), 3);
                assert_eq!(rows[0].key.as_deref(), Some("API"));
                assert_eq!(rows[1].count, 3);
                assert_eq!(notes.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(result.total_count(), Some(15));
    }

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(
            error_message(br#"{"error":{"message":"Unsupported operator"}}"#),
            "Unsupported operator"
        );
        assert_eq!(
            error_message(br#"{"error":{"code":"X","message":{"lang":"en","value":"Bad filter"}}}"#),
            "Bad filter"
        );
        assert_eq!(error_message(b"  plain text  "), "plain text");
        assert_eq!(error_message(b""), "no error details in response");
    }
}
