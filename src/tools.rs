//! Tool trait, registry, and the built-in catalog tools.
//!
//! Every tool is described by a name, a one-line description and an
//! OpenAI function-calling JSON Schema. Parameters are checked with
//! [`validate_params`] (required fields, types, enums, minimums, defaults)
//! before [`Tool::execute`] runs, both over HTTP and over MCP.
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │                ToolRegistry                │
//! │  search  get_details  list_by_type  count  │
//! │  find_by_protocol  find_recent  ...        │
//! └───────────────────┬────────────────────────┘
//!                     ▼
//!            CatalogService (ToolContext)
//! ```

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use hub_catalog_core::criteria::SearchCriteria;
use hub_catalog_core::CatalogError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::catalog::{ArtifactPage, CatalogService, DEFAULT_TOP, MAX_COMPARE};

/// A tool that agents can discover and call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Route and MCP name, e.g. `"get_details"`.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema with `type: "object"`, `properties`, and optionally
    /// `required`.
    fn parameters_schema(&self) -> Value;

    /// Run with parameters already passed through [`validate_params`].
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// What a tool invocation can reach: the catalog, and the caller's
/// cancellation token.
#[derive(Clone)]
pub struct ToolContext {
    catalog: Arc<CatalogService>,
    cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(catalog: Arc<CatalogService>) -> Self {
        Self::with_cancel(catalog, CancellationToken::new())
    }

    pub fn with_cancel(catalog: Arc<CatalogService>, cancel: CancellationToken) -> Self {
        Self { catalog, cancel }
    }

    pub fn catalog(&self) -> &CatalogService {
        &self.catalog
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Serializable tool descriptor for `GET /tools/list` and `hubcat tool list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolInfo {
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
        }
    }
}

/// Validate `params` against `schema` and fill in declared defaults.
///
/// Errors are [`CatalogError::Validation`] so that callers can map them to
/// a client error.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value, CatalogError> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => {
            return Err(CatalogError::validation(format!(
                "parameters must be a JSON object, got {}",
                json_type_name(other)
            )))
        }
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    for req_field in &required {
        match params_obj.get(*req_field) {
            None | Some(Value::Null) => {
                return Err(CatalogError::validation(format!(
                    "missing required parameter: {}",
                    req_field
                )))
            }
            _ => {}
        }
    }

    let mut result = params_obj.clone();
    for (prop_name, prop_schema) in &properties {
        match params_obj.get(prop_name) {
            Some(Value::Null) | None => {
                if let Some(default) = prop_schema.get("default") {
                    result.insert(prop_name.clone(), default.clone());
                } else {
                    result.remove(prop_name);
                }
            }
            Some(value) => {
                if let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) {
                    let type_ok = match expected_type {
                        "string" => value.is_string(),
                        "integer" => value.is_i64() || value.is_u64(),
                        "number" => value.is_number(),
                        "boolean" => value.is_boolean(),
                        "array" => value.is_array(),
                        "object" => value.is_object(),
                        _ => true,
                    };
                    if !type_ok {
                        return Err(CatalogError::validation(format!(
                            "parameter '{}' must be of type '{}', got {}",
                            prop_name,
                            expected_type,
                            json_type_name(value)
                        )));
                    }
                }

                if let Some(enum_values) = prop_schema.get("enum").and_then(|e| e.as_array()) {
                    if !enum_values.contains(value) {
                        let allowed: Vec<String> =
                            enum_values.iter().map(|v| v.to_string()).collect();
                        return Err(CatalogError::validation(format!(
                            "parameter '{}' must be one of [{}], got {}",
                            prop_name,
                            allowed.join(", "),
                            value
                        )));
                    }
                }

                if let (Some(minimum), Some(n)) = (
                    prop_schema.get("minimum").and_then(|m| m.as_i64()),
                    value.as_i64(),
                ) {
                    if n < minimum {
                        return Err(CatalogError::validation(format!(
                            "parameter '{}' must be >= {}, got {}",
                            prop_name, minimum, n
                        )));
                    }
                }
            }
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, CatalogError> {
    serde_json::from_value(params).map_err(|e| CatalogError::validation(e.to_string()))
}

/// Serialize a page, surfacing normalization notes as a warning.
fn page_value(page: &ArtifactPage) -> Result<Value> {
    let mut value = serde_json::to_value(page)?;
    if !page.notes.is_empty() {
        value["warnings"] = json!([{
            "code": "partial_normalization",
            "message": format!(
                "{} record(s) or field(s) could not be normalized",
                page.notes.len()
            ),
        }]);
    }
    Ok(value)
}

fn paging_properties() -> serde_json::Map<String, Value> {
    let props = json!({
        "top": { "type": "integer", "minimum": 1, "default": DEFAULT_TOP, "description": "Page size" },
        "skip": { "type": "integer", "minimum": 0, "default": 0, "description": "Items to skip" }
    });
    match props {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

fn object_schema(mut properties: serde_json::Map<String, Value>, extra: Value, required: &[&str]) -> Value {
    if let Value::Object(extra) = extra {
        properties.extend(extra);
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

const STATES: [&str; 2] = ["ACTIVE", "DEPRECATED"];
const COMPARATORS: [&str; 5] = ["eq", "gt", "gte", "lt", "lte"];

// ═══════════════════════════════════════════════════════════════════════
// Built-in tools
// ═══════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct ScopedCriteria {
    #[serde(default)]
    package: Option<String>,
    #[serde(flatten)]
    criteria: SearchCriteria,
}

/// Free-form filtered search.
pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search catalog artifacts by text, keywords, type, protocol, state, version and dates"
    }

    fn parameters_schema(&self) -> Value {
        object_schema(
            paging_properties(),
            json!({
                "query": { "type": "string", "description": "Text matched in display name or description" },
                "keywords": { "type": "array", "items": { "type": "string" }, "description": "Several keywords; results are ranked by how many match" },
                "match": { "type": "string", "enum": ["any", "all"], "default": "any" },
                "type": { "type": "string", "description": "Artifact type, e.g. API, IntegrationFlow" },
                "subtype": { "type": "string", "description": "Protocol, e.g. ODATA, ODATAV4, REST, SOAP" },
                "state": { "type": "string", "enum": STATES, "description": "Omit to include every state" },
                "version": { "type": "string" },
                "version_op": { "type": "string", "enum": COMPARATORS },
                "created_after": { "type": "string", "description": "YYYY-MM-DD or RFC 3339" },
                "created_before": { "type": "string" },
                "modified_after": { "type": "string" },
                "modified_before": { "type": "string" },
                "package": { "type": "string", "description": "Restrict to one content package (technical name)" },
                "filter": { "type": "string", "description": "Additional raw $filter expression" },
                "order_by": { "type": "string", "description": "Field [asc|desc]" },
                "select": { "type": "array", "items": { "type": "string" } },
                "count": { "type": "boolean", "default": false }
            }),
            &[],
        )
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: ScopedCriteria = parse(params)?;
        let page = ctx
            .catalog()
            .search(p.package.as_deref(), &p.criteria, ctx.cancel())
            .await?;
        page_value(&page)
    }
}

#[derive(Deserialize)]
struct DetailParams {
    name: String,
    #[serde(rename = "type")]
    artifact_type: String,
}

/// Artifact lookup by composite key.
pub struct GetDetailsTool;

#[async_trait]
impl Tool for GetDetailsTool {
    fn name(&self) -> &str {
        "get_details"
    }

    fn description(&self) -> &str {
        "Get one artifact by technical name and type"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Artifact technical name" },
                "type": { "type": "string", "description": "Artifact type" }
            },
            "required": ["name", "type"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: DetailParams = parse(params)?;
        let artifact = ctx
            .catalog()
            .get_details(&p.name, &p.artifact_type, ctx.cancel())
            .await?;
        Ok(json!({ "artifact": artifact }))
    }
}

#[derive(Deserialize)]
struct ByFieldParams {
    value: String,
    #[serde(default)]
    package: Option<String>,
    top: Option<i64>,
    skip: Option<i64>,
}

/// `Type eq '<type>'`
pub struct ListByTypeTool;

#[async_trait]
impl Tool for ListByTypeTool {
    fn name(&self) -> &str {
        "list_by_type"
    }

    fn description(&self) -> &str {
        "List artifacts of one type"
    }

    fn parameters_schema(&self) -> Value {
        object_schema(
            paging_properties(),
            json!({
                "type": { "type": "string", "description": "Artifact type, e.g. API" },
                "package": { "type": "string" }
            }),
            &["type"],
        )
    }

    async fn execute(&self, mut params: Value, ctx: &ToolContext) -> Result<Value> {
        if let Some(t) = params.get_mut("type").map(Value::take) {
            params["value"] = t;
        }
        let p: ByFieldParams = parse(params)?;
        let criteria = SearchCriteria {
            artifact_type: Some(p.value),
            top: p.top,
            skip: p.skip,
            ..Default::default()
        };
        let page = ctx
            .catalog()
            .search(p.package.as_deref(), &criteria, ctx.cancel())
            .await?;
        page_value(&page)
    }
}

/// `SubType eq '<protocol>'`
pub struct FindByProtocolTool;

#[async_trait]
impl Tool for FindByProtocolTool {
    fn name(&self) -> &str {
        "find_by_protocol"
    }

    fn description(&self) -> &str {
        "Find artifacts exposing one protocol (ODATA, ODATAV4, REST, SOAP, ...)"
    }

    fn parameters_schema(&self) -> Value {
        object_schema(
            paging_properties(),
            json!({
                "protocol": { "type": "string", "description": "Artifact sub-type" },
                "type": { "type": "string" },
                "package": { "type": "string" }
            }),
            &["protocol"],
        )
    }

    async fn execute(&self, mut params: Value, ctx: &ToolContext) -> Result<Value> {
        let artifact_type = params
            .get_mut("type")
            .map(Value::take)
            .and_then(|t| t.as_str().map(str::to_string));
        if let Some(p) = params.get_mut("protocol").map(Value::take) {
            params["value"] = p;
        }
        let p: ByFieldParams = parse(params)?;
        let criteria = SearchCriteria {
            subtype: Some(p.value),
            artifact_type,
            top: p.top,
            skip: p.skip,
            ..Default::default()
        };
        let page = ctx
            .catalog()
            .search(p.package.as_deref(), &criteria, ctx.cancel())
            .await?;
        page_value(&page)
    }
}

#[derive(Deserialize)]
struct RecentParams {
    days: i64,
    #[serde(rename = "type")]
    artifact_type: Option<String>,
    top: Option<i64>,
    skip: Option<i64>,
}

/// Recently modified artifacts, newest first.
pub struct FindRecentTool;

#[async_trait]
impl Tool for FindRecentTool {
    fn name(&self) -> &str {
        "find_recent"
    }

    fn description(&self) -> &str {
        "Find artifacts modified in the last N days, newest first"
    }

    fn parameters_schema(&self) -> Value {
        object_schema(
            paging_properties(),
            json!({
                "days": { "type": "integer", "minimum": 1, "default": 7 },
                "type": { "type": "string" }
            }),
            &[],
        )
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: RecentParams = parse(params)?;
        let criteria = SearchCriteria {
            artifact_type: p.artifact_type,
            top: p.top,
            skip: p.skip,
            ..Default::default()
        };
        let page = ctx
            .catalog()
            .find_recent(p.days, &criteria, Utc::now(), ctx.cancel())
            .await?;
        page_value(&page)
    }
}

#[derive(Deserialize)]
struct CountParams {
    #[serde(default)]
    group_by: Option<String>,
    #[serde(flatten)]
    scoped: ScopedCriteria,
}

/// Totals, or counts grouped by a field.
pub struct CountTool;

#[async_trait]
impl Tool for CountTool {
    fn name(&self) -> &str {
        "count"
    }

    fn description(&self) -> &str {
        "Count artifacts matching criteria, optionally grouped by a field"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "type": { "type": "string" },
                "subtype": { "type": "string" },
                "state": { "type": "string", "enum": STATES },
                "query": { "type": "string" },
                "package": { "type": "string" },
                "group_by": { "type": "string", "enum": ["Type", "SubType", "State", "Version", "CreatedBy"] }
            },
            "required": []
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: CountParams = parse(params)?;
        let summary = ctx
            .catalog()
            .count(
                p.scoped.package.as_deref(),
                &p.scoped.criteria,
                p.group_by.as_deref(),
                ctx.cancel(),
            )
            .await?;
        Ok(serde_json::to_value(summary)?)
    }
}

#[derive(Deserialize)]
struct DeprecatedParams {
    #[serde(rename = "type")]
    artifact_type: Option<String>,
    package: Option<String>,
    top: Option<i64>,
    skip: Option<i64>,
}

/// `State eq 'DEPRECATED'`
pub struct FindDeprecatedTool;

#[async_trait]
impl Tool for FindDeprecatedTool {
    fn name(&self) -> &str {
        "find_deprecated"
    }

    fn description(&self) -> &str {
        "List deprecated artifacts"
    }

    fn parameters_schema(&self) -> Value {
        object_schema(
            paging_properties(),
            json!({
                "type": { "type": "string" },
                "package": { "type": "string" }
            }),
            &[],
        )
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: DeprecatedParams = parse(params)?;
        let criteria = SearchCriteria {
            state: Some("DEPRECATED".to_string()),
            artifact_type: p.artifact_type,
            top: p.top,
            skip: p.skip,
            ..Default::default()
        };
        let page = ctx
            .catalog()
            .search(p.package.as_deref(), &criteria, ctx.cancel())
            .await?;
        page_value(&page)
    }
}

#[derive(Deserialize)]
struct PackageParams {
    package: String,
}

/// `ContentPackages('<id>')`
pub struct GetPackageInfoTool;

#[async_trait]
impl Tool for GetPackageInfoTool {
    fn name(&self) -> &str {
        "get_package_info"
    }

    fn description(&self) -> &str {
        "Get one content package by technical name"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "package": { "type": "string", "description": "Package technical name, e.g. SAPS4HANACloud" }
            },
            "required": ["package"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: PackageParams = parse(params)?;
        let package = ctx
            .catalog()
            .get_package_info(&p.package, ctx.cancel())
            .await?;
        Ok(json!({ "package": package }))
    }
}

#[derive(Deserialize)]
struct NameParams {
    name: String,
}

/// Artifacts by name with their owning packages expanded.
pub struct GetArtifactPackagesTool;

#[async_trait]
impl Tool for GetArtifactPackagesTool {
    fn name(&self) -> &str {
        "get_artifact_packages"
    }

    fn description(&self) -> &str {
        "List the content packages that contain an artifact"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Artifact technical name" }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: NameParams = parse(params)?;
        let artifacts = ctx
            .catalog()
            .get_artifact_packages(&p.name, ctx.cancel())
            .await?;
        Ok(json!({ "artifacts": artifacts }))
    }
}

/// Raw `$metadata`.
pub struct GetServiceMetadataTool;

#[async_trait]
impl Tool for GetServiceMetadataTool {
    fn name(&self) -> &str {
        "get_service_metadata"
    }

    fn description(&self) -> &str {
        "Fetch the catalog service's $metadata document"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let document = ctx.catalog().service_metadata(ctx.cancel()).await?;
        Ok(json!({ "metadata": document }))
    }
}

#[derive(Deserialize)]
struct ListPackagesParams {
    #[serde(default)]
    search_term: Option<String>,
}

/// Full package list with an optional local filter.
pub struct ListPackagesTool;

#[async_trait]
impl Tool for ListPackagesTool {
    fn name(&self) -> &str {
        "list_packages"
    }

    fn description(&self) -> &str {
        "List content packages, optionally filtered by a term in the display or technical name"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "search_term": { "type": "string", "description": "Case-insensitive, e.g. \"S/4HANA\"" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: ListPackagesParams = parse(params)?;
        let packages = ctx
            .catalog()
            .list_packages(p.search_term.as_deref(), ctx.cancel())
            .await?;
        Ok(json!({ "count": packages.len(), "packages": packages }))
    }
}

#[derive(Deserialize)]
struct CompareParams {
    packages: Vec<String>,
}

/// Side-by-side artifact counts for several packages.
pub struct ComparePackagesTool;

#[async_trait]
impl Tool for ComparePackagesTool {
    fn name(&self) -> &str {
        "compare_packages"
    }

    fn description(&self) -> &str {
        "Compare artifact counts by type across several content packages"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "packages": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": format!("2 to {} package technical names", MAX_COMPARE)
                }
            },
            "required": ["packages"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let p: CompareParams = parse(params)?;
        let comparison = ctx
            .catalog()
            .compare_packages(&p.packages, ctx.cancel())
            .await?;
        Ok(json!({ "packages": comparison }))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// A registry holding every built-in catalog tool.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchTool));
        registry.register(Box::new(GetDetailsTool));
        registry.register(Box::new(ListByTypeTool));
        registry.register(Box::new(FindByProtocolTool));
        registry.register(Box::new(FindRecentTool));
        registry.register(Box::new(CountTool));
        registry.register(Box::new(FindDeprecatedTool));
        registry.register(Box::new(GetPackageInfoTool));
        registry.register(Box::new(GetArtifactPackagesTool));
        registry.register(Box::new(GetServiceMetadataTool));
        registry.register(Box::new(ListPackagesTool));
        registry.register(Box::new(ComparePackagesTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.tools.iter().map(|t| ToolInfo::of(t.as_ref())).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Look up, validate, and run a tool by name.
pub async fn call_tool(
    registry: &ToolRegistry,
    name: &str,
    params: &Value,
    ctx: &ToolContext,
) -> Result<Value> {
    let tool = registry
        .find(name)
        .ok_or_else(|| ToolNotFound(name.to_string()))?;
    let validated = validate_params(&tool.parameters_schema(), params)?;
    tool.execute(validated, ctx).await
}

/// No tool is registered under the requested name.
#[derive(Debug, thiserror::Error)]
#[error("no tool registered with name: {0}")]
pub struct ToolNotFound(pub String);
