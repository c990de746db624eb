mod common;

use common::{artifact, catalog, status, v2_body, v4_body, ScriptedTransport};
use hub_catalog::tools::{call_tool, ToolContext, ToolNotFound, ToolRegistry};
use hub_catalog_core::CatalogError;
use serde_json::json;

async fn run(
    transport: std::sync::Arc<ScriptedTransport>,
    tool: &str,
    params: serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    let registry = ToolRegistry::with_builtins();
    let ctx = ToolContext::new(catalog(transport));
    call_tool(&registry, tool, &params, &ctx).await
}

fn catalog_error(err: &anyhow::Error) -> &CatalogError {
    err.downcast_ref::<CatalogError>()
        .unwrap_or_else(|| panic!("not a catalog error: {}", err))
}

#[tokio::test]
async fn test_multi_keyword_search_is_ranked_locally() {
    let transport = ScriptedTransport::ok(&v2_body(vec![
        artifact("D", "Other", ""),
        artifact("C", "Payment run", ""),
        artifact("B", "Invoice", ""),
        artifact("A", "Invoice payment", ""),
    ]));

    let result = run(
        transport.clone(),
        "search",
        json!({ "keywords": ["invoice", "payment"], "top": 3 }),
    )
    .await
    .unwrap();

    let names: Vec<&str> = result["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["A", "B", "C"]);
    assert_eq!(result["ranked"], true);
    assert_eq!(result["total"], 4);
    assert_eq!(result["nextSkip"], 3);
    assert!(transport.urls()[0].contains("$top=200"));
}

#[tokio::test]
async fn test_partial_normalization_surfaces_a_warning() {
    let body = json!({ "value": [artifact("A", "Alpha", ""), "junk"] }).to_string();
    let result = run(ScriptedTransport::ok(&body), "search", json!({ "query": "Alpha" }))
        .await
        .unwrap();

    assert_eq!(result["items"].as_array().unwrap().len(), 1);
    assert_eq!(result["warnings"][0]["code"], "partial_normalization");
}

#[tokio::test]
async fn test_invalid_parameters_never_reach_upstream() {
    let transport = ScriptedTransport::ok(&v2_body(vec![]));

    let err = run(transport.clone(), "search", json!({ "top": "ten" }))
        .await
        .unwrap_err();
    assert!(matches!(catalog_error(&err), CatalogError::Validation(_)));

    let err = run(transport.clone(), "get_details", json!({ "name": "X" }))
        .await
        .unwrap_err();
    assert!(matches!(catalog_error(&err), CatalogError::Validation(_)));

    let err = run(
        transport.clone(),
        "search",
        json!({ "filter": "Type eq 'API' and (" }),
    )
    .await
    .unwrap_err();
    assert!(matches!(catalog_error(&err), CatalogError::Validation(_)));

    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_unknown_tool() {
    let err = run(ScriptedTransport::ok("{}"), "nope", json!({}))
        .await
        .unwrap_err();
    assert!(err.downcast_ref::<ToolNotFound>().is_some());
}

#[tokio::test]
async fn test_get_details_addresses_composite_key() {
    let transport = ScriptedTransport::ok(
        &json!({ "d": artifact("API_SALES_ORDER_SRV", "Sales Order", "") }).to_string(),
    );

    let result = run(
        transport.clone(),
        "get_details",
        json!({ "name": "API_SALES_ORDER_SRV", "type": "API" }),
    )
    .await
    .unwrap();

    assert_eq!(result["artifact"]["displayName"], "Sales Order");
    assert!(transport.urls()[0]
        .contains("/Artifacts(Name='API_SALES_ORDER_SRV',Type='API')?$format=json"));
}

#[tokio::test]
async fn test_count_total_uses_count_segment() {
    let transport = ScriptedTransport::ok("  1234\n");

    let result = run(transport.clone(), "count", json!({ "type": "API" }))
        .await
        .unwrap();

    assert_eq!(result["total"], 1234);
    let url = &transport.urls()[0];
    assert!(url.contains("/Artifacts/$count?"), "{}", url);
    assert!(!url.contains("$format"), "{}", url);
}

#[tokio::test]
async fn test_count_grouped_by_type() {
    let transport = ScriptedTransport::ok(
        r#"{"value":[{"Type":"API","Count":3},{"Type":"EVENT","Count":5},{"Type":"IntegrationFlow","Count":3}]}"#,
    );

    let result = run(
        transport.clone(),
        "count",
        json!({ "package": "SAPS4HANACloud", "group_by": "Type" }),
    )
    .await
    .unwrap();

    assert_eq!(result["total"], 11);
    assert_eq!(result["groupBy"], "Type");
    assert_eq!(result["groups"][0]["key"], "EVENT");
    assert_eq!(result["groups"][1]["key"], "API");
    assert_eq!(result["groups"][2]["key"], "IntegrationFlow");
    assert!(transport.urls()[0].contains("$apply=groupby"));
}

#[tokio::test]
async fn test_find_deprecated_and_by_protocol_filters() {
    let transport = ScriptedTransport::ok(&v2_body(vec![]));
    run(transport.clone(), "find_deprecated", json!({ "type": "API" }))
        .await
        .unwrap();
    run(transport.clone(), "find_by_protocol", json!({ "protocol": "SOAP" }))
        .await
        .unwrap();
    run(transport.clone(), "list_by_type", json!({ "type": "IntegrationFlow" }))
        .await
        .unwrap();

    let urls = transport.urls();
    assert!(urls[0].contains("State%20eq%20%27DEPRECATED%27"), "{}", urls[0]);
    assert!(urls[1].contains("SubType%20eq%20%27SOAP%27"), "{}", urls[1]);
    assert!(urls[2].contains("Type%20eq%20%27IntegrationFlow%27"), "{}", urls[2]);
}

#[tokio::test]
async fn test_find_recent_orders_newest_first() {
    let transport = ScriptedTransport::ok(&v2_body(vec![artifact("A", "Alpha", "")]));

    run(transport.clone(), "find_recent", json!({ "days": 30 }))
        .await
        .unwrap();
    assert!(transport.urls()[0].contains("$orderby=ModifiedAt%20desc"));

    let err = run(transport, "find_recent", json!({ "days": 0 }))
        .await
        .unwrap_err();
    assert!(matches!(catalog_error(&err), CatalogError::Validation(_)));
}

#[tokio::test]
async fn test_artifact_packages_are_expanded() {
    let body = json!({ "d": { "results": [{
        "Name": "API_SALES_ORDER_SRV",
        "Type": "API",
        "ContentPackages": { "results": [{ "TechnicalName": "SAPS4HANACloud", "DisplayName": "SAP S/4HANA Cloud" }] }
    }] } })
    .to_string();
    let transport = ScriptedTransport::ok(&body);

    let result = run(
        transport.clone(),
        "get_artifact_packages",
        json!({ "name": "API_SALES_ORDER_SRV" }),
    )
    .await
    .unwrap();

    assert_eq!(
        result["artifacts"][0]["packages"][0]["technicalName"],
        "SAPS4HANACloud"
    );
    assert!(transport.urls()[0].contains("$expand=ContentPackages"));
}

#[tokio::test]
async fn test_artifact_packages_unknown_name_is_empty() {
    let result = run(
        ScriptedTransport::ok(&v2_body(vec![])),
        "get_artifact_packages",
        json!({ "name": "missing" }),
    )
    .await
    .unwrap();
    assert_eq!(result["artifacts"], json!([]));
}

#[tokio::test]
async fn test_list_packages_filters_locally() {
    let transport = ScriptedTransport::ok(&v4_body(vec![
        json!({ "TechnicalName": "SAPS4HANACloud", "DisplayName": "SAP S/4HANA Cloud" }),
        json!({ "TechnicalName": "SAPAriba", "DisplayName": "SAP Ariba" }),
    ]));

    let result = run(
        transport.clone(),
        "list_packages",
        json!({ "search_term": "s/4hana" }),
    )
    .await
    .unwrap();

    assert_eq!(result["count"], 1);
    assert_eq!(result["packages"][0]["technicalName"], "SAPS4HANACloud");
    assert!(transport.urls()[0].contains("/ContentPackages?"));
}

#[tokio::test]
async fn test_service_metadata_is_returned_verbatim() {
    let xml = r#"<edmx:Edmx Version="1.0"></edmx:Edmx>"#;
    let transport = ScriptedTransport::ok(xml);

    let result = run(transport.clone(), "get_service_metadata", json!({}))
        .await
        .unwrap();

    assert_eq!(result["metadata"], xml);
    assert!(transport.urls()[0].ends_with("/$metadata"));
}

#[tokio::test]
async fn test_compare_packages_reports_each_package() {
    let transport = ScriptedTransport::ok(r#"{"value":[{"Type":"API","Count":2}]}"#);

    let result = run(
        transport.clone(),
        "compare_packages",
        json!({ "packages": ["SAPS4HANACloud", "SAPAriba", "SAPAriba"] }),
    )
    .await
    .unwrap();

    let packages = result["packages"].as_array().unwrap();
    assert_eq!(packages.len(), 2);
    assert_eq!(packages[0]["package"], "SAPS4HANACloud");
    assert_eq!(packages[1]["package"], "SAPAriba");
    assert_eq!(packages[1]["total"], 2);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_compare_packages_failures_are_inline() {
    let transport = ScriptedTransport::new(vec![status(404, "")]);

    let result = run(
        transport,
        "compare_packages",
        json!({ "packages": ["Gone", "AlsoGone"] }),
    )
    .await
    .unwrap();

    for entry in result["packages"].as_array().unwrap() {
        assert_eq!(entry["error"]["code"], "not_found");
        assert!(entry.get("total").is_none());
    }
}

#[tokio::test]
async fn test_compare_packages_needs_two_ids() {
    let err = run(
        ScriptedTransport::ok("{}"),
        "compare_packages",
        json!({ "packages": ["Only"] }),
    )
    .await
    .unwrap_err();
    assert!(matches!(catalog_error(&err), CatalogError::Validation(_)));
}
