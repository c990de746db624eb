use hub_catalog::build_catalog;
use hub_catalog::config::Config;
use hub_catalog_core::criteria::SearchCriteria;
use hub_catalog_core::CatalogError;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> Config {
    let mut config = Config::minimal();
    config.catalog.base_url = format!("{}/odata/1.0/catalog.svc", server.uri());
    config.catalog.timeout_secs = 1;
    config.retry.max_attempts = 1;
    config
}

fn api_criteria() -> SearchCriteria {
    SearchCriteria {
        artifact_type: Some("API".to_string()),
        top: Some(5),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_search_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/odata/1.0/catalog.svc/Artifacts"))
        .and(query_param("$filter", "Type eq 'API'"))
        .and(query_param("$format", "json"))
        .and(query_param("$top", "5"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "d": { "results": [{ "Name": "API_BUSINESS_PARTNER", "Type": "API", "State": "ACTIVE" }] }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let catalog = build_catalog(&config_for(&server)).unwrap();
    let page = catalog
        .search(None, &api_criteria(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].name.as_deref(), Some("API_BUSINESS_PARTNER"));
}

#[tokio::test]
async fn test_error_body_becomes_query_syntax_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": "400", "message": { "lang": "en", "value": "Unsupported operator" } }
        })))
        .mount(&server)
        .await;

    let catalog = build_catalog(&config_for(&server)).unwrap();
    let err = catalog
        .search(None, &api_criteria(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err, CatalogError::QuerySyntax("Unsupported operator".into()));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("{}")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let catalog = build_catalog(&config_for(&server)).unwrap();
    let err = catalog
        .search(None, &api_criteria(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        CatalogError::TransientUnavailable { attempts, message } => {
            assert_eq!(attempts, 1);
            assert!(message.contains("timed out"), "{}", message);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_host_is_unavailable() {
    let mut config = Config::minimal();
    config.catalog.base_url = "http://127.0.0.1:9/catalog.svc".to_string();
    config.retry.max_attempts = 1;

    let catalog = build_catalog(&config).unwrap();
    let err = catalog
        .search(None, &api_criteria(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(
        matches!(err, CatalogError::TransientUnavailable { attempts: 1, .. }),
        "{:?}",
        err
    );
}
