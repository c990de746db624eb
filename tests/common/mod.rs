#![allow(dead_code)]

use async_trait::async_trait;
use hub_catalog::catalog::CatalogService;
use hub_catalog::config::Config;
use hub_catalog::transport::{Transport, TransportError, TransportResponse};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Plays back a fixed queue of responses and records every URL requested.
/// When the queue runs dry the last response repeats.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    last: Mutex<Option<Result<TransportResponse, TransportError>>>,
    urls: Mutex<Vec<String>>,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
        Self::with_delay(script, Duration::ZERO)
    }

    pub fn with_delay(
        script: Vec<Result<TransportResponse, TransportError>>,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            urls: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn ok(body: &str) -> Arc<Self> {
        Self::new(vec![Ok(TransportResponse::new(200, body))])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most `get` calls that were running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(
        &self,
        url: &str,
        _timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.to_string());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        match next {
            Some(r) => {
                *self.last.lock() = Some(r.clone());
                r
            }
            None => self
                .last
                .lock()
                .clone()
                .unwrap_or_else(|| Err(TransportError::Connect("script is empty".into()))),
        }
    }
}

pub fn status(code: u16, body: &str) -> Result<TransportResponse, TransportError> {
    Ok(TransportResponse::new(code, body))
}

pub fn test_config() -> Config {
    let mut config = Config::minimal();
    config.catalog.base_url = "https://hub.test/odata/1.0/catalog.svc".to_string();
    config.catalog.timeout_secs = 5;
    config
}

pub fn catalog(transport: Arc<ScriptedTransport>) -> Arc<CatalogService> {
    hub_catalog::catalog_with_transport(transport, &test_config())
}

pub fn artifact(name: &str, display: &str, description: &str) -> serde_json::Value {
    serde_json::json!({
        "Name": name,
        "Type": "API",
        "SubType": "ODATA",
        "DisplayName": display,
        "Description": description,
        "Version": "1.0.0",
        "State": "ACTIVE",
        "CreatedAt": "2023-01-05T10:00:00Z",
        "ModifiedAt": "/Date(1700000000000)/"
    })
}

pub fn v2_body(records: Vec<serde_json::Value>) -> String {
    serde_json::json!({ "d": { "results": records } }).to_string()
}

pub fn v4_body(records: Vec<serde_json::Value>) -> String {
    serde_json::json!({ "value": records }).to_string()
}
