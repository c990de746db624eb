//! Query dispatch: render, consult the cache, fetch with retries, normalize.
//!
//! ```text
//! QueryRequest ─render─▶ fingerprint ─▶ CacheManager::get_or_fetch
//!                                              │ miss (leader only)
//!                                              ▼
//!                          ┌──── attempt loop (Attempts) ────┐
//!                          │ permit ─▶ GET(url, timeout)      │
//!                          │ 2xx ─▶ normalize ─▶ done         │
//!                          │ 400 ─▶ QuerySyntax (no retry)    │
//!                          │ 404 ─▶ NotFound                  │
//!                          │ 5xx/408/429/net ─▶ backoff+retry │
//!                          └──────────────────────────────────┘
//! ```

use hub_catalog_core::backoff::{classify_status, Attempts, RetryDecision, RetryPolicy, StatusClass};
use hub_catalog_core::models::NormalizedResult;
use hub_catalog_core::normalize::{error_message, normalize_response};
use hub_catalog_core::query::{Expect, QueryRequest, RenderedRequest};
use hub_catalog_core::{CatalogError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheManager;
use crate::config::Config;
use crate::transport::{Transport, TransportError};

pub struct QueryDispatcher {
    transport: Arc<dyn Transport>,
    cache: Arc<CacheManager>,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
    /// Bounds simultaneous upstream attempts across every caller.
    permits: Arc<Semaphore>,
}

impl QueryDispatcher {
    pub fn new(transport: Arc<dyn Transport>, cache: Arc<CacheManager>, config: &Config) -> Self {
        Self {
            transport,
            cache,
            base_url: config.catalog.base_url.trim_end_matches('/').to_string(),
            timeout: config.catalog.timeout(),
            retry: config.retry.policy(),
            permits: Arc::new(Semaphore::new(config.limits.max_in_flight.max(1))),
        }
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Validate and render without touching the network or the cache.
    pub fn render(&self, request: &QueryRequest) -> Result<RenderedRequest> {
        request.validate()?;
        Ok(request.render(&self.base_url))
    }

    /// Execute `request`, serving from cache when possible.
    ///
    /// Cancelling `cancel` abandons the call with
    /// [`CatalogError::Cancelled`]. If this caller was leading the fetch,
    /// the in-flight HTTP attempt is dropped and any callers waiting on the
    /// same fingerprint are released with the same error.
    pub async fn execute(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<Arc<NormalizedResult>> {
        let rendered = self.render(request)?;
        let expect = request.expect();
        let ttl_class = request.ttl_class();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(fingerprint = %rendered.fingerprint, "request cancelled by caller");
                Err(CatalogError::Cancelled)
            }
            result = self.cache.get_or_fetch(&rendered.fingerprint, ttl_class, || {
                self.fetch(&rendered, &expect)
            }) => result,
        }
    }

    async fn fetch(&self, rendered: &RenderedRequest, expect: &Expect) -> Result<NormalizedResult> {
        let mut attempts = Attempts::new(self.retry.clone());
        loop {
            let attempt = attempts.begin();
            let outcome = {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| CatalogError::Cancelled)?;
                tracing::debug!(url = %rendered.url, attempt, "GET");
                match tokio::time::timeout(self.timeout, self.transport.get(&rendered.url, self.timeout))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(TransportError::Timeout(self.timeout)),
                }
            };

            let failure = match outcome {
                Ok(response) => match classify_status(response.status) {
                    StatusClass::Success => {
                        let result = normalize_response(&response.body, expect)?;
                        if result.is_partial() {
                            tracing::warn!(
                                url = %rendered.url,
                                skipped = result.notes().len(),
                                "partial normalization"
                            );
                        }
                        return Ok(result);
                    }
                    StatusClass::BadRequest => {
                        return Err(CatalogError::QuerySyntax(error_message(&response.body)));
                    }
                    StatusClass::NotFound => {
                        return Err(CatalogError::NotFound(rendered.path.clone()));
                    }
                    StatusClass::Rejected => {
                        return Err(CatalogError::QuerySyntax(format!(
                            "HTTP {}: {}",
                            response.status,
                            error_message(&response.body)
                        )));
                    }
                    StatusClass::Transient => {
                        format!("HTTP {}: {}", response.status, error_message(&response.body))
                    }
                },
                Err(e) => e.to_string(),
            };

            match attempts.after_failure(rand::random::<f64>()) {
                RetryDecision::Retry {
                    attempt: next,
                    delay,
                } => {
                    tracing::warn!(
                        url = %rendered.url,
                        attempt,
                        next_attempt = next,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "transient failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::Exhausted { attempts } => {
                    tracing::warn!(url = %rendered.url, attempts, error = %failure, "giving up");
                    return Err(CatalogError::TransientUnavailable {
                        attempts,
                        message: failure,
                    });
                }
            }
        }
    }
}
