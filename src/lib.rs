//! # hubcat
//!
//! Query-and-caching engine for the SAP Business Accelerator Hub OData
//! catalog, exposed as agent tools over HTTP, MCP, and a CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  ┌──────────┐  ┌──────────┐
//! │   CLI    │  │   HTTP   │  │   MCP    │
//! │ (hubcat) │  │ /tools/* │  │ http/stdio│
//! └────┬─────┘  └────┬─────┘  └────┬─────┘
//!      └─────────────┼─────────────┘
//!                    ▼
//!             ToolRegistry ─▶ CatalogService
//!                                   │
//!                                   ▼
//!             QueryDispatcher ─▶ CacheManager (single-flight, TTL)
//!                   │
//!                   ▼
//!             Transport (reqwest) ─▶ catalog.svc
//! ```
//!
//! Filter rendering, response normalization, ranking, and the retry
//! schedule live in the `hub-catalog-core` crate and do no I/O.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`telemetry`] | tracing subscriber setup |
//! | [`transport`] | HTTP GET seam and its reqwest implementation |
//! | [`cache`] | Fingerprint-keyed TTL cache with single-flight fetches |
//! | [`dispatch`] | Render, cache, retry, normalize |
//! | [`catalog`] | Catalog operations behind the tools |
//! | [`tools`] | Tool trait, schemas, validation, registry |
//! | [`server`] | HTTP server (Axum) with the MCP endpoint |
//! | [`mcp`] | MCP bridge and stdio transport |

pub mod cache;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod mcp;
pub mod server;
pub mod telemetry;
pub mod tools;
pub mod transport;

pub use hub_catalog_core as core;

use std::sync::Arc;

use crate::cache::CacheManager;
use crate::catalog::CatalogService;
use crate::config::Config;
use crate::dispatch::QueryDispatcher;
use crate::transport::{HttpTransport, Transport};

/// Wire a catalog service over the given transport.
pub fn catalog_with_transport(transport: Arc<dyn Transport>, config: &Config) -> Arc<CatalogService> {
    let cache = Arc::new(CacheManager::new(config.cache.clone()));
    let dispatcher = QueryDispatcher::new(transport, cache, config);
    Arc::new(CatalogService::new(dispatcher, config.limits.ranking_window))
}

/// Wire a catalog service over the real HTTP transport.
pub fn build_catalog(config: &Config) -> anyhow::Result<Arc<CatalogService>> {
    let transport = Arc::new(HttpTransport::new(&config.catalog)?);
    Ok(catalog_with_transport(transport, config))
}
