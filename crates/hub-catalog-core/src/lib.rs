//! # Hub Catalog Core
//!
//! Pure, I/O-free logic for Hub Catalog: the OData filter AST and its
//! parser, request rendering and fingerprinting, response envelope
//! normalization, result ranking and pagination, and the retry policy.
//!
//! This crate contains no tokio, HTTP client, or filesystem dependencies.
//! Everything here is synchronous and deterministic, so the dispatcher
//! and cache in the `hub-catalog` crate can be tested against it without
//! a network.

pub mod backoff;
pub mod criteria;
pub mod error;
pub mod filter;
pub mod models;
pub mod normalize;
pub mod query;
pub mod rank;

pub use error::{CatalogError, Result};
