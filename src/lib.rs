//! # Webservice Agent Library
//!
//! Calls configured HTTP backends with the credentials their auth type asks
//! for. OAuth2 backends get a bearer token from a two-tier cache: an
//! in-memory copy per backend, backed by a persisted record that every
//! refresher updates under an exclusive per-backend lock.
//!
//! Modules:
//! - `config` — YAML configuration, defaults and validation
//! - `backend` — auth strategies, request options, the backend registry
//! - `cache` — tokens and the two-tier token cache
//! - `store` — persisted token records (memory or file)
//! - `sources` — OAuth2 token endpoint client

pub mod backend;
pub mod cache;
pub mod config;
pub mod errors;
pub mod helpers;
pub mod observability;
pub mod resilience;
pub mod sources;
pub mod store;
pub mod utils;

#[cfg(test)]
mod tests;

pub use crate::config::backends::ServiceConfig;
