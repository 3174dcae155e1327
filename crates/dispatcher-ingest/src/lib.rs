//! Dispatcher Ingest
//!
//! The ingestion pipeline and read path of the dispatcher:
//!
//! 1. [`validate`] checks a submitted manifest (node ids, link references,
//!    acyclic graph) and normalizes it under a fresh dispatch id.
//! 2. [`rewrite`] walks every asset slot, materializes the non-empty ones
//!    through the asset store in one batch, and swaps local references for
//!    remote URIs. This batch is the commit barrier.
//! 3. [`Dispatcher`] persists the rewritten manifest, and owns deletion and
//!    lifecycle updates.
//!
//! [`Query`] is the read path over both stores. The [`api`] module holds the
//! request and response bodies of the HTTP-shaped operations.

pub mod api;
mod config;
mod error;
mod query;
mod rewrite;
mod service;
mod validate;

pub use config::{Config, ConfigError};
pub use error::{IngestError, ValidationDetail, ValidationError};
pub use query::{AssetLink, AssetScope, Query};
pub use rewrite::rewrite;
pub use service::Dispatcher;
pub use validate::{decode, normalize, validate};
