//! Dispatcher Store
//!
//! Storage for the two kinds of durable state the dispatcher owns:
//!
//! - [`AssetStore`]: key-addressed binary assets. Each asset has a size and,
//!   when non-empty, a dereferenceable `remote_uri`.
//! - [`DispatchStore`]: finalized manifests keyed by dispatch id.
//!
//! Both are explicitly constructed services with their own `close()`.
//! [`CatalogAssetStore`] combines an [`AssetCatalog`] (key, size, digest rows)
//! with a blob backend from `dispatcher-artifact`; the catalog and dispatch
//! records live in SQLite ([`SqliteCatalog`], [`SqliteDispatchStore`]) or in
//! memory ([`MemoryCatalog`], [`MemoryDispatchStore`]).

mod catalog;
mod materialize;
mod memory;
mod sqlite;
mod types;

pub use catalog::{AssetCatalog, MemoryCatalog};
pub use materialize::{CatalogAssetStore, MaterializePolicy};
pub use memory::MemoryDispatchStore;
pub use sqlite::{SqliteCatalog, SqliteDispatchStore, connect};
pub use types::{AssetRecord, DispatchFilter, Page};

use async_trait::async_trait;
use dispatcher_model::{
  Asset, AssetDescriptor, DispatchMetadata, DispatchStatus, Lifecycle, Manifest, ModelError,
};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The key or id already exists.
  #[error("already exists: {0}")]
  Conflict(String),

  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// An asset descriptor is unusable as submitted.
  #[error("invalid asset {key:?}: {reason}")]
  InvalidAsset { key: String, reason: String },

  /// Materialization did not finish within the policy's time budget.
  #[error("materializing {key} timed out after {attempts} attempt(s)")]
  Timeout { key: String, attempts: u32 },

  #[error("blob error: {0}")]
  Artifact(#[from] dispatcher_artifact::Error),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[source] sqlx::Error),

  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error(transparent)]
  Lifecycle(#[from] ModelError),

  /// The store has been closed.
  #[error("store is closed")]
  Closed,
}

impl From<sqlx::Error> for StoreError {
  fn from(e: sqlx::Error) -> Self {
    match e {
      sqlx::Error::PoolClosed => Self::Closed,
      e => Self::Database(e),
    }
  }
}

/// Key-addressed store for binary assets.
#[async_trait]
pub trait AssetStore: Send + Sync {
  /// Create one asset. Fails with [`StoreError::Conflict`] if the key exists.
  async fn create(&self, descriptor: AssetDescriptor) -> Result<Asset, StoreError> {
    let key = descriptor.key.clone();
    self
      .bulk_create(vec![descriptor])
      .await?
      .pop()
      .ok_or(StoreError::NotFound(key))
  }

  /// Create many assets as one unit. Output order matches input order. If any
  /// item fails, none of the batch is kept.
  async fn bulk_create(&self, descriptors: Vec<AssetDescriptor>) -> Result<Vec<Asset>, StoreError>;

  async fn get(&self, key: &str) -> Result<Option<Asset>, StoreError>;

  /// Assets whose key starts with `prefix`, sorted by key.
  async fn list(&self, prefix: &str, page: Option<Page>) -> Result<Vec<Asset>, StoreError>;

  /// Remove an asset and its bytes. Removing an absent key is not an error.
  async fn delete(&self, key: &str) -> Result<(), StoreError>;

  /// Remove every asset under `prefix`. Returns how many were removed.
  async fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError>;

  async fn close(&self) -> Result<(), StoreError>;
}

/// Persistent store of finalized manifests.
#[async_trait]
pub trait DispatchStore: Send + Sync {
  /// Persist a manifest under its `dispatch_id` and return it unchanged.
  async fn create(&self, manifest: &Manifest) -> Result<Manifest, StoreError>;

  async fn get(&self, dispatch_id: &str) -> Result<Option<Manifest>, StoreError>;

  /// Dispatch metadata, newest first. An exact-id filter that matches
  /// nothing is an empty list.
  async fn list(&self, filter: &DispatchFilter) -> Result<Vec<DispatchMetadata>, StoreError>;

  /// Remove a dispatch. Returns the removed manifest, if there was one.
  async fn delete(&self, dispatch_id: &str) -> Result<Option<Manifest>, StoreError>;

  /// Write lifecycle timestamps, and optionally a status, reported by the
  /// execution engine. A `None` status keeps the recorded one.
  async fn update_lifecycle(
    &self,
    dispatch_id: &str,
    lifecycle: Lifecycle,
    status: Option<DispatchStatus>,
  ) -> Result<DispatchMetadata, StoreError>;

  async fn close(&self) -> Result<(), StoreError>;
}
