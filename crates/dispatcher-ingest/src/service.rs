//! The dispatcher service.

use std::sync::Arc;

use dispatcher_artifact::FsStore;
use dispatcher_model::{Asset, AssetDetails, DispatchMetadata, DispatchStatus, Lifecycle, Manifest};
use dispatcher_store::{
  AssetStore, CatalogAssetStore, DispatchStore, MaterializePolicy, MemoryCatalog,
  MemoryDispatchStore, SqliteCatalog, SqliteDispatchStore, StoreError,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, instrument, warn};

use crate::api::BulkAssetRequest;
use crate::{Config, IngestError, Query, decode, normalize, rewrite, validate};

/// Ingestion and administration of dispatches.
///
/// Cloning is cheap; clones share the same stores.
#[derive(Clone)]
pub struct Dispatcher {
  assets: Arc<dyn AssetStore>,
  dispatches: Arc<dyn DispatchStore>,
  page_size: u32,
}

impl Dispatcher {
  pub fn new(assets: Arc<dyn AssetStore>, dispatches: Arc<dyn DispatchStore>) -> Self {
    Self {
      assets,
      dispatches,
      page_size: dispatcher_store::Page::DEFAULT_COUNT,
    }
  }

  pub fn with_page_size(mut self, page_size: u32) -> Self {
    self.page_size = page_size;
    self
  }

  /// Open durable stores under the configured data directory: a SQLite
  /// database for catalog and dispatch records, and an `assets/` blob
  /// directory.
  pub async fn open(config: &Config) -> Result<Self, IngestError> {
    tokio::fs::create_dir_all(&config.data_dir)
      .await
      .map_err(|e| StoreError::Artifact(e.into()))?;

    let pool = dispatcher_store::connect(&config.database_url()).await?;
    let assets = CatalogAssetStore::new(
      Arc::new(SqliteCatalog::new(pool.clone())),
      Arc::new(FsStore::new(config.assets_dir())),
      config.policy(),
    );
    let dispatches = SqliteDispatchStore::new(pool);

    info!(data_dir = %config.data_dir.display(), "dispatcher opened");
    Ok(Self::new(Arc::new(assets), Arc::new(dispatches)).with_page_size(config.page_size))
  }

  /// Ephemeral stores, for tests and throwaway servers.
  pub fn in_memory(policy: MaterializePolicy) -> Self {
    let assets = CatalogAssetStore::new(
      Arc::new(MemoryCatalog::new()),
      Arc::new(dispatcher_artifact::MemoryStore::new()),
      policy,
    );
    Self::new(Arc::new(assets), Arc::new(MemoryDispatchStore::new()))
  }

  pub fn page_size(&self) -> u32 {
    self.page_size
  }

  pub fn query(&self) -> Query {
    Query::new(self.assets.clone(), self.dispatches.clone())
  }

  /// `POST /dispatches` with a raw JSON body.
  pub async fn ingest_json(
    &self,
    body: &[u8],
    cancel: CancellationToken,
  ) -> Result<Manifest, IngestError> {
    let manifest = decode(body)?;
    self.ingest(manifest, cancel).await
  }

  /// Validate, normalize, materialize and persist a submitted manifest.
  ///
  /// The commit runs on its own task, so dropping the returned future does
  /// not stop a commit that is already under way. Cancelling `cancel` before
  /// the manifest is persisted releases whatever was materialized and fails
  /// with [`IngestError::Cancelled`].
  #[instrument(
    name = "dispatch_ingest",
    skip_all,
    fields(nodes = manifest.transport_graph().nodes.len())
  )]
  pub async fn ingest(
    &self,
    manifest: Manifest,
    cancel: CancellationToken,
  ) -> Result<Manifest, IngestError> {
    validate(&manifest)?;

    let dispatch_id = uuid::Uuid::new_v4().to_string();
    let manifest = normalize(manifest, &dispatch_id);

    let this = self.clone();
    tokio::spawn(async move { this.commit(manifest, cancel).await }.in_current_span()).await?
  }

  async fn commit(
    &self,
    mut manifest: Manifest,
    cancel: CancellationToken,
  ) -> Result<Manifest, IngestError> {
    let dispatch_id = manifest.dispatch_id().to_string();

    match self.persist(&mut manifest, &cancel).await {
      Ok((stored, assets)) => {
        info!(
          dispatch_id = %dispatch_id,
          name = manifest.name().unwrap_or_default(),
          nodes = stored.transport_graph().nodes.len(),
          assets,
          "dispatch_ingested"
        );
        Ok(stored)
      }
      Err(e) => {
        match self.assets.delete_prefix(&format!("{dispatch_id}/")).await {
          Ok(released) => {
            warn!(dispatch_id = %dispatch_id, released, error = %e, "ingest_rolled_back")
          }
          Err(release) => {
            warn!(dispatch_id = %dispatch_id, error = %e, "ingest_rolled_back");
            warn!(dispatch_id = %dispatch_id, error = %release, "asset_release_failed");
          }
        }
        Err(e)
      }
    }
  }

  async fn persist(
    &self,
    manifest: &mut Manifest,
    cancel: &CancellationToken,
  ) -> Result<(Manifest, usize), IngestError> {
    let assets = tokio::select! {
      biased;
      _ = cancel.cancelled() => return Err(IngestError::Cancelled),
      rewritten = rewrite(self.assets.as_ref(), manifest) => rewritten?,
    };

    // Last chance to back out before the record becomes visible.
    if cancel.is_cancelled() {
      return Err(IngestError::Cancelled);
    }

    let stored = self.dispatches.create(manifest).await?;
    Ok((stored, assets))
  }

  /// `DELETE /dispatches/{id}`. Idempotent; returns whether a record was
  /// removed. Only the assets the removed manifest references are released,
  /// after the record is gone, and a failed release is only logged.
  #[instrument(name = "dispatch_delete", skip(self))]
  pub async fn delete(&self, dispatch_id: &str) -> Result<bool, IngestError> {
    let Some(manifest) = self.dispatches.delete(dispatch_id).await? else {
      info!(dispatch_id = %dispatch_id, removed = false, "dispatch_deleted");
      return Ok(false);
    };

    let mut released = 0usize;
    for (path, details) in manifest.slots() {
      if !details.is_some_and(AssetDetails::is_populated) {
        continue;
      }
      let key = path.key(dispatch_id);
      if let Err(e) = self.assets.delete(&key).await {
        warn!(dispatch_id = %dispatch_id, key = %key, error = %e, "asset_release_failed");
        continue;
      }
      released += 1;
    }

    info!(dispatch_id = %dispatch_id, removed = true, released, "dispatch_deleted");
    Ok(true)
  }

  /// `POST /assets`
  #[instrument(name = "assets_create", skip_all, fields(count = request.assets.len()))]
  pub async fn create_assets(&self, request: BulkAssetRequest) -> Result<Vec<Asset>, IngestError> {
    Ok(self.assets.bulk_create(request.assets).await?)
  }

  /// Record lifecycle timestamps, and optionally a status, reported by the
  /// execution engine.
  pub async fn update_lifecycle(
    &self,
    dispatch_id: &str,
    lifecycle: Lifecycle,
    status: Option<DispatchStatus>,
  ) -> Result<DispatchMetadata, IngestError> {
    let metadata = self
      .dispatches
      .update_lifecycle(dispatch_id, lifecycle, status)
      .await?;
    info!(
      dispatch_id = %dispatch_id,
      status = %metadata.status,
      lifecycle = %metadata.lifecycle,
      "dispatch_lifecycle_updated"
    );
    Ok(metadata)
  }

  pub async fn close(&self) -> Result<(), IngestError> {
    self.dispatches.close().await?;
    self.assets.close().await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use async_trait::async_trait;
  use dispatcher_model::{AssetDescriptor, Node, NodeMetadata};
  use dispatcher_store::Page;

  use super::*;

  /// Asset store whose deletes always fail.
  struct FailingRelease(CatalogAssetStore);

  #[async_trait]
  impl AssetStore for FailingRelease {
    async fn bulk_create(
      &self,
      descriptors: Vec<AssetDescriptor>,
    ) -> Result<Vec<Asset>, StoreError> {
      self.0.bulk_create(descriptors).await
    }

    async fn get(&self, key: &str) -> Result<Option<Asset>, StoreError> {
      self.0.get(key).await
    }

    async fn list(&self, prefix: &str, page: Option<Page>) -> Result<Vec<Asset>, StoreError> {
      self.0.list(prefix, page).await
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
      Err(StoreError::Closed)
    }

    async fn delete_prefix(&self, _prefix: &str) -> Result<usize, StoreError> {
      Err(StoreError::Closed)
    }

    async fn close(&self) -> Result<(), StoreError> {
      self.0.close().await
    }
  }

  fn manifest() -> Manifest {
    let mut node = Node::new(0, NodeMetadata::new().with("name", "task"));
    node.assets.output = Some(AssetDetails::new(4));
    let mut manifest = Manifest::default();
    manifest.lattice.transport_graph.nodes.push(node);
    manifest
  }

  #[tokio::test]
  async fn test_ingest_assigns_fresh_ids() {
    let dispatcher = Dispatcher::in_memory(MaterializePolicy::default());

    let first = dispatcher.ingest(manifest(), CancellationToken::new()).await.unwrap();
    let second = dispatcher.ingest(manifest(), CancellationToken::new()).await.unwrap();

    assert!(!first.dispatch_id().is_empty());
    assert_ne!(first.dispatch_id(), second.dispatch_id());
    assert_eq!(first.metadata.root_dispatch_id, first.dispatch_id());
  }

  #[tokio::test]
  async fn test_cancelled_ingest_leaves_nothing() {
    let dispatcher = Dispatcher::in_memory(MaterializePolicy::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = dispatcher.ingest(manifest(), cancel).await;

    assert!(matches!(result, Err(IngestError::Cancelled)));
    let query = dispatcher.query();
    assert!(query.list(&Default::default()).await.unwrap().is_empty());
    assert!(query.list_assets("", None).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_delete_survives_failed_asset_release() {
    let assets = CatalogAssetStore::new(
      Arc::new(MemoryCatalog::new()),
      Arc::new(dispatcher_artifact::MemoryStore::new()),
      MaterializePolicy::default(),
    );
    let dispatcher = Dispatcher::new(
      Arc::new(FailingRelease(assets)),
      Arc::new(MemoryDispatchStore::new()),
    );
    let created = dispatcher.ingest(manifest(), CancellationToken::new()).await.unwrap();
    let dispatch_id = created.dispatch_id();

    assert!(dispatcher.delete(dispatch_id).await.unwrap());

    let query = dispatcher.query();
    assert!(matches!(query.get(dispatch_id).await, Err(IngestError::NotFound(_))));
    assert!(query.list(&Default::default()).await.unwrap().is_empty());
    assert!(!dispatcher.delete(dispatch_id).await.unwrap());
  }

  #[tokio::test]
  async fn test_delete_of_unknown_id_keeps_matching_assets() {
    let dispatcher = Dispatcher::in_memory(MaterializePolicy::default());
    dispatcher
      .create_assets(BulkAssetRequest {
        assets: vec![AssetDescriptor::new("team/model.bin", 4)],
      })
      .await
      .unwrap();

    assert!(!dispatcher.delete("team").await.unwrap());

    let query = dispatcher.query();
    let kept = query.list_assets("team/", None).await.unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].key, "team/model.bin");
  }

  #[tokio::test]
  async fn test_delete_releases_only_referenced_assets() {
    let dispatcher = Dispatcher::in_memory(MaterializePolicy::default());
    let created = dispatcher.ingest(manifest(), CancellationToken::new()).await.unwrap();
    let dispatch_id = created.dispatch_id().to_string();
    let foreign = format!("{dispatch_id}/extra.bin");
    dispatcher
      .create_assets(BulkAssetRequest {
        assets: vec![AssetDescriptor::new(foreign.clone(), 2)],
      })
      .await
      .unwrap();

    assert!(dispatcher.delete(&dispatch_id).await.unwrap());

    let query = dispatcher.query();
    let left: Vec<String> = query
      .list_assets(&format!("{dispatch_id}/"), None)
      .await
      .unwrap()
      .into_iter()
      .map(|asset| asset.key)
      .collect();
    assert_eq!(left, vec![foreign]);
  }

  #[tokio::test]
  async fn test_closed_dispatcher_refuses_work() {
    let dispatcher = Dispatcher::in_memory(MaterializePolicy::default());
    dispatcher.close().await.unwrap();

    let result = dispatcher.ingest(manifest(), CancellationToken::new()).await;
    assert!(matches!(result, Err(IngestError::Storage(StoreError::Closed))));
  }
}
