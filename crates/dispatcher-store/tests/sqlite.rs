//! Integration tests for the SQLite backends with a filesystem blob store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use dispatcher_artifact::FsStore;
use dispatcher_model::{
  AssetDescriptor, AssetDetails, DispatchMetadata, DispatchStatus, Lattice, LatticeMetadata,
  Lifecycle, Link, Manifest, Node, NodeMetadata, TransportGraph,
};
use dispatcher_store::{
  AssetStore, CatalogAssetStore, DispatchFilter, DispatchStore, MaterializePolicy, Page,
  SqliteCatalog, SqliteDispatchStore, StoreError, connect,
};
use serde_json::json;

struct Harness {
  assets: CatalogAssetStore,
  dispatches: SqliteDispatchStore,
  _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
  let dir = tempfile::tempdir().expect("failed to create temp dir");
  let url = format!("sqlite://{}", dir.path().join("dispatcher.db").display());
  let pool = connect(&url).await.expect("failed to open database");

  let assets = CatalogAssetStore::new(
    Arc::new(SqliteCatalog::new(pool.clone())),
    Arc::new(FsStore::new(dir.path().join("assets"))),
    MaterializePolicy {
      timeout: Duration::from_secs(5),
      retries: 0,
      backoff: Duration::from_millis(10),
    },
  );

  Harness {
    assets,
    dispatches: SqliteDispatchStore::new(pool),
    _dir: dir,
  }
}

fn manifest(id: &str) -> Manifest {
  let mut first = Node::new(
    0,
    NodeMetadata::new()
      .with("name", "load")
      .with("executor", "local")
      .with("executor_data", json!({ "retries": 1 })),
  );
  first.assets.output = Some(AssetDetails {
    size: 4,
    remote_uri: format!("file:///srv/{id}/node_0/output"),
    ..Default::default()
  });

  Manifest {
    metadata: DispatchMetadata::created(id),
    lattice: Lattice {
      metadata: LatticeMetadata::new()
        .with("name", "pipeline")
        .with("workflow_executor", "dask"),
      transport_graph: TransportGraph {
        nodes: vec![first, Node::new(1, NodeMetadata::new().with("name", "fit"))],
        links: vec![Link {
          source: 0,
          target: 1,
          metadata: json!({ "edge_name": "data", "param_type": "arg", "arg_index": 0 }),
        }],
      },
      ..Default::default()
    },
    ..Default::default()
  }
}

#[tokio::test]
async fn test_dispatch_round_trip() {
  let h = harness().await;
  let created = h.dispatches.create(&manifest("d1")).await.unwrap();

  let fetched = h.dispatches.get("d1").await.unwrap().unwrap();

  assert_eq!(fetched, created);
  assert_eq!(fetched.metadata.lifecycle, Lifecycle::NotStarted);
  assert_eq!(fetched.transport_graph().link_set(), created.transport_graph().link_set());
}

#[tokio::test]
async fn test_list_filter_and_delete() {
  let h = harness().await;
  h.dispatches.create(&manifest("d1")).await.unwrap();
  h.dispatches.create(&manifest("d2")).await.unwrap();

  let exact = h.dispatches.list(&DispatchFilter::by_id("d1")).await.unwrap();
  assert_eq!(exact.len(), 1);
  assert_eq!(exact[0].dispatch_id, "d1");
  assert_eq!(exact[0].root_dispatch_id, "d1");

  let all = h.dispatches.list(&DispatchFilter::default()).await.unwrap();
  assert_eq!(all[0].dispatch_id, "d2");
  assert_eq!(all.len(), 2);

  let removed = h.dispatches.delete("d1").await.unwrap().unwrap();
  assert_eq!(removed, manifest("d1"));
  assert!(h.dispatches.delete("d1").await.unwrap().is_none());

  assert!(h.dispatches.get("d1").await.unwrap().is_none());
  assert!(h.dispatches.list(&DispatchFilter::by_id("d1")).await.unwrap().is_empty());
  let survivors = h.dispatches.list(&DispatchFilter::default()).await.unwrap();
  assert_eq!(survivors.len(), 1);
  assert_eq!(survivors[0].dispatch_id, "d2");
}

#[tokio::test]
async fn test_duplicate_dispatch_conflicts() {
  let h = harness().await;
  h.dispatches.create(&manifest("d1")).await.unwrap();
  assert!(matches!(
    h.dispatches.create(&manifest("d1")).await,
    Err(StoreError::Conflict(_))
  ));
}

#[tokio::test]
async fn test_lifecycle_updates() {
  let h = harness().await;
  h.dispatches.create(&manifest("d1")).await.unwrap();

  let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
  let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 5, 0).unwrap();

  h.dispatches
    .update_lifecycle(
      "d1",
      Lifecycle::Started { start_time: start },
      Some(DispatchStatus::Running),
    )
    .await
    .unwrap();
  let finished = h
    .dispatches
    .update_lifecycle(
      "d1",
      Lifecycle::Finished {
        start_time: start,
        end_time: end,
      },
      Some(DispatchStatus::Completed),
    )
    .await
    .unwrap();
  assert_eq!(finished.end_time(), Some(end));
  assert_eq!(finished.status, DispatchStatus::Completed);

  let regress = h
    .dispatches
    .update_lifecycle("d1", Lifecycle::Started { start_time: start }, None)
    .await;
  assert!(matches!(regress, Err(StoreError::Lifecycle(_))));

  let stored = h.dispatches.get("d1").await.unwrap().unwrap();
  assert_eq!(stored.metadata.start_time(), Some(start));
  assert_eq!(stored.metadata.end_time(), Some(end));
  assert_eq!(stored.metadata.status, DispatchStatus::Completed);

  let listed = h.dispatches.list(&DispatchFilter::by_id("d1")).await.unwrap();
  assert_eq!(listed[0].status, DispatchStatus::Completed);
}

#[tokio::test]
async fn test_status_defaults_and_is_validated() {
  let h = harness().await;
  h.dispatches.create(&manifest("d1")).await.unwrap();

  let listed = h.dispatches.list(&DispatchFilter::default()).await.unwrap();
  assert_eq!(listed[0].status, DispatchStatus::NewObject);

  // Status-only update keeps the lifecycle as it is.
  let failed = h
    .dispatches
    .update_lifecycle("d1", Lifecycle::NotStarted, Some(DispatchStatus::Failed))
    .await
    .unwrap();
  assert_eq!(failed.status, DispatchStatus::Failed);
  assert_eq!(failed.lifecycle, Lifecycle::NotStarted);

  let reopened = h
    .dispatches
    .update_lifecycle("d1", Lifecycle::NotStarted, Some(DispatchStatus::Running))
    .await;
  assert!(matches!(reopened, Err(StoreError::Lifecycle(_))));

  let stored = h.dispatches.get("d1").await.unwrap().unwrap();
  assert_eq!(stored.metadata.status, DispatchStatus::Failed);
}

#[tokio::test]
async fn test_bulk_assets_resolve_uris() {
  let h = harness().await;
  let source = h._dir.path().join("local.bin");
  std::fs::write(&source, b"12345").unwrap();

  let assets = h
    .assets
    .bulk_create(vec![
      AssetDescriptor::new("a", 5).with_source(format!("file://{}", source.display())),
      AssetDescriptor::new("b", 2),
      AssetDescriptor::new("c", 0),
    ])
    .await
    .unwrap();

  let keys: Vec<&str> = assets.iter().map(|a| a.key.as_str()).collect();
  assert_eq!(keys, vec!["a", "b", "c"]);
  assert!(assets[0].remote_uri.starts_with("file://"));
  assert!(!assets[1].remote_uri.is_empty());
  assert!(assets[2].remote_uri.is_empty());

  let copied = h._dir.path().join("assets").join("a");
  assert_eq!(std::fs::read(copied).unwrap(), b"12345");

  let listed = h.assets.list("", None).await.unwrap();
  assert_eq!(listed, assets);

  let paged = h.assets.list("", Some(Page::new(1, 1))).await.unwrap();
  assert_eq!(paged.len(), 1);
  assert_eq!(paged[0].key, "b");
}

#[tokio::test]
async fn test_asset_conflict_and_delete() {
  let h = harness().await;
  h.assets.create(AssetDescriptor::new("d1/doc", 3)).await.unwrap();

  assert!(matches!(
    h.assets.create(AssetDescriptor::new("d1/doc", 3)).await,
    Err(StoreError::Conflict(_))
  ));

  h.assets.delete("d1/doc").await.unwrap();
  h.assets.delete("d1/doc").await.unwrap();
  assert!(h.assets.get("d1/doc").await.unwrap().is_none());
}

#[tokio::test]
async fn test_closed_pool_reports_closed() {
  let h = harness().await;
  h.dispatches.close().await.unwrap();
  assert!(matches!(h.dispatches.get("d1").await, Err(StoreError::Closed)));
}
