use dispatcher_model::{AssetDescriptor, AssetDetails, Manifest};
use dispatcher_store::{AssetStore, StoreError};
use tracing::debug;

/// Replace every local asset reference in `manifest` with a remote one.
///
/// Non-empty slots are submitted to the asset store as a single batch keyed by
/// `{dispatch_id}/{slot path}`; empty slots lose whatever reference they had.
/// The manifest is only modified once the whole batch has succeeded, so on
/// error no slot carries a half-rewritten reference. Returns how many assets
/// were materialized.
pub async fn rewrite(assets: &dyn AssetStore, manifest: &mut Manifest) -> Result<usize, StoreError> {
  let dispatch_id = manifest.dispatch_id().to_string();

  let mut descriptors = Vec::new();
  let mut targets: Vec<&mut AssetDetails> = Vec::new();
  let mut empty: Vec<&mut AssetDetails> = Vec::new();

  for (path, slot) in manifest.slots_mut() {
    let Some(details) = slot else {
      continue;
    };

    if details.is_populated() {
      let mut descriptor = AssetDescriptor::new(path.key(&dispatch_id), details.size);
      descriptor.uri = details.source().map(str::to_string);
      descriptors.push(descriptor);
      targets.push(details);
    } else {
      empty.push(details);
    }
  }

  let created = if descriptors.is_empty() {
    Vec::new()
  } else {
    assets.bulk_create(descriptors).await?
  };

  for details in empty {
    details.clear_reference();
  }
  for (details, asset) in targets.into_iter().zip(&created) {
    details.resolve(asset);
  }

  debug!(dispatch_id = %dispatch_id, assets = created.len(), "manifest rewritten");
  Ok(created.len())
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use dispatcher_artifact::MemoryStore;
  use dispatcher_model::{AssetSlots, DispatchMetadata, Lattice, Node, NodeMetadata};
  use dispatcher_store::{CatalogAssetStore, MaterializePolicy, MemoryCatalog};

  use super::*;

  fn store() -> CatalogAssetStore {
    CatalogAssetStore::new(
      Arc::new(MemoryCatalog::new()),
      Arc::new(MemoryStore::new()),
      MaterializePolicy::default(),
    )
  }

  fn manifest() -> Manifest {
    let mut node = Node::new(2, NodeMetadata::new());
    node.assets.output = Some(AssetDetails::new(3));
    node.assets.stdout = Some(AssetDetails::new(0).with_source("file:///home/me/stdout.txt"));

    let mut manifest = Manifest {
      metadata: DispatchMetadata::created("d1"),
      lattice: Lattice::default(),
      ..Default::default()
    };
    manifest.lattice.assets.doc = Some(AssetDetails::new(7));
    manifest.lattice.transport_graph.nodes.push(node);
    manifest
  }

  #[tokio::test]
  async fn test_rewrite_resolves_populated_slots() {
    let store = store();
    let mut manifest = manifest();

    let count = rewrite(&store, &mut manifest).await.unwrap();
    assert_eq!(count, 2);

    let doc = manifest.lattice.assets.doc.as_ref().unwrap();
    assert_eq!(doc.remote_uri, "memory://d1/doc");
    assert_eq!(doc.uri, None);

    let node = &manifest.lattice.transport_graph.nodes[0];
    assert_eq!(
      node.assets.output.as_ref().unwrap().remote_uri,
      "memory://d1/node_2/output"
    );

    let stdout = node.assets.stdout.as_ref().unwrap();
    assert_eq!(stdout.remote_uri, "");
    assert_eq!(stdout.uri, None);

    // Absent slots stay absent.
    assert!(node.assets.function.is_none());
    assert_eq!(node.assets.slots().len(), 8);
  }

  #[tokio::test]
  async fn test_failed_batch_leaves_manifest_untouched() {
    let store = store();
    let mut manifest = manifest();
    manifest.lattice.assets.doc = Some(AssetDetails::new(7).with_source("ftp://nowhere/doc"));
    let before = manifest.clone();

    let result = rewrite(&store, &mut manifest).await;

    assert!(result.is_err());
    assert_eq!(manifest, before);
    assert!(store.list("d1/", None).await.unwrap().is_empty());
  }
}
