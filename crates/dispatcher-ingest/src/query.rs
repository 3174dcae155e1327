use std::sync::Arc;

use dispatcher_model::{Asset, AssetDetails, DispatchMetadata, Manifest, NodeId};
use dispatcher_store::{AssetStore, DispatchFilter, DispatchStore, Page};
use serde::{Deserialize, Serialize};

use crate::IngestError;

/// Which asset slots of a dispatch to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetScope {
  /// Dispatch-level and lattice-level slots.
  Workflow,
  Node(NodeId),
}

/// A named slot of a stored dispatch and the asset it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLink {
  pub name: String,
  pub asset: AssetDetails,
}

/// Read path over the dispatch and asset stores.
#[derive(Clone)]
pub struct Query {
  assets: Arc<dyn AssetStore>,
  dispatches: Arc<dyn DispatchStore>,
}

impl Query {
  pub fn new(assets: Arc<dyn AssetStore>, dispatches: Arc<dyn DispatchStore>) -> Self {
    Self { assets, dispatches }
  }

  /// `GET /dispatches/{id}`
  pub async fn get(&self, dispatch_id: &str) -> Result<Manifest, IngestError> {
    self
      .dispatches
      .get(dispatch_id)
      .await?
      .ok_or_else(|| IngestError::NotFound(dispatch_id.to_string()))
  }

  /// `GET /dispatches`. No match is an empty list.
  pub async fn list(&self, filter: &DispatchFilter) -> Result<Vec<DispatchMetadata>, IngestError> {
    Ok(self.dispatches.list(filter).await?)
  }

  /// `GET /assets?prefix=`
  pub async fn list_assets(&self, prefix: &str, page: Option<Page>) -> Result<Vec<Asset>, IngestError> {
    Ok(self.assets.list(prefix, page).await?)
  }

  pub async fn get_asset(&self, key: &str) -> Result<Asset, IngestError> {
    self
      .assets
      .get(key)
      .await?
      .ok_or_else(|| IngestError::NotFound(key.to_string()))
  }

  /// Populated asset slots of a stored dispatch, in slot order.
  pub async fn asset_links(
    &self,
    dispatch_id: &str,
    scope: AssetScope,
  ) -> Result<Vec<AssetLink>, IngestError> {
    let manifest = self.get(dispatch_id).await?;

    if let AssetScope::Node(id) = scope {
      if manifest.transport_graph().node(id).is_none() {
        return Err(IngestError::NotFound(format!("{dispatch_id}/node_{id}")));
      }
    }

    Ok(
      manifest
        .slots()
        .into_iter()
        .filter(|(path, _)| match scope {
          AssetScope::Workflow => path.node_id().is_none(),
          AssetScope::Node(id) => path.node_id() == Some(id),
        })
        .filter_map(|(path, details)| {
          details.map(|asset| AssetLink {
            name: path.slot().to_string(),
            asset: asset.clone(),
          })
        })
        .collect(),
    )
  }
}
