//! Request and response bodies of the dispatcher's HTTP-shaped operations.
//!
//! Transport framing is left to the caller; these types only fix the JSON
//! shapes.

use dispatcher_model::{Asset, AssetDescriptor, DispatchMetadata};
use dispatcher_store::{DispatchFilter, Page};
use serde::{Deserialize, Serialize};

use crate::{AssetLink, IngestError, ValidationDetail};

/// `POST /assets`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkAssetRequest {
  pub assets: Vec<AssetDescriptor>,
}

/// Response to `POST /assets` and `GET /assets`. Order matches the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkAssetResponse {
  pub assets: Vec<Asset>,
}

/// `GET /dispatches`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchListResponse {
  pub records: Vec<DispatchMetadata>,
}

/// `GET /dispatches/{id}/assets` and the per-node variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLinksResponse {
  pub records: Vec<AssetLink>,
}

/// Query string of `GET /dispatches`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
  #[serde(default)]
  pub dispatch_id: Option<String>,
  #[serde(default)]
  pub count: Option<u32>,
  #[serde(default)]
  pub page: Option<u32>,
}

impl ListParams {
  pub fn into_filter(self, default_count: u32) -> DispatchFilter {
    DispatchFilter {
      dispatch_id: self.dispatch_id,
      page: page(self.count, self.page, default_count),
    }
  }
}

/// Query string of `GET /assets`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetListParams {
  #[serde(default)]
  pub prefix: String,
  #[serde(default)]
  pub count: Option<u32>,
  #[serde(default)]
  pub page: Option<u32>,
}

impl AssetListParams {
  /// No count and no page means every matching asset.
  pub fn page(&self, default_count: u32) -> Option<Page> {
    if self.count.is_none() && self.page.is_none() {
      return None;
    }
    Some(page(self.count, self.page, default_count))
  }
}

fn page(count: Option<u32>, page: Option<u32>, default_count: u32) -> Page {
  Page::new(
    count.filter(|c| *c > 0).unwrap_or(default_count),
    page.unwrap_or_default(),
  )
}

/// Error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
  pub detail: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub errors: Vec<ValidationDetail>,
}

impl From<&IngestError> for ErrorBody {
  fn from(error: &IngestError) -> Self {
    let errors = match error {
      IngestError::Validation(e) => e.details.clone(),
      _ => Vec::new(),
    };
    Self {
      detail: error.to_string(),
      errors,
    }
  }
}
