use dispatcher_model::Asset;
use serde::{Deserialize, Serialize};

/// Catalog row for one asset. The location is not stored; it is derived from
/// the blob backend when the asset is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
  pub key: String,
  pub size: u64,
  pub digest_alg: Option<String>,
  pub digest: Option<String>,
}

impl AssetRecord {
  pub fn new(key: impl Into<String>, size: u64) -> Self {
    Self {
      key: key.into(),
      size,
      digest_alg: None,
      digest: None,
    }
  }

  /// Attach the location. Empty assets have no location.
  pub fn into_asset(self, location: impl FnOnce(&str) -> String) -> Asset {
    let remote_uri = if self.size > 0 {
      location(&self.key)
    } else {
      String::new()
    };
    Asset {
      key: self.key,
      size: self.size,
      remote_uri,
      digest_alg: self.digest_alg,
      digest: self.digest,
    }
  }
}

/// Pagination: `count` records starting at page `page` (zero-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
  #[serde(default = "Page::default_count")]
  pub count: u32,
  #[serde(default)]
  pub page: u32,
}

impl Page {
  pub const DEFAULT_COUNT: u32 = 10;

  pub fn new(count: u32, page: u32) -> Self {
    Self { count, page }
  }

  fn default_count() -> u32 {
    Self::DEFAULT_COUNT
  }

  pub fn offset(&self) -> usize {
    self.count as usize * self.page as usize
  }

  pub fn limit(&self) -> usize {
    self.count as usize
  }

  /// Apply to an already sorted sequence.
  pub fn slice<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
    items
      .into_iter()
      .skip(self.offset())
      .take(self.limit())
      .collect()
  }
}

impl Default for Page {
  fn default() -> Self {
    Self::new(Self::DEFAULT_COUNT, 0)
  }
}

/// Filter for dispatch listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchFilter {
  #[serde(default)]
  pub dispatch_id: Option<String>,
  #[serde(flatten)]
  pub page: Page,
}

impl DispatchFilter {
  pub fn by_id(dispatch_id: impl Into<String>) -> Self {
    Self {
      dispatch_id: Some(dispatch_id.into()),
      ..Default::default()
    }
  }

  pub fn page(mut self, page: Page) -> Self {
    self.page = page;
    self
  }
}
