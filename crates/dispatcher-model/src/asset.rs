use serde::{Deserialize, Serialize};

/// An asset as recorded by the asset store.
///
/// `remote_uri` is empty exactly when `size` is zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
  pub key: String,
  pub size: u64,
  #[serde(default)]
  pub remote_uri: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub digest_alg: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub digest: Option<String>,
}

/// A request to create one asset.
///
/// `uri` is the caller-supplied source of the bytes. It is only read when
/// `size > 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
  pub key: String,
  pub size: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub uri: Option<String>,
}

impl AssetDescriptor {
  pub fn new(key: impl Into<String>, size: u64) -> Self {
    Self {
      key: key.into(),
      size,
      uri: None,
    }
  }

  pub fn with_source(mut self, uri: impl Into<String>) -> Self {
    self.uri = Some(uri.into());
    self
  }

  /// The source reference, ignoring empty strings.
  pub fn source(&self) -> Option<&str> {
    self.uri.as_deref().filter(|uri| !uri.is_empty())
  }
}

/// Contents of one asset slot inside a manifest.
///
/// On submission `uri` holds the caller-local reference. After ingestion
/// `uri` is always cleared and `remote_uri` holds the resolved location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDetails {
  #[serde(default)]
  pub size: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub uri: Option<String>,
  #[serde(default)]
  pub remote_uri: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub digest_alg: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub digest: Option<String>,
}

impl AssetDetails {
  pub fn new(size: u64) -> Self {
    Self {
      size,
      ..Default::default()
    }
  }

  pub fn with_source(mut self, uri: impl Into<String>) -> Self {
    self.uri = Some(uri.into());
    self
  }

  /// The caller-local source reference, ignoring empty strings.
  pub fn source(&self) -> Option<&str> {
    self.uri.as_deref().filter(|uri| !uri.is_empty())
  }

  /// Whether the slot carries content that must be materialized.
  pub fn is_populated(&self) -> bool {
    self.size > 0
  }

  /// Replace the local reference with the stored asset's location.
  pub fn resolve(&mut self, asset: &Asset) {
    self.uri = None;
    self.remote_uri = asset.remote_uri.clone();
    self.digest_alg = asset.digest_alg.clone();
    self.digest = asset.digest.clone();
  }

  /// Drop any reference carried by an empty slot.
  pub fn clear_reference(&mut self) {
    self.uri = None;
    self.remote_uri.clear();
    self.digest_alg = None;
    self.digest = None;
  }
}

impl From<&Asset> for AssetDetails {
  fn from(asset: &Asset) -> Self {
    Self {
      size: asset.size,
      uri: None,
      remote_uri: asset.remote_uri.clone(),
      digest_alg: asset.digest_alg.clone(),
      digest: asset.digest.clone(),
    }
  }
}
