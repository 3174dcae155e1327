use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dispatcher_artifact::{self as artifact, ByteStream, Sources, Store as BlobStore};
use dispatcher_model::{Asset, AssetDescriptor};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::{AssetCatalog, AssetRecord, AssetStore, Page, StoreError};

const DIGEST_ALG: &str = "sha256";

/// Time budget for copying one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterializePolicy {
  /// Limit for a single attempt.
  pub timeout: Duration,
  /// Attempts after the first one.
  pub retries: u32,
  /// Delay before the first retry, doubled for each later one.
  pub backoff: Duration,
}

impl Default for MaterializePolicy {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(30),
      retries: 2,
      backoff: Duration::from_millis(200),
    }
  }
}

/// Asset store backed by a catalog for keys and a blob backend for bytes.
///
/// Keys are reserved in the catalog before any bytes move, so concurrent
/// creators of the same key see [`StoreError::Conflict`] instead of
/// overwriting each other. Remote URIs are derived from the blob backend on
/// every read.
pub struct CatalogAssetStore {
  catalog: Arc<dyn AssetCatalog>,
  blobs: Arc<dyn BlobStore>,
  sources: Sources,
  policy: MaterializePolicy,
}

impl CatalogAssetStore {
  pub fn new(
    catalog: Arc<dyn AssetCatalog>,
    blobs: Arc<dyn BlobStore>,
    policy: MaterializePolicy,
  ) -> Self {
    Self {
      catalog,
      blobs,
      sources: Sources::new(),
      policy,
    }
  }

  pub fn with_sources(mut self, sources: Sources) -> Self {
    self.sources = sources;
    self
  }

  fn resolve(&self, record: AssetRecord) -> Asset {
    record.into_asset(|key| self.blobs.location(key))
  }

  /// Copy one asset's bytes into the blob backend under the retry policy.
  /// Returns the content digest when bytes were copied from a source.
  async fn materialize(&self, descriptor: &AssetDescriptor) -> Result<Option<String>, StoreError> {
    let mut backoff = self.policy.backoff;
    let mut attempt = 0u32;

    loop {
      attempt += 1;

      let error = match tokio::time::timeout(self.policy.timeout, self.copy(descriptor)).await {
        Ok(Ok(digest)) => {
          info!(
            key = %descriptor.key,
            size = descriptor.size,
            attempts = attempt,
            "asset_materialized"
          );
          return Ok(digest);
        }
        Ok(Err(e)) if !is_transient(&e) => return Err(e.into()),
        Ok(Err(e)) => StoreError::Artifact(e),
        Err(_) => StoreError::Timeout {
          key: descriptor.key.clone(),
          attempts: attempt,
        },
      };

      if attempt > self.policy.retries {
        return Err(error);
      }

      warn!(
        key = %descriptor.key,
        attempt,
        error = %error,
        "retrying asset materialization"
      );
      tokio::time::sleep(backoff).await;
      backoff = backoff.saturating_mul(2);
    }
  }

  async fn copy(&self, descriptor: &AssetDescriptor) -> Result<Option<String>, artifact::Error> {
    let Some(source) = descriptor.source() else {
      // No source: allocate the location so the URI dereferences.
      self.blobs.put(&descriptor.key, artifact::empty()).await?;
      return Ok(None);
    };

    let hasher = Arc::new(Mutex::new(Sha256::new()));
    let tap = Arc::clone(&hasher);
    let data: ByteStream = Box::pin(self.sources.open(source).await?.inspect(move |chunk| {
      if let Ok(bytes) = chunk {
        tap.lock().unwrap_or_else(|e| e.into_inner()).update(bytes);
      }
    }));

    let written = self.blobs.put(&descriptor.key, data).await?;
    if written != descriptor.size {
      debug!(
        key = %descriptor.key,
        declared = descriptor.size,
        written,
        "asset size differs from declared size"
      );
    }

    let digest = std::mem::take(&mut *hasher.lock().unwrap_or_else(|e| e.into_inner())).finalize();
    Ok(Some(hex::encode(digest)))
  }

  /// Drop catalog rows and bytes for keys of a failed batch.
  async fn release(&self, keys: &[String]) {
    for key in keys {
      match self.blobs.delete(key).await {
        Ok(()) | Err(artifact::Error::NotFound(_)) => {}
        Err(e) => warn!(key = %key, error = %e, "asset_release_failed"),
      }
    }
    if let Err(e) = self.catalog.remove(keys).await {
      warn!(keys = ?keys, error = %e, "asset_release_failed");
    }
  }
}

/// Failures worth another attempt.
fn is_transient(error: &artifact::Error) -> bool {
  matches!(error, artifact::Error::Io(_) | artifact::Error::Http(_))
}

#[async_trait]
impl AssetStore for CatalogAssetStore {
  #[instrument(name = "asset_bulk_create", skip_all, fields(count = descriptors.len()))]
  async fn bulk_create(&self, descriptors: Vec<AssetDescriptor>) -> Result<Vec<Asset>, StoreError> {
    for descriptor in &descriptors {
      artifact::validate_key(&descriptor.key).map_err(|e| StoreError::InvalidAsset {
        key: descriptor.key.clone(),
        reason: e.to_string(),
      })?;
    }

    let records: Vec<AssetRecord> = descriptors
      .iter()
      .map(|d| AssetRecord::new(d.key.clone(), d.size))
      .collect();
    self.catalog.reserve(&records).await?;

    let copies = descriptors
      .iter()
      .filter(|d| d.size > 0)
      .map(|descriptor| async move {
        let digest = self.materialize(descriptor).await?;
        if let Some(digest) = &digest {
          self
            .catalog
            .record_digest(&descriptor.key, DIGEST_ALG, digest)
            .await?;
        }
        Ok::<_, StoreError>((descriptor.key.clone(), digest))
      });

    let digests: HashMap<String, Option<String>> = match futures::future::try_join_all(copies).await {
      Ok(digests) => digests.into_iter().collect(),
      Err(e) => {
        let keys: Vec<String> = records.into_iter().map(|r| r.key).collect();
        self.release(&keys).await;
        return Err(e);
      }
    };

    Ok(
      records
        .into_iter()
        .map(|mut record| {
          if let Some(Some(digest)) = digests.get(&record.key) {
            record.digest_alg = Some(DIGEST_ALG.to_string());
            record.digest = Some(digest.clone());
          }
          self.resolve(record)
        })
        .collect(),
    )
  }

  async fn get(&self, key: &str) -> Result<Option<Asset>, StoreError> {
    Ok(self.catalog.get(key).await?.map(|r| self.resolve(r)))
  }

  async fn list(&self, prefix: &str, page: Option<Page>) -> Result<Vec<Asset>, StoreError> {
    let records = self.catalog.list(prefix, page).await?;
    Ok(records.into_iter().map(|r| self.resolve(r)).collect())
  }

  async fn delete(&self, key: &str) -> Result<(), StoreError> {
    match self.blobs.delete(key).await {
      Ok(()) | Err(artifact::Error::NotFound(_)) | Err(artifact::Error::InvalidKey { .. }) => {}
      Err(e) => return Err(e.into()),
    }
    self.catalog.remove(&[key.to_string()]).await
  }

  async fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
    let keys: Vec<String> = self
      .catalog
      .list(prefix, None)
      .await?
      .into_iter()
      .map(|r| r.key)
      .collect();

    for key in &keys {
      match self.blobs.delete(key).await {
        Ok(()) | Err(artifact::Error::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
      }
    }
    self.catalog.remove(&keys).await?;
    Ok(keys.len())
  }

  async fn close(&self) -> Result<(), StoreError> {
    self.catalog.close().await
  }
}
