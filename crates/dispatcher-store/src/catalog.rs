use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::{AssetRecord, Page, StoreError};

/// Index of asset keys, sizes and digests.
///
/// Key uniqueness is enforced here: [`AssetCatalog::reserve`] claims every key
/// of a batch or none of them.
#[async_trait]
pub trait AssetCatalog: Send + Sync {
  /// Insert all records, failing with [`StoreError::Conflict`] on the first
  /// key that already exists. Nothing is inserted on failure.
  async fn reserve(&self, records: &[AssetRecord]) -> Result<(), StoreError>;

  /// Record the content digest of an asset after its bytes were copied.
  async fn record_digest(&self, key: &str, alg: &str, digest: &str) -> Result<(), StoreError>;

  async fn get(&self, key: &str) -> Result<Option<AssetRecord>, StoreError>;

  /// Records whose key starts with `prefix`, sorted by key.
  async fn list(&self, prefix: &str, page: Option<Page>) -> Result<Vec<AssetRecord>, StoreError>;

  /// Remove records. Absent keys are ignored.
  async fn remove(&self, keys: &[String]) -> Result<(), StoreError>;

  async fn close(&self) -> Result<(), StoreError>;
}

/// In-memory catalog.
#[derive(Default)]
pub struct MemoryCatalog {
  records: RwLock<BTreeMap<String, AssetRecord>>,
  closed: AtomicBool,
}

impl MemoryCatalog {
  pub fn new() -> Self {
    Self::default()
  }

  fn ensure_open(&self) -> Result<(), StoreError> {
    if self.closed.load(Ordering::Acquire) {
      return Err(StoreError::Closed);
    }
    Ok(())
  }
}

#[async_trait]
impl AssetCatalog for MemoryCatalog {
  async fn reserve(&self, records: &[AssetRecord]) -> Result<(), StoreError> {
    self.ensure_open()?;
    let mut stored = self.records.write().unwrap_or_else(|e| e.into_inner());

    let mut batch = HashSet::new();
    for record in records {
      if stored.contains_key(&record.key) || !batch.insert(record.key.as_str()) {
        return Err(StoreError::Conflict(record.key.clone()));
      }
    }

    for record in records {
      stored.insert(record.key.clone(), record.clone());
    }
    Ok(())
  }

  async fn record_digest(&self, key: &str, alg: &str, digest: &str) -> Result<(), StoreError> {
    self.ensure_open()?;
    let mut stored = self.records.write().unwrap_or_else(|e| e.into_inner());
    let record = stored
      .get_mut(key)
      .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
    record.digest_alg = Some(alg.to_string());
    record.digest = Some(digest.to_string());
    Ok(())
  }

  async fn get(&self, key: &str) -> Result<Option<AssetRecord>, StoreError> {
    self.ensure_open()?;
    let stored = self.records.read().unwrap_or_else(|e| e.into_inner());
    Ok(stored.get(key).cloned())
  }

  async fn list(&self, prefix: &str, page: Option<Page>) -> Result<Vec<AssetRecord>, StoreError> {
    self.ensure_open()?;
    let stored = self.records.read().unwrap_or_else(|e| e.into_inner());
    let matching = stored
      .range(prefix.to_string()..)
      .take_while(|(key, _)| key.starts_with(prefix))
      .map(|(_, record)| record.clone());

    Ok(match page {
      Some(page) => page.slice(matching),
      None => matching.collect(),
    })
  }

  async fn remove(&self, keys: &[String]) -> Result<(), StoreError> {
    self.ensure_open()?;
    let mut stored = self.records.write().unwrap_or_else(|e| e.into_inner());
    for key in keys {
      stored.remove(key);
    }
    Ok(())
  }

  async fn close(&self) -> Result<(), StoreError> {
    self.closed.store(true, Ordering::Release);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_reserve_is_all_or_nothing() {
    let catalog = MemoryCatalog::new();
    catalog.reserve(&[AssetRecord::new("d/a", 1)]).await.unwrap();

    let result = catalog
      .reserve(&[AssetRecord::new("d/b", 1), AssetRecord::new("d/a", 2)])
      .await;

    assert!(matches!(result, Err(StoreError::Conflict(key)) if key == "d/a"));
    assert!(catalog.get("d/b").await.unwrap().is_none());
    assert_eq!(catalog.get("d/a").await.unwrap().map(|r| r.size), Some(1));
  }

  #[tokio::test]
  async fn test_duplicate_within_batch_conflicts() {
    let catalog = MemoryCatalog::new();
    let result = catalog
      .reserve(&[AssetRecord::new("k", 1), AssetRecord::new("k", 1)])
      .await;
    assert!(matches!(result, Err(StoreError::Conflict(_))));
    assert!(catalog.list("", None).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_list_by_prefix_sorted() {
    let catalog = MemoryCatalog::new();
    catalog
      .reserve(&[
        AssetRecord::new("d2/result", 0),
        AssetRecord::new("d1/node_0/output", 3),
        AssetRecord::new("d1/doc", 2),
        AssetRecord::new("d10/doc", 2),
      ])
      .await
      .unwrap();

    let keys: Vec<String> = catalog
      .list("d1/", None)
      .await
      .unwrap()
      .into_iter()
      .map(|r| r.key)
      .collect();
    assert_eq!(keys, vec!["d1/doc", "d1/node_0/output"]);

    let paged = catalog.list("", Some(Page::new(2, 1))).await.unwrap();
    assert_eq!(paged.len(), 2);
    assert_eq!(paged[0].key, "d10/doc");
  }

  #[tokio::test]
  async fn test_closed_catalog_refuses_operations() {
    let catalog = MemoryCatalog::new();
    catalog.close().await.unwrap();
    assert!(matches!(catalog.get("k").await, Err(StoreError::Closed)));
  }
}
