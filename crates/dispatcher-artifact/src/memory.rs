use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{ByteStream, Error, Store, once, read_all, validate_key};

/// In-memory blob store for tests and ephemeral servers.
///
/// Blobs are reachable as `memory://{key}`.
#[derive(Default)]
pub struct MemoryStore {
  blobs: RwLock<HashMap<String, Bytes>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.blobs.read().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn contains(&self, key: &str) -> bool {
    self
      .blobs
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .contains_key(key)
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn get(&self, key: &str) -> Result<ByteStream, Error> {
    let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
    let data = blobs
      .get(key)
      .cloned()
      .ok_or_else(|| Error::NotFound(key.to_string()))?;
    Ok(once(data))
  }

  async fn put(&self, key: &str, data: ByteStream) -> Result<u64, Error> {
    validate_key(key)?;
    let data = read_all(data).await?;
    let written = data.len() as u64;
    self
      .blobs
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .insert(key.to_string(), data);
    Ok(written)
  }

  async fn delete(&self, key: &str) -> Result<(), Error> {
    self
      .blobs
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .remove(key)
      .map(|_| ())
      .ok_or_else(|| Error::NotFound(key.to_string()))
  }

  fn location(&self, key: &str) -> String {
    format!("memory://{key}")
  }
}
