use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dispatcher_model::{DispatchMetadata, DispatchStatus, Lifecycle, Manifest};

use crate::{DispatchFilter, DispatchStore, StoreError};

struct Entry {
  manifest: Manifest,
  seq: u64,
}

#[derive(Default)]
struct Inner {
  dispatches: HashMap<String, Entry>,
  next_seq: u64,
}

/// In-memory dispatch store for tests and ephemeral servers.
///
/// All operations take the lock for their whole duration, so a delete is
/// visible to every read that starts after it returns.
#[derive(Default)]
pub struct MemoryDispatchStore {
  inner: RwLock<Inner>,
  closed: AtomicBool,
}

impl MemoryDispatchStore {
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
impl DispatchStore for MemoryDispatchStore {
  async fn create(&self, manifest: &Manifest) -> Result<Manifest, StoreError> {
    self.ensure_open()?;
    let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

    let dispatch_id = manifest.dispatch_id().to_string();
    if inner.dispatches.contains_key(&dispatch_id) {
      return Err(StoreError::Conflict(dispatch_id));
    }

    let seq = inner.next_seq;
    inner.next_seq += 1;
    inner.dispatches.insert(
      dispatch_id,
      Entry {
        manifest: manifest.clone(),
        seq,
      },
    );
    Ok(manifest.clone())
  }

  async fn get(&self, dispatch_id: &str) -> Result<Option<Manifest>, StoreError> {
    self.ensure_open()?;
    let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
    Ok(inner.dispatches.get(dispatch_id).map(|e| e.manifest.clone()))
  }

  async fn list(&self, filter: &DispatchFilter) -> Result<Vec<DispatchMetadata>, StoreError> {
    self.ensure_open()?;
    let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());

    let mut entries: Vec<&Entry> = match &filter.dispatch_id {
      Some(id) => inner.dispatches.get(id).into_iter().collect(),
      None => inner.dispatches.values().collect(),
    };
    entries.sort_by(|a, b| b.seq.cmp(&a.seq));

    Ok(
      filter
        .page
        .slice(entries)
        .into_iter()
        .map(|e| e.manifest.metadata.clone())
        .collect(),
    )
  }

  async fn delete(&self, dispatch_id: &str) -> Result<Option<Manifest>, StoreError> {
    self.ensure_open()?;
    let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
    Ok(inner.dispatches.remove(dispatch_id).map(|e| e.manifest))
  }

  async fn update_lifecycle(
    &self,
    dispatch_id: &str,
    lifecycle: Lifecycle,
    status: Option<DispatchStatus>,
  ) -> Result<DispatchMetadata, StoreError> {
    self.ensure_open()?;
    let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
    let entry = inner
      .dispatches
      .get_mut(dispatch_id)
      .ok_or_else(|| StoreError::NotFound(dispatch_id.to_string()))?;

    let metadata = &mut entry.manifest.metadata;
    let lifecycle = metadata.lifecycle.transition(lifecycle)?;
    let status = match status {
      Some(status) => metadata.status.transition(status)?,
      None => metadata.status,
    };
    metadata.lifecycle = lifecycle;
    metadata.status = status;
    Ok(metadata.clone())
  }

  async fn close(&self) -> Result<(), StoreError> {
    self.closed.store(true, Ordering::Release);
    Ok(())
  }
}
