//! Dispatcher Artifact
//!
//! Blob storage underneath the asset store. The [`Store`] trait is the backend
//! layer: it moves bytes for a key and reports where that key can be fetched
//! from. The asset catalog (sizes, digests, key uniqueness) lives one level up.
//!
//! [`Sources`] opens caller-supplied references (`file://` URIs, bare paths,
//! `http(s)://` URLs) as byte streams so they can be copied into a store.
//!
//! The trait uses async streaming for efficient handling of large files.

mod fs;
mod memory;
mod source;

pub use fs::FsStore;
pub use memory::MemoryStore;
pub use source::Sources;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A boxed stream of bytes for blob data.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

/// Error type for blob storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested blob was not found.
  #[error("blob not found: {0}")]
  NotFound(String),

  /// The key cannot be mapped onto the backend.
  #[error("invalid key {key:?}: {reason}")]
  InvalidKey { key: String, reason: &'static str },

  /// The source reference uses a scheme nothing can fetch.
  #[error("unsupported source: {0}")]
  UnsupportedSource(String),

  /// An I/O error occurred.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),
}

/// Blob storage trait.
///
/// Implementations provide the actual storage backend (filesystem, memory).
/// Keys are `/`-separated relative paths such as `{dispatch_id}/node_0/output`.
#[async_trait]
pub trait Store: Send + Sync {
  /// Retrieve a blob by key.
  ///
  /// Returns a stream of bytes for efficient handling of large files.
  async fn get(&self, key: &str) -> Result<ByteStream, Error>;

  /// Store a blob, replacing any previous content. Returns the number of
  /// bytes written.
  ///
  /// Accepts a stream of bytes for efficient handling of large files.
  async fn put(&self, key: &str, data: ByteStream) -> Result<u64, Error>;

  /// Delete a blob by key.
  async fn delete(&self, key: &str) -> Result<(), Error>;

  /// The dereferenceable location of `key` in this backend.
  fn location(&self, key: &str) -> String;
}

/// A stream over a single in-memory buffer.
pub fn once(data: impl Into<Bytes>) -> ByteStream {
  let data = data.into();
  Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// A stream with no bytes.
pub fn empty() -> ByteStream {
  Box::pin(futures::stream::empty())
}

/// Collect a stream into one buffer.
pub async fn read_all(mut data: ByteStream) -> Result<Bytes, Error> {
  use futures::StreamExt;

  let mut buf = bytes::BytesMut::new();
  while let Some(chunk) = data.next().await {
    buf.extend_from_slice(&chunk?);
  }
  Ok(buf.freeze())
}

/// Check that a key is a plain relative path with no `.`/`..` segments.
pub fn validate_key(key: &str) -> Result<(), Error> {
  let invalid = |reason| {
    Err(Error::InvalidKey {
      key: key.to_string(),
      reason,
    })
  };

  if key.is_empty() {
    return invalid("empty");
  }
  if key.starts_with('/') || key.contains('\\') {
    return invalid("must be a relative path");
  }
  if key
    .split('/')
    .any(|segment| segment.is_empty() || segment == "." || segment == "..")
  {
    return invalid("empty or relative path segment");
  }
  Ok(())
}
