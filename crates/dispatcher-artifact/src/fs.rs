use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::{ByteStream, Error, Store, validate_key};

/// Filesystem-based blob store.
///
/// Stores blobs as files on the local filesystem. Each blob is stored at
/// `{base_path}/{key}` and is reachable as `file://{base_path}/{key}`.
/// Parent directories are created automatically.
pub struct FsStore {
  base_path: PathBuf,
}

impl FsStore {
  /// Create a new filesystem store with the given base path.
  ///
  /// Relative paths are resolved against the current directory so that
  /// locations stay absolute.
  pub fn new(base_path: impl Into<PathBuf>) -> Self {
    let base_path = base_path.into();
    Self {
      base_path: std::path::absolute(&base_path).unwrap_or(base_path),
    }
  }

  pub fn base_path(&self) -> &Path {
    &self.base_path
  }

  fn key_to_path(&self, key: &str) -> Result<PathBuf, Error> {
    validate_key(key)?;
    Ok(self.base_path.join(key))
  }
}

/// Removes the `.partial` file it guards when dropped, unless the write was
/// committed. Covers errors as well as a `put` future dropped mid-stream.
struct PartialFile {
  path: PathBuf,
  committed: bool,
}

impl PartialFile {
  fn new(path: PathBuf) -> Self {
    Self {
      path,
      committed: false,
    }
  }

  async fn commit(mut self, target: &Path) -> Result<(), Error> {
    fs::rename(&self.path, target).await?;
    self.committed = true;
    Ok(())
  }
}

impl Drop for PartialFile {
  fn drop(&mut self) {
    if !self.committed {
      let _ = std::fs::remove_file(&self.path);
    }
  }
}

fn not_found(key: &str) -> impl FnOnce(std::io::Error) -> Error + '_ {
  move |e| {
    if e.kind() == ErrorKind::NotFound {
      Error::NotFound(key.to_string())
    } else {
      Error::Io(e)
    }
  }
}

#[async_trait]
impl Store for FsStore {
  async fn get(&self, key: &str) -> Result<ByteStream, Error> {
    let path = self.key_to_path(key)?;
    let file = File::open(&path).await.map_err(not_found(key))?;
    let stream = ReaderStream::new(file).map(|r| r.map_err(Error::Io));
    Ok(Box::pin(stream))
  }

  async fn put(&self, key: &str, data: ByteStream) -> Result<u64, Error> {
    let path = self.key_to_path(key)?;

    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).await?;
    }

    // Readers never see a half-written file.
    let mut partial = path.clone().into_os_string();
    partial.push(".partial");
    let partial = PartialFile::new(PathBuf::from(partial));

    let mut file = File::create(&partial.path).await?;
    let mut stream = std::pin::pin!(data);
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
      let bytes = chunk?;
      file.write_all(&bytes).await?;
      written += bytes.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    partial.commit(&path).await?;
    Ok(written)
  }

  async fn delete(&self, key: &str) -> Result<(), Error> {
    let path = self.key_to_path(key)?;
    fs::remove_file(&path).await.map_err(not_found(key))
  }

  fn location(&self, key: &str) -> String {
    format!("file://{}", self.base_path.join(key).display())
  }
}
