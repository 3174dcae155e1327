use std::io::ErrorKind;
use std::path::PathBuf;

use futures::StreamExt;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use url::Url;

use crate::{ByteStream, Error};

/// Opens caller-supplied asset references as byte streams.
///
/// Supported references are `file://` URIs, bare filesystem paths and
/// `http(s)://` URLs. Anything else is [`Error::UnsupportedSource`].
#[derive(Clone, Default)]
pub struct Sources {
  client: reqwest::Client,
}

impl Sources {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_client(client: reqwest::Client) -> Self {
    Self { client }
  }

  pub async fn open(&self, reference: &str) -> Result<ByteStream, Error> {
    match Url::parse(reference) {
      Ok(url) => match url.scheme() {
        "file" => {
          let path = url
            .to_file_path()
            .map_err(|_| Error::UnsupportedSource(reference.to_string()))?;
          open_file(path).await
        }
        "http" | "https" => self.open_http(url).await,
        _ => Err(Error::UnsupportedSource(reference.to_string())),
      },
      Err(url::ParseError::RelativeUrlWithoutBase) => open_file(PathBuf::from(reference)).await,
      Err(_) => Err(Error::UnsupportedSource(reference.to_string())),
    }
  }

  async fn open_http(&self, url: Url) -> Result<ByteStream, Error> {
    let response = self.client.get(url).send().await?.error_for_status()?;
    let stream = response.bytes_stream().map(|r| r.map_err(Error::Http));
    Ok(Box::pin(stream))
  }
}

async fn open_file(path: PathBuf) -> Result<ByteStream, Error> {
  let file = File::open(&path).await.map_err(|e| {
    if e.kind() == ErrorKind::NotFound {
      Error::NotFound(path.display().to_string())
    } else {
      Error::Io(e)
    }
  })?;
  let stream = ReaderStream::new(file).map(|r| r.map_err(Error::Io));
  Ok(Box::pin(stream))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::read_all;

  #[tokio::test]
  async fn test_open_file_uri_and_bare_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.bin");
    std::fs::write(&path, b"payload").unwrap();

    let sources = Sources::new();
    let uri = Url::from_file_path(&path).unwrap().to_string();

    let from_uri = read_all(sources.open(&uri).await.unwrap()).await.unwrap();
    let from_path = read_all(sources.open(path.to_str().unwrap()).await.unwrap())
      .await
      .unwrap();

    assert_eq!(&from_uri[..], b"payload");
    assert_eq!(from_uri, from_path);
  }

  #[tokio::test]
  async fn test_missing_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let uri = Url::from_file_path(dir.path().join("absent")).unwrap().to_string();

    assert!(matches!(
      Sources::new().open(&uri).await,
      Err(Error::NotFound(_))
    ));
  }

  #[tokio::test]
  async fn test_open_http() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut request = [0u8; 1024];
      let _ = socket.read(&mut request).await.unwrap();
      socket
        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello")
        .await
        .unwrap();
    });

    let stream = Sources::new()
      .open(&format!("http://{addr}/blob"))
      .await
      .unwrap();
    assert_eq!(&read_all(stream).await.unwrap()[..], b"hello");
  }

  #[tokio::test]
  async fn test_unknown_scheme_is_unsupported() {
    assert!(matches!(
      Sources::new().open("s3://bucket/key").await,
      Err(Error::UnsupportedSource(_))
    ));
  }
}
