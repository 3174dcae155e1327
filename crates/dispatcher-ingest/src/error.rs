use std::fmt;

use dispatcher_model::ModelError;
use dispatcher_store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One structural problem in a submitted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationDetail {
  /// Path into the document, e.g. `lattice.transport_graph.links[3]`.
  pub location: String,
  pub attr: String,
  pub detail: String,
}

impl ValidationDetail {
  pub fn new(
    location: impl Into<String>,
    attr: impl Into<String>,
    detail: impl Into<String>,
  ) -> Self {
    Self {
      location: location.into(),
      attr: attr.into(),
      detail: detail.into(),
    }
  }
}

impl fmt::Display for ValidationDetail {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.attr.is_empty() {
      write!(f, "{}: {}", self.location, self.detail)
    } else {
      write!(f, "{}.{}: {}", self.location, self.attr, self.detail)
    }
  }
}

/// A rejected document. Always carries at least one detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationError {
  pub details: Vec<ValidationDetail>,
}

impl ValidationError {
  pub fn single(detail: ValidationDetail) -> Self {
    Self {
      details: vec![detail],
    }
  }
}

impl fmt::Display for ValidationError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("validation failed")?;
    for (i, detail) in self.details.iter().enumerate() {
      let sep = if i == 0 { ": " } else { "; " };
      write!(f, "{sep}{detail}")?;
    }
    Ok(())
  }
}

/// Errors surfaced by the dispatcher's operations.
#[derive(Debug, Error)]
pub enum IngestError {
  /// Structurally invalid input. Nothing was written.
  #[error(transparent)]
  Validation(#[from] ValidationError),

  /// An asset key or dispatch id already exists.
  #[error("conflict: {0} already exists")]
  Conflict(String),

  #[error("not found: {0}")]
  NotFound(String),

  /// Materialization or backend failure. Nothing was committed.
  #[error("storage error: {0}")]
  Storage(#[source] StoreError),

  /// Ingestion was cancelled before its commit point.
  #[error("ingestion cancelled")]
  Cancelled,

  #[error("ingestion task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

impl IngestError {
  /// The HTTP status a transport layer should answer with.
  pub fn status_code(&self) -> u16 {
    match self {
      Self::Validation(_) => 422,
      Self::Conflict(_) => 409,
      Self::NotFound(_) => 404,
      Self::Cancelled => 499,
      Self::Storage(_) | Self::Join(_) => 500,
    }
  }
}

impl From<StoreError> for IngestError {
  fn from(e: StoreError) -> Self {
    match e {
      StoreError::Conflict(key) => Self::Conflict(key),
      StoreError::NotFound(key) => Self::NotFound(key),
      StoreError::InvalidAsset { key, reason } => {
        Self::Validation(ValidationError::single(ValidationDetail::new(
          "assets", key, reason,
        )))
      }
      StoreError::Lifecycle(e) => {
        let attr = match &e {
          ModelError::UnknownStatus(_) | ModelError::IllegalStatus { .. } => "status",
          _ => "lifecycle",
        };
        Self::Validation(ValidationError::single(ValidationDetail::new(
          "metadata",
          attr,
          e.to_string(),
        )))
      }
      e => Self::Storage(e),
    }
  }
}
