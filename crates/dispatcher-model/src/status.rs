use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Execution status reported for a dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
  #[default]
  NewObject,
  Starting,
  Running,
  Dispatching,
  Completed,
  Failed,
}

impl DispatchStatus {
  pub const ALL: [DispatchStatus; 6] = [
    Self::NewObject,
    Self::Starting,
    Self::Running,
    Self::Dispatching,
    Self::Completed,
    Self::Failed,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::NewObject => "NEW_OBJECT",
      Self::Starting => "STARTING",
      Self::Running => "RUNNING",
      Self::Dispatching => "DISPATCHING",
      Self::Completed => "COMPLETED",
      Self::Failed => "FAILED",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Completed | Self::Failed)
  }

  /// Apply a status update. Once terminal, a dispatch keeps its status.
  pub fn transition(self, next: DispatchStatus) -> Result<DispatchStatus, ModelError> {
    if self.is_terminal() && self != next {
      return Err(ModelError::IllegalStatus {
        from: self.to_string(),
        to: next.to_string(),
      });
    }
    Ok(next)
  }
}

impl fmt::Display for DispatchStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for DispatchStatus {
  type Err = ModelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|status| status.as_str() == s)
      .ok_or_else(|| ModelError::UnknownStatus(s.to_string()))
  }
}
