use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::ModelError;

/// Execution lifecycle of a dispatch.
///
/// On the wire this is a pair of nullable `start_time`/`end_time` fields.
/// Internally the three states make "ended but never started" unrepresentable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Lifecycle {
  #[default]
  NotStarted,
  Started {
    start_time: DateTime<Utc>,
  },
  Finished {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
  },
}

impl Lifecycle {
  /// Build a lifecycle from the nullable wire timestamps.
  pub fn from_times(
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
  ) -> Result<Self, ModelError> {
    match (start_time, end_time) {
      (None, None) => Ok(Self::NotStarted),
      (Some(start_time), None) => Ok(Self::Started { start_time }),
      (Some(start_time), Some(end_time)) if end_time >= start_time => Ok(Self::Finished {
        start_time,
        end_time,
      }),
      (Some(start_time), Some(end_time)) => Err(ModelError::EndBeforeStart {
        start: start_time.to_rfc3339(),
        end: end_time.to_rfc3339(),
      }),
      (None, Some(_)) => Err(ModelError::EndWithoutStart),
    }
  }

  pub fn start_time(&self) -> Option<DateTime<Utc>> {
    match self {
      Self::NotStarted => None,
      Self::Started { start_time } | Self::Finished { start_time, .. } => Some(*start_time),
    }
  }

  pub fn end_time(&self) -> Option<DateTime<Utc>> {
    match self {
      Self::Finished { end_time, .. } => Some(*end_time),
      _ => None,
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      Self::NotStarted => "not_started",
      Self::Started { .. } => "started",
      Self::Finished { .. } => "finished",
    }
  }

  /// Apply a lifecycle update written by the execution engine.
  ///
  /// Lifecycles only move forward and a recorded start time never changes.
  /// Re-applying the current state is accepted.
  pub fn transition(self, next: Lifecycle) -> Result<Lifecycle, ModelError> {
    if self == next {
      return Ok(next);
    }

    let allowed = match (self, next) {
      (Self::NotStarted, Self::Started { .. } | Self::Finished { .. }) => true,
      (Self::Started { start_time }, Self::Finished { start_time: s, .. }) => start_time == s,
      _ => false,
    };

    if allowed {
      Ok(next)
    } else {
      Err(ModelError::IllegalTransition {
        from: self.to_string(),
        to: next.to_string(),
      })
    }
  }
}

impl fmt::Display for Lifecycle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}
