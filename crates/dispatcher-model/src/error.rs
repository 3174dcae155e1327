use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
  #[error("end_time is set but start_time is null")]
  EndWithoutStart,

  #[error("end_time {end} precedes start_time {start}")]
  EndBeforeStart { start: String, end: String },

  #[error("illegal lifecycle transition: {from} -> {to}")]
  IllegalTransition { from: String, to: String },

  #[error("unknown dispatch status: {0}")]
  UnknownStatus(String),

  #[error("illegal status change: {from} -> {to}")]
  IllegalStatus { from: String, to: String },
}
