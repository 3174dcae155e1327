use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dispatcher_store::{MaterializePolicy, Page};

pub const ENV_DATA_DIR: &str = "DISPATCHER_DATA_DIR";
pub const ENV_DATABASE_URL: &str = "DISPATCHER_DATABASE_URL";
pub const ENV_MATERIALIZE_TIMEOUT_MS: &str = "DISPATCHER_MATERIALIZE_TIMEOUT_MS";
pub const ENV_MATERIALIZE_RETRIES: &str = "DISPATCHER_MATERIALIZE_RETRIES";
pub const ENV_PAGE_SIZE: &str = "DISPATCHER_PAGE_SIZE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("invalid {var}={value:?}: {reason}")]
  Invalid {
    var: &'static str,
    value: String,
    reason: String,
  },

  #[error("could not determine a data directory; set {ENV_DATA_DIR}")]
  NoDataDir,
}

/// Runtime configuration for a durable dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
  /// Holds `dispatcher.db` and the `assets/` blob directory.
  pub data_dir: PathBuf,
  /// Overrides the database location under `data_dir`.
  pub database_url: Option<String>,
  pub materialize_timeout: Duration,
  pub materialize_retries: u32,
  pub retry_backoff: Duration,
  /// Default number of records per listing page.
  pub page_size: u32,
}

impl Config {
  pub fn new(data_dir: impl Into<PathBuf>) -> Self {
    let policy = MaterializePolicy::default();
    Self {
      data_dir: data_dir.into(),
      database_url: None,
      materialize_timeout: policy.timeout,
      materialize_retries: policy.retries,
      retry_backoff: policy.backoff,
      page_size: Page::DEFAULT_COUNT,
    }
  }

  /// Load from `DISPATCHER_*` environment variables. The data directory
  /// defaults to `~/.dispatcher`.
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_env_with(None)
  }

  /// Like [`Config::from_env`], with an explicit data directory (such as a
  /// command-line flag) taking precedence over the environment and the home
  /// directory.
  pub fn from_env_with(data_dir: Option<PathBuf>) -> Result<Self, ConfigError> {
    Self::from_lookup_with(data_dir, |var| std::env::var(var).ok())
  }

  /// Load from an arbitrary variable lookup.
  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
    Self::from_lookup_with(None, lookup)
  }

  pub fn from_lookup_with(
    data_dir: Option<PathBuf>,
    lookup: impl Fn(&str) -> Option<String>,
  ) -> Result<Self, ConfigError> {
    let data_dir = match (data_dir, lookup(ENV_DATA_DIR)) {
      (Some(dir), _) => dir,
      (None, Some(dir)) if !dir.is_empty() => PathBuf::from(dir),
      (None, _) => dirs::home_dir()
        .ok_or(ConfigError::NoDataDir)?
        .join(".dispatcher"),
    };

    let mut config = Self::new(data_dir);
    config.database_url = lookup(ENV_DATABASE_URL).filter(|url| !url.is_empty());

    if let Some(ms) = parse::<u64>(&lookup, ENV_MATERIALIZE_TIMEOUT_MS)? {
      if ms == 0 {
        return Err(invalid(ENV_MATERIALIZE_TIMEOUT_MS, ms.to_string(), "must be positive"));
      }
      config.materialize_timeout = Duration::from_millis(ms);
    }
    if let Some(retries) = parse::<u32>(&lookup, ENV_MATERIALIZE_RETRIES)? {
      config.materialize_retries = retries;
    }
    if let Some(size) = parse::<u32>(&lookup, ENV_PAGE_SIZE)? {
      if size == 0 {
        return Err(invalid(ENV_PAGE_SIZE, size.to_string(), "must be positive"));
      }
      config.page_size = size;
    }

    Ok(config)
  }

  pub fn database_url(&self) -> String {
    self.database_url.clone().unwrap_or_else(|| {
      format!(
        "sqlite://{}?mode=rwc",
        self.data_dir.join("dispatcher.db").display()
      )
    })
  }

  pub fn assets_dir(&self) -> PathBuf {
    self.data_dir.join("assets")
  }

  pub fn policy(&self) -> MaterializePolicy {
    MaterializePolicy {
      timeout: self.materialize_timeout,
      retries: self.materialize_retries,
      backoff: self.retry_backoff,
    }
  }
}

fn invalid(var: &'static str, value: String, reason: impl Into<String>) -> ConfigError {
  ConfigError::Invalid {
    var,
    value,
    reason: reason.into(),
  }
}

fn parse<T>(lookup: impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  match lookup(var) {
    None => Ok(None),
    Some(value) => value
      .trim()
      .parse()
      .map(Some)
      .map_err(|e: T::Err| invalid(var, value.clone(), e.to_string())),
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;

  fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |var| vars.get(var).cloned()
  }

  #[test]
  fn test_defaults() {
    let config = Config::from_lookup(lookup(&[(ENV_DATA_DIR, "/srv/dispatcher")])).unwrap();

    assert_eq!(config.data_dir, PathBuf::from("/srv/dispatcher"));
    assert_eq!(config.materialize_timeout, Duration::from_secs(30));
    assert_eq!(config.materialize_retries, 2);
    assert_eq!(config.page_size, 10);
    assert_eq!(
      config.database_url(),
      "sqlite:///srv/dispatcher/dispatcher.db?mode=rwc"
    );
    assert_eq!(config.assets_dir(), PathBuf::from("/srv/dispatcher/assets"));
  }

  #[test]
  fn test_overrides() {
    let config = Config::from_lookup(lookup(&[
      (ENV_DATA_DIR, "/data"),
      (ENV_DATABASE_URL, "sqlite::memory:"),
      (ENV_MATERIALIZE_TIMEOUT_MS, "1500"),
      (ENV_MATERIALIZE_RETRIES, "0"),
      (ENV_PAGE_SIZE, "25"),
    ]))
    .unwrap();

    assert_eq!(config.database_url(), "sqlite::memory:");
    assert_eq!(config.policy().timeout, Duration::from_millis(1500));
    assert_eq!(config.policy().retries, 0);
    assert_eq!(config.page_size, 25);
  }

  #[test]
  fn test_explicit_data_dir_wins() {
    let config = Config::from_lookup_with(
      Some(PathBuf::from("/flag")),
      lookup(&[(ENV_DATA_DIR, "/env"), (ENV_PAGE_SIZE, "5")]),
    )
    .unwrap();
    assert_eq!(config.data_dir, PathBuf::from("/flag"));
    assert_eq!(config.page_size, 5);

    // No environment data dir: the explicit one is used without consulting
    // the home directory.
    let config = Config::from_lookup_with(Some(PathBuf::from("/flag")), lookup(&[])).unwrap();
    assert_eq!(config.data_dir, PathBuf::from("/flag"));
  }

  #[test]
  fn test_invalid_values() {
    let not_a_number = Config::from_lookup(lookup(&[
      (ENV_DATA_DIR, "/data"),
      (ENV_MATERIALIZE_RETRIES, "many"),
    ]));
    assert!(matches!(
      not_a_number,
      Err(ConfigError::Invalid { var: ENV_MATERIALIZE_RETRIES, .. })
    ));

    let zero_page = Config::from_lookup(lookup(&[(ENV_DATA_DIR, "/data"), (ENV_PAGE_SIZE, "0")]));
    assert!(matches!(zero_page, Err(ConfigError::Invalid { .. })));
  }
}
