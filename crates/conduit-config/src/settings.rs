//! Runtime settings for the trigger service.
//!
//! Every field has a default, so an empty JSON object is a valid settings
//! file:
//!
//! ```json
//! { "job_concurrency": 4, "operation_ttl_secs": 3600 }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
  /// Jobs in flight per batch. 1 keeps batches sequential.
  pub job_concurrency: usize,

  /// Per-trigger event buffer. Subscribers lagging further than this lose
  /// the oldest events.
  pub event_buffer: usize,

  /// Reap terminal async operations older than this many seconds.
  /// `None` keeps them until they are removed explicitly.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub operation_ttl_secs: Option<u64>,

  /// Reap workflow memory older than this many seconds.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub memory_ttl_secs: Option<u64>,

  /// How often the reaper looks for expired state.
  pub reap_interval_secs: u64,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      job_concurrency: 1,
      event_buffer: 256,
      operation_ttl_secs: None,
      memory_ttl_secs: None,
      reap_interval_secs: 30,
    }
  }
}

impl Settings {
  /// Load settings from a JSON file and validate them.
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let settings: Settings =
      serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
      })?;
    settings.validate()?;
    Ok(settings)
  }

  /// Check value ranges that serde cannot express.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.job_concurrency == 0 {
      return Err(ConfigError::Invalid {
        field: "job_concurrency",
        message: "must be at least 1".to_string(),
      });
    }
    if self.event_buffer == 0 {
      return Err(ConfigError::Invalid {
        field: "event_buffer",
        message: "must be at least 1".to_string(),
      });
    }
    if self.reap_interval_secs == 0 {
      return Err(ConfigError::Invalid {
        field: "reap_interval_secs",
        message: "must be at least 1".to_string(),
      });
    }
    Ok(())
  }

  pub fn operation_ttl(&self) -> Option<Duration> {
    self.operation_ttl_secs.map(Duration::from_secs)
  }

  pub fn memory_ttl(&self) -> Option<Duration> {
    self.memory_ttl_secs.map(Duration::from_secs)
  }

  pub fn reap_interval(&self) -> Duration {
    Duration::from_secs(self.reap_interval_secs)
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  fn write_settings(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
  }

  #[test]
  fn test_empty_file_uses_defaults() {
    let file = write_settings("{}");
    let settings = Settings::from_file(file.path()).unwrap();
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.operation_ttl(), None);
    assert_eq!(settings.reap_interval(), Duration::from_secs(30));
  }

  #[test]
  fn test_partial_override() {
    let file = write_settings(r#"{ "job_concurrency": 4, "operation_ttl_secs": 60 }"#);
    let settings = Settings::from_file(file.path()).unwrap();
    assert_eq!(settings.job_concurrency, 4);
    assert_eq!(settings.operation_ttl(), Some(Duration::from_secs(60)));
    assert_eq!(settings.event_buffer, 256);
  }

  #[test]
  fn test_unknown_field_rejected() {
    let file = write_settings(r#"{ "jobs": 4 }"#);
    let err = Settings::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
  }

  #[test]
  fn test_zero_concurrency_rejected() {
    let file = write_settings(r#"{ "job_concurrency": 0 }"#);
    let err = Settings::from_file(file.path()).unwrap_err();
    assert!(matches!(
      err,
      ConfigError::Invalid {
        field: "job_concurrency",
        ..
      }
    ));
  }

  #[test]
  fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Settings::from_file(dir.path().join("nope.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
  }
}
