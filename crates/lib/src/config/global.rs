use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ConfigError;
use crate::consts::ENV_PREFIX;
use crate::platform::paths::global_config_path;

/// Parallel builds when nothing else is configured.
pub const DEFAULT_CONCURRENCY: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
  pub default: String,
}

impl Default for RegistrySettings {
  fn default() -> Self {
    Self {
      default: "ghcr.io".to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
  pub default_arch: Vec<String>,
  pub concurrency: usize,
  /// Upper bound for a whole build invocation, in humantime syntax ("2h", "90m").
  pub timeout: String,
  /// Docker-compatible CLI used by the container backend.
  pub docker_binary: String,
}

impl Default for BuildSettings {
  fn default() -> Self {
    Self {
      default_arch: vec!["amd64".to_string()],
      concurrency: DEFAULT_CONCURRENCY,
      timeout: "2h".to_string(),
      docker_binary: "docker".to_string(),
    }
  }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSettings {
  pub region: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
  pub level: String,
}

impl Default for LogSettings {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
    }
  }
}

/// User-level defaults read from `config.yaml` and `WARPGATE_*` environment variables.
///
/// Precedence: environment > file > built-in defaults.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
  pub registry: RegistrySettings,
  pub build: BuildSettings,
  pub aws: AwsSettings,
  pub log: LogSettings,
}

impl GlobalConfig {
  /// Load from the default location. A missing file yields defaults.
  pub fn load() -> Result<Self, ConfigError> {
    Self::load_from_path(&global_config_path())
  }

  /// Load from an explicit path. A missing file yields defaults; a malformed one is an error.
  pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
    let mut config = match std::fs::read_to_string(path) {
      Ok(content) if content.trim().is_empty() => GlobalConfig::default(),
      Ok(content) => serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
      })?,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "no global config file, using defaults");
        GlobalConfig::default()
      }
      Err(source) => {
        return Err(ConfigError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };

    config.apply_env()?;
    Ok(config)
  }

  /// Apply `WARPGATE_*` environment overrides.
  pub fn apply_env(&mut self) -> Result<(), ConfigError> {
    if let Some(value) = env_value("REGISTRY_DEFAULT") {
      self.registry.default = value;
    }
    if let Some(value) = env_value("BUILD_DEFAULT_ARCH") {
      self.build.default_arch = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    }
    if let Some(value) = env_value("BUILD_CONCURRENCY") {
      self.build.concurrency = value.parse().map_err(|_| ConfigError::InvalidValue {
        var: format!("{}_BUILD_CONCURRENCY", ENV_PREFIX),
        value,
      })?;
    }
    if let Some(value) = env_value("BUILD_TIMEOUT") {
      self.build.timeout = value;
    }
    if let Some(value) = env_value("BUILD_DOCKER_BINARY") {
      self.build.docker_binary = value;
    }
    if let Some(value) = env_value("AWS_REGION") {
      self.aws.region = value;
    }
    if let Some(value) = env_value("LOG_LEVEL") {
      self.log.level = value;
    }
    Ok(())
  }

  /// Configured build concurrency, or [`DEFAULT_CONCURRENCY`] when unset or zero.
  pub fn concurrency(&self) -> usize {
    if self.build.concurrency > 0 {
      self.build.concurrency
    } else {
      DEFAULT_CONCURRENCY
    }
  }

  /// Parsed `build.timeout`; `None` when empty.
  pub fn timeout(&self) -> Result<Option<Duration>, ConfigError> {
    if self.build.timeout.trim().is_empty() {
      return Ok(None);
    }
    humantime::parse_duration(self.build.timeout.trim())
      .map(Some)
      .map_err(|_| ConfigError::InvalidValue {
        var: "build.timeout".to_string(),
        value: self.build.timeout.clone(),
      })
  }
}

fn env_value(key: &str) -> Option<String> {
  std::env::var(format!("{}_{}", ENV_PREFIX, key))
    .ok()
    .filter(|v| !v.is_empty())
}
