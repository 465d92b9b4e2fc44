//! Template and global configuration.
//!
//! - [`BuildConfig`]: the declarative description of one image, loaded from a YAML template
//! - [`GlobalConfig`]: user-level defaults (registry, architectures, concurrency, region)

mod global;
mod template;

use std::path::PathBuf;

use thiserror::Error;

pub use global::{AwsSettings, BuildSettings, DEFAULT_CONCURRENCY, GlobalConfig, LogSettings, RegistrySettings};
pub use template::{ArchOverride, BaseImage, BuildConfig, Metadata, Provisioner, Target, TargetType};

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("invalid value for {var}: {value}")]
  InvalidValue { var: String, value: String },

  #[error("invalid template: {0}")]
  Invalid(String),
}
