use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Version used when neither the template nor its metadata sets one.
pub const DEFAULT_VERSION: &str = "latest";

/// Kind of deployment target a template declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
  Container,
  Ami,
}

impl TargetType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Container => "container",
      Self::Ami => "ami",
    }
  }
}

impl fmt::Display for TargetType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for TargetType {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "container" => Ok(Self::Container),
      "ami" => Ok(Self::Ami),
      other => Err(ConfigError::InvalidValue {
        var: "target type".to_string(),
        value: other.to_string(),
      }),
    }
  }
}

/// Descriptive template metadata. Carried into the build manifest.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
  pub name: String,
  pub version: String,
  pub description: String,
  pub author: String,
  pub license: String,
  pub tags: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseImage {
  pub image: String,
  #[serde(skip_serializing_if = "String::is_empty")]
  pub platform: String,
  pub pull: bool,
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub env: BTreeMap<String, String>,
}

/// One provisioning step. Only the fields of the step's `type` are meaningful.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Provisioner {
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub inline: Vec<String>,
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub environment: BTreeMap<String, String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub scripts: Vec<String>,
  #[serde(skip_serializing_if = "String::is_empty")]
  pub working_dir: String,
  #[serde(skip_serializing_if = "String::is_empty")]
  pub user: String,
}

impl Provisioner {
  /// A `shell` provisioner running the given inline commands.
  pub fn shell<I, S>(commands: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      kind: "shell".to_string(),
      inline: commands.into_iter().map(Into::into).collect(),
      ..Default::default()
    }
  }
}

/// A deployment target: container platforms or an AMI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
  #[serde(rename = "type")]
  pub kind: TargetType,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub platforms: Vec<String>,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub registry: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub tags: Vec<String>,
  #[serde(default)]
  pub push: bool,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub region: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub instance_type: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub ami_name: String,
}

impl Target {
  pub fn container<I, S>(platforms: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      kind: TargetType::Container,
      platforms: platforms.into_iter().map(Into::into).collect(),
      registry: String::new(),
      tags: Vec::new(),
      push: false,
      region: String::new(),
      instance_type: String::new(),
      ami_name: String::new(),
    }
  }

  pub fn ami(region: &str) -> Self {
    Self {
      kind: TargetType::Ami,
      region: region.to_string(),
      ..Self::container(Vec::<String>::new())
    }
  }
}

/// Per-architecture replacement of the base image and/or provisioners.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchOverride {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub base: Option<BaseImage>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub provisioners: Vec<Provisioner>,
  /// Append `provisioners` after the template's list instead of replacing it.
  pub append_provisioners: bool,
}

/// The declarative description of one image to build.
///
/// Constructed once per invocation from a template plus CLI input. Specialised per
/// architecture by cloning, never by mutating a shared instance.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
  pub metadata: Metadata,
  pub name: String,
  pub version: String,
  pub base: BaseImage,
  pub provisioners: Vec<Provisioner>,
  pub targets: Vec<Target>,
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub arch_overrides: BTreeMap<String, ArchOverride>,

  // Usually supplied at runtime by the override resolver.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub architectures: Vec<String>,
  #[serde(skip_serializing_if = "String::is_empty")]
  pub registry: String,
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub labels: BTreeMap<String, String>,
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub build_args: BTreeMap<String, String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub cache_from: Vec<String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub cache_to: Vec<String>,
  pub no_cache: bool,
}

impl BuildConfig {
  /// Parse a template from YAML text.
  pub fn from_yaml(content: &str, origin: &Path) -> Result<Self, ConfigError> {
    let mut config: BuildConfig = serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
      path: origin.to_path_buf(),
      source,
    })?;
    if config.name.is_empty() {
      config.name = config.metadata.name.clone();
    }
    if config.version.is_empty() {
      config.version = if config.metadata.version.is_empty() {
        DEFAULT_VERSION.to_string()
      } else {
        config.metadata.version.clone()
      };
    }
    config.validate()?;
    Ok(config)
  }

  /// Load and validate a template file.
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_yaml(&content, path)
  }

  /// Check the fields every build needs.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.name.is_empty() {
      return Err(ConfigError::Invalid("name is required".to_string()));
    }
    if self.base.image.is_empty() {
      return Err(ConfigError::Invalid("base.image is required".to_string()));
    }
    Ok(())
  }

  /// First target of the given type.
  pub fn find_target(&self, kind: TargetType) -> Option<&Target> {
    self.targets.iter().find(|t| t.kind == kind)
  }
}
