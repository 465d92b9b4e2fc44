use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::build::BuildResult;
use crate::config::BuildConfig;
use crate::consts::VERSION;

/// Build type recorded for results carrying an AMI ID.
pub const BUILD_TYPE_AMI: &str = "ami";
/// Build type recorded for every other result.
pub const BUILD_TYPE_CONTAINER: &str = "container";

/// The persisted record of one build invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildManifest {
  pub template: String,
  pub version: String,
  /// UTC, millisecond precision.
  pub timestamp: DateTime<Utc>,
  /// Total wall time, e.g. "1m30.5s".
  pub duration: String,
  pub builds: Vec<ManifestBuild>,
  /// Multi-arch manifest list, when one was created.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub manifest: Option<ManifestRef>,
  pub pushed: bool,
  pub warpgate_version: String,
}

/// Summary of one build inside a [`BuildManifest`].
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestBuild {
  /// `"ami"` or `"container"`.
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub platform: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub architecture: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub image_ref: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub digest: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub ami_id: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub region: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub duration: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRef {
  #[serde(rename = "ref")]
  pub reference: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub digest: String,
}

impl From<&BuildResult> for ManifestBuild {
  fn from(result: &BuildResult) -> Self {
    let kind = if result.ami_id.is_empty() {
      BUILD_TYPE_CONTAINER
    } else {
      BUILD_TYPE_AMI
    };

    Self {
      kind: kind.to_string(),
      platform: result.platform.clone(),
      architecture: result.architecture.clone(),
      image_ref: result.image_ref.clone(),
      digest: result.digest.clone(),
      ami_id: result.ami_id.clone(),
      region: result.region.clone(),
      duration: result.duration.clone(),
      notes: result.notes.clone(),
    }
  }
}

impl BuildManifest {
  /// Aggregate `results` into a manifest stamped with the current time.
  ///
  /// Template name and version come from the template metadata, falling back to the
  /// config's own name and version.
  pub fn new(config: &BuildConfig, results: &[BuildResult], duration: Duration) -> Self {
    let template = if config.metadata.name.is_empty() {
      config.name.clone()
    } else {
      config.metadata.name.clone()
    };
    let version = if config.metadata.version.is_empty() {
      config.version.clone()
    } else {
      config.metadata.version.clone()
    };

    Self {
      template,
      version,
      timestamp: Utc::now().trunc_subsecs(3),
      duration: format_duration(duration),
      builds: results.iter().map(ManifestBuild::from).collect(),
      manifest: None,
      pushed: false,
      warpgate_version: VERSION.to_string(),
    }
  }
}

/// Format a duration the way Go's `time.Duration` prints, rounded to milliseconds.
///
/// `0s`, `250ms`, `1.5s`, `1m30.5s`, `1h0m0s`.
pub fn format_duration(duration: Duration) -> String {
  let millis = (duration.as_nanos() + 500_000) / 1_000_000;
  if millis == 0 {
    return "0s".to_string();
  }
  if millis < 1000 {
    return format!("{millis}ms");
  }

  let hours = millis / 3_600_000;
  let minutes = (millis / 60_000) % 60;
  let seconds = (millis / 1000) % 60;
  let fraction = millis % 1000;

  let mut out = String::new();
  if hours > 0 {
    out.push_str(&format!("{hours}h"));
  }
  if hours > 0 || minutes > 0 {
    out.push_str(&format!("{minutes}m"));
  }
  out.push_str(&seconds.to_string());
  if fraction > 0 {
    let fraction = format!("{fraction:03}");
    out.push('.');
    out.push_str(fraction.trim_end_matches('0'));
  }
  out.push('s');
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  fn result(arch: &str, ami_id: &str) -> BuildResult {
    BuildResult {
      image_ref: format!("myimage:{arch}"),
      digest: "sha256:abc".to_string(),
      architecture: arch.to_string(),
      platform: format!("linux/{arch}"),
      ami_id: ami_id.to_string(),
      duration: "12s".to_string(),
      notes: vec!["note".to_string()],
      ..Default::default()
    }
  }

  #[test]
  fn classifies_build_types() {
    let config = BuildConfig {
      name: "myimage".to_string(),
      version: "1.0.0".to_string(),
      ..Default::default()
    };
    let results = [result("amd64", ""), result("arm64", "ami-0abc")];

    let manifest = BuildManifest::new(&config, &results, Duration::from_secs(5));

    assert_eq!(manifest.builds.len(), 2);
    assert_eq!(manifest.builds[0].kind, BUILD_TYPE_CONTAINER);
    assert_eq!(manifest.builds[1].kind, BUILD_TYPE_AMI);
    assert_eq!(manifest.builds[0].platform, "linux/amd64");
    assert_eq!(manifest.builds[0].notes, ["note"]);
    assert_eq!(manifest.duration, "5s");
    assert!(!manifest.pushed);
    assert_eq!(manifest.warpgate_version, VERSION);
  }

  #[test]
  fn template_prefers_metadata() {
    let mut config = BuildConfig {
      name: "runtime-name".to_string(),
      version: "latest".to_string(),
      ..Default::default()
    };
    let manifest = BuildManifest::new(&config, &[], Duration::ZERO);
    assert_eq!(manifest.template, "runtime-name");
    assert_eq!(manifest.version, "latest");

    config.metadata.name = "template-name".to_string();
    config.metadata.version = "2.1.0".to_string();
    let manifest = BuildManifest::new(&config, &[], Duration::ZERO);
    assert_eq!(manifest.template, "template-name");
    assert_eq!(manifest.version, "2.1.0");
  }

  #[test]
  fn timestamp_has_millisecond_precision() {
    let manifest = BuildManifest::new(&BuildConfig::default(), &[], Duration::ZERO);
    assert_eq!(manifest.timestamp.timestamp_subsec_nanos() % 1_000_000, 0);
  }

  #[test]
  fn formats_durations_like_go() {
    assert_eq!(format_duration(Duration::ZERO), "0s");
    assert_eq!(format_duration(Duration::from_micros(400)), "0s");
    assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
    assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
    assert_eq!(format_duration(Duration::from_millis(1234)), "1.234s");
    assert_eq!(format_duration(Duration::from_millis(90_500)), "1m30.5s");
    assert_eq!(format_duration(Duration::from_secs(3600)), "1h0m0s");
    assert_eq!(format_duration(Duration::from_secs(3725)), "1h2m5s");
    // rounds to the nearest millisecond
    assert_eq!(format_duration(Duration::from_micros(1_999_600)), "2s");
  }
}
