//! Expansion of one logical build into per-architecture build requests.

use tracing::debug;

use crate::config::{ArchOverride, BuildConfig};
use crate::platform::Platform;

/// One unit of orchestrated work: a fully resolved config for a single architecture.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRequest {
  pub config: BuildConfig,
  /// Target CPU architecture, e.g. "arm64".
  pub architecture: String,
  /// Full platform, e.g. "linux/arm64" or "linux/arm/v7".
  pub platform: String,
  /// Final image tag, `<name>:<version>`.
  pub tag: String,
}

/// Create one request per distinct entry of `config.architectures`, in first-seen order.
///
/// Each request owns its own copy of the config with that architecture's overrides
/// applied, so specialising one architecture can never leak into another.
pub fn create_build_requests(config: &BuildConfig) -> Vec<BuildRequest> {
  let tag = format!("{}:{}", config.name, config.version);

  unique_architectures(&config.architectures)
    .into_iter()
    .map(|arch| {
      let mut arch_config = config.clone();
      if let Some(arch_override) = config.arch_overrides.get(&arch) {
        apply_arch_overrides(&mut arch_config, arch_override, &arch);
      }

      let platform = platform_for_arch(config, &arch);
      arch_config.base.platform = platform.clone();

      BuildRequest {
        config: arch_config,
        architecture: arch,
        platform,
        tag: tag.clone(),
      }
    })
    .collect()
}

/// Apply an architecture-specific override to `config`.
///
/// A base image replaces the whole base. Provisioners replace the list, or are appended
/// after it when `append_provisioners` is set. An empty override changes nothing.
pub fn apply_arch_overrides(config: &mut BuildConfig, arch_override: &ArchOverride, arch: &str) {
  debug!(arch = %arch, "applying architecture overrides");

  if let Some(base) = &arch_override.base {
    config.base = base.clone();
  }

  if !arch_override.provisioners.is_empty() {
    if arch_override.append_provisioners {
      config.provisioners.extend(arch_override.provisioners.iter().cloned());
    } else {
      config.provisioners = arch_override.provisioners.clone();
    }
  }
}

/// `archs` without duplicates or empty entries, in first-seen order.
pub fn unique_architectures(archs: &[String]) -> Vec<String> {
  let mut unique: Vec<String> = Vec::with_capacity(archs.len());
  for arch in archs.iter().filter(|a| !a.is_empty()) {
    if !unique.contains(arch) {
      unique.push(arch.clone());
    }
  }
  unique
}

/// Unique architectures named by the targets' platform strings, in first-seen order.
///
/// Malformed platform strings are skipped.
pub fn extract_architectures_from_targets(config: &BuildConfig) -> Vec<String> {
  let mut archs: Vec<String> = Vec::new();

  for platform in config.targets.iter().flat_map(|t| t.platforms.iter()) {
    match Platform::parse(platform) {
      Some(parsed) => {
        if !archs.contains(&parsed.arch) {
          archs.push(parsed.arch);
        }
      }
      None => debug!(platform = %platform, "skipping malformed platform"),
    }
  }

  archs
}

/// The full platform declared for `arch` by a target, or `linux/<arch>`.
fn platform_for_arch(config: &BuildConfig, arch: &str) -> String {
  config
    .targets
    .iter()
    .flat_map(|t| t.platforms.iter())
    .find(|p| Platform::parse(p).is_some_and(|parsed| parsed.arch == arch))
    .cloned()
    .unwrap_or_else(|| Platform::linux(arch).to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{BaseImage, Provisioner, Target};
  use std::collections::BTreeMap;

  fn config_with_archs(archs: &[&str]) -> BuildConfig {
    BuildConfig {
      name: "myimage".to_string(),
      version: "1.0.0".to_string(),
      architectures: archs.iter().map(|a| a.to_string()).collect(),
      base: BaseImage {
        image: "ubuntu:22.04".to_string(),
        ..Default::default()
      },
      provisioners: vec![Provisioner::shell(["echo original"])],
      ..Default::default()
    }
  }

  #[test]
  fn creates_requests_for_each_architecture() {
    let requests = create_build_requests(&config_with_archs(&["amd64", "arm64"]));

    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].architecture, "amd64");
    assert_eq!(requests[0].platform, "linux/amd64");
    assert_eq!(requests[0].tag, "myimage:1.0.0");
    assert_eq!(requests[1].architecture, "arm64");
    assert_eq!(requests[1].platform, "linux/arm64");
    assert_eq!(requests[1].tag, "myimage:1.0.0");
  }

  #[test]
  fn request_count_matches_architectures() {
    let archs = ["amd64", "arm64", "ppc64le", "s390x", "riscv64"];
    for n in 1..=archs.len() {
      let requests = create_build_requests(&config_with_archs(&archs[..n]));
      assert_eq!(requests.len(), n);
      for (request, arch) in requests.iter().zip(&archs) {
        assert_eq!(&request.architecture, arch);
      }
    }
  }

  #[test]
  fn duplicate_architectures_yield_one_request_each() {
    let requests = create_build_requests(&config_with_archs(&["amd64", "amd64", "arm64", "amd64"]));

    let pairs: Vec<(&str, &str)> = requests
      .iter()
      .map(|r| (r.architecture.as_str(), r.platform.as_str()))
      .collect();
    assert_eq!(pairs, [("amd64", "linux/amd64"), ("arm64", "linux/arm64")]);
  }

  #[test]
  fn unique_architectures_keeps_first_seen_order() {
    let archs = ["arm64", "", "amd64", "arm64"].map(String::from);
    assert_eq!(unique_architectures(&archs), ["arm64", "amd64"]);
  }

  #[test]
  fn empty_architectures_returns_no_requests() {
    assert!(create_build_requests(&config_with_archs(&[])).is_empty());
  }

  #[test]
  fn uses_full_platform_from_targets() {
    let mut config = config_with_archs(&["arm", "amd64"]);
    config.targets = vec![Target::container(["linux/arm/v7", "linux/amd64"])];

    let requests = create_build_requests(&config);
    assert_eq!(requests[0].platform, "linux/arm/v7");
    assert_eq!(requests[0].config.base.platform, "linux/arm/v7");
    assert_eq!(requests[1].platform, "linux/amd64");
  }

  #[test]
  fn overrides_apply_only_to_their_architecture() {
    let mut config = config_with_archs(&["amd64", "arm64"]);
    config.arch_overrides = BTreeMap::from([(
      "arm64".to_string(),
      ArchOverride {
        base: Some(BaseImage {
          image: "alpine:3.18".to_string(),
          ..Default::default()
        }),
        ..Default::default()
      },
    )]);

    let requests = create_build_requests(&config);
    assert_eq!(requests[0].config.base.image, "ubuntu:22.04");
    assert_eq!(requests[1].config.base.image, "alpine:3.18");
    // the source config is never mutated
    assert_eq!(config.base.image, "ubuntu:22.04");
  }

  #[test]
  fn override_replaces_base_image() {
    let mut config = config_with_archs(&["arm64"]);
    let arch_override = ArchOverride {
      base: Some(BaseImage {
        image: "alpine:3.18".to_string(),
        ..Default::default()
      }),
      ..Default::default()
    };

    apply_arch_overrides(&mut config, &arch_override, "arm64");
    assert_eq!(config.base.image, "alpine:3.18");
  }

  #[test]
  fn override_replaces_provisioners_by_default() {
    let mut config = config_with_archs(&["arm64"]);
    let arch_override = ArchOverride {
      provisioners: vec![Provisioner::shell(["echo replacement"])],
      ..Default::default()
    };

    apply_arch_overrides(&mut config, &arch_override, "arm64");
    assert_eq!(config.provisioners.len(), 1);
    assert_eq!(config.provisioners[0].inline[0], "echo replacement");
  }

  #[test]
  fn override_appends_provisioners_when_requested() {
    let mut config = config_with_archs(&["arm64"]);
    config.provisioners.push(Provisioner::shell(["echo second"]));
    let arch_override = ArchOverride {
      provisioners: vec![Provisioner::shell(["echo appended"]), Provisioner::shell(["echo last"])],
      append_provisioners: true,
      ..Default::default()
    };

    apply_arch_overrides(&mut config, &arch_override, "arm64");
    let commands: Vec<&str> = config.provisioners.iter().map(|p| p.inline[0].as_str()).collect();
    assert_eq!(commands, ["echo original", "echo second", "echo appended", "echo last"]);
  }

  #[test]
  fn empty_override_is_a_no_op() {
    let mut config = config_with_archs(&["arm64"]);
    let before = config.clone();

    apply_arch_overrides(&mut config, &ArchOverride::default(), "arm64");
    assert_eq!(config, before);

    // append flag alone does nothing either
    let append_only = ArchOverride {
      append_provisioners: true,
      ..Default::default()
    };
    apply_arch_overrides(&mut config, &append_only, "arm64");
    assert_eq!(config, before);
  }

  #[test]
  fn extracts_unique_architectures_in_order() {
    let mut config = config_with_archs(&[]);
    config.targets = vec![
      Target::container(["linux/arm64", "linux/amd64"]),
      Target::container(["linux/amd64", "linux/arm/v7"]),
    ];

    assert_eq!(extract_architectures_from_targets(&config), vec!["arm64", "amd64", "arm"]);
  }

  #[test]
  fn skips_malformed_platform_strings() {
    let mut config = config_with_archs(&[]);
    config.targets = vec![Target::container(["noslash", "linux/amd64"])];

    assert_eq!(extract_architectures_from_targets(&config), vec!["amd64"]);
    assert!(extract_architectures_from_targets(&BuildConfig::default()).is_empty());
  }
}
