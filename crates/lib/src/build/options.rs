//! CLI/API build options and the override resolver.
//!
//! Precedence is evaluated per field, never as a block:
//! explicit option > value already in the template > global config default > built-in default.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::build::requests::{extract_architectures_from_targets, unique_architectures};
use crate::config::{BuildConfig, GlobalConfig, TargetType};
use crate::util::redact::redact_sensitive_value;

/// Build overrides supplied on the command line or through the API.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BuildOptions {
  /// Keep only targets of this type.
  pub target_type: Option<TargetType>,
  pub architectures: Vec<String>,
  pub registry: Option<String>,
  /// The first tag becomes the image version; the rest are applied after the build.
  pub tags: Vec<String>,
  /// AMI region.
  pub region: Option<String>,
  /// AMI EC2 instance type.
  pub instance_type: Option<String>,
  pub labels: BTreeMap<String, String>,
  pub build_args: BTreeMap<String, String>,
  pub cache_from: Vec<String>,
  pub cache_to: Vec<String>,
  pub no_cache: bool,
  pub push: bool,
  pub save_digests: bool,
  pub digest_dir: Option<PathBuf>,
}

impl BuildOptions {
  /// Tags after the first one.
  pub fn additional_tags(&self) -> &[String] {
    self.tags.get(1..).unwrap_or_default()
  }
}

/// Apply `opts` and `global` defaults to `config` in place.
///
/// Never fails: a missing global config only means the last fallback level is skipped.
pub fn apply_overrides(config: &mut BuildConfig, opts: &BuildOptions, global: Option<&GlobalConfig>) {
  if global.is_none() {
    warn!("no global configuration provided, some defaults may not be applied");
  }

  apply_target_type_filter(config, opts);
  apply_architecture_overrides(config, opts, global);
  apply_registry_override(config, opts, global);
  apply_ami_target_overrides(config, opts);
  apply_labels_and_build_args(config, opts);
  apply_cache_options(config, opts);
  apply_tag_override(config, opts);
}

/// Target type for a build: the option, else the first template target, else container.
pub fn determine_target_type(config: &BuildConfig, opts: &BuildOptions) -> TargetType {
  opts
    .target_type
    .or_else(|| config.targets.first().map(|t| t.kind))
    .unwrap_or(TargetType::Container)
}

fn apply_target_type_filter(config: &mut BuildConfig, opts: &BuildOptions) {
  if let Some(kind) = opts.target_type {
    config.targets.retain(|t| t.kind == kind);
  }
}

fn apply_architecture_overrides(config: &mut BuildConfig, opts: &BuildOptions, global: Option<&GlobalConfig>) {
  if !opts.architectures.is_empty() {
    config.architectures = unique_architectures(&opts.architectures);
    return;
  }

  if !config.architectures.is_empty() {
    config.architectures = unique_architectures(&config.architectures);
    return;
  }

  config.architectures = extract_architectures_from_targets(config);

  if config.architectures.is_empty() {
    if let Some(global) = global {
      config.architectures = unique_architectures(&global.build.default_arch);
    }
  }
}

fn apply_registry_override(config: &mut BuildConfig, opts: &BuildOptions, global: Option<&GlobalConfig>) {
  match opts.registry.as_deref().filter(|r| !r.is_empty()) {
    Some(registry) => config.registry = registry.to_string(),
    None if config.registry.is_empty() => {
      if let Some(global) = global {
        config.registry = global.registry.default.clone();
      }
    }
    None => {}
  }
}

fn apply_ami_target_overrides(config: &mut BuildConfig, opts: &BuildOptions) {
  let region = opts.region.as_deref().filter(|r| !r.is_empty());
  let instance_type = opts.instance_type.as_deref().filter(|t| !t.is_empty());
  if region.is_none() && instance_type.is_none() {
    return;
  }

  for target in config.targets.iter_mut().filter(|t| t.kind == TargetType::Ami) {
    if let Some(region) = region {
      target.region = region.to_string();
    }
    if let Some(instance_type) = instance_type {
      target.instance_type = instance_type.to_string();
    }
  }
}

fn apply_labels_and_build_args(config: &mut BuildConfig, opts: &BuildOptions) {
  for (key, value) in &opts.labels {
    debug!(key = %key, value = %redact_sensitive_value(key, value), "adding label");
    config.labels.insert(key.clone(), value.clone());
  }

  for (key, value) in &opts.build_args {
    debug!(key = %key, value = %redact_sensitive_value(key, value), "adding build arg");
    config.build_args.insert(key.clone(), value.clone());
  }
}

fn apply_cache_options(config: &mut BuildConfig, opts: &BuildOptions) {
  set_if_true(&mut config.no_cache, opts.no_cache);

  if !opts.cache_from.is_empty() {
    config.cache_from = opts.cache_from.clone();
  }
  if !opts.cache_to.is_empty() {
    config.cache_to = opts.cache_to.clone();
  }
}

fn apply_tag_override(config: &mut BuildConfig, opts: &BuildOptions) {
  if let Some(first) = opts.tags.first() {
    config.version = first.clone();
  }
}

/// One-directional boolean merge: `true` sets the flag, `false` leaves it alone.
fn set_if_true(target: &mut bool, value: bool) {
  if value {
    *target = true;
  }
}
