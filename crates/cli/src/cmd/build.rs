//! Implementation of the `warpgate build` command.
//!
//! Loads a template, resolves CLI overrides, builds every requested architecture through
//! the docker backend and optionally pushes the images, publishes a multi-arch manifest
//! list and records a build manifest.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::info;

use warpgate_lib::backend::docker::DockerCliBuilder;
use warpgate_lib::backend::{BackendError, BuilderCreator, ContainerBuilder};
use warpgate_lib::build::{BuildError, BuildOptions, BuildResult, BuildService, determine_target_type};
use warpgate_lib::config::{BuildConfig, GlobalConfig, TargetType};
use warpgate_lib::manifest::{BuildManifest, ManifestRef, write_manifest};

use crate::output::{
  OutputFormat, print_info, print_json, print_stat, print_success, print_warning, short_digest, symbols,
};

#[derive(Debug, Args)]
pub struct BuildArgs {
  /// Path to the template file
  pub template: PathBuf,

  /// Architectures to build, comma separated (default: from the template targets)
  #[arg(long, value_delimiter = ',')]
  pub arch: Vec<String>,

  /// Only build targets of this type
  #[arg(long)]
  pub target: Option<TargetType>,

  /// Registry to push to
  #[arg(long)]
  pub registry: Option<String>,

  /// Image tag; the first tag becomes the image version, the rest are added after the build
  #[arg(short, long = "tag")]
  pub tags: Vec<String>,

  /// Image label as KEY=VALUE (repeatable)
  #[arg(long = "label", value_parser = parse_key_val)]
  pub labels: Vec<(String, String)>,

  /// Build argument as KEY=VALUE (repeatable)
  #[arg(long = "build-arg", value_parser = parse_key_val)]
  pub build_args: Vec<(String, String)>,

  /// External cache source (repeatable)
  #[arg(long)]
  pub cache_from: Vec<String>,

  /// External cache destination (repeatable)
  #[arg(long)]
  pub cache_to: Vec<String>,

  /// Build without using the cache
  #[arg(long)]
  pub no_cache: bool,

  /// Push the built images to the registry
  #[arg(long)]
  pub push: bool,

  /// Save per-architecture digests after pushing
  #[arg(long)]
  pub save_digests: bool,

  /// Directory for digest files
  #[arg(long)]
  pub digest_dir: Option<PathBuf>,

  /// AWS region for AMI targets
  #[arg(long)]
  pub region: Option<String>,

  /// EC2 instance type for AMI targets
  #[arg(long)]
  pub instance_type: Option<String>,

  /// Write a JSON build manifest to this path
  #[arg(long)]
  pub manifest_out: Option<PathBuf>,

  #[arg(short, long, value_enum, default_value_t)]
  pub output: OutputFormat,
}

impl BuildArgs {
  fn to_options(&self) -> BuildOptions {
    BuildOptions {
      target_type: self.target,
      architectures: self.arch.iter().filter(|a| !a.is_empty()).cloned().collect(),
      registry: self.registry.clone(),
      tags: self.tags.clone(),
      region: self.region.clone(),
      instance_type: self.instance_type.clone(),
      labels: self.labels.iter().cloned().collect::<BTreeMap<_, _>>(),
      build_args: self.build_args.iter().cloned().collect::<BTreeMap<_, _>>(),
      cache_from: self.cache_from.clone(),
      cache_to: self.cache_to.clone(),
      no_cache: self.no_cache,
      push: self.push,
      save_digests: self.save_digests,
      digest_dir: self.digest_dir.clone(),
    }
  }
}

/// Parse a `KEY=VALUE` pair.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
  match s.split_once('=') {
    Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
    Some(_) => Err(format!("empty key in `{s}`")),
    None => Err(format!("invalid KEY=VALUE: no `=` found in `{s}`")),
  }
}

fn docker_creator(binary: String) -> Arc<dyn BuilderCreator> {
  Arc::new(move || {
    let builder = DockerCliBuilder::with_binary(binary.clone());
    async move { Ok::<Arc<dyn ContainerBuilder>, BackendError>(Arc::new(builder)) }
  })
}

/// What one build invocation produced.
struct BuildOutcome {
  results: Vec<BuildResult>,
  manifest_list: Option<ManifestRef>,
}

/// Execute the build command.
pub fn cmd_build(args: BuildArgs, global: GlobalConfig) -> Result<()> {
  let template = dunce::canonicalize(&args.template)
    .with_context(|| format!("Template not found: {}", args.template.display()))?;
  let mut config = BuildConfig::from_file(&template)?;
  let opts = args.to_options();

  if determine_target_type(&config, &opts) == TargetType::Ami {
    bail!("AMI targets need an AMI backend, which this build of warpgate does not include");
  }

  let timeout = global.timeout()?;
  let creator = docker_creator(global.build.docker_binary.clone());
  let mut service = BuildService::new(Some(global), creator);
  if let Some(limit) = timeout {
    service = service.with_deadline(Instant::now() + limit);
  }

  if !args.output.is_json() {
    print_info(&format!("Building {} from {}", config.name, template.display()));
  }

  let started = Instant::now();
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = rt
    .block_on(build_and_push(&service, &mut config, &opts))
    .map_err(|e| with_timeout_hint(e, timeout))?;

  if let Some(path) = &args.manifest_out {
    let mut manifest = BuildManifest::new(&config, &outcome.results, started.elapsed());
    manifest.pushed = opts.push;
    manifest.manifest = outcome.manifest_list.clone();
    write_manifest(path, &manifest).context("Failed to write build manifest")?;
    info!(path = %path.display(), "wrote build manifest");
  }

  if args.output.is_json() {
    print_json(&outcome.results)?;
  } else {
    print_results(&outcome.results);
    if let Some(list) = &outcome.manifest_list {
      print_stat("Manifest list", &list.reference);
    }
    if let Some(path) = &args.manifest_out {
      print_stat("Manifest", &path.display().to_string());
    }
  }

  Ok(())
}

async fn build_and_push(service: &BuildService, config: &mut BuildConfig, opts: &BuildOptions) -> Result<BuildOutcome> {
  let mut results = match service.execute_container_build(config, opts).await {
    Ok(results) => results,
    Err(e) => {
      report_partial(&e);
      return Err(e).context("Build failed");
    }
  };

  let mut manifest_list = None;
  if opts.push {
    service.push(config, &mut results, opts).await.context("Push failed")?;
    if results.len() > 1 {
      let list = service
        .push_manifest_list(config, &results, opts)
        .await
        .context("Manifest list failed")?;
      manifest_list = Some(list);
    }
  }

  Ok(BuildOutcome { results, manifest_list })
}

fn with_timeout_hint(err: anyhow::Error, timeout: Option<Duration>) -> anyhow::Error {
  let timed_out = err
    .chain()
    .any(|cause| matches!(cause.downcast_ref::<BuildError>(), Some(BuildError::Timeout)));
  match timeout {
    Some(limit) if timed_out => err.context(format!("Build timed out after {}", humantime::format_duration(limit))),
    _ => err,
  }
}

fn report_partial(err: &BuildError) {
  let Some(partial) = err.partial_results() else {
    return;
  };
  for result in partial.iter().flatten() {
    print_warning(&format!(
      "{} completed before the build was aborted: {}",
      result.architecture, result.image_ref
    ));
  }
}

fn print_results(results: &[BuildResult]) {
  for result in results {
    print_success(&format!(
      "{} {} {}",
      result.architecture,
      symbols::ARROW,
      result.image_ref
    ));
    if !result.digest.is_empty() {
      print_stat("Digest", short_digest(&result.digest));
    }
    print_stat("Duration", &result.duration);
    for note in &result.notes {
      print_warning(note);
    }
  }
}
