//! The top-level build workflow.
//!
//! [`BuildService`] resolves overrides, owns the builder lifecycle for each call, picks the
//! single or multi-architecture path and handles pushing, digest persistence and the
//! multi-arch manifest list.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::backend::{AmiBuilder, Builder, BuilderCreator, ContainerBuilder};
use crate::build::options::{BuildOptions, apply_overrides};
use crate::build::orchestrator::{BuildOrchestrator, DEFAULT_MAX_CONCURRENCY};
use crate::build::requests::create_build_requests;
use crate::build::{BuildError, BuildResult};
use crate::config::{BuildConfig, GlobalConfig, TargetType};
use crate::manifest::{
  ManifestEntry, ManifestRef, create_manifest_entries, digest_arch_label, save_digest_to_file, save_digests,
};
use crate::platform::arch::{BuildStrategy, detect_strategy, host_arch};
use crate::platform::paths::digests_dir;
use crate::platform::{DEFAULT_OS, Platform};

/// Architecture label used for digest files when a result carries none.
const UNKNOWN_ARCH: &str = "unknown";

pub struct BuildService {
  global: Option<GlobalConfig>,
  creator: Arc<dyn BuilderCreator>,
  deadline: Option<tokio::time::Instant>,
}

impl BuildService {
  /// `creator` is called once per build or push to obtain a fresh container builder.
  pub fn new(global: Option<GlobalConfig>, creator: Arc<dyn BuilderCreator>) -> Self {
    Self {
      global,
      creator,
      deadline: None,
    }
  }

  /// Fail builds and pushes still running at `deadline` with [`BuildError::Timeout`].
  ///
  /// The work is abandoned at the deadline but the builder is still closed.
  pub fn with_deadline(mut self, deadline: Instant) -> Self {
    self.deadline = Some(tokio::time::Instant::from_std(deadline));
    self
  }

  pub fn global_config(&self) -> Option<&GlobalConfig> {
    self.global.as_ref()
  }

  fn concurrency(&self) -> usize {
    self
      .global
      .as_ref()
      .map(GlobalConfig::concurrency)
      .unwrap_or(DEFAULT_MAX_CONCURRENCY)
  }

  /// Resolve overrides into `config` and build it for every configured architecture.
  ///
  /// More than one architecture goes through the [`BuildOrchestrator`]; otherwise a single
  /// build runs with the platform defaulted to `linux/<arch>`. The builder is closed on
  /// every return path.
  pub async fn execute_container_build(
    &self,
    config: &mut BuildConfig,
    opts: &BuildOptions,
  ) -> Result<Vec<BuildResult>, BuildError> {
    info!(image = %config.name, "executing container build");

    apply_overrides(config, opts, self.global.as_ref());
    warn_cross_compilation(&config.architectures);

    let builder = self.creator.create().await.map_err(BuildError::CreateBuilder)?;
    let outcome = self
      .within_deadline(self.run_container_build(config, opts, builder.clone()))
      .await;
    close_builder(builder.as_ref(), "build").await;

    outcome
  }

  async fn run_container_build(
    &self,
    config: &mut BuildConfig,
    opts: &BuildOptions,
    builder: Arc<dyn ContainerBuilder>,
  ) -> Result<Vec<BuildResult>, BuildError> {
    if config.architectures.len() > 1 {
      let results = self.execute_multi_arch_build(config, builder.clone()).await?;
      for result in &results {
        let tags: Vec<String> = opts
          .additional_tags()
          .iter()
          .map(|tag| format!("{}:{}-{}", config.name, tag, result.architecture))
          .collect();
        apply_additional_tags(builder.as_ref(), &result.image_ref, &tags).await;
      }
      return Ok(results);
    }

    let result = execute_single_arch_build(config, builder.as_ref()).await?;
    let tags: Vec<String> = opts
      .additional_tags()
      .iter()
      .map(|tag| format!("{}:{}", config.name, tag))
      .collect();
    apply_additional_tags(builder.as_ref(), &result.image_ref, &tags).await;

    Ok(vec![result])
  }

  async fn execute_multi_arch_build(
    &self,
    config: &BuildConfig,
    builder: Arc<dyn ContainerBuilder>,
  ) -> Result<Vec<BuildResult>, BuildError> {
    info!(
      count = config.architectures.len(),
      archs = ?config.architectures,
      "executing multi-arch build"
    );

    let orchestrator = BuildOrchestrator::new(self.concurrency());
    let requests = create_build_requests(config);
    orchestrator.build_multi_arch(&requests, builder).await
  }

  /// Build an AMI with `ami_builder`.
  ///
  /// The region is the first non-empty of: the region option, the AMI target's region,
  /// the global `aws.region`. The builder sees that region on the config's AMI target.
  pub async fn execute_ami_build(
    &self,
    config: &BuildConfig,
    opts: &BuildOptions,
    ami_builder: &dyn AmiBuilder,
  ) -> Result<BuildResult, BuildError> {
    info!(image = %config.name, "executing AMI build");

    let target_index = config
      .targets
      .iter()
      .position(|t| t.kind == TargetType::Ami)
      .ok_or(BuildError::NoAmiTarget)?;

    let region = opts
      .region
      .as_deref()
      .filter(|r| !r.is_empty())
      .or_else(|| Some(config.targets[target_index].region.as_str()).filter(|r| !r.is_empty()))
      .or_else(|| {
        self
          .global
          .as_ref()
          .map(|g| g.aws.region.as_str())
          .filter(|r| !r.is_empty())
      })
      .ok_or(BuildError::MissingRegion)?
      .to_string();

    let mut ami_config = config.clone();
    ami_config.targets[target_index].region = region.clone();

    let result = ami_builder.build(&ami_config).await.map_err(BuildError::AmiBuild)?;
    info!(ami_id = %result.ami_id, region = %region, "AMI build completed");
    Ok(result)
  }

  /// Push built images to the registry, updating each result's digest in place.
  ///
  /// The registry is the option if set, else the config's registry. With
  /// `opts.save_digests` the pushed digests are written to the digest directory afterwards.
  pub async fn push(
    &self,
    config: &BuildConfig,
    results: &mut [BuildResult],
    opts: &BuildOptions,
  ) -> Result<(), BuildError> {
    let registry = resolve_registry(config, opts)?;

    let builder = self.creator.create().await.map_err(BuildError::CreateBuilder)?;
    let outcome = if results.len() == 1 {
      self
        .within_deadline(push_single_arch(config, &mut results[0], &registry, builder.as_ref(), opts))
        .await
    } else {
      self
        .within_deadline(self.push_multi_arch(config, results, &registry, builder.clone(), opts))
        .await
    };
    close_builder(builder.as_ref(), "push").await;

    outcome
  }

  /// Publish pushed per-architecture images as one multi-arch manifest list.
  ///
  /// The list is pushed as `<registry>/<name>:<version>` and again under every additional
  /// tag. Each result must carry its registry digest, so this runs after [`Self::push`].
  /// Returns the reference and digest of the `<version>` list.
  pub async fn push_manifest_list(
    &self,
    config: &BuildConfig,
    results: &[BuildResult],
    opts: &BuildOptions,
  ) -> Result<ManifestRef, BuildError> {
    let registry = resolve_registry(config, opts)?;
    if let Some(missing) = results.iter().find(|r| r.digest.is_empty()) {
      return Err(BuildError::MissingDigest {
        image_ref: missing.image_ref.clone(),
      });
    }

    let repository = format!("{}/{}", registry.trim_end_matches('/'), config.name);
    let mut entries = create_manifest_entries(results);
    if entries.is_empty() {
      return Err(BuildError::NoManifestEntries);
    }
    for entry in &mut entries {
      entry.image_ref = format!("{repository}@{}", entry.digest);
    }

    let mut tags = vec![config.version.clone()];
    tags.extend(opts.additional_tags().iter().cloned());

    let builder = self.creator.create().await.map_err(BuildError::CreateBuilder)?;
    let outcome = self
      .within_deadline(push_manifest_tags(builder.as_ref(), &repository, &tags, &entries))
      .await;
    close_builder(builder.as_ref(), "manifest").await;

    outcome
  }

  async fn within_deadline<T>(&self, work: impl Future<Output = Result<T, BuildError>>) -> Result<T, BuildError> {
    match self.deadline {
      Some(deadline) => tokio::time::timeout_at(deadline, work)
        .await
        .unwrap_or_else(|_| Err(BuildError::Timeout)),
      None => work.await,
    }
  }

  async fn push_multi_arch(
    &self,
    config: &BuildConfig,
    results: &mut [BuildResult],
    registry: &str,
    builder: Arc<dyn ContainerBuilder>,
    opts: &BuildOptions,
  ) -> Result<(), BuildError> {
    info!(registry = %registry, count = results.len(), "pushing multi-arch images");

    BuildOrchestrator::new(self.concurrency())
      .push_multi_arch(results, registry, builder)
      .await?;

    if opts.save_digests {
      save_digests(&config.name, results, &digest_dir(opts), fallback_arch(config));
    }

    info!(registry = %registry, "pushed multi-arch images");
    Ok(())
  }
}

async fn execute_single_arch_build(
  config: &mut BuildConfig,
  builder: &dyn ContainerBuilder,
) -> Result<BuildResult, BuildError> {
  if config.base.platform.is_empty() {
    if let Some(arch) = config.architectures.first() {
      config.base.platform = Platform::linux(arch).to_string();
    }
  }

  builder.build(config).await.map_err(BuildError::Build)
}

async fn push_single_arch(
  config: &BuildConfig,
  result: &mut BuildResult,
  registry: &str,
  builder: &dyn ContainerBuilder,
  opts: &BuildOptions,
) -> Result<(), BuildError> {
  info!(registry = %registry, image = %result.image_ref, "pushing");

  let digest = builder
    .push(&result.image_ref, registry)
    .await
    .map_err(|source| BuildError::Push {
      image_ref: result.image_ref.clone(),
      source,
    })?;
  if !digest.is_empty() {
    result.digest = digest;
  }

  if opts.save_digests && !result.digest.is_empty() {
    let arch = digest_arch_label(result, fallback_arch(config));
    if let Err(e) = save_digest_to_file(&config.name, &arch, &result.digest, &digest_dir(opts)) {
      warn!(arch = %arch, error = %e, "failed to save digest");
    }
  }

  info!(registry = %registry, "pushed");
  Ok(())
}

/// Pushes `entries` as a manifest list under each of `tags`, stopping at the first failure.
async fn push_manifest_tags(
  builder: &dyn ContainerBuilder,
  repository: &str,
  tags: &[String],
  entries: &[ManifestEntry],
) -> Result<ManifestRef, BuildError> {
  let mut primary: Option<ManifestRef> = None;

  for tag in tags {
    let reference = format!("{repository}:{tag}");
    let digest = builder
      .create_manifest_list(&reference, entries)
      .await
      .map_err(|source| BuildError::ManifestList {
        reference: reference.clone(),
        source,
      })?;
    info!(reference = %reference, count = entries.len(), "pushed manifest list");
    primary.get_or_insert(ManifestRef { reference, digest });
  }

  primary.ok_or(BuildError::NoManifestEntries)
}

/// The registry option if set, else the config's registry.
fn resolve_registry(config: &BuildConfig, opts: &BuildOptions) -> Result<String, BuildError> {
  let registry = opts
    .registry
    .as_deref()
    .filter(|r| !r.is_empty())
    .unwrap_or(config.registry.as_str());
  if registry.is_empty() {
    return Err(BuildError::MissingRegistry);
  }
  Ok(registry.to_string())
}

/// Digest file label for results that carry no architecture of their own.
fn fallback_arch(config: &BuildConfig) -> &str {
  config
    .architectures
    .first()
    .map(String::as_str)
    .unwrap_or(UNKNOWN_ARCH)
}

fn digest_dir(opts: &BuildOptions) -> PathBuf {
  opts.digest_dir.clone().unwrap_or_else(digests_dir)
}

async fn apply_additional_tags(builder: &dyn ContainerBuilder, image_ref: &str, tags: &[String]) {
  for tag in tags {
    match builder.tag(image_ref, tag).await {
      Ok(()) => info!(image = %image_ref, tag = %tag, "applied tag"),
      Err(e) => warn!(image = %image_ref, tag = %tag, error = %e, "failed to apply tag"),
    }
  }
}

async fn close_builder(builder: &dyn ContainerBuilder, operation: &str) {
  if let Err(e) = builder.close().await {
    warn!(operation = %operation, error = %e, "failed to close builder");
  }
}

fn warn_cross_compilation(architectures: &[String]) {
  let host = host_arch();
  for arch in architectures {
    if detect_strategy(&host, arch) == BuildStrategy::CrossCompile {
      warn!(
        host = %host,
        target = %format!("{DEFAULT_OS}/{arch}"),
        "cross-compiling with emulation, the build will be slower than a native build"
      );
    }
  }
}
