//! In-memory build backends for tests.
//!
//! [`MockContainerBuilder`] records every call it receives and tracks how many builds run
//! at once, so orchestration tests can assert on concurrency, ordering and cancellation
//! without a container engine.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{AmiBuilder, BackendError, Builder, BuilderCreator, ContainerBuilder};
use crate::build::BuildResult;
use crate::config::{BuildConfig, TargetType};
use crate::manifest::ManifestEntry;
use crate::platform::Platform;

/// A syntactically valid `sha256:` digest derived from `seed`.
pub fn fake_digest(seed: &str) -> String {
  let mut encoded = hex::encode(seed);
  encoded.truncate(64);
  format!("sha256:{:0>64}", encoded)
}

#[derive(Default)]
pub struct MockContainerBuilder {
  fail_builds: HashSet<String>,
  fail_pushes: HashSet<String>,
  delays: HashMap<String, Duration>,
  default_delay: Duration,
  empty_push_digest: bool,
  fail_close: bool,
  fail_manifest_lists: HashSet<String>,

  active: AtomicUsize,
  max_active: AtomicUsize,
  completed: AtomicUsize,
  closes: AtomicUsize,
  builds: Mutex<Vec<BuildConfig>>,
  pushes: Mutex<Vec<(String, String)>>,
  tags: Mutex<Vec<(String, String)>>,
  manifest_lists: Mutex<Vec<(String, Vec<ManifestEntry>)>>,
}

impl MockContainerBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Fail builds for `arch`.
  pub fn failing_on(mut self, arch: &str) -> Self {
    self.fail_builds.insert(arch.to_string());
    self
  }

  /// Fail pushes of `image_ref`.
  pub fn failing_push(mut self, image_ref: &str) -> Self {
    self.fail_pushes.insert(image_ref.to_string());
    self
  }

  /// Delay applied to every build without a per-arch delay.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.default_delay = delay;
    self
  }

  pub fn with_arch_delay(mut self, arch: &str, delay: Duration) -> Self {
    self.delays.insert(arch.to_string(), delay);
    self
  }

  /// Make `push` report no digest.
  pub fn with_empty_push_digest(mut self) -> Self {
    self.empty_push_digest = true;
    self
  }

  pub fn failing_close(mut self) -> Self {
    self.fail_close = true;
    self
  }

  /// Fail manifest list creation for `reference`.
  pub fn failing_manifest_list(mut self, reference: &str) -> Self {
    self.fail_manifest_lists.insert(reference.to_string());
    self
  }

  pub fn max_concurrent(&self) -> usize {
    self.max_active.load(Ordering::SeqCst)
  }

  pub fn completed_builds(&self) -> usize {
    self.completed.load(Ordering::SeqCst)
  }

  pub fn close_count(&self) -> usize {
    self.closes.load(Ordering::SeqCst)
  }

  /// Configs passed to `build`, in call order.
  pub fn built_configs(&self) -> Vec<BuildConfig> {
    self.builds.lock().unwrap().clone()
  }

  /// `(image_ref, registry)` pairs passed to `push`.
  pub fn pushes(&self) -> Vec<(String, String)> {
    self.pushes.lock().unwrap().clone()
  }

  /// `(image_ref, new_tag)` pairs passed to `tag`.
  pub fn tags(&self) -> Vec<(String, String)> {
    self.tags.lock().unwrap().clone()
  }

  /// `(reference, entries)` pairs passed to `create_manifest_list`.
  pub fn manifest_lists(&self) -> Vec<(String, Vec<ManifestEntry>)> {
    self.manifest_lists.lock().unwrap().clone()
  }

  fn arch_of(config: &BuildConfig) -> String {
    Platform::parse(&config.base.platform)
      .map(|p| p.arch)
      .or_else(|| config.architectures.first().cloned())
      .unwrap_or_default()
  }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}

#[async_trait]
impl Builder for MockContainerBuilder {
  async fn build(&self, config: &BuildConfig) -> Result<BuildResult, BackendError> {
    self.builds.lock().unwrap().push(config.clone());
    let arch = Self::arch_of(config);

    let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_active.fetch_max(now, Ordering::SeqCst);
    let _guard = ActiveGuard(&self.active);

    let delay = self.delays.get(&arch).copied().unwrap_or(self.default_delay);
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }

    if self.fail_builds.contains(&arch) {
      return Err(BackendError::Rejected(format!("mock build failure for {arch}")));
    }

    self.completed.fetch_add(1, Ordering::SeqCst);
    Ok(BuildResult {
      image_ref: format!("{}:{}", config.name, config.version),
      digest: fake_digest(&arch),
      platform: config.base.platform.clone(),
      architecture: arch,
      duration: "1s".to_string(),
      ..Default::default()
    })
  }

  async fn close(&self) -> Result<(), BackendError> {
    self.closes.fetch_add(1, Ordering::SeqCst);
    if self.fail_close {
      return Err(BackendError::Rejected("mock close failure".to_string()));
    }
    Ok(())
  }
}

#[async_trait]
impl ContainerBuilder for MockContainerBuilder {
  async fn push(&self, image_ref: &str, registry: &str) -> Result<String, BackendError> {
    self.pushes.lock().unwrap().push((image_ref.to_string(), registry.to_string()));
    if self.fail_pushes.contains(image_ref) {
      return Err(BackendError::Rejected(format!("mock push failure for {image_ref}")));
    }
    if self.empty_push_digest {
      return Ok(String::new());
    }
    Ok(fake_digest(&format!("pushed:{image_ref}")))
  }

  async fn push_digest(&self, image_ref: &str, registry: &str) -> Result<String, BackendError> {
    self.push(image_ref, registry).await
  }

  async fn tag(&self, image_ref: &str, new_tag: &str) -> Result<(), BackendError> {
    self.tags.lock().unwrap().push((image_ref.to_string(), new_tag.to_string()));
    Ok(())
  }

  async fn remove(&self, _image_ref: &str) -> Result<(), BackendError> {
    Ok(())
  }

  async fn create_manifest_list(&self, reference: &str, entries: &[ManifestEntry]) -> Result<String, BackendError> {
    self
      .manifest_lists
      .lock()
      .unwrap()
      .push((reference.to_string(), entries.to_vec()));
    if self.fail_manifest_lists.contains(reference) {
      return Err(BackendError::Rejected(format!("mock manifest failure for {reference}")));
    }
    Ok(fake_digest(&format!("list:{reference}")))
  }
}

/// A creator that always hands out `builder`.
pub fn creator_for(builder: Arc<MockContainerBuilder>) -> Arc<dyn BuilderCreator> {
  Arc::new(move || {
    let builder = builder.clone();
    async move { Ok::<Arc<dyn ContainerBuilder>, BackendError>(builder) }
  })
}

/// A creator that never produces a builder.
pub fn failing_creator() -> Arc<dyn BuilderCreator> {
  Arc::new(|| async { Err::<Arc<dyn ContainerBuilder>, BackendError>(BackendError::Rejected("no daemon".to_string())) })
}

/// AMI builder that reports the region it was asked to build in.
#[derive(Default)]
pub struct MockAmiBuilder {
  fail: bool,
  builds: Mutex<Vec<BuildConfig>>,
}

impl MockAmiBuilder {
  pub fn failing() -> Self {
    Self {
      fail: true,
      ..Default::default()
    }
  }

  pub fn built_configs(&self) -> Vec<BuildConfig> {
    self.builds.lock().unwrap().clone()
  }
}

#[async_trait]
impl Builder for MockAmiBuilder {
  async fn build(&self, config: &BuildConfig) -> Result<BuildResult, BackendError> {
    self.builds.lock().unwrap().push(config.clone());
    if self.fail {
      return Err(BackendError::Rejected("mock AMI failure".to_string()));
    }
    let region = config
      .find_target(TargetType::Ami)
      .map(|t| t.region.clone())
      .unwrap_or_default();
    Ok(BuildResult {
      ami_id: "ami-0123456789abcdef0".to_string(),
      region,
      architecture: config.architectures.first().cloned().unwrap_or_default(),
      duration: "5m0s".to_string(),
      ..Default::default()
    })
  }

  async fn close(&self) -> Result<(), BackendError> {
    Ok(())
  }
}

#[async_trait]
impl AmiBuilder for MockAmiBuilder {
  async fn share(&self, _ami_id: &str, _account_ids: &[String]) -> Result<(), BackendError> {
    Ok(())
  }

  async fn copy(&self, ami_id: &str, _source_region: &str, _dest_region: &str) -> Result<String, BackendError> {
    Ok(format!("{ami_id}-copy"))
  }

  async fn deregister(&self, _ami_id: &str, _region: &str) -> Result<(), BackendError> {
    Ok(())
  }
}
