//! Build backend capabilities.
//!
//! The orchestration core never names a concrete backend. It receives a
//! [`BuilderCreator`] and talks to the [`ContainerBuilder`] / [`AmiBuilder`] it yields.
//!
//! Implementations must be safe to share between concurrent tasks: the orchestrator calls
//! `build` and `push` on one instance from several tasks at once. Cancellation is
//! cooperative through future dropping, so a backend holding external resources (child
//! processes, connections) should release them when its future is dropped.

pub mod docker;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::build::BuildResult;
use crate::config::BuildConfig;
use crate::manifest::ManifestEntry;

/// Errors reported by a build backend.
#[derive(Debug, Error)]
pub enum BackendError {
  /// An external command exited unsuccessfully.
  #[error("command failed with exit code {code:?}: {cmd}: {stderr}")]
  CommandFailed {
    cmd: String,
    code: Option<i32>,
    stderr: String,
  },

  /// I/O error while talking to the backend.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// The backend rejected the request.
  #[error("{0}")]
  Rejected(String),
}

/// Operations shared by every image builder.
#[async_trait]
pub trait Builder: Send + Sync {
  /// Build an image from `config`.
  async fn build(&self, config: &BuildConfig) -> Result<BuildResult, BackendError>;

  /// Release backend resources. Must be idempotent.
  async fn close(&self) -> Result<(), BackendError>;
}

/// Container image operations.
#[async_trait]
pub trait ContainerBuilder: Builder {
  /// Push `image_ref` to `registry` under its tag. Returns the pushed digest, or an empty
  /// string when the backend could not determine one.
  async fn push(&self, image_ref: &str, registry: &str) -> Result<String, BackendError>;

  /// Push `image_ref` to `registry` by digest, without leaving a registry tag.
  async fn push_digest(&self, image_ref: &str, registry: &str) -> Result<String, BackendError>;

  /// Add `new_tag` to an existing local image.
  async fn tag(&self, image_ref: &str, new_tag: &str) -> Result<(), BackendError>;

  /// Remove a local image.
  async fn remove(&self, image_ref: &str) -> Result<(), BackendError>;

  /// Create a multi-arch manifest list named `reference` from registry images and push it.
  /// Returns the list's digest, or an empty string when the backend could not determine one.
  async fn create_manifest_list(&self, reference: &str, entries: &[ManifestEntry]) -> Result<String, BackendError>;
}

/// AWS AMI operations.
#[async_trait]
pub trait AmiBuilder: Builder {
  /// Grant launch permission on `ami_id` to the given 12-digit account IDs.
  async fn share(&self, ami_id: &str, account_ids: &[String]) -> Result<(), BackendError>;

  /// Copy an AMI between regions, returning the new AMI ID.
  async fn copy(&self, ami_id: &str, source_region: &str, dest_region: &str) -> Result<String, BackendError>;

  /// Deregister an AMI. Snapshots are left in place.
  async fn deregister(&self, ami_id: &str, region: &str) -> Result<(), BackendError>;
}

/// Creates container builders on demand.
///
/// Any `Fn() -> impl Future<Output = Result<Arc<dyn ContainerBuilder>, BackendError>>`
/// closure is a creator.
#[async_trait]
pub trait BuilderCreator: Send + Sync {
  async fn create(&self) -> Result<Arc<dyn ContainerBuilder>, BackendError>;
}

#[async_trait]
impl<F, Fut> BuilderCreator for F
where
  F: Fn() -> Fut + Send + Sync,
  Fut: Future<Output = Result<Arc<dyn ContainerBuilder>, BackendError>> + Send,
{
  async fn create(&self) -> Result<Arc<dyn ContainerBuilder>, BackendError> {
    (self)().await
  }
}
