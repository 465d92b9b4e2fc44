//! Build results and errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendError;

/// Outcome of one build, produced by the backend.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildResult {
  /// Local (or pushed) image reference for container builds.
  #[serde(skip_serializing_if = "String::is_empty")]
  pub image_ref: String,
  /// Content digest (`sha256:...`).
  #[serde(skip_serializing_if = "String::is_empty")]
  pub digest: String,
  #[serde(skip_serializing_if = "String::is_empty")]
  pub architecture: String,
  #[serde(skip_serializing_if = "String::is_empty")]
  pub platform: String,
  #[serde(skip_serializing_if = "String::is_empty")]
  pub ami_id: String,
  #[serde(skip_serializing_if = "String::is_empty")]
  pub region: String,
  /// Human readable build time, e.g. "1m30.5s".
  pub duration: String,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub notes: Vec<String>,
}

/// Errors raised by the build workflow.
#[derive(Debug, Error)]
pub enum BuildError {
  /// The injected creator could not produce a builder.
  #[error("failed to create builder: {0}")]
  CreateBuilder(#[source] BackendError),

  /// A single-architecture container build failed.
  #[error("container build failed: {0}")]
  Build(#[source] BackendError),

  /// One architecture of a multi-arch build failed.
  #[error("build {image} for {arch}: {source}")]
  ArchBuild {
    image: String,
    arch: String,
    #[source]
    source: BackendError,
  },

  /// A multi-arch build was aborted. `partial[i]` holds the result of request `i` if it
  /// finished before the abort.
  #[error("multi-arch build failed")]
  MultiArch {
    arch: String,
    #[source]
    source: Box<BuildError>,
    partial: Vec<Option<BuildResult>>,
  },

  /// Pushing an image failed.
  #[error("push image {image_ref}: {source}")]
  Push {
    image_ref: String,
    #[source]
    source: BackendError,
  },

  #[error("AMI build failed: {0}")]
  AmiBuild(#[source] BackendError),

  #[error("no AMI target found in configuration")]
  NoAmiTarget,

  #[error("AWS region must be specified (use --region, set it in the template, or configure aws.region)")]
  MissingRegion,

  #[error("registry must be specified for push")]
  MissingRegistry,

  /// A manifest list needs the registry digest of every image it references.
  #[error("image {image_ref} has no digest; push it before creating a manifest list")]
  MissingDigest { image_ref: String },

  #[error("no images to include in the manifest list")]
  NoManifestEntries,

  #[error("create manifest list {reference}: {source}")]
  ManifestList {
    reference: String,
    #[source]
    source: BackendError,
  },

  /// The service deadline passed. The builder was still closed.
  #[error("build deadline exceeded")]
  Timeout,

  /// A build or push task panicked.
  #[error("build task failed: {0}")]
  Task(#[from] tokio::task::JoinError),
}

impl BuildError {
  /// Results that completed before a multi-arch build was aborted.
  pub fn partial_results(&self) -> Option<&[Option<BuildResult>]> {
    match self {
      BuildError::MultiArch { partial, .. } => Some(partial),
      _ => None,
    }
  }
}
