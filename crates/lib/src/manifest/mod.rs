//! Build manifests and per-architecture digest files.
//!
//! The build manifest is the durable JSON record of one invocation: which builds ran,
//! what they produced and whether they were pushed. Digest files hold one pushed digest
//! per architecture so a later step can assemble a multi-arch manifest list.

pub mod digest;
mod storage;
mod types;

use std::path::PathBuf;

use thiserror::Error;

pub use digest::{
  DigestError, DigestFile, KNOWN_ARCH_SUFFIXES, ManifestEntry, create_manifest_entries, digest_arch_label,
  digest_filename, discover_digest_files, parse_digest_file, save_digest_to_file, save_digests, validate_digest,
};
pub use storage::{read_manifest, write_manifest};
pub use types::{BuildManifest, ManifestBuild, ManifestRef, format_duration};

/// Errors from reading or writing a build manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("manifest path cannot be empty")]
  EmptyPath,

  #[error("failed to create manifest directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write manifest {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to read manifest {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to serialize manifest: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("failed to parse manifest {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}
