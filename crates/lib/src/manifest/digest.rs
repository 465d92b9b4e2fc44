//! Per-architecture digest files and multi-arch manifest entries.
//!
//! A digest file is named `digest-<image>-<arch>.txt` and holds a single digest string.
//! Variant platforms use `<arch>-<variant>` as the architecture part (`linux/arm/v7` is
//! `arm-v7`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::build::BuildResult;
use crate::platform::Platform;

const DIGEST_PREFIX: &str = "digest-";
const DIGEST_SUFFIX: &str = ".txt";

/// Architecture suffixes recognised when parsing digest file names.
pub const KNOWN_ARCH_SUFFIXES: &[&str] = &[
  "amd64", "arm64", "arm64-v8", "arm-v7", "arm-v6", "arm-v8", "ppc64le", "s390x", "386", "riscv64",
];

#[derive(Debug, Error)]
pub enum DigestError {
  #[error("empty digest provided")]
  Empty,

  #[error("invalid digest {digest:?}: {reason}")]
  Invalid { digest: String, reason: String },

  #[error("invalid digest file name {0} (expected digest-<image>-<arch>.txt)")]
  InvalidFileName(String),

  #[error("digest file {0} has an unknown architecture suffix")]
  UnknownArchitecture(String),

  #[error("io error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// A digest file read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct DigestFile {
  pub path: PathBuf,
  pub image_name: String,
  pub architecture: String,
  pub digest: String,
  pub modified: Option<SystemTime>,
}

/// One platform-specific image of a multi-arch manifest list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
  pub image_ref: String,
  pub digest: String,
  pub platform: String,
  pub os: String,
  pub architecture: String,
  pub variant: String,
}

/// Check that `digest` has the form `<algorithm>:<hex>`.
///
/// `sha256` and `sha512` digests must also have the matching hex length.
pub fn validate_digest(digest: &str) -> Result<(), DigestError> {
  let invalid = |reason: &str| DigestError::Invalid {
    digest: digest.to_string(),
    reason: reason.to_string(),
  };

  let (algorithm, encoded) = digest.split_once(':').ok_or_else(|| invalid("missing algorithm separator"))?;
  if algorithm.is_empty()
    || !algorithm
      .chars()
      .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '.' | '_' | '-'))
  {
    return Err(invalid("invalid algorithm"));
  }
  if encoded.is_empty() || encoded.chars().any(|c| c.is_ascii_uppercase()) {
    return Err(invalid("invalid encoding"));
  }
  let bytes = hex::decode(encoded).map_err(|e| invalid(&e.to_string()))?;

  let expected = match algorithm {
    "sha256" => Some(32),
    "sha512" => Some(64),
    _ => None,
  };
  if let Some(expected) = expected {
    if bytes.len() != expected {
      return Err(invalid("unexpected length"));
    }
  }
  Ok(())
}

/// `digest-<image>-<arch>.txt`
pub fn digest_filename(image_name: &str, arch: &str) -> String {
  format!("{DIGEST_PREFIX}{image_name}-{arch}{DIGEST_SUFFIX}")
}

/// Write `digest` to `<dir>/digest-<image>-<arch>.txt`, creating `dir` if needed.
pub fn save_digest_to_file(image_name: &str, arch: &str, digest: &str, dir: &Path) -> Result<PathBuf, DigestError> {
  if digest.is_empty() {
    return Err(DigestError::Empty);
  }

  fs::create_dir_all(dir).map_err(|source| DigestError::Io {
    path: dir.to_path_buf(),
    source,
  })?;

  let path = dir.join(digest_filename(image_name, arch));
  fs::write(&path, digest).map_err(|source| DigestError::Io {
    path: path.clone(),
    source,
  })?;

  info!(path = %path.display(), arch = %arch, "saved digest");
  Ok(path)
}

/// Architecture part of a result's digest file name.
///
/// Taken from the result's platform (`arm` + `v7` gives `arm-v7`), else its architecture,
/// else `fallback`.
pub fn digest_arch_label(result: &BuildResult, fallback: &str) -> String {
  match Platform::parse(&result.platform) {
    Some(Platform {
      arch,
      variant: Some(variant),
      ..
    }) => format!("{arch}-{variant}"),
    Some(platform) => platform.arch,
    None if !result.architecture.is_empty() => result.architecture.clone(),
    None => fallback.to_string(),
  }
}

/// Save the digest of every result that has one. Failures are logged and skipped.
///
/// `fallback_arch` labels results that carry neither a platform nor an architecture.
pub fn save_digests(image_name: &str, results: &[BuildResult], dir: &Path, fallback_arch: &str) {
  info!(dir = %dir.display(), "saving image digests");
  for result in results.iter().filter(|r| !r.digest.is_empty()) {
    let arch = digest_arch_label(result, fallback_arch);
    if let Err(e) = save_digest_to_file(image_name, &arch, &result.digest, dir) {
      warn!(arch = %arch, error = %e, "failed to save digest");
    }
  }
}

/// Read and validate one digest file.
pub fn parse_digest_file(path: &Path) -> Result<DigestFile, DigestError> {
  let basename = path
    .file_name()
    .and_then(|n| n.to_str())
    .unwrap_or_default()
    .to_string();

  let name_arch = basename
    .strip_prefix(DIGEST_PREFIX)
    .and_then(|s| s.strip_suffix(DIGEST_SUFFIX))
    .ok_or_else(|| DigestError::InvalidFileName(basename.clone()))?;

  let (image_name, architecture) = KNOWN_ARCH_SUFFIXES
    .iter()
    .find_map(|arch| {
      name_arch
        .strip_suffix(arch)
        .and_then(|rest| rest.strip_suffix('-'))
        .map(|image| (image.to_string(), arch.to_string()))
    })
    .ok_or_else(|| DigestError::UnknownArchitecture(basename.clone()))?;

  let io_err = |source| DigestError::Io {
    path: path.to_path_buf(),
    source,
  };
  let content = fs::read_to_string(path).map_err(io_err)?;
  let digest = content.trim().to_string();
  validate_digest(&digest)?;

  let modified = fs::metadata(path).map_err(io_err)?.modified().ok();

  Ok(DigestFile {
    path: path.to_path_buf(),
    image_name,
    architecture,
    digest,
    modified,
  })
}

/// Find the digest files for `image_name` in `dir`, sorted by path.
///
/// Files that fail to parse are skipped with a warning. A missing directory yields no files.
pub fn discover_digest_files(image_name: &str, dir: &Path) -> Result<Vec<DigestFile>, DigestError> {
  info!(dir = %dir.display(), image = %image_name, "discovering digest files");

  let entries = match fs::read_dir(dir) {
    Ok(entries) => entries,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
    Err(source) => {
      return Err(DigestError::Io {
        path: dir.to_path_buf(),
        source,
      });
    }
  };

  let prefix = format!("{DIGEST_PREFIX}{image_name}-");
  let mut paths: Vec<PathBuf> = entries
    .filter_map(Result::ok)
    .map(|entry| entry.path())
    .filter(|path| {
      path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(DIGEST_SUFFIX))
    })
    .collect();
  paths.sort();

  let mut files = Vec::with_capacity(paths.len());
  for path in paths {
    match parse_digest_file(&path) {
      // the prefix match also accepts longer names such as `<image>-extra`
      Ok(file) if file.image_name == image_name => files.push(file),
      Ok(file) => debug!(path = %path.display(), image = %file.image_name, "skipping digest for other image"),
      Err(e) => warn!(path = %path.display(), error = %e, "skipping invalid digest file"),
    }
  }

  Ok(files)
}

/// Convert build results into manifest list entries.
///
/// Results whose digest is set but malformed are skipped with a warning.
pub fn create_manifest_entries(results: &[BuildResult]) -> Vec<ManifestEntry> {
  results
    .iter()
    .filter_map(|result| {
      if !result.digest.is_empty() {
        if let Err(e) = validate_digest(&result.digest) {
          warn!(arch = %result.architecture, error = %e, "skipping result with invalid digest");
          return None;
        }
      }

      let platform = Platform::parse(&result.platform);
      Some(ManifestEntry {
        image_ref: result.image_ref.clone(),
        digest: result.digest.clone(),
        platform: result.platform.clone(),
        os: platform.as_ref().map(|p| p.os.clone()).unwrap_or_default(),
        architecture: platform.as_ref().map(|p| p.arch.clone()).unwrap_or_default(),
        variant: platform.and_then(|p| p.variant).unwrap_or_default(),
      })
    })
    .collect()
}
