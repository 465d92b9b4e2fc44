//! Reading and writing build manifest files.

use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::debug;

use super::{BuildManifest, ManifestError};

/// Write `manifest` to `path` as indented JSON.
///
/// Missing parent directories are created (`0755`). The file is written through a
/// temporary sibling and renamed into place, and is readable by the owner only (`0600`).
pub fn write_manifest(path: &Path, manifest: &BuildManifest) -> Result<(), ManifestError> {
  if path.as_os_str().is_empty() {
    return Err(ManifestError::EmptyPath);
  }

  let dir = match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent,
    _ => Path::new("."),
  };
  create_dir(dir)?;

  let content = serde_json::to_string_pretty(manifest).map_err(ManifestError::Serialize)?;

  let write_err = |source| ManifestError::Write {
    path: path.to_path_buf(),
    source,
  };
  // NamedTempFile is created with owner-only permissions.
  let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
  temp.write_all(content.as_bytes()).map_err(write_err)?;
  temp.persist(path).map_err(|e| write_err(e.error))?;

  debug!(path = %path.display(), builds = manifest.builds.len(), "wrote build manifest");
  Ok(())
}

/// Read a manifest previously written by [`write_manifest`].
pub fn read_manifest(path: &Path) -> Result<BuildManifest, ManifestError> {
  if path.as_os_str().is_empty() {
    return Err(ManifestError::EmptyPath);
  }

  let content = fs::read_to_string(path).map_err(|source| ManifestError::Read {
    path: path.to_path_buf(),
    source,
  })?;

  serde_json::from_str(&content).map_err(|source| ManifestError::Parse {
    path: path.to_path_buf(),
    source,
  })
}

fn create_dir(dir: &Path) -> Result<(), ManifestError> {
  let mut builder = fs::DirBuilder::new();
  builder.recursive(true);
  #[cfg(unix)]
  {
    use std::os::unix::fs::DirBuilderExt;
    builder.mode(0o755);
  }
  builder.create(dir).map_err(|source| ManifestError::CreateDir {
    path: dir.to_path_buf(),
    source,
  })
}
