use std::fmt;

/// How an architecture will be built on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStrategy {
  /// Host and target architectures match.
  Native,
  /// Target differs from the host; the backend has to emulate it (QEMU).
  CrossCompile,
}

impl BuildStrategy {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Native => "native",
      Self::CrossCompile => "cross-compile",
    }
  }
}

impl fmt::Display for BuildStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Normalize an architecture name to its container-platform spelling.
///
/// Unknown names are returned unchanged.
pub fn normalize_arch(arch: &str) -> &str {
  match arch {
    "amd64" | "x86_64" | "x64" => "amd64",
    "arm64" | "aarch64" => "arm64",
    "arm" | "armv7" | "armv7l" => "arm",
    "386" | "i386" | "i686" => "386",
    other => other,
  }
}

/// Returns the host CPU architecture in container-platform spelling (e.g. "amd64").
pub fn host_arch() -> String {
  normalize_arch(std::env::consts::ARCH).to_string()
}

/// Decide between a native and an emulated build of `target` on `host`.
pub fn detect_strategy(host: &str, target: &str) -> BuildStrategy {
  if normalize_arch(host) == normalize_arch(target) {
    BuildStrategy::Native
  } else {
    BuildStrategy::CrossCompile
  }
}
