//! Container platform strings and host detection.
//!
//! A platform string has the form `os/arch` or `os/arch/variant`
//! (e.g. `linux/amd64`, `linux/arm/v7`).

pub mod arch;
pub mod paths;

use std::fmt;

/// Default operating system for container platforms.
pub const DEFAULT_OS: &str = "linux";

/// A parsed `os/arch[/variant]` platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
  pub os: String,
  pub arch: String,
  pub variant: Option<String>,
}

impl Platform {
  /// Platform for a Linux architecture, e.g. `linux/arm64`.
  pub fn linux(arch: &str) -> Self {
    Self {
      os: DEFAULT_OS.to_string(),
      arch: arch.to_string(),
      variant: None,
    }
  }

  /// Parse a platform string.
  ///
  /// Returns `None` for malformed input (no `/`, or an empty os/arch component).
  pub fn parse(s: &str) -> Option<Self> {
    let mut parts = s.split('/');
    let os = parts.next()?;
    let arch = parts.next()?;
    if os.is_empty() || arch.is_empty() {
      return None;
    }
    let variant = parts.next().filter(|v| !v.is_empty()).map(str::to_string);

    Some(Self {
      os: os.to_string(),
      arch: arch.to_string(),
      variant,
    })
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.variant {
      Some(variant) => write!(f, "{}/{}/{}", self.os, self.arch, variant),
      None => write!(f, "{}/{}", self.os, self.arch),
    }
  }
}

/// Returns the platform string for the current host (e.g. "linux/arm64").
pub fn host_platform() -> String {
  Platform {
    os: std::env::consts::OS.to_string(),
    arch: arch::host_arch(),
    variant: None,
  }
  .to_string()
}
