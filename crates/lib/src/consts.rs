/// Directory and file-name prefix used for config, data and cache paths.
pub const APP_NAME: &str = "warpgate";

/// Version stamped into every build manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix for environment variables that override the global config.
pub const ENV_PREFIX: &str = "WARPGATE";
