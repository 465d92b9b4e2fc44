//! Multi-architecture build orchestration.
//!
//! A build flows through these stages:
//!
//! 1. [`apply_overrides`] merges CLI options and global defaults into the template config
//! 2. [`create_build_requests`] expands the config into one request per architecture
//! 3. [`BuildOrchestrator`] runs the requests with bounded concurrency, failing fast
//! 4. [`BuildService`] ties these together with the builder lifecycle and pushing

pub mod options;
pub mod orchestrator;
pub mod requests;
pub mod service;
mod types;

pub use options::{BuildOptions, apply_overrides, determine_target_type};
pub use orchestrator::{BuildOrchestrator, DEFAULT_MAX_CONCURRENCY};
pub use requests::{BuildRequest, apply_arch_overrides, create_build_requests, extract_architectures_from_targets};
pub use service::BuildService;
pub use types::*;
