//! warpgate-lib: multi-architecture image build orchestration.
//!
//! - `config`: templates ([`config::BuildConfig`]) and user-level defaults
//! - `build`: override resolution, per-architecture requests, the orchestrator and service
//! - `backend`: the builder capabilities the core drives, plus a docker CLI implementation
//! - `manifest`: the persisted build record and per-architecture digest files

pub mod backend;
pub mod build;
pub mod config;
pub mod consts;
pub mod manifest;
pub mod platform;
pub mod util;
