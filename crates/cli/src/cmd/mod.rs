mod build;
mod digests;
mod info;
mod manifest;

pub use build::{BuildArgs, cmd_build};
pub use digests::cmd_digests;
pub use info::cmd_info;
pub use manifest::cmd_manifest;
