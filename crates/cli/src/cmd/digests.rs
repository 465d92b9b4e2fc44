//! Implementation of the `warpgate digests` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use warpgate_lib::manifest::discover_digest_files;
use warpgate_lib::platform::paths::digests_dir;

use crate::output::{OutputFormat, print_info, print_json, print_success, symbols};

pub fn cmd_digests(image: &str, dir: Option<PathBuf>, output: OutputFormat) -> Result<()> {
  let dir = dir.unwrap_or_else(digests_dir);
  let files = discover_digest_files(image, &dir)
    .with_context(|| format!("Failed to read digest files in {}", dir.display()))?;

  if output.is_json() {
    let items: Vec<_> = files
      .iter()
      .map(|f| {
        serde_json::json!({
          "image": f.image_name,
          "architecture": f.architecture,
          "digest": f.digest,
          "path": f.path,
        })
      })
      .collect();
    return print_json(&items);
  }

  if files.is_empty() {
    print_info(&format!("No digest files for {} in {}", image, dir.display()));
    return Ok(());
  }

  print_success(&format!("{} digest file(s) for {}", files.len(), image));
  for file in &files {
    println!("  {} {} {} {}", symbols::INFO, file.architecture, symbols::ARROW, file.digest);
  }

  Ok(())
}
