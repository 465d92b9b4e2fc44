//! Implementation of the `warpgate manifest` command.

use std::path::Path;

use anyhow::{Context, Result};

use warpgate_lib::manifest::read_manifest;

use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success, short_digest, symbols};

pub fn cmd_manifest(path: &Path, output: OutputFormat) -> Result<()> {
  let manifest = read_manifest(path).context("Failed to load build manifest")?;

  if output.is_json() {
    return print_json(&manifest);
  }

  print_success(&format!("{} {}", manifest.template, manifest.version));
  print_stat("Built", &manifest.timestamp.to_rfc3339());
  print_stat("Duration", &manifest.duration);
  print_stat("Pushed", if manifest.pushed { "yes" } else { "no" });
  print_stat("Warpgate", &manifest.warpgate_version);
  if let Some(list) = &manifest.manifest {
    print_stat("Manifest", &list.reference);
  }

  if manifest.builds.is_empty() {
    println!();
    print_info("No builds recorded.");
    return Ok(());
  }

  println!();
  println!("Builds:");
  for build in &manifest.builds {
    let target = if build.ami_id.is_empty() {
      build.image_ref.as_str()
    } else {
      build.ami_id.as_str()
    };
    println!(
      "  {} [{}] {} {} {}",
      symbols::INFO,
      build.kind,
      build.platform,
      symbols::ARROW,
      target
    );
    if !build.digest.is_empty() {
      println!("      digest {}", short_digest(&build.digest));
    }
  }

  Ok(())
}
