//! Container builds driven through the `docker` CLI.
//!
//! The template is rendered into a Dockerfile in a scratch directory and built with
//! `docker buildx build --load`, so each architecture lands in the local image store under
//! its own tag. Child processes are killed when their future is dropped, which is how an
//! aborted multi-arch build stops its siblings. Manifest lists are assembled in the registry
//! with `docker buildx imagetools create`.

use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{BackendError, Builder, ContainerBuilder};
use crate::build::BuildResult;
use crate::config::{BuildConfig, Provisioner};
use crate::manifest::{ManifestEntry, format_duration};
use crate::platform::Platform;

const DEFAULT_DOCKER_BINARY: &str = "docker";
const SHELL_PROVISIONER: &str = "shell";

#[derive(Debug, Clone)]
pub struct DockerCliBuilder {
  binary: String,
}

impl Default for DockerCliBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl DockerCliBuilder {
  pub fn new() -> Self {
    Self::with_binary(DEFAULT_DOCKER_BINARY)
  }

  /// Use a specific docker-compatible binary (e.g. `podman`).
  pub fn with_binary(binary: impl Into<String>) -> Self {
    Self { binary: binary.into() }
  }

  async fn run(&self, args: &[String]) -> Result<String, BackendError> {
    let cmd = format!("{} {}", self.binary, args.join(" "));
    debug!(cmd = %cmd, "running docker");

    let output = Command::new(&self.binary)
      .args(args)
      .kill_on_drop(true)
      .output()
      .await?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
      return Err(BackendError::CommandFailed {
        cmd,
        code: output.status.code(),
        stderr,
      });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
  }

  async fn inspect(&self, image_ref: &str, format: &str) -> Result<String, BackendError> {
    self
      .run(&[
        "image".to_string(),
        "inspect".to_string(),
        "--format".to_string(),
        format.to_string(),
        image_ref.to_string(),
      ])
      .await
  }
}

/// Render a Dockerfile for `config`.
///
/// Returns the Dockerfile and notes about provisioners that could not be expressed.
pub fn render_dockerfile(config: &BuildConfig) -> (String, Vec<String>) {
  let mut lines = vec![format!("FROM {}", config.base.image)];
  let mut notes = Vec::new();

  for (key, value) in &config.base.env {
    lines.push(format!("ENV {key}={}", quote(value)));
  }

  for (index, provisioner) in config.provisioners.iter().enumerate() {
    if provisioner.kind != SHELL_PROVISIONER {
      notes.push(format!(
        "provisioner {index} ({}) is not supported by the docker backend and was skipped",
        provisioner.kind
      ));
      continue;
    }
    render_shell(provisioner, &mut lines);
  }

  lines.push(String::new());
  (lines.join("\n"), notes)
}

fn render_shell(provisioner: &Provisioner, lines: &mut Vec<String>) {
  for (key, value) in &provisioner.environment {
    lines.push(format!("ENV {key}={}", quote(value)));
  }
  if !provisioner.working_dir.is_empty() {
    lines.push(format!("WORKDIR {}", provisioner.working_dir));
  }
  if !provisioner.user.is_empty() {
    lines.push(format!("USER {}", provisioner.user));
  }
  if !provisioner.inline.is_empty() {
    lines.push(format!("RUN {}", provisioner.inline.join(" && ")));
  }
}

fn quote(value: &str) -> String {
  format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Arguments for `docker buildx build`, with the build context last.
pub fn build_args(config: &BuildConfig, image_ref: &str, dockerfile: &str, context: &str) -> Vec<String> {
  let mut args: Vec<String> = ["buildx", "build", "--load", "--file", dockerfile, "--tag", image_ref]
    .iter()
    .map(|s| s.to_string())
    .collect();

  if !config.base.platform.is_empty() {
    args.push("--platform".to_string());
    args.push(config.base.platform.clone());
  }
  if config.base.pull {
    args.push("--pull".to_string());
  }
  if config.no_cache {
    args.push("--no-cache".to_string());
  }
  for (key, value) in &config.build_args {
    args.push("--build-arg".to_string());
    args.push(format!("{key}={value}"));
  }
  for (key, value) in &config.labels {
    args.push("--label".to_string());
    args.push(format!("{key}={value}"));
  }
  for source in &config.cache_from {
    args.push("--cache-from".to_string());
    args.push(source.clone());
  }
  for dest in &config.cache_to {
    args.push("--cache-to".to_string());
    args.push(dest.clone());
  }

  args.push(context.to_string());
  args
}

/// Arguments for `docker buildx imagetools create`, one source image per entry.
pub fn manifest_list_args(reference: &str, entries: &[ManifestEntry]) -> Vec<String> {
  let mut args: Vec<String> = ["buildx", "imagetools", "create", "--tag", reference]
    .iter()
    .map(|s| s.to_string())
    .collect();
  args.extend(entries.iter().map(|entry| entry.image_ref.clone()));
  args
}

/// `<registry>/<image_ref>`, unless `image_ref` already starts with the registry.
pub fn remote_ref(image_ref: &str, registry: &str) -> String {
  let registry = registry.trim_end_matches('/');
  if image_ref.starts_with(&format!("{registry}/")) {
    image_ref.to_string()
  } else {
    format!("{registry}/{image_ref}")
  }
}

#[async_trait]
impl Builder for DockerCliBuilder {
  async fn build(&self, config: &BuildConfig) -> Result<BuildResult, BackendError> {
    let started = Instant::now();
    let image_ref = format!("{}:{}", config.name, config.version);
    let (dockerfile, notes) = render_dockerfile(config);
    for note in &notes {
      warn!(image = %image_ref, "{note}");
    }

    let context = tempfile::tempdir()?;
    let dockerfile_path = context.path().join("Dockerfile");
    tokio::fs::write(&dockerfile_path, &dockerfile).await?;

    info!(image = %image_ref, platform = %config.base.platform, "docker build");
    let args = build_args(
      config,
      &image_ref,
      &dockerfile_path.to_string_lossy(),
      &context.path().to_string_lossy(),
    );
    self.run(&args).await?;

    let digest = self.inspect(&image_ref, "{{.Id}}").await?;
    let architecture = Platform::parse(&config.base.platform)
      .map(|p| p.arch)
      .or_else(|| config.architectures.first().cloned())
      .unwrap_or_default();

    Ok(BuildResult {
      image_ref,
      digest,
      architecture,
      platform: config.base.platform.clone(),
      duration: format_duration(started.elapsed()),
      notes,
      ..Default::default()
    })
  }

  async fn close(&self) -> Result<(), BackendError> {
    Ok(())
  }
}

#[async_trait]
impl ContainerBuilder for DockerCliBuilder {
  async fn push(&self, image_ref: &str, registry: &str) -> Result<String, BackendError> {
    let remote = remote_ref(image_ref, registry);
    if remote != image_ref {
      self.tag(image_ref, &remote).await?;
    }
    self.run(&["push".to_string(), remote.clone()]).await?;

    // RepoDigests entries look like `<repo>@sha256:...`
    match self.inspect(&remote, "{{index .RepoDigests 0}}").await {
      Ok(repo_digest) => Ok(
        repo_digest
          .split_once('@')
          .map(|(_, digest)| digest.to_string())
          .unwrap_or_default(),
      ),
      Err(e) => {
        warn!(image = %remote, error = %e, "could not read pushed digest");
        Ok(String::new())
      }
    }
  }

  async fn push_digest(&self, image_ref: &str, registry: &str) -> Result<String, BackendError> {
    let digest = self.push(image_ref, registry).await?;
    let remote = remote_ref(image_ref, registry);
    if remote != image_ref {
      // drop the local alias; the registry copy is addressed by digest from here on
      if let Err(e) = self.remove(&remote).await {
        debug!(image = %remote, error = %e, "failed to remove local alias");
      }
    }
    Ok(digest)
  }

  async fn tag(&self, image_ref: &str, new_tag: &str) -> Result<(), BackendError> {
    self
      .run(&["tag".to_string(), image_ref.to_string(), new_tag.to_string()])
      .await
      .map(|_| ())
  }

  async fn remove(&self, image_ref: &str) -> Result<(), BackendError> {
    self
      .run(&["rmi".to_string(), image_ref.to_string()])
      .await
      .map(|_| ())
  }

  async fn create_manifest_list(&self, reference: &str, entries: &[ManifestEntry]) -> Result<String, BackendError> {
    if entries.is_empty() {
      return Err(BackendError::Rejected("no manifest entries provided".to_string()));
    }
    if let Some(entry) = entries.iter().find(|e| e.digest.is_empty()) {
      return Err(BackendError::Rejected(format!("no digest found for {}", entry.platform)));
    }

    info!(reference = %reference, count = entries.len(), "creating manifest list");
    self.run(&manifest_list_args(reference, entries)).await?;

    let inspect = [
      "buildx".to_string(),
      "imagetools".to_string(),
      "inspect".to_string(),
      "--format".to_string(),
      "{{json .Manifest}}".to_string(),
      reference.to_string(),
    ];
    match self.run(&inspect).await {
      Ok(raw) => Ok(
        serde_json::from_str::<serde_json::Value>(&raw)
          .ok()
          .and_then(|manifest| manifest.get("digest")?.as_str().map(str::to_string))
          .unwrap_or_default(),
      ),
      Err(e) => {
        warn!(reference = %reference, error = %e, "could not read manifest list digest");
        Ok(String::new())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::BaseImage;
  use std::collections::BTreeMap;

  fn config() -> BuildConfig {
    BuildConfig {
      name: "myimage".to_string(),
      version: "amd64".to_string(),
      base: BaseImage {
        image: "ubuntu:22.04".to_string(),
        platform: "linux/amd64".to_string(),
        env: BTreeMap::from([("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string())]),
        ..Default::default()
      },
      provisioners: vec![Provisioner::shell(["apt-get update", "apt-get install -y curl"])],
      ..Default::default()
    }
  }

  #[test]
  fn renders_shell_provisioners() {
    let mut config = config();
    config.provisioners.push(Provisioner {
      kind: "shell".to_string(),
      inline: vec!["make install".to_string()],
      environment: BTreeMap::from([("PREFIX".to_string(), "/opt/tools".to_string())]),
      working_dir: "/src".to_string(),
      user: "builder".to_string(),
      ..Default::default()
    });

    let (dockerfile, notes) = render_dockerfile(&config);

    assert!(notes.is_empty());
    assert_eq!(
      dockerfile,
      "FROM ubuntu:22.04\n\
       ENV DEBIAN_FRONTEND=\"noninteractive\"\n\
       RUN apt-get update && apt-get install -y curl\n\
       ENV PREFIX=\"/opt/tools\"\n\
       WORKDIR /src\n\
       USER builder\n\
       RUN make install\n"
    );
  }

  #[test]
  fn unsupported_provisioners_become_notes() {
    let mut config = config();
    config.provisioners.push(Provisioner {
      kind: "ansible".to_string(),
      ..Default::default()
    });

    let (dockerfile, notes) = render_dockerfile(&config);

    assert_eq!(notes.len(), 1);
    assert!(notes[0].contains("ansible"));
    assert!(!dockerfile.contains("ansible"));
  }

  #[test]
  fn build_args_carry_config() {
    let mut config = config();
    config.no_cache = true;
    config.base.pull = true;
    config.build_args = BTreeMap::from([("VERSION".to_string(), "1.0".to_string())]);
    config.labels = BTreeMap::from([("maintainer".to_string(), "ops".to_string())]);
    config.cache_from = vec!["type=registry,ref=ghcr.io/org/cache".to_string()];

    let args = build_args(&config, "myimage:amd64", "/ctx/Dockerfile", "/ctx");

    assert_eq!(&args[..3], ["buildx", "build", "--load"]);
    assert_eq!(args.last().unwrap(), "/ctx");
    let joined = args.join(" ");
    assert!(joined.contains("--tag myimage:amd64"));
    assert!(joined.contains("--platform linux/amd64"));
    assert!(joined.contains("--pull"));
    assert!(joined.contains("--no-cache"));
    assert!(joined.contains("--build-arg VERSION=1.0"));
    assert!(joined.contains("--label maintainer=ops"));
    assert!(joined.contains("--cache-from type=registry,ref=ghcr.io/org/cache"));
    assert!(!joined.contains("--cache-to"));
  }

  #[test]
  fn remote_ref_prefixes_registry_once() {
    assert_eq!(remote_ref("myimage:amd64", "ghcr.io/org"), "ghcr.io/org/myimage:amd64");
    assert_eq!(remote_ref("myimage:amd64", "ghcr.io/org/"), "ghcr.io/org/myimage:amd64");
    assert_eq!(remote_ref("ghcr.io/org/myimage:amd64", "ghcr.io/org"), "ghcr.io/org/myimage:amd64");
  }

  #[test]
  fn manifest_list_args_reference_each_image() {
    let entries = [
      ManifestEntry {
        image_ref: "ghcr.io/org/myimage@sha256:aa".to_string(),
        ..Default::default()
      },
      ManifestEntry {
        image_ref: "ghcr.io/org/myimage@sha256:bb".to_string(),
        ..Default::default()
      },
    ];

    let args = manifest_list_args("ghcr.io/org/myimage:1.0", &entries);
    assert_eq!(
      args,
      [
        "buildx",
        "imagetools",
        "create",
        "--tag",
        "ghcr.io/org/myimage:1.0",
        "ghcr.io/org/myimage@sha256:aa",
        "ghcr.io/org/myimage@sha256:bb",
      ]
    );
  }

  #[tokio::test]
  async fn manifest_list_requires_digests() {
    let builder = DockerCliBuilder::with_binary("/nonexistent/warpgate-docker");

    let err = builder.create_manifest_list("ghcr.io/org/myimage:1.0", &[]).await.unwrap_err();
    assert!(matches!(err, BackendError::Rejected(_)));

    let entry = ManifestEntry {
      image_ref: "ghcr.io/org/myimage@".to_string(),
      platform: "linux/arm64".to_string(),
      ..Default::default()
    };
    let err = builder
      .create_manifest_list("ghcr.io/org/myimage:1.0", &[entry])
      .await
      .unwrap_err();
    assert!(err.to_string().contains("linux/arm64"));
  }

  #[tokio::test]
  async fn missing_binary_is_an_io_error() {
    let builder = DockerCliBuilder::with_binary("/nonexistent/warpgate-docker");
    let err = builder.build(&config()).await.unwrap_err();
    assert!(matches!(err, BackendError::Io(_)));
    assert!(builder.close().await.is_ok());
  }
}
