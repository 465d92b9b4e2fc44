//! Bounded-concurrency, fail-fast execution of per-architecture builds and pushes.
//!
//! # Result alignment
//!
//! Results are collected into a vector pre-sized to the number of requests. Every task
//! carries its own index and hands its outcome back to the collector loop, which is the
//! only place that writes `results[index]`. No two tasks share an index, so the vector
//! needs no lock and `results[i]` always corresponds to `requests[i]`. Keep that single
//! writer when changing this module: writing from inside the tasks would need shared
//! mutable state.
//!
//! # Cancellation
//!
//! The first failure aborts every remaining task (running or still waiting for a slot),
//! then the collector drains the set so nothing is left running when we return. Backends
//! observe the abort as their future being dropped.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::backend::{BackendError, Builder, ContainerBuilder};
use crate::build::requests::BuildRequest;
use crate::build::{BuildError, BuildResult};
use crate::config::DEFAULT_CONCURRENCY;

/// Concurrency used when a non-positive limit is requested.
pub const DEFAULT_MAX_CONCURRENCY: usize = DEFAULT_CONCURRENCY;

type TaskOutcome = (usize, String, Result<BuildResult, BackendError>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOrchestrator {
  max_concurrency: usize,
}

impl Default for BuildOrchestrator {
  fn default() -> Self {
    Self::new(DEFAULT_MAX_CONCURRENCY)
  }
}

impl BuildOrchestrator {
  /// Create an orchestrator running at most `max_concurrency` builds at once.
  /// Zero is replaced by [`DEFAULT_MAX_CONCURRENCY`].
  pub fn new(max_concurrency: usize) -> Self {
    let max_concurrency = if max_concurrency == 0 {
      DEFAULT_MAX_CONCURRENCY
    } else {
      max_concurrency
    };
    Self { max_concurrency }
  }

  pub fn max_concurrency(&self) -> usize {
    self.max_concurrency
  }

  /// Build every request, at most `max_concurrency` at a time.
  ///
  /// On success the returned vector is aligned with `requests`. On the first failure all
  /// other builds are cancelled and [`BuildError::MultiArch`] is returned carrying the
  /// results that had already completed.
  pub async fn build_multi_arch(
    &self,
    requests: &[BuildRequest],
    builder: Arc<dyn ContainerBuilder>,
  ) -> Result<Vec<BuildResult>, BuildError> {
    info!(count = requests.len(), concurrency = self.max_concurrency, "starting multi-arch build");

    let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
    let mut join_set: JoinSet<TaskOutcome> = JoinSet::new();

    for (index, request) in requests.iter().enumerate() {
      let mut config = request.config.clone();
      config.base.platform = request.platform.clone();
      // Each architecture gets its own build-time tag (`name:<arch>`) so concurrent builds
      // of one image never overwrite each other in the local image store. The final
      // registry tag stays `request.tag`.
      config.version = request.architecture.clone();

      let arch = request.architecture.clone();
      let semaphore = semaphore.clone();
      let builder = builder.clone();

      join_set.spawn(async move {
        let _permit = match semaphore.acquire_owned().await {
          Ok(permit) => permit,
          Err(_) => return (index, arch, Err(BackendError::Rejected("build slots closed".to_string()))),
        };

        info!(image = %config.name, arch = %arch, "building");
        let result = builder.build(&config).await;
        (index, arch, result)
      });
    }

    let mut results: Vec<Option<BuildResult>> = vec![None; requests.len()];
    let mut failure: Option<BuildError> = None;

    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((index, arch, Ok(mut result))) => {
          if result.architecture.is_empty() {
            result.architecture = arch.clone();
          }
          info!(arch = %arch, image = %result.image_ref, "architecture build complete");
          results[index] = Some(result);
        }
        Ok((index, arch, Err(source))) => {
          error!(arch = %arch, error = %source, "architecture build failed");
          if failure.is_none() {
            failure = Some(BuildError::ArchBuild {
              image: requests[index].config.name.clone(),
              arch,
              source,
            });
            join_set.abort_all();
          }
        }
        Err(join_err) if join_err.is_cancelled() => {}
        Err(join_err) => {
          error!(error = %join_err, "build task panicked");
          if failure.is_none() {
            failure = Some(BuildError::Task(join_err));
            join_set.abort_all();
          }
        }
      }
    }

    match failure {
      Some(source) => {
        let arch = match &source {
          BuildError::ArchBuild { arch, .. } => arch.clone(),
          _ => String::new(),
        };
        Err(BuildError::MultiArch {
          arch,
          source: Box::new(source),
          partial: results,
        })
      }
      None => {
        info!(count = requests.len(), "all architecture builds complete");
        Ok(results.into_iter().flatten().collect())
      }
    }
  }

  /// Push every result's image to `registry` concurrently, one task per result.
  ///
  /// A non-empty digest returned by the registry replaces the stored digest. The first
  /// failure cancels the remaining pushes; completed pushes are not rolled back.
  pub async fn push_multi_arch(
    &self,
    results: &mut [BuildResult],
    registry: &str,
    builder: Arc<dyn ContainerBuilder>,
  ) -> Result<(), BuildError> {
    info!(count = results.len(), registry = %registry, "pushing architecture images");

    let mut join_set: JoinSet<(usize, String, Result<String, BackendError>)> = JoinSet::new();

    for (index, result) in results.iter().enumerate() {
      let image_ref = result.image_ref.clone();
      let registry = registry.to_string();
      let builder = builder.clone();

      join_set.spawn(async move {
        info!(image = %image_ref, registry = %registry, "pushing");
        let pushed = builder.push(&image_ref, &registry).await;
        (index, image_ref, pushed)
      });
    }

    let mut failure: Option<BuildError> = None;

    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((index, image_ref, Ok(digest))) => {
          if digest.is_empty() {
            info!(image = %image_ref, "pushed");
          } else {
            info!(image = %image_ref, digest = %digest, "pushed");
            results[index].digest = digest;
          }
        }
        Ok((_, image_ref, Err(source))) => {
          error!(image = %image_ref, error = %source, "push failed");
          if failure.is_none() {
            failure = Some(BuildError::Push { image_ref, source });
            join_set.abort_all();
          }
        }
        Err(join_err) if join_err.is_cancelled() => {}
        Err(join_err) => {
          error!(error = %join_err, "push task panicked");
          if failure.is_none() {
            failure = Some(BuildError::Task(join_err));
            join_set.abort_all();
          }
        }
      }
    }

    match failure {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }
}
