use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use ferry_build::{ArchiveError, Stage, StageContext, produce_archive};
use ferry_core::ProgressLog;

use crate::engine::{BuildOptions, EngineError, ImageEngine};
use crate::stream::{StreamError, collect};

/// Outcome of one successful stage build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub function_name: String,
    pub stage: Stage,
    /// Engine-assigned image id (from the last aux record).
    pub image_id: String,
    /// Reference later stages should use: the tag when one was applied,
    /// otherwise the image id.
    pub image_reference: String,
}

/// Turns stage contexts into images.
pub struct ImageBuilder<E> {
    engine: Arc<E>,
    log: Arc<dyn ProgressLog>,
}

impl<E> Clone for ImageBuilder<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            log: Arc::clone(&self.log),
        }
    }
}

impl<E: ImageEngine> ImageBuilder<E> {
    pub fn new(engine: Arc<E>, log: Arc<dyn ProgressLog>) -> Self {
        Self { engine, log }
    }

    /// Archive the context, submit it, and interpret the progress stream.
    ///
    /// The first error record fails the build even if aux records follow it.
    pub async fn build(
        &self,
        context: StageContext,
        cancel: &CancellationToken,
    ) -> Result<BuildResult, BuildError> {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        let StageContext {
            function,
            stage,
            archive,
            dockerfile,
            build_args,
            tags,
            network,
        } = context;

        let tar = tokio::task::spawn_blocking(move || produce_archive(&archive))
            .await
            .map_err(|e| BuildError::ArchiveTask { source: e })??;
        debug!(function, %stage, bytes = tar.len(), "context archived");

        self.log.print(&format!("Building {function} ({stage})"));
        let tag = tags.first().cloned();
        let options = BuildOptions {
            dockerfile,
            tags,
            build_args,
            network,
        };

        let records = self.engine.build_image(tar, options);
        let collected = collect(records, self.log.as_ref(), cancel)
            .await
            .map_err(|e| match e {
                StreamError::Reported { message } => BuildError::Reported { message },
                StreamError::Engine { source } => BuildError::Engine { source },
                StreamError::Cancelled => BuildError::Cancelled,
            })?;

        let image_id = collected
            .last_image_id()
            .ok_or(BuildError::NoResult)?
            .to_owned();
        let image_reference = tag.unwrap_or_else(|| image_id.clone());
        info!(function, %stage, image_id, "stage built");

        Ok(BuildResult {
            function_name: function,
            stage,
            image_id,
            image_reference,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to archive build context")]
    Archive {
        #[from]
        source: ArchiveError,
    },

    #[error("archive task failed")]
    ArchiveTask { source: tokio::task::JoinError },

    #[error("engine error")]
    Engine { source: EngineError },

    #[error("{message}")]
    Reported { message: String },

    #[error("build produced no image")]
    NoResult,

    #[error("cancelled")]
    Cancelled,
}
