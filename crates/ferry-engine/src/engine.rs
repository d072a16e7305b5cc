use futures_util::stream::BoxStream;

use ferry_core::BuildArgs;

use crate::auth::RegistryCredentials;
use crate::stream::StreamRecord;

/// Records produced by one engine operation, in arrival order.
pub type RecordStream<'a> = BoxStream<'a, Result<StreamRecord, EngineError>>;

/// Options for one image build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Recipe path inside the context archive.
    pub dockerfile: String,
    pub tags: Vec<String>,
    /// `None` values are resolved from the environment by the engine.
    pub build_args: BuildArgs,
    /// Network mode for build containers (empty = engine default).
    pub network: String,
}

/// Abstraction over the container engine for testability.
///
/// Production code uses [`DockerEngine`](crate::docker::DockerEngine);
/// tests substitute scripted fakes. Both operations return the engine's
/// progress output as a stream; interpreting it is left to the caller.
pub trait ImageEngine: Send + Sync {
    /// Build an image from an in-memory tar context.
    fn build_image(&self, context: Vec<u8>, options: BuildOptions) -> RecordStream<'_>;

    /// Push a tagged image reference.
    fn push_image(
        &self,
        reference: &str,
        credentials: Option<RegistryCredentials>,
    ) -> RecordStream<'_>;
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("cannot connect to the container engine")]
    Connect { source: bollard::errors::Error },

    #[error("container engine request failed")]
    Docker {
        #[from]
        source: bollard::errors::Error,
    },
}
