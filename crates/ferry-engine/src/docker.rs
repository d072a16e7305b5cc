use std::collections::HashMap;

use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::image::{BuildImageOptions, PushImageOptions};
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{debug, warn};

use ferry_core::{BuildArgs, split_reference};

use crate::auth::RegistryCredentials;
use crate::engine::{BuildOptions, EngineError, ImageEngine, RecordStream};
use crate::stream::StreamRecord;

/// Image engine backed by the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connects using `DOCKER_HOST` or the platform's default socket.
    pub fn connect() -> Result<Self, EngineError> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| EngineError::Connect { source: e })?;
        Ok(Self { docker })
    }

    /// Daemon version string, also used as a reachability check.
    pub async fn version(&self) -> Result<String, EngineError> {
        let version = self
            .docker
            .version()
            .await
            .map_err(|e| EngineError::Connect { source: e })?;
        Ok(version.version.unwrap_or_else(|| "unknown".to_owned()))
    }
}

impl ImageEngine for DockerEngine {
    fn build_image(&self, context: Vec<u8>, options: BuildOptions) -> RecordStream<'_> {
        let buildargs = resolve_build_args(&options.build_args);
        if options.tags.len() > 1 {
            warn!(tags = ?options.tags, "engine accepts one tag per build, using the first");
        }

        let build_options = BuildImageOptions {
            dockerfile: options.dockerfile,
            t: options.tags.into_iter().next().unwrap_or_default(),
            buildargs,
            networkmode: options.network,
            rm: true,
            ..Default::default()
        };
        debug!(
            dockerfile = %build_options.dockerfile,
            tag = %build_options.t,
            context_bytes = context.len(),
            "starting engine build"
        );

        self.docker
            .build_image(build_options, None, Some(Bytes::from(context)))
            .map(|item| match item {
                Ok(info) => Ok(StreamRecord::from_build_info(info)),
                Err(e) => stream_failure(e),
            })
            .filter_map(|item| async move { item.transpose() })
            .boxed()
    }

    fn push_image(
        &self,
        reference: &str,
        credentials: Option<RegistryCredentials>,
    ) -> RecordStream<'_> {
        let (repository, tag) = split_reference(reference);
        let options = PushImageOptions {
            tag: tag.to_owned(),
        };
        let credentials = credentials.map(docker_credentials);
        debug!(repository, tag, "starting engine push");

        self.docker
            .push_image(repository, Some(options), credentials)
            .map(|item| match item {
                Ok(info) => Ok(StreamRecord::from_push_info(info)),
                Err(e) => stream_failure(e),
            })
            .filter_map(|item| async move { item.transpose() })
            .boxed()
    }
}

/// Declared values are passed through; `None` values take the variable of
/// the same name from the environment and are dropped when it is unset.
fn resolve_build_args(args: &BuildArgs) -> HashMap<String, String> {
    args.iter()
        .filter_map(|(name, value)| match value {
            Some(v) => Some((name.clone(), v.clone())),
            None => std::env::var(name).ok().map(|v| (name.clone(), v)),
        })
        .collect()
}

/// Errors the daemon reports inside the stream become error records; any
/// other client failure ends the stream.
fn stream_failure(error: bollard::errors::Error) -> Result<Option<StreamRecord>, EngineError> {
    match error {
        bollard::errors::Error::DockerStreamError { error } => {
            Ok(Some(StreamRecord::Error(error)))
        }
        other => Err(EngineError::Docker { source: other }),
    }
}

fn docker_credentials(credentials: RegistryCredentials) -> DockerCredentials {
    DockerCredentials {
        username: credentials.username,
        password: credentials.password,
        identitytoken: credentials.identity_token,
        serveraddress: Some(credentials.server_address).filter(|s| !s.is_empty()),
        ..Default::default()
    }
}
