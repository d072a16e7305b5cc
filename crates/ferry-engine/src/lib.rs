//! Image builds and registry pushes for ferry.
//!
//! [`ImageEngine`] is the seam to the container engine; [`DockerEngine`]
//! implements it over the Docker API. [`ImageBuilder`] and [`Publisher`]
//! drive one stage build or one push and interpret the engine's progress
//! stream ([`stream`]).

pub mod auth;
pub mod builder;
pub mod docker;
pub mod engine;
pub mod publisher;
pub mod stream;

pub use auth::{
    AuthError, CredentialStore, DEFAULT_REGISTRY_HOST, DockerConfigStore, RegistryCredentials,
    registry_host, resolve_credentials,
};
pub use builder::{BuildError, BuildResult, ImageBuilder};
pub use docker::DockerEngine;
pub use engine::{BuildOptions, EngineError, ImageEngine, RecordStream};
pub use publisher::{PushError, PushReceipt, Publisher};
pub use stream::{AuxResult, Collected, StreamError, StreamRecord, collect};
