//! Build function images from templates and push them to a registry.
//!
//! This is the facade crate that re-exports the ferry sub-crates.
//! Use feature flags to control which components are included.
//!
//! # Feature flags
//!
//! | Feature | Default | Crate | Description |
//! |---------|---------|-------|-------------|
//! | `core` | yes | [`ferry-core`](https://crates.io/crates/ferry-core) | Configuration, image naming, build args |
//! | `build` | yes | [`ferry-build`](https://crates.io/crates/ferry-build) | Archives, stage contexts, template fetching |
//! | `engine` | yes | [`ferry-engine`](https://crates.io/crates/ferry-engine) | Docker builds, pushes, credentials |
//! | `pipeline` | yes | [`ferry-pipeline`](https://crates.io/crates/ferry-pipeline) | Worker pool and scheduler |
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use ferry::build::{GetterFetcher, TemplateSources};
//! use ferry::engine::DockerEngine;
//! use ferry::pipeline::{Scheduler, SchedulerOptions};
//! use ferry::{FerryConfig, TracingLog};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = Path::new(".");
//! let config = FerryConfig::load(dir)?;
//! let mut scheduler = Scheduler::new(
//!     SchedulerOptions::from_config(&config, dir),
//!     TemplateSources::from_config(&config.templates, dir),
//!     Arc::new(DockerEngine::connect()?),
//!     Arc::new(GetterFetcher),
//!     Arc::new(TracingLog),
//! );
//! for (name, function) in config.select_functions::<&str>(&[])? {
//!     scheduler.add_service(name, function.template.as_deref(), function.build_args())?;
//! }
//!
//! let ctx = tokio_util::sync::CancellationToken::new();
//! scheduler.download(&ctx).await?;
//! scheduler.build(&ctx).await?;
//! # Ok(())
//! # }
//! ```

// Core types flattened into root namespace for convenience.
#[cfg(feature = "core")]
pub use ferry_core::*;

/// Archives, stage contexts, and template fetching.
#[cfg(feature = "build")]
pub mod build {
    pub use ferry_build::*;
}

/// Container engine seam, Docker implementation, and credentials.
#[cfg(feature = "engine")]
pub mod engine {
    pub use ferry_engine::*;
}

/// Bounded worker pool and the fetch/build/push scheduler.
#[cfg(feature = "pipeline")]
pub mod pipeline {
    pub use ferry_pipeline::*;
}
