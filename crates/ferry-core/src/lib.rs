//! Core types and configuration for ferry.
//!
//! This crate defines the `ferry.toml` schema ([`FerryConfig`]), image
//! naming ([`image_name`]), build-argument handling ([`BuildArgs`]), the
//! progress sink used by the build pipeline ([`ProgressLog`]), and shared
//! error types.

pub mod args;
pub mod config;
pub mod error;
pub mod log;
pub mod naming;

pub use args::{BuildArgs, merge_args, parse_build_args};
pub use config::{
    BuildConfig, FerryConfig, FunctionConfig, ImageConfig, RegistryConfig, TemplatesConfig,
};
pub use error::{Error, Result};
pub use log::{ProgressLog, TracingLog};
pub use naming::{DEFAULT_TAG, image_name, split_reference};
