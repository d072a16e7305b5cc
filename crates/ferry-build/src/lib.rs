//! Build contexts, archives, and template fetching for ferry.
//!
//! # Stages
//!
//! ```text
//! template function (two stages)
//!   files   ── <fn>/… + generated Dockerfile      → untagged image (FILES=<fn>)
//!   handler ── <template>/… (+ <template>/Dockerfile) → tagged image (FUNCTION_IMG=<files image>)
//!
//! direct function (no template)
//!   direct  ── <fn>/… with its own Dockerfile     → tagged image
//! ```
//!
//! # Archives
//!
//! Build contexts are assembled in memory ([`archive::produce_archive`]).
//! Directory sources honour `.gitignore` and `.dockerignore` found at their
//! root; generated recipes are injected as synthetic entries and never
//! touch disk.
//!
//! # Templates
//!
//! [`template::TemplateSources`] maps template names to fetch sources and a
//! deterministic cache path; [`fetch::ContentFetcher`] retrieves them.

pub mod archive;
pub mod context;
pub mod fetch;
pub mod recipe;
pub mod template;

pub use archive::{ArchiveError, ArchiveSpec, EntryNaming, produce_archive};
pub use context::{
    ContextError, FunctionBuildSpec, Stage, StageContext, check_sources, check_template,
    direct_stage, files_stage, handler_stage,
};
pub use fetch::{ContentFetcher, FetchError, GetterFetcher};
pub use recipe::FilesRecipe;
pub use template::{TemplateRef, TemplateSources};
