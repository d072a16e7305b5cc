use std::fmt;
use std::path::{Path, PathBuf};

use ferry_core::{BuildArgs, merge_args};

use crate::archive::{ArchiveSpec, EntryNaming, base_name};
use crate::recipe::{FilesRecipe, RECIPE_FILE};

/// Build argument carrying the archived source folder name into the files stage.
pub const FILES_ARG: &str = "FILES";
/// Build argument carrying the files-stage image into the handler stage.
pub const FUNCTION_IMG_ARG: &str = "FUNCTION_IMG";

/// Everything needed to build one function. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionBuildSpec {
    pub name: String,
    /// `None` selects the direct mode: the function ships its own Dockerfile.
    pub template: Option<String>,
    pub files_path: PathBuf,
    /// Local cache path of the fetched template.
    pub template_path: Option<PathBuf>,
    pub build_args: BuildArgs,
    /// Network mode for build containers (empty = engine default).
    pub network: String,
    /// Final image reference, `[registry/][prefix]name:tag`.
    pub image: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// User sources plus the generated recipe, as an intermediate image.
    Files,
    /// Template wrapping the files image; produces the tagged image.
    Handler,
    /// Function built from its own Dockerfile; produces the tagged image.
    Direct,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Files => "files",
            Self::Handler => "handler",
            Self::Direct => "direct",
        })
    }
}

/// The build context and options for one stage.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub function: String,
    pub stage: Stage,
    pub archive: Vec<ArchiveSpec>,
    /// Recipe path inside the archive.
    pub dockerfile: String,
    pub build_args: BuildArgs,
    pub tags: Vec<String>,
    pub network: String,
}

/// Files stage: the function folder (named by its base name) plus the
/// generated recipe at the archive root.
pub fn files_stage(
    spec: &FunctionBuildSpec,
    recipe: &FilesRecipe<'_>,
) -> Result<StageContext, ContextError> {
    require_dir("function source", &spec.files_path)?;

    let files = ArchiveSpec::directory(&spec.files_path, EntryNaming::Prefixed);
    let mut build_args = BuildArgs::new();
    build_args.insert(FILES_ARG.to_owned(), Some(files.root_name()));

    Ok(StageContext {
        function: spec.name.clone(),
        stage: Stage::Files,
        archive: vec![files, ArchiveSpec::file(RECIPE_FILE, recipe.render())],
        dockerfile: RECIPE_FILE.to_owned(),
        build_args,
        tags: Vec::new(),
        network: spec.network.clone(),
    })
}

/// Handler stage: the fetched template, named by its base name so its recipe
/// is addressed as `<template>/Dockerfile`. `FUNCTION_IMG` always wins over a
/// declared argument of the same name.
pub fn handler_stage(
    spec: &FunctionBuildSpec,
    files_image: &str,
) -> Result<StageContext, ContextError> {
    let template_path = spec
        .template_path
        .as_deref()
        .ok_or_else(|| ContextError::NoTemplate {
            function: spec.name.clone(),
        })?;
    require_dir("template", template_path)?;
    require_file("template recipe", &template_path.join(RECIPE_FILE))?;

    let mut injected = BuildArgs::new();
    injected.insert(FUNCTION_IMG_ARG.to_owned(), Some(files_image.to_owned()));

    Ok(StageContext {
        function: spec.name.clone(),
        stage: Stage::Handler,
        archive: vec![ArchiveSpec::directory(template_path, EntryNaming::Prefixed)],
        dockerfile: format!("{}/{RECIPE_FILE}", base_name(template_path)),
        build_args: merge_args(&spec.build_args, &injected),
        tags: vec![spec.image.clone()],
        network: spec.network.clone(),
    })
}

/// Direct stage: the function folder is the whole context and carries its
/// own recipe at the root.
pub fn direct_stage(spec: &FunctionBuildSpec) -> Result<StageContext, ContextError> {
    require_dir("function source", &spec.files_path)?;
    require_file("function recipe", &spec.files_path.join(RECIPE_FILE))?;

    Ok(StageContext {
        function: spec.name.clone(),
        stage: Stage::Direct,
        archive: vec![ArchiveSpec::directory(&spec.files_path, EntryNaming::Relative)],
        dockerfile: RECIPE_FILE.to_owned(),
        build_args: spec.build_args.clone(),
        tags: vec![spec.image.clone()],
        network: spec.network.clone(),
    })
}

/// Checks what is knowable when a function is registered: its source folder,
/// its own recipe in direct mode, and the template recipe if the template is
/// already in the cache. A template not fetched yet passes.
pub fn check_sources(spec: &FunctionBuildSpec) -> Result<(), ContextError> {
    require_dir("function source", &spec.files_path)?;
    match &spec.template_path {
        None => require_file("function recipe", &spec.files_path.join(RECIPE_FILE)),
        Some(path) if path.exists() => require_file("template recipe", &path.join(RECIPE_FILE)),
        Some(_) => Ok(()),
    }
}

/// Checks that the function's template has been fetched with its recipe.
pub fn check_template(spec: &FunctionBuildSpec) -> Result<(), ContextError> {
    let Some(path) = &spec.template_path else {
        return Ok(());
    };
    require_dir("template", path)?;
    require_file("template recipe", &path.join(RECIPE_FILE))
}

fn require_dir(what: &'static str, path: &Path) -> Result<(), ContextError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(ContextError::NotFound {
            what,
            path: path.to_path_buf(),
        })
    }
}

fn require_file(what: &'static str, path: &Path) -> Result<(), ContextError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ContextError::NotFound {
            what,
            path: path.to_path_buf(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("{what} not found at {path}")]
    NotFound { what: &'static str, path: PathBuf },

    #[error("function '{function}' has no template to build a handler from")]
    NoTemplate { function: String },
}
