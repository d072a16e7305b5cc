use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::{debug, trace};

/// Ignore files honoured at the root of an archived directory.
/// A path is excluded when any of them marks it ignored.
pub const IGNORE_FILES: &[&str] = &[".gitignore", ".dockerignore"];

/// How entries of a directory archive are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryNaming {
    /// `src/main.go`
    Relative,
    /// `<root base name>/src/main.go`
    Prefixed,
}

/// One source of archive entries.
#[derive(Debug, Clone)]
pub enum ArchiveSpec {
    /// Every leaf file (and symlink) under `path`, filtered by its ignore files.
    Directory { path: PathBuf, naming: EntryNaming },
    /// A single in-memory entry, e.g. a generated Dockerfile.
    File { name: String, body: Vec<u8> },
}

impl ArchiveSpec {
    pub fn directory(path: impl Into<PathBuf>, naming: EntryNaming) -> Self {
        Self::Directory {
            path: path.into(),
            naming,
        }
    }

    pub fn file(name: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::File {
            name: name.into(),
            body: body.into(),
        }
    }

    /// Name under which this source appears in the archive: the base name of
    /// a directory, or the entry name of a synthetic file.
    pub fn root_name(&self) -> String {
        match self {
            Self::Directory { path, .. } => base_name(path),
            Self::File { name, .. } => name.clone(),
        }
    }
}

/// Produces an uncompressed tar archive from `specs`, in order.
///
/// Any read or stat failure aborts the whole archive; nothing partial is
/// returned.
pub fn produce_archive(specs: &[ArchiveSpec]) -> Result<Vec<u8>, ArchiveError> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);

    for spec in specs {
        match spec {
            ArchiveSpec::Directory { path, naming } => {
                let count = append_directory(&mut builder, path, *naming)?;
                debug!(path = %path.display(), entries = count, "archived directory");
            }
            ArchiveSpec::File { name, body } => append_file(&mut builder, name, body)?,
        }
    }

    builder
        .into_inner()
        .map_err(|e| ArchiveError::Finish { source: e })
}

fn append_file(
    builder: &mut tar::Builder<Vec<u8>>,
    name: &str,
    body: &[u8],
) -> Result<(), ArchiveError> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(body.len() as u64);
    header.set_mode(0o644);

    builder
        .append_data(&mut header, name, body)
        .map_err(|e| ArchiveError::WriteEntry {
            name: name.to_owned(),
            source: e,
        })
}

fn append_directory(
    builder: &mut tar::Builder<Vec<u8>>,
    root: &Path,
    naming: EntryNaming,
) -> Result<usize, ArchiveError> {
    let matchers = load_ignores(root)?;
    let base = base_name(root);

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut count = 0;
    for entry in walker {
        let entry = entry.map_err(|e| ArchiveError::Walk {
            path: root.to_path_buf(),
            source: e,
        })?;

        // Directories are implied by their files.
        if entry.file_type().is_none_or(|t| t.is_dir()) {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };

        if is_ignored(&matchers, relative) {
            trace!(path = %relative.display(), "ignored");
            continue;
        }

        let name = match naming {
            EntryNaming::Relative => slash_path(relative),
            EntryNaming::Prefixed => format!("{base}/{}", slash_path(relative)),
        };

        builder
            .append_path_with_name(entry.path(), &name)
            .map_err(|e| ArchiveError::Read {
                path: entry.path().to_path_buf(),
                source: e,
            })?;
        count += 1;
    }

    Ok(count)
}

fn load_ignores(root: &Path) -> Result<Vec<Gitignore>, ArchiveError> {
    let mut matchers = Vec::new();
    for file_name in IGNORE_FILES {
        let path = root.join(file_name);
        if !path.is_file() {
            continue;
        }

        let mut builder = GitignoreBuilder::new(root);
        if let Some(e) = builder.add(&path) {
            return Err(ArchiveError::Ignore { path, source: e });
        }
        let matcher = builder
            .build()
            .map_err(|e| ArchiveError::Ignore { path, source: e })?;
        matchers.push(matcher);
    }
    Ok(matchers)
}

fn is_ignored(matchers: &[Gitignore], relative: &Path) -> bool {
    matchers
        .iter()
        .any(|m| m.matched_path_or_any_parents(relative, false).is_ignore())
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Base name of `path`, resolving `.`-style paths through the filesystem.
pub(crate) fn base_name(path: &Path) -> String {
    if let Some(name) = path.file_name() {
        return name.to_string_lossy().into_owned();
    }
    std::fs::canonicalize(path)
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to walk {path}")]
    Walk {
        path: PathBuf,
        source: ignore::Error,
    },
    #[error("failed to load ignore file {path}")]
    Ignore {
        path: PathBuf,
        source: ignore::Error,
    },
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write archive entry {name}")]
    WriteEntry {
        name: String,
        source: std::io::Error,
    },
    #[error("failed to finish archive")]
    Finish { source: std::io::Error },
}
