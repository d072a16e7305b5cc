use std::path::{Path, PathBuf};
use std::process::Command;

use flate2::read::GzDecoder;
use ignore::WalkBuilder;
use tracing::{debug, info};

/// Retrieves the content behind a source locator into a local directory.
///
/// Production code uses [`GetterFetcher`]; tests substitute mocks.
pub trait ContentFetcher: Send + Sync {
    /// Replace `destination` with the content of `source`. Blocking.
    fn fetch(&self, source: &str, destination: &Path) -> Result<(), FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Versioned repository, shallow-cloned with `git`.
    Git,
    /// Gzipped tarball downloaded over HTTP(S).
    Archive,
    /// Directory on the local filesystem.
    Local,
}

/// A parsed source locator: `location[?ref=..][//subdir]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub kind: SourceKind,
    pub location: String,
    pub subdir: Option<String>,
    pub reference: Option<String>,
}

const GIT_HOSTS: &[&str] = &["github.com/", "gitlab.com/", "bitbucket.org/"];

impl Locator {
    pub fn parse(source: &str) -> Self {
        let (base, subdir) = match source.rsplit_once("//") {
            Some((base, subdir)) if !base.ends_with(':') && !base.is_empty() => {
                (base, Some(subdir))
            }
            _ => (source, None),
        };

        let (base, base_ref) = split_query(base);
        let (subdir, subdir_ref) = match subdir {
            Some(s) => {
                let (s, r) = split_query(s);
                (Some(s.trim_matches('/')).filter(|s| !s.is_empty()), r)
            }
            None => (None, None),
        };
        let reference = base_ref.or(subdir_ref);
        let subdir = subdir.map(str::to_owned);

        if let Some(forced) = base.strip_prefix("git::") {
            return Self {
                kind: SourceKind::Git,
                location: with_scheme(forced),
                subdir,
                reference,
            };
        }

        if base.ends_with(".tar.gz") || base.ends_with(".tgz") {
            return Self {
                kind: SourceKind::Archive,
                location: with_scheme(base),
                subdir,
                reference,
            };
        }

        if let Some(path) = base.strip_prefix("file://") {
            return Self {
                kind: SourceKind::Local,
                location: path.to_owned(),
                subdir,
                reference,
            };
        }

        let is_remote = base.starts_with("http://")
            || base.starts_with("https://")
            || base.starts_with("git@")
            || base.ends_with(".git")
            || GIT_HOSTS.iter().any(|h| base.starts_with(h));

        if !is_remote && Path::new(base).exists() {
            return Self {
                kind: SourceKind::Local,
                location: base.to_owned(),
                subdir,
                reference,
            };
        }

        Self {
            kind: SourceKind::Git,
            location: with_scheme(base),
            subdir,
            reference,
        }
    }
}

fn split_query(s: &str) -> (&str, Option<String>) {
    match s.split_once('?') {
        Some((head, query)) => {
            let reference = query
                .split('&')
                .find_map(|pair| pair.strip_prefix("ref="))
                .filter(|r| !r.is_empty())
                .map(str::to_owned);
            (head, reference)
        }
        None => (s, None),
    }
}

fn with_scheme(location: &str) -> String {
    if location.contains("://") || location.starts_with("git@") {
        location.to_owned()
    } else {
        format!("https://{location}")
    }
}

/// Fetches git repositories, HTTP tarballs, and local directories.
#[derive(Debug, Default, Clone, Copy)]
pub struct GetterFetcher;

impl ContentFetcher for GetterFetcher {
    fn fetch(&self, source: &str, destination: &Path) -> Result<(), FetchError> {
        let locator = Locator::parse(source);
        debug!(?locator, destination = %destination.display(), "fetching");

        let staging = tempfile::Builder::new()
            .prefix("ferry-fetch")
            .tempdir()
            .map_err(|e| FetchError::Io {
                path: std::env::temp_dir(),
                source: e,
            })?;

        let root = match locator.kind {
            SourceKind::Git => {
                let checkout = staging.path().join("checkout");
                git_clone(&locator, &checkout)?;
                checkout
            }
            SourceKind::Archive => {
                let unpacked = staging.path().join("unpacked");
                download_archive(&locator.location, &unpacked)?;
                unpacked
            }
            SourceKind::Local => PathBuf::from(&locator.location),
        };

        let content = match &locator.subdir {
            Some(subdir) => root.join(subdir),
            None => root,
        };
        if !content.is_dir() {
            return Err(FetchError::MissingContent { path: content });
        }

        replace_dir(&content, destination)?;
        info!(source, destination = %destination.display(), "fetched");
        Ok(())
    }
}

fn git_clone(locator: &Locator, checkout: &Path) -> Result<(), FetchError> {
    let mut cmd = Command::new("git");
    cmd.args(["clone", "--depth", "1", "--quiet"]);
    if let Some(reference) = &locator.reference {
        cmd.args(["--branch", reference]);
    }
    cmd.arg(&locator.location).arg(checkout);

    let output = cmd
        .output()
        .map_err(|e| FetchError::GitCommand { source: e })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FetchError::GitFailed {
            detail: format!(
                "git clone {} exited with {}: {}",
                locator.location,
                output.status,
                stderr.trim()
            ),
        });
    }
    Ok(())
}

fn download_archive(url: &str, unpacked: &Path) -> Result<(), FetchError> {
    let response = reqwest::blocking::get(url)
        .and_then(reqwest::blocking::Response::error_for_status)
        .map_err(|e| FetchError::Http {
            url: url.to_owned(),
            source: e,
        })?;

    let mut archive = tar::Archive::new(GzDecoder::new(response));
    archive.unpack(unpacked).map_err(|e| FetchError::Unpack {
        url: url.to_owned(),
        source: e,
    })
}

/// Replaces `destination` with a copy of `source`, leaving out `.git`.
fn replace_dir(source: &Path, destination: &Path) -> Result<(), FetchError> {
    if destination.exists() {
        std::fs::remove_dir_all(destination).map_err(|e| FetchError::Io {
            path: destination.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::create_dir_all(destination).map_err(|e| FetchError::Io {
        path: destination.to_path_buf(),
        source: e,
    })?;

    let walker = WalkBuilder::new(source)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(|e| e.file_name() != ".git")
        .build();

    for entry in walker {
        let entry = entry.map_err(|e| FetchError::Walk {
            path: source.to_path_buf(),
            source: e,
        })?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let target = destination.join(relative);
        let io_err = |e| FetchError::Io {
            path: target.clone(),
            source: e,
        };
        match entry.file_type() {
            Some(t) if t.is_dir() => std::fs::create_dir_all(&target).map_err(io_err)?,
            Some(t) if t.is_symlink() => copy_link(entry.path(), &target).map_err(io_err)?,
            _ => {
                std::fs::copy(entry.path(), &target).map_err(io_err)?;
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_link(link: &Path, target: &Path) -> std::io::Result<()> {
    let points_to = std::fs::read_link(link)?;
    std::os::unix::fs::symlink(points_to, target)
}

#[cfg(not(unix))]
fn copy_link(link: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::copy(link, target).map(|_| ())
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("i/o error at {path}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to walk {path}")]
    Walk {
        path: PathBuf,
        source: ignore::Error,
    },
    #[error("failed to execute git")]
    GitCommand { source: std::io::Error },
    #[error("git failed: {detail}")]
    GitFailed { detail: String },
    #[error("failed to download {url}")]
    Http { url: String, source: reqwest::Error },
    #[error("failed to unpack archive from {url}")]
    Unpack { url: String, source: std::io::Error },
    #[error("fetched content has no directory {path}")]
    MissingContent { path: PathBuf },
}
