//! Registry credentials: lookup in the local Docker credential store and
//! explicit username/password overrides.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tracing::debug;

/// Key the Docker CLI stores Docker Hub credentials under.
pub const DEFAULT_REGISTRY_HOST: &str = "https://index.docker.io/v1/";

const DOCKER_HUB_ALIASES: &[&str] = &["docker.io", "index.docker.io", "registry-1.docker.io"];

/// Credentials handed to the engine for a push.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub identity_token: Option<String>,
    pub server_address: String,
}

impl RegistryCredentials {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.password.is_none() && self.identity_token.is_none()
    }
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field(
                "identity_token",
                &self.identity_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("server_address", &self.server_address)
            .finish()
    }
}

/// Looks up stored credentials for a registry host.
pub trait CredentialStore: Send + Sync {
    fn lookup(&self, host: &str) -> Result<Option<RegistryCredentials>, AuthError>;
}

/// Reads `config.json` from `$DOCKER_CONFIG` or `~/.docker`.
#[derive(Debug, Clone)]
pub struct DockerConfigStore {
    path: Option<PathBuf>,
}

impl DockerConfigStore {
    pub fn new() -> Self {
        let dir = std::env::var_os("DOCKER_CONFIG")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".docker")));
        Self {
            path: dir.map(|d| d.join("config.json")),
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Default for DockerConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize, Default)]
struct DockerConfigFile {
    #[serde(default)]
    auths: BTreeMap<String, AuthEntry>,
}

#[derive(Deserialize, Default)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default, rename = "identitytoken")]
    identity_token: Option<String>,
}

impl CredentialStore for DockerConfigStore {
    fn lookup(&self, host: &str) -> Result<Option<RegistryCredentials>, AuthError> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        if !path.is_file() {
            debug!(path = %path.display(), "no docker config");
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| AuthError::Read {
            path: path.clone(),
            source: e,
        })?;
        let config: DockerConfigFile =
            serde_json::from_str(&content).map_err(|e| AuthError::Parse {
                path: path.clone(),
                source: e,
            })?;

        let wanted = normalize_host(host);
        let Some((key, entry)) = config
            .auths
            .iter()
            .find(|(key, _)| normalize_host(key) == wanted)
        else {
            return Ok(None);
        };

        let (mut username, mut password) = (entry.username.clone(), entry.password.clone());
        if let Some(encoded) = entry.auth.as_deref().filter(|a| !a.is_empty()) {
            let (user, pass) = decode_auth(key, encoded)?;
            username = Some(user);
            password = Some(pass);
        }

        Ok(Some(RegistryCredentials {
            username,
            password,
            identity_token: entry.identity_token.clone(),
            server_address: key.clone(),
        }))
    }
}

fn decode_auth(key: &str, encoded: &str) -> Result<(String, String), AuthError> {
    let invalid = || AuthError::InvalidAuth {
        registry: key.to_owned(),
    };
    let bytes = STANDARD.decode(encoded.trim()).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    let (user, pass) = text.split_once(':').ok_or_else(invalid)?;
    Ok((user.to_owned(), pass.to_owned()))
}

/// Credential-store key for an image registry. An empty registry, or any
/// Docker Hub alias, maps to [`DEFAULT_REGISTRY_HOST`].
pub fn registry_host(registry: &str) -> String {
    let host = normalize_host(registry);
    if host.is_empty() || DOCKER_HUB_ALIASES.contains(&host.as_str()) {
        DEFAULT_REGISTRY_HOST.to_owned()
    } else {
        host
    }
}

/// Strips scheme and path: `https://reg.io/v1/` becomes `reg.io`.
fn normalize_host(value: &str) -> String {
    let value = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
        .unwrap_or(value);
    value.split('/').next().unwrap_or_default().to_owned()
}

/// Stored credentials for `registry`, with explicit `username` and
/// `password` taking precedence. Returns `None` when nothing is known.
pub fn resolve_credentials(
    store: &dyn CredentialStore,
    registry: &str,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<Option<RegistryCredentials>, AuthError> {
    let host = registry_host(registry);
    let mut credentials = store.lookup(&host)?.unwrap_or_default();

    if let Some(user) = username.filter(|u| !u.is_empty()) {
        credentials.username = Some(user.to_owned());
    }
    if let Some(pass) = password.filter(|p| !p.is_empty()) {
        credentials.password = Some(pass.to_owned());
    }
    if credentials.server_address.is_empty() {
        credentials.server_address = host;
    }

    if credentials.is_empty() {
        Ok(None)
    } else {
        Ok(Some(credentials))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("failed to read docker config {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse docker config {path}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("stored credentials for {registry} are not valid base64 user:password")]
    InvalidAuth { registry: String },
}
