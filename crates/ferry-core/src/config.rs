use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::args::BuildArgs;

/// ferry.toml configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FerryConfig {
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
    /// Stack description: function name → build configuration
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Maximum number of jobs running at once in each phase
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Network mode for build containers (empty = engine default)
    #[serde(default)]
    pub network: String,
    /// Directory containing one source folder per function
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// Base image of the generated files-stage recipe
    #[serde(default = "default_files_base_image")]
    pub files_base_image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Registry host (and optional namespace) prepended to image names
    #[serde(default)]
    pub registry: String,
    /// Prefix prepended to every function name
    #[serde(default)]
    pub prefix: String,
    /// Image tag
    #[serde(default = "default_tag")]
    pub tag: String,
}

/// Explicit registry credentials. Either field overrides what the local
/// credential store returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    /// Upstream location used for templates without an explicit source
    #[serde(default = "default_template_location")]
    pub default_location: String,
    /// Local cache directory; each template lands in `<cache_dir>/<name>`
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Per-template source overrides (URL, git reference, or local path)
    #[serde(default)]
    pub sources: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionConfig {
    /// Template name; `None` builds the function's own Dockerfile directly
    pub template: Option<String>,
    /// Build arguments declared for this function
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    /// Build arguments taken from the environment when the build starts;
    /// unset variables are left out
    #[serde(default)]
    pub pass_env: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            network: String::new(),
            working_dir: default_working_dir(),
            files_base_image: default_files_base_image(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            registry: String::new(),
            prefix: String::new(),
            tag: default_tag(),
        }
    }
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            default_location: default_template_location(),
            cache_dir: default_cache_dir(),
            sources: BTreeMap::new(),
        }
    }
}

impl FunctionConfig {
    /// Declared build arguments in the form the pipeline consumes.
    ///
    /// A name both declared and listed in `pass_env` keeps its declared value.
    pub fn build_args(&self) -> BuildArgs {
        let mut args: BuildArgs = self.pass_env.iter().map(|k| (k.clone(), None)).collect();
        args.extend(
            self.build_args
                .iter()
                .map(|(k, v)| (k.clone(), Some(v.clone()))),
        );
        args
    }
}

impl FerryConfig {
    /// Load from ferry.toml at the given path, or return defaults if not found.
    pub fn load(project_dir: &std::path::Path) -> crate::Result<Self> {
        let config_path = project_dir.join("ferry.toml");
        if config_path.exists() {
            let content =
                std::fs::read_to_string(&config_path).map_err(|e| crate::Error::ConfigLoad {
                    path: config_path.clone(),
                    source: e,
                })?;
            toml::from_str(&content).map_err(|e| crate::Error::ConfigParse {
                path: config_path,
                source: e,
            })
        } else {
            Ok(Self::default())
        }
    }

    /// Selects functions by name, in stack order. An empty `names` selects
    /// every function.
    pub fn select_functions<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> crate::Result<Vec<(&str, &FunctionConfig)>> {
        if names.is_empty() {
            return Ok(self
                .functions
                .iter()
                .map(|(name, f)| (name.as_str(), f))
                .collect());
        }

        let mut selected = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let (key, function) = self.functions.get_key_value(name).ok_or_else(|| {
                crate::Error::UnknownFunction {
                    name: name.to_owned(),
                    defined: self.functions.keys().cloned().collect(),
                }
            })?;
            selected.push((key.as_str(), function));
        }
        Ok(selected)
    }
}

fn default_pool_size() -> usize {
    1
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_files_base_image() -> String {
    "scratch".to_owned()
}

fn default_tag() -> String {
    crate::naming::DEFAULT_TAG.to_owned()
}

fn default_template_location() -> String {
    "github.com/ferry-build/templates".to_owned()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".ferry").join("templates")
}
