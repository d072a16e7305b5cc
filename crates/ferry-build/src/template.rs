use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use ferry_core::TemplatesConfig;

use crate::recipe::RECIPE_FILE;

/// A distinct template referenced by at least one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRef {
    pub name: String,
    /// Fetch source understood by [`ContentFetcher`](crate::fetch::ContentFetcher).
    pub source: String,
    /// Deterministic cache destination, derived only from `name`.
    pub local_cache_path: PathBuf,
}

impl TemplateRef {
    /// Path of the handler recipe inside the cached template.
    pub fn recipe_path(&self) -> PathBuf {
        self.local_cache_path.join(RECIPE_FILE)
    }

    /// Whether the template has been fetched and carries its recipe.
    pub fn is_cached(&self) -> bool {
        self.recipe_path().is_file()
    }
}

/// Resolves template names to fetch sources and cache locations.
#[derive(Debug, Clone)]
pub struct TemplateSources {
    default_location: String,
    overrides: BTreeMap<String, String>,
    cache_dir: PathBuf,
}

impl TemplateSources {
    pub fn new(default_location: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            default_location: default_location.into(),
            overrides: BTreeMap::new(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Sources from `[templates]`, with the cache directory resolved against
    /// `base_dir` when relative.
    pub fn from_config(config: &TemplatesConfig, base_dir: &Path) -> Self {
        let mut sources = Self::new(
            config.default_location.clone(),
            base_dir.join(&config.cache_dir),
        );
        for (name, location) in &config.sources {
            sources = sources.with_override(name.clone(), location.clone());
        }
        sources
    }

    pub fn with_override(mut self, name: impl Into<String>, location: impl Into<String>) -> Self {
        self.overrides.insert(name.into(), location.into());
        self
    }

    /// Fetch source for `name`: its override (or the default location),
    /// normalized, joined with the template name as a subdirectory.
    pub fn source_for(&self, name: &str) -> String {
        let location = self
            .overrides
            .get(name)
            .filter(|l| !l.is_empty())
            .unwrap_or(&self.default_location);

        let location = location.strip_prefix("https://").unwrap_or(location);
        let location = location.trim_end_matches('/');

        format!("{location}//{name}")
    }

    pub fn cache_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(name)
    }

    pub fn resolve(&self, name: &str) -> TemplateRef {
        TemplateRef {
            name: name.to_owned(),
            source: self.source_for(name),
            local_cache_path: self.cache_path(name),
        }
    }

    /// Distinct templates needed by `templates`, in name order. Each
    /// template appears once no matter how many functions use it.
    pub fn plan<'a, I>(&self, templates: I) -> Vec<TemplateRef>
    where
        I: IntoIterator<Item = &'a str>,
    {
        templates
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|name| self.resolve(name))
            .collect()
    }
}
