use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::version_registry::{VersionRegistry, VersionRegistryError};

/// Versioning policy: the ordered list of API versions a deployment accepts.
///
/// Oldest version first. This is the single configuration input of the
/// engine, supplied by whatever component negotiates API versions with
/// clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersioningConfig {
    pub allowed_versions: Vec<String>,
}

impl VersioningConfig {
    pub fn new<I, S>(allowed_versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_versions: allowed_versions.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a policy from YAML.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Read and parse a policy file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Build the version registry this policy describes.
    pub fn build_registry(&self) -> Result<VersionRegistry, ConfigError> {
        Ok(VersionRegistry::new(self.allowed_versions.clone())?)
    }
}

/// Process-lifetime cache in front of the versioning policy source.
///
/// The registry is loaded on first use and served from the cache afterwards.
/// Callers that mutate the underlying source (tests swapping the policy
/// file) must call `invalidate()`; the cache never refreshes on its own.
pub struct RegistryCache {
    loader: Box<dyn Fn() -> Result<VersioningConfig, ConfigError> + Send + Sync>,
    cached: RwLock<Option<Arc<VersionRegistry>>>,
}

impl RegistryCache {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<VersioningConfig, ConfigError> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            cached: RwLock::new(None),
        }
    }

    /// Cache in front of a policy file on disk.
    pub fn from_path(path: PathBuf) -> Self {
        Self::new(move || VersioningConfig::from_file(&path))
    }

    /// The cached registry, loading it from the policy source on first use.
    pub fn registry(&self) -> Result<Arc<VersionRegistry>, ConfigError> {
        if let Some(registry) = self.cached.read().expect("registry cache poisoned").as_ref() {
            return Ok(Arc::clone(registry));
        }

        let registry = Arc::new((self.loader)()?.build_registry()?);
        let mut cached = self.cached.write().expect("registry cache poisoned");
        // Another caller may have raced the load; the source is identical so
        // either result is fine.
        let registry = cached.get_or_insert(registry);
        Ok(Arc::clone(registry))
    }

    /// Drop the cached registry so the next `registry()` call re-reads the
    /// policy source.
    pub fn invalidate(&self) {
        self.cached.write().expect("registry cache poisoned").take();
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read versioning config {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse versioning config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid allowed-versions list: {0}")]
    InvalidVersions(#[from] VersionRegistryError),
}
