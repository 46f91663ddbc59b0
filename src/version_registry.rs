use std::collections::HashMap;
use thiserror::Error;

/// Ordered list of the API versions a deployment accepts.
///
/// Version identifiers are opaque strings; the declaration order is the
/// precedence order. The position of an identifier in the list is its rank:
/// lower rank means older version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRegistry {
    versions: Vec<String>,
    ranks: HashMap<String, usize>,
}

impl VersionRegistry {
    /// Build a registry from an ordered list of version identifiers.
    pub fn new<I, S>(versions: I) -> Result<Self, VersionRegistryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let versions: Vec<String> = versions.into_iter().map(Into::into).collect();

        if versions.is_empty() {
            return Err(VersionRegistryError::Empty);
        }

        let mut ranks = HashMap::with_capacity(versions.len());
        for (rank, version) in versions.iter().enumerate() {
            if version.is_empty() {
                return Err(VersionRegistryError::EmptyIdentifier { rank });
            }
            if ranks.insert(version.clone(), rank).is_some() {
                return Err(VersionRegistryError::Duplicate(version.clone()));
            }
        }

        Ok(Self { versions, ranks })
    }

    /// Rank of a version identifier, or `UnknownVersionError` if the version
    /// is not in the allowed list.
    pub fn rank(&self, version: &str) -> Result<usize, UnknownVersionError> {
        self.ranks
            .get(version)
            .copied()
            .ok_or_else(|| UnknownVersionError {
                version: version.to_string(),
            })
    }

    pub fn contains(&self, version: &str) -> bool {
        self.ranks.contains_key(version)
    }

    /// The newest allowed version.
    pub fn latest(&self) -> &str {
        // The constructor rejects empty lists.
        self.versions.last().expect("registry is never empty")
    }

    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum VersionRegistryError {
    #[error("the allowed-versions list must not be empty")]
    Empty,

    #[error("empty version identifier at position {rank}")]
    EmptyIdentifier { rank: usize },

    #[error("duplicate version identifier: {0}")]
    Duplicate(String),
}

/// A version identifier that is not in the allowed-versions list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown API version: {version}")]
pub struct UnknownVersionError {
    pub version: String,
}
