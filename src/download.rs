use std::path::PathBuf;

use crate::checkpoint::PARAMS_EXT;
use crate::error::CheckpointError;

/// Maps a configured weights location to a local path.
pub trait WeightsResolver {
    fn resolve(&self, location: &str) -> Result<PathBuf, CheckpointError>;
}

/// Whether `location` names a remote resource rather than a local path.
pub fn is_link(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Resolves local paths as-is and URLs into a local weights cache.
///
/// Fetching is left to the caller: a URL only resolves once its file has been
/// placed in the cache directory under the URL's final path segment.
#[derive(Debug, Clone, Default)]
pub struct LocalResolver {
    cache_dir: Option<PathBuf>,
}

impl LocalResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        LocalResolver {
            cache_dir: Some(cache_dir.into()),
        }
    }
}

impl WeightsResolver for LocalResolver {
    fn resolve(&self, location: &str) -> Result<PathBuf, CheckpointError> {
        if !is_link(location) {
            return Ok(PathBuf::from(location));
        }

        let file_name = location
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| CheckpointError::Unresolved(location.to_string()))?;
        let cache_dir = self
            .cache_dir
            .as_ref()
            .ok_or_else(|| CheckpointError::Unresolved(location.to_string()))?;

        let cached = cache_dir.join(file_name);
        let with_ext = cache_dir.join(format!("{file_name}.{PARAMS_EXT}"));
        if cached.exists() || with_ext.exists() {
            tracing::debug!(url = location, path = %cached.display(), "using cached weights");
            Ok(cached)
        } else {
            Err(CheckpointError::Unresolved(location.to_string()))
        }
    }
}
