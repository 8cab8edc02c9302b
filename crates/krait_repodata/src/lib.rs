#![deny(missing_docs)]

//! Loading of channel repodata into the [`krait_solve::Pool`].
//!
//! A channel subdirectory is loaded either from its `repodata.json` or from a
//! compact binary cache written on a previous run. The cache is only used
//! when its header matches the expected `(tool version, url, etag,
//! last-modified, pip-added)` tuple exactly; a corrupt cache silently
//! downgrades to the JSON path, a corrupt JSON fails the load.

mod cache;
mod loader;

pub use cache::{load_from_cache, write_cache, CacheError, CacheHeader, CacheResult};
pub use loader::{load_repo_from_json, LoadRepoDataError, RepoOptions};

use std::path::Path;

use krait_solve::{Pool, RepoId};
use url::Url;

/// Loads a channel subdirectory into the pool, preferring the binary cache
/// at `cache_path` and falling back to `repodata.json` at `json_path`. A
/// fresh cache is written after a JSON load.
pub fn load_repo(
    pool: &mut Pool,
    channel_name: &str,
    base_url: &Url,
    json_path: &Path,
    cache_path: &Path,
    header: &CacheHeader,
    options: &RepoOptions,
) -> Result<RepoId, LoadRepoDataError> {
    match cache::load_from_cache(pool, cache_path, header, options) {
        Ok(CacheResult::Hit(repo_id)) => {
            tracing::debug!("loaded {channel_name} from cache {}", cache_path.display());
            return Ok(repo_id);
        }
        Ok(CacheResult::Miss) => {
            tracing::debug!("cache miss for {channel_name}");
        }
        Err(err) => {
            tracing::warn!(
                "discarding corrupt repodata cache {}: {err}",
                cache_path.display()
            );
        }
    }

    let repo_id = loader::load_repo_from_json(pool, json_path, channel_name, base_url, options)?;

    if let Err(err) = cache::write_cache(pool, repo_id, cache_path, header) {
        tracing::warn!(
            "failed to write repodata cache {}: {err}",
            cache_path.display()
        );
    }
    Ok(repo_id)
}
