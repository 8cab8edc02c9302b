//! See [`PackageCache`].

use std::{
    fmt::{Display, Formatter},
    future::Future,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use fs4::fs_std::FileExt;
use krait_conda_types::{package::ArchiveIdentifier, PackageRecord};
use krait_digest::Sha256Hash;
use thiserror::Error;

use crate::validation::validate_package_directory;

/// How long to wait between attempts on a contended cross-process lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Identifies a package in the cache by name, version and build, optionally
/// sharpened by the archive's SHA256.
#[derive(Debug, Hash, Clone, Eq, PartialEq)]
pub struct CacheKey {
    name: String,
    version: String,
    build_string: String,
    sha256: Option<Sha256Hash>,
}

impl CacheKey {
    /// Attaches the expected archive hash to the key.
    pub fn with_opt_sha256(mut self, sha256: Option<Sha256Hash>) -> Self {
        self.sha256 = sha256;
        self
    }

    /// The expected archive hash, when known.
    pub fn sha256(&self) -> Option<Sha256Hash> {
        self.sha256
    }
}

impl From<ArchiveIdentifier> for CacheKey {
    fn from(identifier: ArchiveIdentifier) -> Self {
        CacheKey {
            name: identifier.name,
            version: identifier.version,
            build_string: identifier.build_string,
            sha256: None,
        }
    }
}

impl From<&PackageRecord> for CacheKey {
    fn from(record: &PackageRecord) -> Self {
        Self {
            name: record.name.as_normalized().to_string(),
            version: record.version.to_string(),
            build_string: record.build.clone(),
            sha256: record.sha256,
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", &self.name, &self.version, &self.build_string)
    }
}

/// An error returned from the caching functions of [`PackageCache`].
#[derive(Debug, Error)]
pub enum PackageCacheError {
    /// The user-provided fetch function failed.
    #[error(transparent)]
    Fetch(#[from] Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// Acquiring the cross-process lock exceeded the configured timeout.
    #[error("timed out waiting for the lock on {0}")]
    LockTimeout(String),

    /// The lock file could not be created or locked.
    #[error("failed to lock {0}")]
    Lock(String, #[source] std::io::Error),

    /// The directory produced by a fetch did not pass validation.
    #[error("the fetched package is corrupt: {0}")]
    Corrupt(#[source] crate::ValidationError),

    /// An unexpected I/O failure on the cache directory.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Default)]
struct Entry {
    /// Set once the directory passed validation during this process's
    /// lifetime, to skip re-hashing on every access.
    validated: bool,
}

struct PackageCacheInner {
    path: PathBuf,
    lock_timeout: Option<Duration>,
    packages: DashMap<CacheKey, Arc<tokio::sync::Mutex<Entry>>>,
}

/// Manages a directory of extracted conda packages.
///
/// The cache never downloads anything itself; when a package is absent or
/// fails validation the caller-provided `fetch` function is invoked with the
/// destination directory. Concurrent requests for the same package are
/// coalesced so the fetch runs at most once per `(cache root, key)` at any
/// time, in-process through a keyed mutex and across processes through an
/// advisory file lock.
#[derive(Clone)]
pub struct PackageCache {
    inner: Arc<PackageCacheInner>,
}

impl PackageCache {
    /// Constructs a new cache rooted at the given directory.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(PackageCacheInner {
                path: path.into(),
                lock_timeout: None,
                packages: DashMap::default(),
            }),
        }
    }

    /// Bounds the wait for the cross-process lock. Without a timeout the
    /// wait is unbounded.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("with_lock_timeout must be called before the cache is shared")
            .lock_timeout = Some(timeout);
        self
    }

    /// The root directory of the cache.
    pub fn path(&self) -> &std::path::Path {
        &self.inner.path
    }

    /// Returns the directory containing the extracted package, fetching (or
    /// re-fetching, when validation fails) through `fetch`.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: impl Into<CacheKey>,
        fetch: F,
    ) -> Result<PathBuf, PackageCacheError>
    where
        F: Fn(PathBuf) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let key = key.into();
        let destination = self.inner.path.join(key.to_string());

        // One logical slot per key within this process.
        let entry = self
            .inner
            .packages
            .entry(key.clone())
            .or_default()
            .value()
            .clone();
        let mut entry = entry.lock().await;

        // And one slot per destination across processes.
        fs_err::create_dir_all(&self.inner.path)?;
        let lock_path = self.inner.path.join(format!("{key}.lock"));
        let _lock = acquire_lock(&lock_path, self.inner.lock_timeout).await?;

        if entry.validated {
            return Ok(destination);
        }
        match validate_package_directory(&destination) {
            Ok(_) => {
                entry.validated = true;
                return Ok(destination);
            }
            Err(err) => {
                if destination.exists() {
                    tracing::warn!(
                        "cached package {} failed validation, fetching again: {err}",
                        destination.display()
                    );
                    fs_err::remove_dir_all(&destination)?;
                }
            }
        }

        fetch(destination.clone())
            .await
            .map_err(|err| PackageCacheError::Fetch(Arc::new(err)))?;
        validate_package_directory(&destination).map_err(PackageCacheError::Corrupt)?;
        entry.validated = true;
        Ok(destination)
    }
}

/// A held cross-process lock; the advisory lock is released when the file is
/// dropped.
struct LockGuard {
    file: std::fs::File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            // Leaking a lock is a bug but never worth a panic; the OS cleans
            // up when the process exits.
            tracing::error!("failed to release package cache lock: {err}");
        }
    }
}

async fn acquire_lock(
    path: &std::path::Path,
    timeout: Option<Duration>,
) -> Result<LockGuard, PackageCacheError> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|err| PackageCacheError::Lock(path.display().to_string(), err))?;

    let started = Instant::now();
    loop {
        match file.try_lock_exclusive() {
            Ok(true) => return Ok(LockGuard { file }),
            Ok(false) => {}
            Err(err) => {
                return Err(PackageCacheError::Lock(path.display().to_string(), err));
            }
        }
        if let Some(timeout) = timeout {
            if started.elapsed() >= timeout {
                return Err(PackageCacheError::LockTimeout(path.display().to_string()));
            }
        }
        tracing::debug!("waiting for the lock on {}", path.display());
        tokio::time::sleep(LOCK_POLL_INTERVAL).await;
    }
}
