//! The aggregated error surface of the core, with the mapping to user-facing
//! error kinds and process exit codes.

use thiserror::Error;

use crate::install::{FetchPackagesError, InstallError};
use crate::prefix::PrefixError;

/// The semantic classification of an error, independent of which component
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A match spec or version string violated the grammar.
    InvalidSpec,

    /// Malformed repodata.
    RepoDataParse,

    /// A cached archive or extracted tree failed checksum or size checks.
    CacheCorrupt,

    /// A network failure that retries could not recover.
    NetworkTransient,

    /// A permanent network failure (4xx, TLS, bad URL).
    NetworkFatal,

    /// A file lock could not be acquired within its bound.
    LockTimeout,

    /// A filesystem operation failed.
    Filesystem,

    /// The solver proved the request unsatisfiable.
    Unsatisfiable,

    /// A pin matches no available package.
    UnsatisfiablePin,

    /// The operation was cancelled.
    Cancelled,

    /// The on-disk prefix state is inconsistent.
    PrefixDataInvalid,

    /// A violated internal invariant; never expected to surface.
    Internal,
}

/// The error type surfaced at the top of the core.
#[derive(Debug, Error)]
pub enum Error {
    /// The pool rejected a spec or selection.
    #[error(transparent)]
    Pool(#[from] krait_solve::PoolError),

    /// A request could not be translated into jobs.
    #[error(transparent)]
    Request(#[from] krait_solve::RequestError),

    /// The solve failed.
    #[error(transparent)]
    Solve(#[from] krait_solve::SolveError),

    /// Loading repodata failed.
    #[error(transparent)]
    RepoData(#[from] krait_repodata::LoadRepoDataError),

    /// The package cache failed.
    #[error(transparent)]
    PackageCache(#[from] krait_cache::PackageCacheError),

    /// A download failed.
    #[error(transparent)]
    Download(#[from] krait_fetch::DownloadError),

    /// Fetching packages for a transaction failed.
    #[error(transparent)]
    FetchPackages(#[from] FetchPackagesError),

    /// Constructing the transaction failed.
    #[error(transparent)]
    Transaction(#[from] crate::install::TransactionError),

    /// Executing the transaction failed.
    #[error(transparent)]
    Install(#[from] InstallError),

    /// The prefix is not usable.
    #[error(transparent)]
    Prefix(#[from] PrefixError),

    /// The history journal failed.
    #[error(transparent)]
    History(#[from] krait_conda_types::HistoryError),

    /// The operation was cancelled.
    #[error(transparent)]
    Cancelled(#[from] crate::interrupt::Cancelled),
}

impl Error {
    /// The semantic kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Pool(krait_solve::PoolError::InvalidSpec(_)) => ErrorKind::InvalidSpec,
            Error::Pool(krait_solve::PoolError::IndexNotBuilt) => ErrorKind::Internal,
            Error::Request(krait_solve::RequestError::InvalidSpec { .. }) => {
                ErrorKind::InvalidSpec
            }
            Error::Request(krait_solve::RequestError::UnsatisfiablePin(_)) => {
                ErrorKind::UnsatisfiablePin
            }
            Error::Request(krait_solve::RequestError::Pool(_)) => ErrorKind::InvalidSpec,
            Error::Solve(krait_solve::SolveError::Unsolvable(_)) => ErrorKind::Unsatisfiable,
            Error::Solve(krait_solve::SolveError::Cancelled) => ErrorKind::Cancelled,
            Error::RepoData(_) => ErrorKind::RepoDataParse,
            Error::PackageCache(err) => match err {
                krait_cache::PackageCacheError::LockTimeout(_) => ErrorKind::LockTimeout,
                krait_cache::PackageCacheError::Corrupt(_) => ErrorKind::CacheCorrupt,
                _ => ErrorKind::Filesystem,
            },
            Error::Download(err) => download_kind(err),
            Error::FetchPackages(FetchPackagesError::InvalidUrl(_)) => ErrorKind::NetworkFatal,
            Error::FetchPackages(FetchPackagesError::Cache(err)) => match err {
                krait_cache::PackageCacheError::LockTimeout(_) => ErrorKind::LockTimeout,
                krait_cache::PackageCacheError::Corrupt(_) => ErrorKind::CacheCorrupt,
                _ => ErrorKind::Filesystem,
            },
            Error::Transaction(_) => ErrorKind::PrefixDataInvalid,
            Error::Install(InstallError::Cancelled(_)) => ErrorKind::Cancelled,
            Error::Install(_) => ErrorKind::Filesystem,
            Error::Prefix(_) => ErrorKind::PrefixDataInvalid,
            Error::History(_) => ErrorKind::PrefixDataInvalid,
            Error::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// The process exit code for this error: `1` for runtime failures, `2`
    /// for cancellation, `3` for unsatisfiable requests.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Cancelled => 2,
            ErrorKind::Unsatisfiable | ErrorKind::UnsatisfiablePin => 3,
            _ => 1,
        }
    }
}

fn download_kind(err: &krait_fetch::DownloadError) -> ErrorKind {
    use krait_fetch::DownloadError;
    match err {
        DownloadError::RetriesExhausted { .. } => ErrorKind::NetworkTransient,
        DownloadError::Cancelled => ErrorKind::Cancelled,
        DownloadError::ChecksumMismatch { .. } => ErrorKind::CacheCorrupt,
        DownloadError::LocalFile { .. } | DownloadError::Destination { .. } => {
            ErrorKind::Filesystem
        }
        DownloadError::HttpStatus { .. } | DownloadError::Http(_) | DownloadError::NoMirror(_) => {
            ErrorKind::NetworkFatal
        }
    }
}
