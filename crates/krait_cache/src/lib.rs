#![deny(missing_docs)]

//! The content-addressed on-disk cache of extracted conda packages.
//!
//! Every package occupies one directory named `<name>-<version>-<build>`
//! below the cache root. Access is serialized twice: an in-process mutex per
//! cache key coalesces concurrent fetches of the same package, and an
//! advisory file lock on a `.lock` sidecar keeps other processes out while a
//! directory is (re)written.

mod package_cache;
mod validation;

pub use package_cache::{CacheKey, PackageCache, PackageCacheError};
pub use validation::{validate_package_directory, ValidationError};
