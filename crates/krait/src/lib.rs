#![deny(missing_docs)]

//! The top layer of the krait package manager core.
//!
//! This crate ties the pool and solver (`krait_solve`), the repodata loader
//! (`krait_repodata`), the package cache (`krait_cache`) and the download
//! engine (`krait_fetch`) together into the piece that actually mutates an
//! environment: the transaction engine. It also owns the pieces of process
//! state the lower layers must not know about: the configuration
//! [`Context`] and the process-wide interruption flag.

pub mod context;
mod error;
pub mod install;
pub mod interrupt;
pub mod prefix;

pub use context::Context;
pub use error::{Error, ErrorKind};
pub use prefix::{PrefixData, PrefixError};
