#![deny(missing_docs)]

//! Data types for the conda ecosystem as used by the krait package manager.
//!
//! This crate contains the vocabulary shared by every other krait crate:
//! versions and version constraints, match specs, package records as found in
//! `repodata.json`, the on-disk metadata of an installed package
//! (`conda-meta/*.json`) and the prefix history journal.
//!
//! Nothing in here performs network or solver work; those live in the
//! `krait_repodata`, `krait_fetch` and `krait_solve` crates.

pub mod build_number_spec;
mod channel;
pub mod history;
mod match_spec;
mod no_arch_type;
pub mod package;
mod package_name;
mod platform;
mod prefix_record;
mod repo_data;
mod string_matcher;
mod utils;
pub mod version;
mod version_spec;

pub use build_number_spec::{BuildNumberSpec, ParseBuildNumberSpecError};
pub use channel::{Channel, ParseChannelError};
pub use history::{History, HistoryEntry, HistoryError};
pub use match_spec::{MatchSpec, ParseMatchSpecError};
pub use no_arch_type::{NoArchKind, NoArchType};
pub use package_name::{PackageName, ParsePackageNameError};
pub use platform::{ParsePlatformError, Platform};
pub use prefix_record::{Link, LinkType, PrefixRecord};
pub use repo_data::{ChannelInfo, PackageRecord, RepoData, RepoDataRecord};
pub use string_matcher::{ParseStringMatcherError, StringMatcher};
pub use version::{ParseVersionError, ParseVersionErrorKind, Version};
pub use version_spec::{LogicalOperator, ParseVersionSpecError, VersionOperator, VersionSpec};
