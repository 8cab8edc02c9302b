//! Classification of a solver decision into transaction operations.

use std::collections::HashMap;

use krait_conda_types::{PackageRecord, Platform, PrefixRecord, RepoDataRecord};
use krait_solve::{Pool, Solution};
use thiserror::Error;

use super::python::{PythonInfo, PythonInfoError};

/// Errors raised while constructing a transaction.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The python record of the target state is unusable.
    #[error(transparent)]
    PythonInfo(#[from] PythonInfoError),
}

/// One step of a transaction.
#[derive(Debug)]
pub enum TransactionOperation<Old, New> {
    /// Link a new package.
    Install(New),

    /// Unlink `old`, then link `new` (a version, build or channel change).
    Change {
        /// The installed record to unlink.
        old: Old,
        /// The record replacing it.
        new: New,
    },

    /// Unlink and relink the same package, e.g. when the python minor
    /// version changed and noarch paths must be rewritten.
    Reinstall {
        /// The installed record to relink.
        old: Old,
        /// The equivalent record from the solution.
        new: New,
    },

    /// Unlink a package for good.
    Remove(Old),
}

impl<Old, New> TransactionOperation<Old, New> {
    /// The record that will be linked by this operation, if any.
    pub fn record_to_install(&self) -> Option<&New> {
        match self {
            TransactionOperation::Install(new)
            | TransactionOperation::Change { new, .. }
            | TransactionOperation::Reinstall { new, .. } => Some(new),
            TransactionOperation::Remove(_) => None,
        }
    }

    /// The record that will be unlinked by this operation, if any.
    pub fn record_to_remove(&self) -> Option<&Old> {
        match self {
            TransactionOperation::Install(_) => None,
            TransactionOperation::Change { old, .. }
            | TransactionOperation::Reinstall { old, .. }
            | TransactionOperation::Remove(old) => Some(old),
        }
    }
}

/// Per-kind operation counts, for prompts and summaries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransactionSummary {
    /// Packages that are newly installed.
    pub installed: usize,

    /// Packages that are removed entirely.
    pub removed: usize,

    /// Packages changing to a higher version.
    pub upgraded: usize,

    /// Packages changing to a lower version.
    pub downgraded: usize,

    /// Packages changing build or channel at the same version.
    pub changed: usize,

    /// Packages relinked without any record change.
    pub reinstalled: usize,
}

/// The ordered set of operations that brings a prefix from its current state
/// to the desired state.
pub struct Transaction<Old, New> {
    /// The operations to perform. Execution orders unlinks and links
    /// through [`super::order`].
    pub operations: Vec<TransactionOperation<Old, New>>,

    /// The python of the target state, when it contains one.
    pub python_info: Option<PythonInfo>,

    /// The python of the current state, when it contains one.
    pub current_python_info: Option<PythonInfo>,

    /// The platform the transaction applies to.
    pub platform: Platform,
}

impl<Old, New> Transaction<Old, New>
where
    Old: AsRef<PackageRecord>,
    New: AsRef<PackageRecord>,
{
    /// Builds a transaction by diffing the installed records against the
    /// records of the desired state.
    pub fn from_current_and_desired(
        current: impl IntoIterator<Item = Old>,
        desired: impl IntoIterator<Item = New>,
        platform: Platform,
    ) -> Result<Self, TransactionError> {
        let current: Vec<Old> = current.into_iter().collect();
        let desired: Vec<New> = desired.into_iter().collect();

        let current_python_info = find_python_info(current.iter().map(AsRef::as_ref), platform)?;
        let python_info = find_python_info(desired.iter().map(AsRef::as_ref), platform)?;
        let needs_python_relink = match (&current_python_info, &python_info) {
            (Some(current), Some(desired)) => desired.is_relink_required(current),
            _ => false,
        };

        let mut desired_by_name: HashMap<String, New> = desired
            .into_iter()
            .map(|record| {
                (
                    record.as_ref().name.as_normalized().to_string(),
                    record,
                )
            })
            .collect();

        let mut operations = Vec::new();
        for old in current {
            let name = old.as_ref().name.as_normalized().to_string();
            match desired_by_name.remove(&name) {
                None => operations.push(TransactionOperation::Remove(old)),
                Some(new) => {
                    if records_differ(old.as_ref(), new.as_ref()) {
                        operations.push(TransactionOperation::Change { old, new });
                    } else if new.as_ref().noarch.is_python() && needs_python_relink {
                        operations.push(TransactionOperation::Reinstall { old, new });
                    }
                    // Identical records need no step at all.
                }
            }
        }
        for new in desired_by_name.into_values() {
            operations.push(TransactionOperation::Install(new));
        }

        Ok(Self {
            operations,
            python_info,
            current_python_info,
            platform,
        })
    }

    /// Per-kind counts of the operations.
    pub fn summary(&self) -> TransactionSummary {
        let mut summary = TransactionSummary::default();
        for operation in &self.operations {
            match operation {
                TransactionOperation::Install(_) => summary.installed += 1,
                TransactionOperation::Remove(_) => summary.removed += 1,
                TransactionOperation::Reinstall { .. } => summary.reinstalled += 1,
                TransactionOperation::Change { old, new } => {
                    let old_version = &old.as_ref().version;
                    let new_version = &new.as_ref().version;
                    if new_version > old_version {
                        summary.upgraded += 1;
                    } else if new_version < old_version {
                        summary.downgraded += 1;
                    } else {
                        summary.changed += 1;
                    }
                }
            }
        }
        summary
    }

    /// True when there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Prints the summary and asks for confirmation. Returns `true` without
    /// touching the streams when `always_yes` is set; an empty answer counts
    /// as yes, matching the conda convention.
    pub fn prompt(
        &self,
        input: &mut impl std::io::BufRead,
        output: &mut impl std::io::Write,
        always_yes: bool,
    ) -> std::io::Result<bool> {
        if always_yes {
            return Ok(true);
        }

        let summary = self.summary();
        writeln!(
            output,
            "{} to install, {} to remove, {} to upgrade, {} to downgrade, {} to change, {} to reinstall",
            summary.installed,
            summary.removed,
            summary.upgraded,
            summary.downgraded,
            summary.changed,
            summary.reinstalled
        )?;
        write!(output, "Proceed ([y]/n)? ")?;
        output.flush()?;

        let mut answer = String::new();
        input.read_line(&mut answer)?;
        let answer = answer.trim().to_ascii_lowercase();
        Ok(answer.is_empty() || answer == "y" || answer == "yes")
    }
}

impl Transaction<PrefixRecord, RepoDataRecord> {
    /// Builds a transaction from a solver solution and the installed
    /// records.
    pub fn from_solution(
        pool: &Pool,
        solution: &Solution,
        current: Vec<PrefixRecord>,
        platform: Platform,
    ) -> Result<Self, TransactionError> {
        let desired: Vec<RepoDataRecord> = solution
            .solvables
            .iter()
            .map(|&solvable_id| pool.resolve_solvable(solvable_id).record().clone())
            .collect();
        Self::from_current_and_desired(current, desired, platform)
    }

    /// Builds a transaction that installs exactly the given records,
    /// removing everything else (explicit mode, used for lockfiles and
    /// URL lists).
    pub fn from_explicit(
        current: Vec<PrefixRecord>,
        desired: Vec<RepoDataRecord>,
        platform: Platform,
    ) -> Result<Self, TransactionError> {
        Self::from_current_and_desired(current, desired, platform)
    }
}

/// Two records describe the same installation if all identity fields agree.
fn records_differ(old: &PackageRecord, new: &PackageRecord) -> bool {
    old.version != new.version
        || old.build != new.build
        || old.build_number != new.build_number
        || old.subdir != new.subdir
        || (old.sha256.is_some() && new.sha256.is_some() && old.sha256 != new.sha256)
}

/// The python record of a record set, if any.
fn find_python_info<'a>(
    records: impl IntoIterator<Item = &'a PackageRecord>,
    platform: Platform,
) -> Result<Option<PythonInfo>, PythonInfoError> {
    records
        .into_iter()
        .find(|record| record.name.as_normalized() == "python")
        .map(|record| PythonInfo::from_record(record, platform))
        .transpose()
}
