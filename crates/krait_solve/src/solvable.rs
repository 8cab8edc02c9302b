use std::fmt::{Display, Formatter};

use krait_conda_types::RepoDataRecord;

use crate::id::{NameId, RepoId, SpecId};

/// A candidate package registered in the pool. Owned by exactly one repo and
/// immutable once its repo has been internalized.
pub struct PackageSolvable {
    pub(crate) repo_id: RepoId,
    pub(crate) name: NameId,
    pub(crate) record: RepoDataRecord,
    pub(crate) dependencies: Vec<SpecId>,
    pub(crate) constrains: Vec<SpecId>,
}

impl PackageSolvable {
    /// The repo this solvable belongs to.
    pub fn repo_id(&self) -> RepoId {
        self.repo_id
    }

    /// The interned name of the package.
    pub fn name_id(&self) -> NameId {
        self.name
    }

    /// The full repodata record of the candidate.
    pub fn record(&self) -> &RepoDataRecord {
        &self.record
    }

    /// The interned dependencies of the candidate.
    pub fn dependencies(&self) -> &[SpecId] {
        &self.dependencies
    }

    /// The interned constrains of the candidate.
    pub fn constrains(&self) -> &[SpecId] {
        &self.constrains
    }
}

/// Either the root solvable (standing in for the user's request) or a
/// package.
pub(crate) enum Solvable {
    Root(Vec<SpecId>),
    Package(PackageSolvable),
}

impl Solvable {
    pub(crate) fn new_root() -> Self {
        Solvable::Root(Vec::new())
    }

    pub(crate) fn get_package(&self) -> Option<&PackageSolvable> {
        match self {
            Solvable::Root(_) => None,
            Solvable::Package(package) => Some(package),
        }
    }

    pub(crate) fn package(&self) -> &PackageSolvable {
        self.get_package().expect("unexpected root solvable")
    }

    pub(crate) fn display(&self) -> SolvableDisplay<'_> {
        SolvableDisplay { solvable: self }
    }
}

/// A compact `name version build` rendering for log and problem output.
pub(crate) struct SolvableDisplay<'a> {
    solvable: &'a Solvable,
}

impl Display for SolvableDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.solvable {
            Solvable::Root(_) => write!(f, "root"),
            Solvable::Package(package) => {
                let record = &package.record.package_record;
                write!(f, "{} {}", record.name.as_normalized(), record.version)?;
                if !record.build.is_empty() {
                    write!(f, " {}", record.build)?;
                }
                Ok(())
            }
        }
    }
}
