//! Translation of user requests into solver jobs.

use std::collections::HashSet;

use krait_conda_types::{MatchSpec, VersionOperator, VersionSpec};
use thiserror::Error;

use crate::{
    pool::{Pool, PoolError},
    solver::{SolveJobs, SolverFlags},
    NameId, SolvableId,
};

/// One item of a user request. The order of items within a [`Request`]
/// matters for tie-breaking but not for correctness.
#[derive(Debug, Clone)]
pub enum RequestItem {
    /// Install something matching the spec.
    Install(MatchSpec),

    /// Remove everything matching the spec.
    Remove {
        /// The spec to remove.
        spec: MatchSpec,
        /// Also drop dependencies that become orphaned.
        clean_dependencies: bool,
    },

    /// Update the package to the best available version.
    Update(MatchSpec),

    /// Update every installed package.
    UpdateAll {
        /// Also drop dependencies that become orphaned.
        clean_dependencies: bool,
    },

    /// Keep the spec satisfied, preferring the installed version. This is
    /// the job replayed from the prefix history.
    Keep(MatchSpec),

    /// Freeze the package at its currently installed version and build.
    Freeze(MatchSpec),

    /// Make every version of the package that does not match the spec
    /// uninstallable.
    Pin(MatchSpec),
}

/// A list of request items, the input of one solve.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// The items of the request.
    pub items: Vec<RequestItem>,
}

impl FromIterator<RequestItem> for Request {
    fn from_iter<T: IntoIterator<Item = RequestItem>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

/// An error raised while translating a request, before any solving happens.
#[derive(Debug, Error)]
pub enum RequestError {
    /// An item carried a spec that is not allowed in its position.
    #[error("invalid spec '{spec}': {reason}")]
    InvalidSpec {
        /// The offending spec.
        spec: MatchSpec,
        /// Why it is rejected.
        reason: String,
    },

    /// A pin matches no available package at all.
    #[error("the pin '{0}' does not match any available package")]
    UnsatisfiablePin(MatchSpec),

    /// The pool rejected a spec.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl Request {
    /// Translates the request into [`SolveJobs`], interning all specs into
    /// the pool. Installed packages are favored unless an update item asks
    /// for them to move; removals with dependency cleanup release the
    /// removed package's dependency closure from being kept.
    pub fn translate(
        &self,
        pool: &mut Pool,
        flags: SolverFlags,
    ) -> Result<SolveJobs, RequestError> {
        let mut jobs = SolveJobs::default();
        let mut no_favor: HashSet<NameId> = HashSet::new();
        let mut removed_names: HashSet<NameId> = HashSet::new();

        for item in &self.items {
            match item {
                RequestItem::Install(spec) => {
                    let spec_id = match self.reinstall_target(pool, spec, flags) {
                        Some(pinned) => pool.intern_spec(pinned),
                        None => pool.intern_spec(spec.clone()),
                    };
                    jobs.install(spec_id);
                }
                RequestItem::Remove {
                    spec,
                    clean_dependencies,
                } => {
                    if spec.channel.is_some() {
                        return Err(RequestError::InvalidSpec {
                            spec: spec.clone(),
                            reason: "a remove request cannot pin a channel".to_string(),
                        });
                    }
                    if let Some(name_id) = spec
                        .name
                        .as_ref()
                        .and_then(|name| pool.find_package_name(name.as_normalized()))
                    {
                        removed_names.insert(name_id);
                    }
                    if *clean_dependencies {
                        // Everything the removed package pulled in may go
                        // with it, unless another kept package needs it.
                        let removed: Vec<_> = pool
                            .installed_solvables()
                            .filter(|&solvable_id| {
                                spec.matches_record(pool.resolve_solvable(solvable_id).record())
                            })
                            .collect();
                        for name_id in installed_dependency_closure(pool, &removed) {
                            jobs.cleandeps(name_id);
                        }
                    }
                    let spec_id = pool.intern_spec(spec.clone());
                    jobs.exclude(spec_id);
                }
                RequestItem::Update(spec) => {
                    if let Some(name_id) = spec
                        .name
                        .as_ref()
                        .and_then(|name| pool.find_package_name(name.as_normalized()))
                    {
                        no_favor.insert(name_id);
                    }
                    let spec_id = pool.intern_spec(spec.clone());
                    jobs.install(spec_id);
                }
                RequestItem::UpdateAll { clean_dependencies } => {
                    let installed: Vec<_> = pool.installed_solvables().collect();
                    // When cleaning, only top-level packages (those nothing
                    // else depends on) are re-required; dependencies follow
                    // from the updated versions and fall away when no
                    // longer needed.
                    let dependency_names = if *clean_dependencies {
                        installed_dependency_names(pool, &installed)
                    } else {
                        HashSet::new()
                    };
                    for solvable_id in installed {
                        let (name_id, name) = {
                            let solvable = pool.resolve_solvable(solvable_id);
                            (
                                solvable.name_id(),
                                solvable.record().package_record.name.clone(),
                            )
                        };
                        no_favor.insert(name_id);
                        if dependency_names.contains(&name_id) {
                            jobs.cleandeps(name_id);
                            continue;
                        }
                        let spec_id = pool.intern_spec(MatchSpec::from_name(name));
                        jobs.install(spec_id);
                    }
                }
                RequestItem::Keep(spec) => {
                    let spec_id = pool.intern_spec(spec.clone());
                    jobs.install(spec_id);
                }
                RequestItem::Freeze(spec) => {
                    let installed = spec
                        .name
                        .as_ref()
                        .and_then(|name| pool.find_package_name(name.as_normalized()))
                        .and_then(|name_id| pool.find_installed_by_name(name_id));
                    match installed {
                        Some(solvable_id) => jobs.lock(solvable_id),
                        None => {
                            tracing::warn!("cannot freeze '{spec}': it is not installed");
                        }
                    }
                }
                RequestItem::Pin(spec) => {
                    let Some(name_id) = spec
                        .name
                        .as_ref()
                        .and_then(|name| pool.find_package_name(name.as_normalized()))
                    else {
                        return Err(RequestError::UnsatisfiablePin(spec.clone()));
                    };
                    let any_match = pool.solvables_by_name(name_id).iter().any(|&solvable_id| {
                        spec.matches_record(pool.resolve_solvable(solvable_id).record())
                    });
                    if !any_match {
                        return Err(RequestError::UnsatisfiablePin(spec.clone()));
                    }
                    let spec_id = pool.intern_spec(spec.clone());
                    jobs.pin(spec_id);
                }
            }
        }

        // Installed packages are preferred over equal alternatives, except
        // where an update explicitly asked for movement.
        let installed: Vec<_> = pool.installed_solvables().collect();
        for solvable_id in installed {
            let name_id = pool.resolve_solvable(solvable_id).name_id();
            if !no_favor.contains(&name_id) {
                jobs.favor(solvable_id);
            }
        }

        // Keep orphans installed by requiring their names. Names marked for
        // dependency cleanup are deliberately not kept; they survive only
        // while another chosen package requires them.
        if flags.keep_orphans {
            let installed: Vec<_> = pool.installed_solvables().collect();
            for solvable_id in installed {
                let (name_id, name) = {
                    let solvable = pool.resolve_solvable(solvable_id);
                    (
                        solvable.name_id(),
                        solvable.record().package_record.name.clone(),
                    )
                };
                if removed_names.contains(&name_id) || jobs.cleandeps.contains(&name_id) {
                    continue;
                }
                let spec_id = pool.intern_spec(MatchSpec::from_name(name));
                jobs.install(spec_id);
            }
        }

        Ok(jobs)
    }

    /// Under `force_reinstall`, an install of an already-installed name is
    /// redirected to the exact channel, version and build that is installed.
    fn reinstall_target(
        &self,
        pool: &Pool,
        spec: &MatchSpec,
        flags: SolverFlags,
    ) -> Option<MatchSpec> {
        if !flags.force_reinstall {
            return None;
        }
        let name_id = spec
            .name
            .as_ref()
            .and_then(|name| pool.find_package_name(name.as_normalized()))?;
        let installed = pool.find_installed_by_name(name_id)?;
        let record = pool.resolve_solvable(installed).record();

        let mut pinned = MatchSpec::from_name(record.package_record.name.clone());
        pinned.version = Some(VersionSpec::Operator(
            VersionOperator::Equals,
            record.package_record.version.clone(),
        ));
        if !record.package_record.build.is_empty() {
            pinned.build = record.package_record.build.parse().ok();
        }
        pinned.channel = record.channel.clone();
        Some(pinned)
    }
}

/// The names of everything the given installed solvables transitively
/// depend on, resolved within the installed repo.
fn installed_dependency_closure(pool: &Pool, roots: &[SolvableId]) -> HashSet<NameId> {
    let mut names = HashSet::new();
    let mut visited = HashSet::new();
    let mut stack: Vec<SolvableId> = roots.to_vec();
    while let Some(solvable_id) = stack.pop() {
        if !visited.insert(solvable_id) {
            continue;
        }
        for &dep in pool.resolve_solvable(solvable_id).dependencies() {
            let Some(name_id) = pool
                .resolve_spec(dep)
                .name
                .as_ref()
                .and_then(|name| pool.find_package_name(name.as_normalized()))
            else {
                continue;
            };
            if names.insert(name_id) {
                if let Some(installed) = pool.find_installed_by_name(name_id) {
                    stack.push(installed);
                }
            }
        }
    }
    names
}

/// The names that at least one of the given installed solvables depends on.
fn installed_dependency_names(pool: &Pool, installed: &[SolvableId]) -> HashSet<NameId> {
    let mut names = HashSet::new();
    for &solvable_id in installed {
        for &dep in pool.resolve_solvable(solvable_id).dependencies() {
            if let Some(name_id) = pool
                .resolve_spec(dep)
                .name
                .as_ref()
                .and_then(|name| pool.find_package_name(name.as_normalized()))
            {
                names.insert(name_id);
            }
        }
    }
    names
}
