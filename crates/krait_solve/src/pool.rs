//! The interning pool. See [`Pool`].

use ahash::AHashMap;
use krait_conda_types::{MatchSpec, ParseMatchSpecError, RepoDataRecord};
use thiserror::Error;

use crate::{
    arena::Arena,
    conda_sort,
    id::{NameId, RepoId, SolvableId, SpecId, StringId},
    solvable::{PackageSolvable, Solvable},
};

/// A repo registered with the pool: a bag of solvables sharing a channel.
pub(crate) struct Repo {
    pub(crate) name: String,
    pub(crate) priority: i32,
    pub(crate) frozen: bool,
    pub(crate) alive: bool,
    pub(crate) solvables: Vec<SolvableId>,
}

/// An error returned by pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A match spec did not follow the grammar.
    #[error("invalid match spec: {0}")]
    InvalidSpec(#[from] ParseMatchSpecError),

    /// [`Pool::create_whatprovides`] has not been called yet.
    #[error("the whatprovides index has not been built yet")]
    IndexNotBuilt,
}

/// The in-memory store of everything the solver reasons about.
///
/// The pool interns strings, package names and match specs into dense integer
/// ids, owns the candidate packages (*solvables*) grouped into repos, and
/// maintains the *whatprovides* index: for every interned spec, the sorted
/// list of solvables that satisfy it.
///
/// The pool is mutated while repos load and while a request is translated
/// into jobs. After [`Pool::create_whatprovides`] it is used strictly through
/// shared references; the solver observes a consistent snapshot.
pub struct Pool {
    /// All solvables; index 0 is the root solvable.
    pub(crate) solvables: Vec<Solvable>,

    repos: Arena<RepoId, Repo>,
    installed_repo: Option<RepoId>,

    strings: Arena<StringId, Box<str>>,
    strings_to_ids: AHashMap<Box<str>, StringId>,

    package_names: Arena<NameId, String>,
    names_to_ids: AHashMap<String, NameId>,

    /// For every interned name, the solvables carrying that name. Insertion
    /// order until `create_whatprovides` rebuilds and the per-spec candidate
    /// lists are sorted.
    pub(crate) packages_by_name: Vec<Vec<SolvableId>>,

    specs: Arena<SpecId, MatchSpec>,
    specs_to_ids: AHashMap<String, SpecId>,

    /// Pre-populated resolutions for namespace specs. Consulted instead of
    /// the name index so that solving needs no callback into user code.
    namespace_candidates: AHashMap<SpecId, Vec<SolvableId>>,

    /// Per spec: the solvables matching it, in candidate preference order.
    /// Valid once `whatprovides_ready`.
    candidates: Vec<Vec<SolvableId>>,

    /// Per spec: the solvables of the spec's name that do *not* match it.
    forbidden: Vec<Vec<SolvableId>>,

    whatprovides_ready: bool,
}

impl Default for Pool {
    fn default() -> Self {
        Self {
            solvables: vec![Solvable::new_root()],
            repos: Arena::new(),
            installed_repo: None,
            strings: Arena::new(),
            strings_to_ids: AHashMap::new(),
            package_names: Arena::new(),
            names_to_ids: AHashMap::new(),
            packages_by_name: Vec::new(),
            specs: Arena::new(),
            specs_to_ids: AHashMap::new(),
            namespace_candidates: AHashMap::new(),
            candidates: Vec::new(),
            forbidden: Vec::new(),
            whatprovides_ready: false,
        }
    }
}

impl Pool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a free-form string. Repeated calls with equal input return the
    /// same id.
    pub fn intern_string(&mut self, string: &str) -> StringId {
        if let Some(&id) = self.strings_to_ids.get(string) {
            return id;
        }
        let id = self.strings.alloc(string.into());
        self.strings_to_ids.insert(string.into(), id);
        id
    }

    /// Looks a string up without interning it.
    pub fn find_string(&self, string: &str) -> Option<StringId> {
        self.strings_to_ids.get(string).copied()
    }

    /// Returns the string behind an id.
    pub fn resolve_string(&self, id: StringId) -> &str {
        &self.strings[id]
    }

    /// Interns a package name.
    pub fn intern_package_name(&mut self, name: &str) -> NameId {
        if let Some(&id) = self.names_to_ids.get(name) {
            return id;
        }
        let id = self.package_names.alloc(name.to_string());
        self.names_to_ids.insert(name.to_string(), id);
        self.packages_by_name.push(Vec::new());
        id
    }

    /// Looks a package name up without interning it.
    pub fn find_package_name(&self, name: &str) -> Option<NameId> {
        self.names_to_ids.get(name).copied()
    }

    /// Returns the package name behind an id.
    pub fn resolve_package_name(&self, id: NameId) -> &str {
        &self.package_names[id]
    }

    /// Interns a parsed match spec, deduplicating on its canonical form.
    pub fn intern_spec(&mut self, spec: MatchSpec) -> SpecId {
        let canonical = spec.to_string();
        if let Some(&id) = self.specs_to_ids.get(&canonical) {
            return id;
        }
        if let Some(name) = &spec.name {
            self.intern_package_name(name.as_normalized());
        }
        let id = self.specs.alloc(spec);
        self.specs_to_ids.insert(canonical, id);
        // The caches grow in lockstep with the spec arena; they hold data
        // only once `create_whatprovides` ran.
        self.candidates.push(Vec::new());
        self.forbidden.push(Vec::new());
        id
    }

    /// Parses and interns a match spec.
    pub fn intern_matchspec(&mut self, spec: &str) -> Result<SpecId, PoolError> {
        let spec = spec.parse::<MatchSpec>()?;
        Ok(self.intern_spec(spec))
    }

    /// Returns the match spec behind an id.
    pub fn resolve_spec(&self, id: SpecId) -> &MatchSpec {
        &self.specs[id]
    }

    /// Registers a new repo. Repos loaded earlier get a higher `priority`
    /// when strict channel priority is in effect.
    pub fn new_repo(&mut self, name: impl Into<String>, priority: i32) -> RepoId {
        self.repos.alloc(Repo {
            name: name.into(),
            priority,
            frozen: false,
            alive: true,
            solvables: Vec::new(),
        })
    }

    /// Marks a repo as holding the currently installed packages. At most one
    /// repo can be marked installed.
    pub fn set_installed_repo(&mut self, repo_id: RepoId) {
        self.installed_repo = Some(repo_id);
    }

    /// The repo marked as installed, if any.
    pub fn installed_repo(&self) -> Option<RepoId> {
        self.installed_repo
    }

    /// The name (channel) of a repo.
    pub fn repo_name(&self, repo_id: RepoId) -> &str {
        &self.repos[repo_id].name
    }

    /// The priority of a repo.
    pub fn repo_priority(&self, repo_id: RepoId) -> i32 {
        self.repos[repo_id].priority
    }

    /// Finalizes a repo. Further [`Pool::add_solvable`] calls on it are
    /// no-ops.
    pub fn internalize(&mut self, repo_id: RepoId) {
        self.repos[repo_id].frozen = true;
    }

    /// Drops a repo from the pool. Its solvables disappear from the
    /// whatprovides index at the next [`Pool::create_whatprovides`]. When
    /// `reuse_ids` is set and the repo's solvables form the tail of the id
    /// space, their ids are freed for reuse.
    pub fn remove_repo(&mut self, repo_id: RepoId, reuse_ids: bool) {
        let solvables = std::mem::take(&mut self.repos[repo_id].solvables);
        self.repos[repo_id].alive = false;
        if self.installed_repo == Some(repo_id) {
            self.installed_repo = None;
        }
        if reuse_ids {
            if let Some(first) = solvables.first() {
                if first.index() + solvables.len() == self.solvables.len() {
                    self.solvables.truncate(first.index());
                }
            }
        }
        self.whatprovides_ready = false;
    }

    /// Adds a solvable for `record` to a repo, interning its name and its
    /// dependency and constrains specs. Returns `Ok(None)` when the repo has
    /// been internalized (the add is a no-op) and an error when a dependency
    /// spec is malformed.
    pub fn add_solvable(
        &mut self,
        repo_id: RepoId,
        record: RepoDataRecord,
    ) -> Result<Option<SolvableId>, PoolError> {
        assert!(self.solvables.len() < u32::MAX as usize);
        {
            let repo = &self.repos[repo_id];
            if repo.frozen || !repo.alive {
                tracing::debug!(
                    "ignoring solvable {} added to internalized repo {}",
                    record.file_name,
                    repo.name
                );
                return Ok(None);
            }
        }

        let name = self.intern_package_name(record.package_record.name.as_normalized());
        let dependencies = record
            .package_record
            .depends
            .iter()
            .map(|dep| self.intern_matchspec(dep))
            .collect::<Result<Vec<_>, _>>()?;
        let constrains = record
            .package_record
            .constrains
            .iter()
            .map(|dep| self.intern_matchspec(dep))
            .collect::<Result<Vec<_>, _>>()?;

        let solvable_id = SolvableId::new(self.solvables.len());
        self.solvables.push(Solvable::Package(PackageSolvable {
            repo_id,
            name,
            record,
            dependencies,
            constrains,
        }));
        self.repos[repo_id].solvables.push(solvable_id);
        self.packages_by_name[name.index()].push(solvable_id);
        self.whatprovides_ready = false;
        Ok(solvable_id.into())
    }

    /// (Re)builds the whatprovides index: the per-name solvable lists and,
    /// for every interned spec, the matching candidates sorted into
    /// preference order as well as the non-matching solvables of the same
    /// name. Must be called before solving; afterwards the pool can be shared
    /// immutably.
    pub fn create_whatprovides(&mut self) {
        // Rebuild the name index from scratch so removed repos drop out.
        for list in &mut self.packages_by_name {
            list.clear();
        }
        for (idx, solvable) in self.solvables.iter().enumerate() {
            let Some(package) = solvable.get_package() else {
                continue;
            };
            if !self.repos[package.repo_id].alive {
                continue;
            }
            self.packages_by_name[package.name.index()].push(SolvableId::new(idx));
        }

        let mut candidates = Vec::with_capacity(self.specs.len());
        let mut forbidden = Vec::with_capacity(self.specs.len());
        for (spec_id, spec) in self.specs.iter() {
            let mut matching = Vec::new();
            let mut rest = Vec::new();

            if spec.namespace.is_some() {
                matching = self
                    .namespace_candidates
                    .get(&spec_id)
                    .cloned()
                    .unwrap_or_default();
            } else if let Some(name_id) = spec
                .name
                .as_ref()
                .and_then(|name| self.find_package_name(name.as_normalized()))
            {
                for &solvable_id in &self.packages_by_name[name_id.index()] {
                    let record = &self.solvables[solvable_id.index()].package().record;
                    if spec.matches_record(record) {
                        matching.push(solvable_id);
                    } else {
                        rest.push(solvable_id);
                    }
                }
            }

            matching.sort_by(|&a, &b| conda_sort::compare_candidates(self, a, b));
            candidates.push(matching);
            forbidden.push(rest);
        }

        self.candidates = candidates;
        self.forbidden = forbidden;
        self.whatprovides_ready = true;
    }

    /// Returns true once [`Pool::create_whatprovides`] has run and no
    /// mutation happened since.
    pub fn whatprovides_ready(&self) -> bool {
        self.whatprovides_ready
    }

    /// Installs the pre-resolved candidates of a namespace spec. Replaces the
    /// callback of the original design so that solving needs no mutable pool
    /// access.
    pub fn set_namespace_candidates(&mut self, spec_id: SpecId, solvables: Vec<SolvableId>) {
        self.namespace_candidates.insert(spec_id, solvables);
        self.whatprovides_ready = false;
    }

    /// The candidates for a spec, best first.
    ///
    /// Panics when the whatprovides index has not been built.
    pub fn candidates(&self, spec_id: SpecId) -> &[SolvableId] {
        assert!(
            self.whatprovides_ready,
            "create_whatprovides must run before candidates are queried"
        );
        &self.candidates[spec_id.index()]
    }

    /// The solvables that share a spec's name without matching it.
    ///
    /// Panics when the whatprovides index has not been built.
    pub fn forbidden(&self, spec_id: SpecId) -> &[SolvableId] {
        assert!(
            self.whatprovides_ready,
            "create_whatprovides must run before candidates are queried"
        );
        &self.forbidden[spec_id.index()]
    }

    /// Resolves a selection of specs to the concrete solvables satisfying
    /// them.
    pub fn select_solvables(&self, specs: &[SpecId]) -> Result<Vec<SolvableId>, PoolError> {
        if !self.whatprovides_ready {
            return Err(PoolError::IndexNotBuilt);
        }
        let mut selected = Vec::new();
        for &spec_id in specs {
            for &solvable_id in &self.candidates[spec_id.index()] {
                if !selected.contains(&solvable_id) {
                    selected.push(solvable_id);
                }
            }
        }
        Ok(selected)
    }

    /// Returns the package solvable behind an id.
    ///
    /// Panics when the id refers to the root solvable.
    pub fn resolve_solvable(&self, id: SolvableId) -> &PackageSolvable {
        self.solvables[id.index()].package()
    }

    pub(crate) fn resolve_solvable_inner(&self, id: SolvableId) -> &Solvable {
        &self.solvables[id.index()]
    }

    /// The total number of solvables, including the root.
    pub fn nsolvables(&self) -> u32 {
        self.solvables.len() as u32
    }

    /// The solvables belonging to a repo, in insertion order.
    pub fn repo_solvables(&self, repo_id: RepoId) -> &[SolvableId] {
        &self.repos[repo_id].solvables
    }

    /// The solvables of the installed repo.
    pub fn installed_solvables(&self) -> impl Iterator<Item = SolvableId> + '_ {
        self.installed_repo
            .map(|repo_id| self.repos[repo_id].solvables.as_slice())
            .unwrap_or_default()
            .iter()
            .copied()
    }

    /// The installed solvable with the given name, if any.
    pub fn find_installed_by_name(&self, name: NameId) -> Option<SolvableId> {
        self.installed_solvables()
            .find(|&id| self.resolve_solvable(id).name == name)
    }

    /// All solvables carrying the given name, in insertion order.
    pub fn solvables_by_name(&self, name: NameId) -> &[SolvableId] {
        &self.packages_by_name[name.index()]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::{pool_from_packages, record};

    #[test]
    fn test_string_interning_is_idempotent_and_dense() {
        let mut pool = Pool::new();
        let mut ids = Vec::new();
        for idx in 0..10_000 {
            ids.push(pool.intern_string(&format!("string-{idx}")));
        }
        for (idx, &id) in ids.iter().enumerate() {
            assert_eq!(id.index(), idx);
            assert_eq!(pool.intern_string(&format!("string-{idx}")), id);
            assert_eq!(pool.find_string(&format!("string-{idx}")), Some(id));
        }
        assert_eq!(pool.find_string("never-interned"), None);
    }

    #[test]
    fn test_spec_interning_deduplicates_canonical_forms() {
        let mut pool = Pool::new();
        let a = pool.intern_matchspec("numpy >=1.8").unwrap();
        let b = pool.intern_matchspec(r#"numpy[version=">=1.8"]"#).unwrap();
        let c = pool.intern_matchspec("numpy >=1.9").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_invalid_spec_is_rejected() {
        let mut pool = Pool::new();
        assert!(matches!(
            pool.intern_matchspec(">=1.0"),
            Err(PoolError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_select_solvables_requires_index() {
        let mut pool = Pool::new();
        let spec = pool.intern_matchspec("numpy").unwrap();
        assert!(matches!(
            pool.select_solvables(&[spec]),
            Err(PoolError::IndexNotBuilt)
        ));
    }

    #[test]
    fn test_whatprovides_completeness() {
        let mut pool = pool_from_packages(&[
            ("numpy", "1.22.0", vec![]),
            ("numpy", "1.23.0", vec![]),
            ("scipy", "1.9.0", vec![]),
        ]);
        let spec = pool.intern_matchspec("numpy").unwrap();
        pool.create_whatprovides();

        let selected = pool.select_solvables(&[spec]).unwrap();
        assert_eq!(selected.len(), 2);
        // Best candidate (highest version) comes first.
        assert_eq!(
            pool.resolve_solvable(selected[0])
                .record()
                .package_record
                .version
                .to_string(),
            "1.23.0"
        );
    }

    #[test]
    fn test_namespace_specs_resolve_through_the_preset_table() {
        let mut pool = pool_from_packages(&[("plugin", "1.0", vec![]), ("plugin", "2.0", vec![])]);
        let spec = pool.intern_matchspec("ns:plugin").unwrap();
        let solvables: Vec<_> = pool
            .find_package_name("plugin")
            .map(|name| pool.solvables_by_name(name).to_vec())
            .unwrap();

        // Without a resolution the namespace spec has no candidates.
        pool.create_whatprovides();
        assert!(pool.candidates(spec).is_empty());

        // The pre-populated table replaces the namespace callback of the
        // original design.
        pool.set_namespace_candidates(spec, vec![solvables[0]]);
        pool.create_whatprovides();
        assert_eq!(pool.candidates(spec), &[solvables[0]]);
    }

    #[test]
    fn test_internalized_repo_ignores_additions() {
        let mut pool = Pool::new();
        let repo = pool.new_repo("test", 0);
        pool.add_solvable(repo, record("a", "1.0", vec![]))
            .unwrap()
            .unwrap();
        pool.internalize(repo);
        assert!(pool
            .add_solvable(repo, record("b", "1.0", vec![]))
            .unwrap()
            .is_none());
        assert_eq!(pool.nsolvables(), 2);
    }

    #[test]
    fn test_remove_repo_with_id_reuse() {
        let mut pool = Pool::new();
        let first = pool.new_repo("first", 0);
        pool.add_solvable(first, record("a", "1.0", vec![]))
            .unwrap()
            .unwrap();
        let second = pool.new_repo("second", 0);
        pool.add_solvable(second, record("b", "1.0", vec![]))
            .unwrap()
            .unwrap();
        let before = pool.nsolvables();

        pool.remove_repo(second, true);
        assert_eq!(pool.nsolvables(), before - 1);

        let spec = pool.intern_matchspec("b").unwrap();
        pool.create_whatprovides();
        assert!(pool.select_solvables(&[spec]).unwrap().is_empty());
    }
}
