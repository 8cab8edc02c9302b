//! The clause-based dependency solver. See [`Solver`].

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use thiserror::Error;

use crate::{
    decision::{Decision, DecisionTracker},
    id::{NameId, RuleId, SolvableId, SpecId},
    pool::Pool,
    problem::{ExcludeReason, Problem},
    rules::{Literal, Rule, RuleKind},
    watch_map::WatchMap,
};

/// Solver behavior toggles. The zero value is the default behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolverFlags {
    /// Permit the solution to contain a lower version of an installed
    /// package.
    pub allow_downgrade: bool,

    /// Permit the solution to drop installed packages that were requested by
    /// the user.
    pub allow_uninstall: bool,

    /// Forbid candidates of a name from any channel but the
    /// highest-priority channel that carries the name.
    pub strict_channel_priority: bool,

    /// Reinstall requested packages even when an equivalent package is
    /// already present; the replacement is pinned to the installed
    /// channel/version/build.
    pub force_reinstall: bool,

    /// Keep installed packages that no requested package depends on.
    pub keep_orphans: bool,
}

/// The jobs of one solve, produced by translating a
/// [`crate::Request`].
#[derive(Default)]
pub struct SolveJobs {
    pub(crate) install: Vec<SpecId>,
    pub(crate) exclude: Vec<SpecId>,
    pub(crate) lock: Vec<SolvableId>,
    pub(crate) pin: Vec<SpecId>,
    pub(crate) favor: Vec<SolvableId>,
    pub(crate) cleandeps: HashSet<NameId>,
}

impl SolveJobs {
    /// The given spec must be satisfied by the solution.
    pub fn install(&mut self, spec: SpecId) {
        self.install.push(spec);
    }

    /// No solvable matching the spec may appear in the solution.
    pub fn exclude(&mut self, spec: SpecId) {
        self.exclude.push(spec);
    }

    /// Forbid every other candidate that shares the solvable's name.
    pub fn lock(&mut self, solvable: SolvableId) {
        self.lock.push(solvable);
    }

    /// Forbid every candidate of the spec's name that does *not* match the
    /// spec.
    pub fn pin(&mut self, spec: SpecId) {
        self.pin.push(spec);
    }

    /// Prefer this solvable over its siblings when several candidates
    /// satisfy a requirement. Does not guarantee selection; use
    /// [`SolveJobs::lock`] for that.
    pub fn favor(&mut self, solvable: SolvableId) {
        self.favor.push(solvable);
    }

    /// Marks a name as a dependency of a cleanly removed (or updated)
    /// package. Names in this set are never re-required just because they
    /// are installed; they stay only while another chosen package still
    /// depends on them, so true orphans fall out of the solution.
    pub fn cleandeps(&mut self, name: NameId) {
        self.cleandeps.insert(name);
    }
}

/// A satisfying assignment: the set of solvables to be present in the
/// target state.
pub struct Solution {
    /// The chosen solvables, in decision order (dependencies tend to appear
    /// near their dependents; final ordering is the transaction's concern).
    pub solvables: Vec<SolvableId>,
}

/// The error of a failed solve.
#[derive(Debug, Error)]
pub enum SolveError {
    /// No assignment satisfies the jobs; the contained problem explains why.
    #[error("the request is unsatisfiable")]
    Unsolvable(Problem),

    /// The solve was interrupted through the cancellation flag.
    #[error("the solve was cancelled")]
    Cancelled,
}

/// A one-shot CDCL solver over a [`Pool`] snapshot.
///
/// The pool must have its whatprovides index built
/// ([`Pool::create_whatprovides`]); the solver itself never mutates the
/// pool.
pub struct Solver<'pool> {
    pool: &'pool Pool,
    flags: SolverFlags,
    cancel: Option<Arc<AtomicBool>>,

    pub(crate) rules: Vec<Rule>,
    watches: WatchMap,

    pub(crate) learnt_rules: Vec<Vec<Literal>>,
    learnt_rules_start: RuleId,
    learnt_why: Vec<Vec<RuleId>>,

    decision_tracker: DecisionTracker,
}

impl<'pool> Solver<'pool> {
    /// Creates a solver over the given pool.
    pub fn new(pool: &'pool Pool, flags: SolverFlags) -> Self {
        Self {
            flags,
            cancel: None,
            rules: Vec::new(),
            watches: WatchMap::new(),
            learnt_rules: Vec::new(),
            learnt_rules_start: RuleId::install_root(),
            learnt_why: Vec::new(),
            decision_tracker: DecisionTracker::new(pool.nsolvables()),
            pool,
        }
    }

    /// The pool the solver operates on.
    pub fn pool(&self) -> &'pool Pool {
        self.pool
    }

    /// Installs a cancellation flag; when it turns true the solver stops
    /// between decision rounds with [`SolveError::Cancelled`].
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Runs the decision procedure for the given jobs.
    pub fn solve(&mut self, jobs: SolveJobs) -> Result<Solution, SolveError> {
        assert!(
            self.pool.whatprovides_ready(),
            "create_whatprovides must run before solving"
        );

        // Reset state so the solver struct could be reused in principle;
        // the public contract is one-shot.
        self.decision_tracker.clear();
        self.rules = vec![Rule::new(RuleKind::InstallRoot, &[], self.pool)];
        self.learnt_rules.clear();
        self.learnt_why.clear();

        let favored_map: HashMap<NameId, SolvableId> = jobs
            .favor
            .iter()
            .map(|&solvable_id| (self.pool.resolve_solvable(solvable_id).name_id(), solvable_id))
            .collect();

        // Build requires/constrains rules for everything reachable from the
        // install jobs.
        let mut visited = HashSet::new();
        let mut visited_names = HashSet::new();
        for &spec in &jobs.install {
            self.add_rules_for_spec(&mut visited, &mut visited_names, spec);
        }

        // At most one installed candidate per name.
        let pool = self.pool;
        for &name in &visited_names {
            let candidates = pool.solvables_by_name(name);
            for (idx, &candidate) in candidates.iter().enumerate() {
                for &other in &candidates[idx + 1..] {
                    self.rules.push(Rule::new(
                        RuleKind::ForbidMultipleInstances(candidate, other),
                        &self.learnt_rules,
                        pool,
                    ));
                }
            }
        }

        // Freeze jobs: competitors of a locked solvable are forbidden.
        for &locked in &jobs.lock {
            let name = pool.resolve_solvable(locked).name_id();
            for &other in pool.solvables_by_name(name) {
                if other != locked {
                    self.rules
                        .push(Rule::new(RuleKind::Lock(other), &self.learnt_rules, pool));
                }
            }
        }

        // Remove jobs: everything matching the spec becomes uninstallable.
        for &spec in &jobs.exclude {
            for &candidate in pool.candidates(spec) {
                self.rules.push(Rule::new(
                    RuleKind::Exclude(candidate, ExcludeReason::Removed(spec)),
                    &self.learnt_rules,
                    pool,
                ));
            }
        }

        // Pin jobs: candidates of the pinned name that do not match the pin
        // become uninstallable.
        for &spec in &jobs.pin {
            for &candidate in pool.forbidden(spec) {
                self.rules.push(Rule::new(
                    RuleKind::Exclude(candidate, ExcludeReason::PinnedOut(spec)),
                    &self.learnt_rules,
                    pool,
                ));
            }
        }

        // Strict channel priority: a name available from a higher-priority
        // channel forbids its lower-priority candidates. The installed repo
        // does not take part; what is already present never outranks a
        // channel.
        if self.flags.strict_channel_priority {
            let installed_repo = pool.installed_repo();
            for &name in &visited_names {
                let candidates = pool.solvables_by_name(name);
                let Some(best) = candidates
                    .iter()
                    .map(|&id| pool.resolve_solvable(id).repo_id())
                    .filter(|&repo_id| Some(repo_id) != installed_repo)
                    .map(|repo_id| pool.repo_priority(repo_id))
                    .max()
                else {
                    continue;
                };
                for &candidate in candidates {
                    let repo_id = pool.resolve_solvable(candidate).repo_id();
                    if Some(repo_id) == installed_repo {
                        continue;
                    }
                    if pool.repo_priority(repo_id) < best {
                        self.rules.push(Rule::new(
                            RuleKind::Exclude(candidate, ExcludeReason::StrictPriority),
                            &self.learnt_rules,
                            pool,
                        ));
                    }
                }
            }
        }

        // Everything added from here on is learnt.
        self.learnt_rules_start = RuleId::new(self.rules.len());

        self.make_watches();
        self.run_sat(&favored_map)?;

        let solvables = self
            .decision_tracker
            .stack()
            .iter()
            .filter(|decision| decision.value && !decision.solvable_id.is_root())
            .map(|decision| decision.solvable_id)
            .collect();
        Ok(Solution { solvables })
    }

    /// Adds requires and constrains rules for every candidate transitively
    /// reachable from `spec`, followed by the root requirement itself.
    fn add_rules_for_spec(
        &mut self,
        visited: &mut HashSet<SolvableId>,
        visited_names: &mut HashSet<NameId>,
        spec: SpecId,
    ) {
        let pool = self.pool;
        let mut stack = Vec::new();
        for &candidate in pool.candidates(spec) {
            if visited.insert(candidate) {
                stack.push(candidate);
            }
        }

        while let Some(candidate) = stack.pop() {
            let solvable = pool.resolve_solvable(candidate);
            visited_names.insert(solvable.name_id());

            for &dep in solvable.dependencies() {
                for &dep_candidate in pool.candidates(dep) {
                    if visited.insert(dep_candidate) {
                        stack.push(dep_candidate);
                    }
                }
                self.rules.push(Rule::new(
                    RuleKind::Requires(candidate, dep),
                    &self.learnt_rules,
                    pool,
                ));
            }

            for &constrain in solvable.constrains() {
                for &forbidden in pool.forbidden(constrain) {
                    self.rules.push(Rule::new(
                        RuleKind::Constrains(candidate, forbidden, constrain),
                        &self.learnt_rules,
                        pool,
                    ));
                }
            }
        }

        self.rules.push(Rule::new(
            RuleKind::Requires(SolvableId::root(), spec),
            &self.learnt_rules,
            pool,
        ));
    }

    fn run_sat(&mut self, favored_map: &HashMap<NameId, SolvableId>) -> Result<(), SolveError> {
        let level = self.install_root_solvable();

        self.decide_assertions(level)
            .map_err(|rule_id| SolveError::Unsolvable(self.analyze_unsolvable(rule_id)))?;

        self.propagate(level)
            .map_err(|(_, _, rule_id)| SolveError::Unsolvable(self.analyze_unsolvable(rule_id)))?;

        self.resolve_dependencies(level, favored_map)?;

        Ok(())
    }

    fn install_root_solvable(&mut self) -> u32 {
        assert!(self.decision_tracker.is_empty());
        self.decision_tracker
            .try_add_decision(
                Decision::new(SolvableId::root(), true, RuleId::install_root()),
                1,
            )
            .expect("bug: root solvable was already decided");
        1
    }

    /// Decides all single-literal rules: requirements without candidates,
    /// locks and excludes. A conflict here means the jobs themselves are
    /// inconsistent.
    fn decide_assertions(&mut self, level: u32) -> Result<(), RuleId> {
        for (idx, rule) in self.rules.iter().enumerate() {
            let rule_id = RuleId::new(idx);
            let assertion = match rule.kind {
                RuleKind::Requires(solvable_id, _) if !rule.has_watches() => solvable_id,
                RuleKind::Lock(solvable_id) | RuleKind::Exclude(solvable_id, _) => solvable_id,
                _ => continue,
            };

            let decided = self
                .decision_tracker
                .try_add_decision(Decision::new(assertion, false, rule_id), level)
                .map_err(|()| rule_id)?;
            if decided {
                tracing::trace!(
                    "assertion: {} = false ({})",
                    self.pool.resolve_solvable_inner(assertion).display(),
                    rule.display(self.pool)
                );
            }
        }
        Ok(())
    }

    /// The main decision loop: repeatedly finds an unsatisfied requirement
    /// of an installed solvable and installs its best undecided candidate.
    fn resolve_dependencies(
        &mut self,
        mut level: u32,
        favored_map: &HashMap<NameId, SolvableId>,
    ) -> Result<u32, SolveError> {
        let mut idx = 0;
        loop {
            if self.cancelled() {
                return Err(SolveError::Cancelled);
            }
            if idx >= self.rules.len() {
                break;
            }

            let (candidate, rule_id) = {
                let rule = &self.rules[idx];
                let rule_id = RuleId::new(idx);
                idx += 1;

                let RuleKind::Requires(solvable_id, dep) = rule.kind else {
                    continue;
                };

                // Only requirements of solvables that are part of the
                // solution matter.
                if self.decision_tracker.assigned_value(solvable_id) != Some(true) {
                    continue;
                }

                // Skip requirements that already have a candidate installed.
                let candidates = self.pool.candidates(dep);
                if candidates
                    .iter()
                    .any(|&c| self.decision_tracker.assigned_value(c) == Some(true))
                {
                    continue;
                }

                let Some(candidate) = self.pick_candidate(dep, favored_map) else {
                    // All candidates are forbidden; propagation will turn
                    // this into a conflict.
                    continue;
                };
                (candidate, rule_id)
            };

            level = self.set_propagate_learn(level, candidate, rule_id)?;

            // Progress was made; rescan from the start.
            idx = 0;
        }

        Ok(level)
    }

    /// Picks the best undecided candidate for a requirement, honoring the
    /// favored (installed) solvable when it is among the candidates.
    fn pick_candidate(
        &self,
        dep: SpecId,
        favored_map: &HashMap<NameId, SolvableId>,
    ) -> Option<SolvableId> {
        let candidates = self.pool.candidates(dep);

        if let Some(name_id) = self
            .pool
            .resolve_spec(dep)
            .name
            .as_ref()
            .and_then(|name| self.pool.find_package_name(name.as_normalized()))
        {
            if let Some(&favored) = favored_map.get(&name_id) {
                if candidates.contains(&favored)
                    && self.decision_tracker.assigned_value(favored).is_none()
                {
                    return Some(favored);
                }
            }
        }

        candidates
            .iter()
            .copied()
            .find(|&c| self.decision_tracker.assigned_value(c).is_none())
    }

    /// Installs `solvable` at a new decision level and propagates. On
    /// conflict, learns a rule, backjumps and re-propagates until quiescent
    /// or proven unsolvable.
    fn set_propagate_learn(
        &mut self,
        mut level: u32,
        solvable: SolvableId,
        rule_id: RuleId,
    ) -> Result<u32, SolveError> {
        level += 1;

        tracing::trace!(
            "=== installing {} at level {level}",
            self.pool.resolve_solvable_inner(solvable).display()
        );

        self.decision_tracker
            .try_add_decision(Decision::new(solvable, true, rule_id), level)
            .expect("bug: solvable was already decided");

        loop {
            if self.cancelled() {
                return Err(SolveError::Cancelled);
            }

            let Err((conflicting_solvable, attempted_value, conflicting_rule)) =
                self.propagate(level)
            else {
                // Propagation reached a fixpoint.
                break;
            };

            tracing::trace!(
                "propagation conflict: could not set {} to {attempted_value} ({})",
                self.pool
                    .resolve_solvable_inner(conflicting_solvable)
                    .display(),
                self.rules[conflicting_rule.index()].display(self.pool)
            );

            if level == 1 {
                return Err(SolveError::Unsolvable(
                    self.analyze_unsolvable(conflicting_rule),
                ));
            }

            let (new_level, learnt_rule_id, literal) =
                self.analyze(level, conflicting_solvable, conflicting_rule);
            level = new_level;

            // The learnt rule is a unit clause under the backjumped
            // assignment, propagate it immediately.
            let decision = literal.satisfying_value();
            self.decision_tracker
                .try_add_decision(
                    Decision::new(literal.solvable_id, decision, learnt_rule_id),
                    level,
                )
                .expect("bug: solvable was already decided");
            tracing::trace!(
                "backjumped to level {level}; learnt {} = {decision}",
                self.pool
                    .resolve_solvable_inner(literal.solvable_id)
                    .display()
            );
        }

        Ok(level)
    }

    /// Unit propagation. Returns the conflicting assignment and rule when a
    /// rule becomes unsatisfiable under the current assignment.
    fn propagate(&mut self, level: u32) -> Result<(), (SolvableId, bool, RuleId)> {
        // Learnt assertions are not part of the watch lists; re-decide them
        // whenever propagation runs.
        let learnt_rules_start = self.learnt_rules_start.index();
        for (offset, rule) in self.rules[learnt_rules_start..].iter().enumerate() {
            let RuleKind::Learnt(learnt_index) = rule.kind else {
                unreachable!("all rules after learnt_rules_start are learnt");
            };
            let literals = &self.learnt_rules[learnt_index];
            if literals.len() > 1 {
                continue;
            }

            debug_assert!(!literals.is_empty());
            let literal = literals[0];
            let decision = literal.satisfying_value();
            let rule_id = RuleId::new(learnt_rules_start + offset);

            self.decision_tracker
                .try_add_decision(Decision::new(literal.solvable_id, decision, rule_id), level)
                .map_err(|()| (literal.solvable_id, decision, rule_id))?;
        }

        // Watched-literal propagation.
        while let Some(decision) = self.decision_tracker.next_unpropagated() {
            let pkg = decision.solvable_id;

            // Walk the linked list of rules watching this solvable.
            let mut old_predecessor_rule_id: Option<RuleId>;
            let mut predecessor_rule_id: Option<RuleId> = None;
            let mut rule_id = self.watches.first_rule_watching_solvable(pkg);
            while !rule_id.is_null() {
                debug_assert!(
                    predecessor_rule_id != Some(rule_id),
                    "linked list is circular"
                );

                // Get mutable access to the current rule and its
                // predecessor. Both live in `self.rules`, so the slice has
                // to be split.
                let (predecessor_rule, rule) = if let Some(prev_rule_id) = predecessor_rule_id {
                    if prev_rule_id < rule_id {
                        let (prev, current) = self.rules.split_at_mut(rule_id.index());
                        (Some(&mut prev[prev_rule_id.index()]), &mut current[0])
                    } else {
                        let (current, prev) = self.rules.split_at_mut(prev_rule_id.index());
                        (Some(&mut prev[0]), &mut current[rule_id.index()])
                    }
                } else {
                    (None, &mut self.rules[rule_id.index()])
                };

                old_predecessor_rule_id = predecessor_rule_id;
                predecessor_rule_id = Some(rule_id);

                let this_rule_id = rule_id;
                rule_id = rule.next_watched_rule(pkg);

                if let Some((watched_literals, watch_index)) =
                    rule.watch_turned_false(pkg, self.decision_tracker.map(), &self.learnt_rules)
                {
                    if let Some(variable) = rule.next_unwatched_variable(
                        self.pool,
                        &self.learnt_rules,
                        self.decision_tracker.map(),
                    ) {
                        debug_assert!(!rule.watched_literals.contains(&variable));

                        self.watches.update_watched(
                            predecessor_rule,
                            rule,
                            this_rule_id,
                            watch_index,
                            pkg,
                            variable,
                        );

                        // The current rule left this watch list; its
                        // predecessor stays what it was.
                        predecessor_rule_id = old_predecessor_rule_id;
                    } else {
                        // No replacement watch available: the other watched
                        // literal must be satisfied.
                        let remaining_watch = watched_literals[1 - watch_index];
                        self.decision_tracker
                            .try_add_decision(
                                Decision::new(
                                    remaining_watch.solvable_id,
                                    remaining_watch.satisfying_value(),
                                    this_rule_id,
                                ),
                                level,
                            )
                            .map_err(|()| {
                                (
                                    remaining_watch.solvable_id,
                                    remaining_watch.satisfying_value(),
                                    this_rule_id,
                                )
                            })?;
                    }
                }
            }
        }

        Ok(())
    }

    /// First-UIP conflict analysis. Returns the backjump level, the id of
    /// the learnt rule and the literal that becomes unit at that level.
    fn analyze(
        &mut self,
        mut current_level: u32,
        mut conflicting_solvable: SolvableId,
        mut rule_id: RuleId,
    ) -> (u32, RuleId, Literal) {
        let mut seen = HashSet::new();
        let mut causes_at_current_level = 0u32;
        let mut learnt = Vec::new();
        let mut back_track_to = 0;

        let mut s_value;
        let mut learnt_why = Vec::new();
        let mut first_iteration = true;

        loop {
            learnt_why.push(rule_id);

            let causes = if first_iteration {
                first_iteration = false;
                self.rules[rule_id.index()].literals(&self.learnt_rules, self.pool)
            } else {
                self.rules[rule_id.index()].conflict_causes(
                    conflicting_solvable,
                    &self.learnt_rules,
                    self.pool,
                )
            };
            debug_assert!(!causes.is_empty());

            for cause in causes {
                if !seen.insert(cause.solvable_id) {
                    continue;
                }
                let decision_level = self.decision_tracker.level(cause.solvable_id);
                if decision_level == current_level {
                    causes_at_current_level += 1;
                } else if decision_level > 1 {
                    let learnt_literal = Literal {
                        solvable_id: cause.solvable_id,
                        negate: self
                            .decision_tracker
                            .assigned_value(cause.solvable_id)
                            .expect("bug: cause is undecided"),
                    };
                    learnt.push(learnt_literal);
                    back_track_to = back_track_to.max(decision_level);
                } else {
                    // Level-1 facts are implied by the jobs themselves and
                    // never need to appear in a learnt rule.
                }
            }

            // Walk the decision stack backwards to the next implied
            // assignment that contributed to the conflict.
            loop {
                let (last_decision, last_decision_level) = self.decision_tracker.undo_last();
                conflicting_solvable = last_decision.solvable_id;
                s_value = last_decision.value;
                rule_id = last_decision.derived_from;
                current_level = last_decision_level;

                if seen.contains(&last_decision.solvable_id) {
                    break;
                }
            }

            causes_at_current_level = causes_at_current_level.saturating_sub(1);
            if causes_at_current_level == 0 {
                break;
            }
        }

        let last_literal = Literal {
            solvable_id: conflicting_solvable,
            negate: s_value,
        };
        learnt.push(last_literal);

        let rule_id = RuleId::new(self.rules.len());
        let learnt_index = self.learnt_rules.len();
        self.learnt_rules.push(learnt.clone());
        self.learnt_why.push(learnt_why);

        let mut rule = Rule::new(
            RuleKind::Learnt(learnt_index),
            &self.learnt_rules,
            self.pool,
        );
        if rule.has_watches() {
            self.watches.start_watching(&mut rule, rule_id);
        }
        self.rules.push(rule);

        if tracing::enabled!(tracing::Level::TRACE) {
            for literal in &learnt {
                tracing::trace!(
                    "learnt: {}{}",
                    if literal.negate { "NOT " } else { "" },
                    self.pool
                        .resolve_solvable_inner(literal.solvable_id)
                        .display()
                );
            }
        }

        // Backjump, at most to the root level.
        let target_level = back_track_to.max(1);
        self.decision_tracker.undo_until(target_level);

        (target_level, rule_id, last_literal)
    }

    /// Collects the set of original (non-learnt) rules that participated in
    /// a root-level conflict. This is the input of the problem graph.
    fn analyze_unsolvable(&mut self, rule_id: RuleId) -> Problem {
        let mut problem = Problem::default();
        let mut involved: HashSet<SolvableId> = self.rules[rule_id.index()]
            .literals(&self.learnt_rules, self.pool)
            .iter()
            .map(|literal| literal.solvable_id)
            .collect();

        let mut seen = HashSet::new();
        Self::analyze_unsolvable_rule(
            &self.rules,
            &self.learnt_why,
            self.learnt_rules_start,
            rule_id,
            &mut problem,
            &mut seen,
        );

        for decision in self.decision_tracker.stack()[1..].iter().rev() {
            if decision.solvable_id.is_root() {
                continue;
            }
            if !involved.contains(&decision.solvable_id) {
                continue;
            }

            let why = decision.derived_from;
            if why == RuleId::install_root() {
                continue;
            }

            Self::analyze_unsolvable_rule(
                &self.rules,
                &self.learnt_why,
                self.learnt_rules_start,
                why,
                &mut problem,
                &mut seen,
            );

            for literal in self.rules[why.index()].literals(&self.learnt_rules, self.pool) {
                if literal.eval(self.decision_tracker.map()) == Some(true) {
                    continue;
                }
                involved.insert(literal.solvable_id);
            }
        }

        problem
    }

    /// Expands learnt rules into the original rules they were derived from.
    fn analyze_unsolvable_rule(
        rules: &[Rule],
        learnt_why: &[Vec<RuleId>],
        learnt_rules_start: RuleId,
        rule_id: RuleId,
        problem: &mut Problem,
        seen: &mut HashSet<RuleId>,
    ) {
        match rules[rule_id.index()].kind {
            RuleKind::Learnt(..) => {
                if !seen.insert(rule_id) {
                    return;
                }
                for &cause in &learnt_why[rule_id.index() - learnt_rules_start.index()] {
                    Self::analyze_unsolvable_rule(
                        rules,
                        learnt_why,
                        learnt_rules_start,
                        cause,
                        problem,
                        seen,
                    );
                }
            }
            _ => problem.add_rule(rule_id),
        }
    }

    fn make_watches(&mut self) {
        self.watches.initialize(self.pool.solvables.len());

        // Watches live inside the rules; here the linked lists per watched
        // solvable are knotted together.
        for (idx, rule) in self.rules.iter_mut().enumerate() {
            if !rule.has_watches() {
                continue;
            }
            self.watches.start_watching(rule, RuleId::new(idx));
        }
    }
}
