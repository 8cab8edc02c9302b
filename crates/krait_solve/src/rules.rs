//! The clause database of the solver.
//!
//! Every rule is a disjunction of literals over solvable variables. Rules
//! with two or more literals take part in watched-literal propagation; rules
//! with a single literal are *assertions* decided up front.

use crate::decision::DecisionMap;
use crate::id::{RuleId, SolvableId, SpecId};
use crate::pool::Pool;
use crate::problem::ExcludeReason;

/// A single clause plus its two watched literals and the intrusive linked
/// lists tying it into the [`crate::watch_map::WatchMap`].
#[derive(Clone)]
pub(crate) struct Rule {
    pub(crate) watched_literals: [SolvableId; 2],
    next_watches: [RuleId; 2],
    pub(crate) kind: RuleKind,
}

/// The semantic kinds of rules, which double as the explanation of a
/// conflict.
#[derive(Copy, Clone, Debug)]
pub(crate) enum RuleKind {
    /// The root solvable must be installed. `(root)`
    InstallRoot,

    /// If the solvable is installed, one of the candidates of the spec must
    /// be too. `(¬A ∨ C1 ∨ C2 ∨ …)`
    Requires(SolvableId, SpecId),

    /// At most one solvable per package name. `(¬A ∨ ¬B)`
    ForbidMultipleInstances(SolvableId, SolvableId),

    /// The left solvable's constrains spec excludes the right solvable.
    /// `(¬A ∨ ¬B)`
    Constrains(SolvableId, SolvableId, SpecId),

    /// The solvable competes with a frozen package and must stay out.
    /// `(¬A)`
    Lock(SolvableId),

    /// The solvable has been made uninstallable by a job. `(¬A)`
    Exclude(SolvableId, ExcludeReason),

    /// A rule learnt during conflict analysis; the index points into the
    /// solver's learnt-literals table.
    Learnt(usize),
}

/// A solvable variable or its negation.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub(crate) struct Literal {
    pub(crate) solvable_id: SolvableId,
    pub(crate) negate: bool,
}

impl Literal {
    /// The variable assignment that makes this literal true.
    pub(crate) fn satisfying_value(self) -> bool {
        !self.negate
    }

    /// Evaluates the literal under the current assignment.
    pub(crate) fn eval(self, decision_map: &DecisionMap) -> Option<bool> {
        decision_map
            .value(self.solvable_id)
            .map(|value| if self.negate { !value } else { value })
    }
}

impl Rule {
    pub(crate) fn new(kind: RuleKind, learnt_rules: &[Vec<Literal>], pool: &Pool) -> Self {
        let watched_literals = kind
            .initial_watches(learnt_rules, pool)
            .unwrap_or([SolvableId::null(), SolvableId::null()]);

        let rule = Self {
            watched_literals,
            next_watches: [RuleId::null(), RuleId::null()],
            kind,
        };

        debug_assert!(!rule.has_watches() || watched_literals[0] != watched_literals[1]);
        rule
    }

    /// True if the rule has two or more literals; single-literal rules are
    /// decided as assertions instead of being watched.
    pub(crate) fn has_watches(&self) -> bool {
        // If the first watch is not null the second one is not either.
        !self.watched_literals[0].is_null()
    }

    pub(crate) fn link_to_rule(&mut self, watch_index: usize, linked_rule: RuleId) {
        self.next_watches[watch_index] = linked_rule;
    }

    pub(crate) fn get_linked_rule(&self, watch_index: usize) -> RuleId {
        self.next_watches[watch_index]
    }

    /// Removes `linked_rule` (which follows this rule in the watch list of
    /// `watched_solvable`) from the list.
    pub(crate) fn unlink_rule(
        &mut self,
        linked_rule: &Rule,
        watched_solvable: SolvableId,
        linked_rule_watch_index: usize,
    ) {
        if self.watched_literals[0] == watched_solvable {
            self.next_watches[0] = linked_rule.next_watches[linked_rule_watch_index];
        } else {
            debug_assert_eq!(self.watched_literals[1], watched_solvable);
            self.next_watches[1] = linked_rule.next_watches[linked_rule_watch_index];
        }
    }

    pub(crate) fn next_watched_rule(&self, solvable_id: SolvableId) -> RuleId {
        if solvable_id == self.watched_literals[0] {
            self.next_watches[0]
        } else {
            debug_assert_eq!(self.watched_literals[1], solvable_id);
            self.next_watches[1]
        }
    }

    /// Returns the watched literals and the index of the watch that turned
    /// false, if the decision on `solvable_id` falsified one.
    pub(crate) fn watch_turned_false(
        &self,
        solvable_id: SolvableId,
        decision_map: &DecisionMap,
        learnt_rules: &[Vec<Literal>],
    ) -> Option<([Literal; 2], usize)> {
        debug_assert!(self.watched_literals.contains(&solvable_id));

        let literals @ [w1, w2] = self.watched_literals(learnt_rules);
        if solvable_id == w1.solvable_id && w1.eval(decision_map) == Some(false) {
            Some((literals, 0))
        } else if solvable_id == w2.solvable_id && w2.eval(decision_map) == Some(false) {
            Some((literals, 1))
        } else {
            None
        }
    }

    /// The literals behind the two watches, with the polarity dictated by the
    /// rule kind.
    pub(crate) fn watched_literals(&self, learnt_rules: &[Vec<Literal>]) -> [Literal; 2] {
        let literals = |negate_first: bool, negate_second: bool| {
            [
                Literal {
                    solvable_id: self.watched_literals[0],
                    negate: negate_first,
                },
                Literal {
                    solvable_id: self.watched_literals[1],
                    negate: negate_second,
                },
            ]
        };

        match self.kind {
            RuleKind::InstallRoot | RuleKind::Lock(_) | RuleKind::Exclude(..) => unreachable!(),
            RuleKind::Learnt(index) => {
                let find = |solvable_id| {
                    *learnt_rules[index]
                        .iter()
                        .find(|literal| literal.solvable_id == solvable_id)
                        .expect("watch of a learnt rule is not one of its literals")
                };
                [find(self.watched_literals[0]), find(self.watched_literals[1])]
            }
            RuleKind::ForbidMultipleInstances(..) | RuleKind::Constrains(..) => {
                literals(true, true)
            }
            RuleKind::Requires(solvable_id, _) => {
                if self.watched_literals[0] == solvable_id {
                    literals(true, false)
                } else if self.watched_literals[1] == solvable_id {
                    literals(false, true)
                } else {
                    literals(false, false)
                }
            }
        }
    }

    /// Finds a new variable to watch after one of the watches turned false:
    /// an unwatched literal of the rule that is not falsified.
    pub(crate) fn next_unwatched_variable(
        &self,
        pool: &Pool,
        learnt_rules: &[Vec<Literal>],
        decision_map: &DecisionMap,
    ) -> Option<SolvableId> {
        let can_watch = |literal: Literal| {
            !self.watched_literals.contains(&literal.solvable_id)
                && literal.eval(decision_map).unwrap_or(true)
        };

        match self.kind {
            RuleKind::InstallRoot | RuleKind::Lock(_) | RuleKind::Exclude(..) => unreachable!(),
            RuleKind::Learnt(index) => learnt_rules[index]
                .iter()
                .copied()
                .find(|&literal| can_watch(literal))
                .map(|literal| literal.solvable_id),
            RuleKind::ForbidMultipleInstances(..) | RuleKind::Constrains(..) => None,
            RuleKind::Requires(solvable_id, spec_id) => {
                let owner = Literal {
                    solvable_id,
                    negate: true,
                };
                if can_watch(owner) {
                    return Some(solvable_id);
                }
                pool.candidates(spec_id)
                    .iter()
                    .copied()
                    .find(|&candidate| {
                        can_watch(Literal {
                            solvable_id: candidate,
                            negate: false,
                        })
                    })
            }
        }
    }

    /// All literals of the rule.
    pub(crate) fn literals(&self, learnt_rules: &[Vec<Literal>], pool: &Pool) -> Vec<Literal> {
        match self.kind {
            RuleKind::InstallRoot => vec![Literal {
                solvable_id: SolvableId::root(),
                negate: false,
            }],
            RuleKind::Learnt(index) => learnt_rules[index].clone(),
            RuleKind::Requires(solvable_id, spec_id) => std::iter::once(Literal {
                solvable_id,
                negate: true,
            })
            .chain(pool.candidates(spec_id).iter().map(|&candidate| Literal {
                solvable_id: candidate,
                negate: false,
            }))
            .collect(),
            RuleKind::ForbidMultipleInstances(s1, s2) | RuleKind::Constrains(s1, s2, _) => {
                vec![
                    Literal {
                        solvable_id: s1,
                        negate: true,
                    },
                    Literal {
                        solvable_id: s2,
                        negate: true,
                    },
                ]
            }
            RuleKind::Lock(solvable_id) | RuleKind::Exclude(solvable_id, _) => {
                vec![Literal {
                    solvable_id,
                    negate: true,
                }]
            }
        }
    }

    /// The literals that imply the decision on `variable`, used during
    /// conflict analysis.
    pub(crate) fn conflict_causes(
        &self,
        variable: SolvableId,
        learnt_rules: &[Vec<Literal>],
        pool: &Pool,
    ) -> Vec<Literal> {
        self.literals(learnt_rules, pool)
            .into_iter()
            .filter(|literal| literal.solvable_id != variable)
            .collect()
    }

    /// A human readable rendering for trace logging.
    pub(crate) fn display(&self, pool: &Pool) -> String {
        match self.kind {
            RuleKind::InstallRoot => "install root".to_string(),
            RuleKind::Learnt(index) => format!("learnt rule {index}"),
            RuleKind::Requires(solvable_id, spec_id) => format!(
                "{} requires {}",
                pool.resolve_solvable_inner(solvable_id).display(),
                pool.resolve_spec(spec_id)
            ),
            RuleKind::ForbidMultipleInstances(s1, _) => {
                let name = &pool.resolve_solvable(s1).record().package_record.name;
                format!("only one {} allowed", name.as_normalized())
            }
            RuleKind::Constrains(s1, s2, _) => format!(
                "{} excludes {}",
                pool.resolve_solvable_inner(s1).display(),
                pool.resolve_solvable_inner(s2).display()
            ),
            RuleKind::Lock(solvable_id) => format!(
                "{} is locked out",
                pool.resolve_solvable_inner(solvable_id).display()
            ),
            RuleKind::Exclude(solvable_id, _) => format!(
                "{} is excluded",
                pool.resolve_solvable_inner(solvable_id).display()
            ),
        }
    }
}

impl RuleKind {
    fn initial_watches(
        &self,
        learnt_rules: &[Vec<Literal>],
        pool: &Pool,
    ) -> Option<[SolvableId; 2]> {
        match self {
            RuleKind::InstallRoot | RuleKind::Lock(_) | RuleKind::Exclude(..) => None,
            RuleKind::ForbidMultipleInstances(s1, s2) | RuleKind::Constrains(s1, s2, _) => {
                Some([*s1, *s2])
            }
            RuleKind::Learnt(index) => {
                let literals = &learnt_rules[*index];
                debug_assert!(!literals.is_empty());
                if literals.len() == 1 {
                    // Assertions need no watches.
                    None
                } else {
                    Some([
                        literals.first().unwrap().solvable_id,
                        literals.last().unwrap().solvable_id,
                    ])
                }
            }
            RuleKind::Requires(id, spec_id) => {
                let candidates = pool.candidates(*spec_id);
                if candidates.is_empty() {
                    None
                } else {
                    Some([*id, candidates[0]])
                }
            }
        }
    }
}
