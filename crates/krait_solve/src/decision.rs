//! Assignment bookkeeping for the solver: which solvables have been decided,
//! at what level, and in which order.

use std::cmp::Ordering;

use crate::id::{RuleId, SolvableId};

/// A single assignment of a solvable variable.
#[derive(Copy, Clone, Eq, PartialEq)]
pub(crate) struct Decision {
    pub(crate) solvable_id: SolvableId,
    pub(crate) value: bool,
    pub(crate) derived_from: RuleId,
}

impl Decision {
    pub(crate) fn new(solvable_id: SolvableId, value: bool, derived_from: RuleId) -> Self {
        Self {
            solvable_id,
            value,
            derived_from,
        }
    }
}

/// The current assignment of every solvable:
/// `0` undecided, `> 0` decided true at that level, `< 0` decided false.
pub(crate) struct DecisionMap {
    map: Vec<i64>,
}

impl DecisionMap {
    pub(crate) fn new(nsolvables: u32) -> Self {
        Self {
            map: vec![0; nsolvables as usize],
        }
    }

    pub(crate) fn nsolvables(&self) -> u32 {
        self.map.len() as u32
    }

    pub(crate) fn reset(&mut self, solvable_id: SolvableId) {
        self.map[solvable_id.index()] = 0;
    }

    pub(crate) fn set(&mut self, solvable_id: SolvableId, value: bool, level: u32) {
        self.map[solvable_id.index()] = if value {
            i64::from(level)
        } else {
            -i64::from(level)
        };
    }

    pub(crate) fn level(&self, solvable_id: SolvableId) -> u32 {
        self.map[solvable_id.index()].unsigned_abs() as u32
    }

    pub(crate) fn value(&self, solvable_id: SolvableId) -> Option<bool> {
        match self.map[solvable_id.index()].cmp(&0) {
            Ordering::Less => Some(false),
            Ordering::Equal => None,
            Ordering::Greater => Some(true),
        }
    }
}

/// The decision stack plus the map view of it, with a cursor separating
/// propagated from not-yet-propagated decisions.
pub(crate) struct DecisionTracker {
    map: DecisionMap,
    stack: Vec<Decision>,
    propagate_index: usize,
}

impl DecisionTracker {
    pub(crate) fn new(nsolvables: u32) -> Self {
        Self {
            map: DecisionMap::new(nsolvables),
            stack: Vec::new(),
            propagate_index: 0,
        }
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::new(self.map.nsolvables());
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub(crate) fn assigned_value(&self, solvable_id: SolvableId) -> Option<bool> {
        self.map.value(solvable_id)
    }

    pub(crate) fn map(&self) -> &DecisionMap {
        &self.map
    }

    pub(crate) fn stack(&self) -> &[Decision] {
        &self.stack
    }

    pub(crate) fn level(&self, solvable_id: SolvableId) -> u32 {
        self.map.level(solvable_id)
    }

    /// Attempts to record a decision.
    ///
    /// Returns `Ok(true)` if the solvable was undecided, `Ok(false)` if it
    /// was already decided to the same value and `Err` on a conflicting
    /// assignment.
    pub(crate) fn try_add_decision(&mut self, decision: Decision, level: u32) -> Result<bool, ()> {
        match self.map.value(decision.solvable_id) {
            None => {
                self.map.set(decision.solvable_id, decision.value, level);
                self.stack.push(decision);
                Ok(true)
            }
            Some(value) if value == decision.value => Ok(false),
            _ => Err(()),
        }
    }

    /// Pops decisions until only levels `<= level` remain.
    pub(crate) fn undo_until(&mut self, level: u32) {
        while let Some(decision) = self.stack.last() {
            if self.level(decision.solvable_id) <= level {
                break;
            }
            self.undo_last();
        }
    }

    /// Pops the latest decision, returning it and the level of the new top of
    /// the stack.
    pub(crate) fn undo_last(&mut self) -> (Decision, u32) {
        let decision = self.stack.pop().expect("undo on an empty stack");
        self.map.reset(decision.solvable_id);
        self.propagate_index = self.stack.len();

        let top_decision = self
            .stack
            .last()
            .expect("the root decision is never undone");
        (decision, self.map.level(top_decision.solvable_id))
    }

    /// Returns the next decision that has not been propagated yet, advancing
    /// the cursor.
    pub(crate) fn next_unpropagated(&mut self) -> Option<Decision> {
        let &decision = self.stack[self.propagate_index..].iter().next()?;
        self.propagate_index += 1;
        Some(decision)
    }
}
