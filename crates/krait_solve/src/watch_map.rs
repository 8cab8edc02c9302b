use crate::id::{RuleId, SolvableId};
use crate::rules::Rule;

/// A map from solvables to the first rule watching them. Rules watching the
/// same solvable form an intrusive linked list through their `next_watches`
/// fields.
pub(crate) struct WatchMap {
    map: Vec<RuleId>,
}

impl WatchMap {
    pub(crate) fn new() -> Self {
        Self { map: Vec::new() }
    }

    pub(crate) fn initialize(&mut self, nsolvables: usize) {
        self.map = vec![RuleId::null(); nsolvables];
    }

    /// Prepends `rule` to the watch lists of both of its watched solvables.
    pub(crate) fn start_watching(&mut self, rule: &mut Rule, rule_id: RuleId) {
        for (watch_index, watched_solvable) in rule.watched_literals.into_iter().enumerate() {
            let already_watching = self.first_rule_watching_solvable(watched_solvable);
            rule.link_to_rule(watch_index, already_watching);
            self.map[watched_solvable.index()] = rule_id;
        }
    }

    /// Moves one watch of `rule` from `previous_watch` to `new_watch`,
    /// unlinking the rule from the old list and prepending it to the new one.
    pub(crate) fn update_watched(
        &mut self,
        predecessor_rule: Option<&mut Rule>,
        rule: &mut Rule,
        rule_id: RuleId,
        watch_index: usize,
        previous_watch: SolvableId,
        new_watch: SolvableId,
    ) {
        if let Some(predecessor_rule) = predecessor_rule {
            predecessor_rule.unlink_rule(rule, previous_watch, watch_index);
        } else {
            // The rule was the head of the old list.
            self.map[previous_watch.index()] = rule.get_linked_rule(watch_index);
        }

        rule.watched_literals[watch_index] = new_watch;
        rule.link_to_rule(watch_index, self.map[new_watch.index()]);
        self.map[new_watch.index()] = rule_id;
    }

    pub(crate) fn first_rule_watching_solvable(&self, watched_solvable: SolvableId) -> RuleId {
        self.map[watched_solvable.index()]
    }
}
