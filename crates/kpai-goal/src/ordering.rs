// ordering.rs — Priority ordering over goal ids.
//
// Goals are compared by priority alone. The comparator takes ids, not
// goals, so it has to look priorities up in the registry: its result
// depends on registry state, not just on its arguments. A sort therefore
// holds the registry guard for the whole sort, never per comparison.
//
// An id whose goal is gone ranks below every live goal, so stale ids
// sink to the back of a stack and get popped during cleanup.
//
// Ties are allowed. The sort below happens to be stable, but callers
// must not rely on any particular order among equal priorities.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::goal::GoalId;
use crate::registry::{Entry, GoalRegistry};

fn rank(table: &HashMap<GoalId, Entry>, id: GoalId) -> Option<i32> {
    table.get(&id).map(|e| e.goal.priority)
}

/// Highest priority first; missing ids last.
fn by_priority_desc(table: &HashMap<GoalId, Entry>, a: GoalId, b: GoalId) -> Ordering {
    match (rank(table, a), rank(table, b)) {
        (Some(pa), Some(pb)) => pb.cmp(&pa),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl GoalRegistry {
    /// Compare two ids by goal priority, `Less` meaning "runs first".
    ///
    /// Takes the guard for this one comparison; use
    /// [`sort_by_priority`](Self::sort_by_priority) to order a collection.
    pub fn compare_priority(&self, a: GoalId, b: GoalId) -> Ordering {
        by_priority_desc(&self.table(), a, b)
    }

    /// Sort `ids` highest-priority-first under a single guard.
    pub fn sort_by_priority(&self, ids: &mut [GoalId]) {
        let table = self.table();
        ids.sort_by(|a, b| by_priority_desc(&table, *a, *b));
    }

    /// The id that would run first, if any is live.
    pub fn highest_priority(&self, ids: &[GoalId]) -> Option<GoalId> {
        let table = self.table();
        ids.iter()
            .copied()
            .filter(|id| table.contains_key(id))
            .min_by(|a, b| by_priority_desc(&table, *a, *b))
    }
}

/// A priority queue of goal ids for ad-hoc scheduling.
///
/// Priorities are resolved through the registry at every `peek`/`pop`
/// rather than captured at `push`, so priority changes and removals made
/// after a goal was queued are respected. Removed goals come out last.
pub struct GoalQueue {
    registry: Arc<GoalRegistry>,
    ids: Vec<GoalId>,
}

impl GoalQueue {
    pub fn new(registry: Arc<GoalRegistry>) -> Self {
        Self {
            registry,
            ids: Vec::new(),
        }
    }

    pub fn push(&mut self, id: GoalId) {
        self.ids.push(id);
    }

    fn best_index(&self) -> Option<usize> {
        let table = self.registry.table();
        (0..self.ids.len()).min_by(|&i, &j| by_priority_desc(&table, self.ids[i], self.ids[j]))
    }

    /// The id `pop` would return.
    pub fn peek(&self) -> Option<GoalId> {
        self.best_index().map(|i| self.ids[i])
    }

    /// Remove and return the highest-priority id.
    pub fn pop(&mut self) -> Option<GoalId> {
        let index = self.best_index()?;
        Some(self.ids.remove(index))
    }

    /// Drop ids whose goals are gone from the registry.
    pub fn prune(&mut self) -> usize {
        let before = self.ids.len();
        let table = self.registry.table();
        self.ids.retain(|id| table.contains_key(id));
        before - self.ids.len()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
