use crate::id::{ComponentId, StateNodeId};
use std::collections::BTreeSet;

/// A pending re-evaluation of one component in one state node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkItem {
    pub node: StateNodeId,
    pub component: ComponentId,
}

impl WorkItem {
    pub fn new(node: StateNodeId, component: ComponentId) -> Self {
        Self { node, component }
    }
}

/// Dirty components waiting for evaluation, in first-marked order.
///
/// Marking an item that is already pending is a no-op. The propagator takes
/// the whole queue as one round; anything marked while the round runs lands
/// in the next one.
#[derive(Debug, Clone, Default)]
pub struct WorkQueue {
    order: Vec<WorkItem>,
    pending: BTreeSet<WorkItem>,
}

impl WorkQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a component dirty. Returns `false` if it was already pending.
    pub fn push(&mut self, item: WorkItem) -> bool {
        if self.pending.insert(item) {
            self.order.push(item);
            true
        } else {
            false
        }
    }

    pub fn mark(&mut self, node: StateNodeId, component: ComponentId) -> bool {
        self.push(WorkItem::new(node, component))
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn contains(&self, item: &WorkItem) -> bool {
        self.pending.contains(item)
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.order
    }

    /// Remove and return everything pending, in marking order.
    pub fn take_round(&mut self) -> Vec<WorkItem> {
        self.pending.clear();
        std::mem::take(&mut self.order)
    }

    /// Drop every item belonging to one of `nodes`.
    pub fn purge(&mut self, nodes: &[StateNodeId]) {
        if nodes.is_empty() {
            return;
        }
        let gone: BTreeSet<StateNodeId> = nodes.iter().copied().collect();
        self.order.retain(|item| !gone.contains(&item.node));
        self.pending.retain(|item| !gone.contains(&item.node));
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.pending.clear();
    }
}
