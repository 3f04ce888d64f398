//! Branching history of applied actions and bookmarks
//!
//! Nodes live in an arena keyed by [`NodeId`]; parent and child links are ids.
//! A run segment added while it is the current, childless node stays "open":
//! further runs extend its stop tick in place instead of adding siblings. Only
//! closed events are reported to observers, and an open run is always
//! reported (finalized) before the event that closed it.

use super::{ActionKind, Bookmark, CoreAction, HistoryNode, NodeId, NodeKind};
use crate::{Result, TicklineError};
use std::collections::HashMap;
use std::fmt;

/// Kind of change reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryChangeKind {
    /// A node was added (or an open run was finalized)
    Add,
    /// A single node was removed and its children reparented
    DeleteBookmark,
    /// A node and its whole subtree were removed
    DeleteBranch,
    /// The current pointer moved
    SetCurrent,
}

/// Change notification
#[derive(Debug)]
pub struct HistoryChange<'a> {
    /// What happened
    pub kind: HistoryChangeKind,
    /// Affected node; detached (no parent, no children) for deletions
    pub node: &'a HistoryNode,
}

/// Subscriber to history changes
pub trait HistoryObserver: Send {
    /// Called after each closed change
    fn on_history_change(&mut self, history: &History, change: &HistoryChange<'_>) -> Result<()>;
}

impl<F> HistoryObserver for F
where
    F: FnMut(&History, &HistoryChange<'_>) -> Result<()> + Send,
{
    fn on_history_change(&mut self, history: &History, change: &HistoryChange<'_>) -> Result<()> {
        self(history, change)
    }
}

/// Handle returned by [`History::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type ObserverList = Vec<(ObserverId, Box<dyn HistoryObserver>)>;

/// Branching timeline of emulator events
pub struct History {
    nodes: HashMap<NodeId, HistoryNode>,
    current: NodeId,
    /// Run segment still being extended; always the current node when set
    open_run: Option<NodeId>,
    next_id: u64,
    observers: ObserverList,
    next_observer: u64,
}

impl History {
    /// Create a history holding only the root
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            NodeId::ROOT,
            HistoryNode::new(NodeId::ROOT, 0, NodeKind::Root, None),
        );
        History {
            nodes,
            current: NodeId::ROOT,
            open_run: None,
            next_id: 1,
            observers: Vec::new(),
            next_observer: 0,
        }
    }

    /// Root node
    pub fn root(&self) -> &HistoryNode {
        &self.nodes[&NodeId::ROOT]
    }

    /// Id of the current node
    pub fn current_id(&self) -> NodeId {
        self.current
    }

    /// Current node
    pub fn current(&self) -> &HistoryNode {
        &self.nodes[&self.current]
    }

    /// Node by id
    pub fn node(&self, id: NodeId) -> Option<&HistoryNode> {
        self.nodes.get(&id)
    }

    /// Whether `id` belongs to this history
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of nodes including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether only the root exists
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Whether `id` is a run segment that can still be extended
    pub fn is_open(&self, id: NodeId) -> bool {
        self.open_run == Some(id)
    }

    /// Most recent node that observers have seen: the current node, or its
    /// parent while the current node is an open run
    pub fn last_closed_id(&self) -> NodeId {
        match self.open_run {
            Some(open) if open == self.current => self.current().parent.unwrap_or(NodeId::ROOT),
            _ => self.current,
        }
    }

    /// Whether `ancestor` is `node` or lies on its path to the root
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.nodes.get(&id).and_then(|n| n.parent);
        }
        false
    }

    /// Nodes from `ancestor` (exclusive) down to `node` (inclusive), or `None`
    /// if `ancestor` is not on the path
    pub fn path_between(&self, ancestor: NodeId, node: NodeId) -> Option<Vec<NodeId>> {
        let mut path = Vec::new();
        let mut cursor = node;
        while cursor != ancestor {
            path.push(cursor);
            cursor = self.nodes.get(&cursor)?.parent?;
        }
        path.reverse();
        Some(path)
    }

    /// Nearest bookmark at or above `node`
    pub fn nearest_bookmark(&self, node: NodeId) -> Option<NodeId> {
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            let n = self.nodes.get(&id)?;
            if n.bookmark().is_some() {
                return Some(id);
            }
            cursor = n.parent;
        }
        None
    }

    /// All node ids in depth-first pre-order, children in insertion order
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![NodeId::ROOT];
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        order
    }

    /// Register an observer
    pub fn subscribe(&mut self, observer: Box<dyn HistoryObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, observer));
        id
    }

    /// Register a closure as an observer
    pub fn subscribe_fn<F>(&mut self, observer: F) -> ObserverId
    where
        F: FnMut(&History, &HistoryChange<'_>) -> Result<()> + Send + 'static,
    {
        self.subscribe(Box::new(observer))
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    /// Record an applied action as a child of the current node.
    ///
    /// A run added while the current node is an open run extends it in place
    /// and returns its id. Otherwise any open run is finalized first.
    ///
    /// # Errors
    ///
    /// Snapshot-management actions are never recorded and return
    /// [`TicklineError::Usage`]. Observer failures are reported after the
    /// tree has been updated.
    pub fn add_action(&mut self, action: CoreAction) -> Result<NodeId> {
        if action.kind.is_snapshot() {
            return Err(TicklineError::Usage(format!(
                "{} actions are not recorded in a history",
                action.kind.name()
            )));
        }
        let action = action.without_samples();

        if action.kind.is_run_until() && self.open_run == Some(self.current) {
            let stop = action.end_ticks();
            if let Some(NodeKind::Action(open)) =
                self.nodes.get_mut(&self.current).map(|n| &mut n.kind)
            {
                if let ActionKind::RunUntil { stop_ticks, .. } = &mut open.kind {
                    *stop_ticks = (*stop_ticks).max(stop);
                }
            }
            return Ok(self.current);
        }

        self.close_open_run()?;
        let is_run = action.kind.is_run_until();
        let id = self.insert_child(action.ticks, NodeKind::Action(action));
        self.current = id;
        if is_run {
            self.open_run = Some(id);
            Ok(id)
        } else {
            self.notify(HistoryChangeKind::Add, id)?;
            Ok(id)
        }
    }

    /// Record a bookmark as a child of the current node.
    ///
    /// # Errors
    ///
    /// Fails without touching the tree if `ticks` precede the current node.
    pub fn add_bookmark(&mut self, ticks: u64, bookmark: Bookmark) -> Result<NodeId> {
        let current_ticks = self.current().end_ticks();
        if ticks < current_ticks {
            return Err(TicklineError::Usage(format!(
                "Bookmark at tick {ticks} precedes current node at tick {current_ticks}"
            )));
        }
        self.close_open_run()?;
        let id = self.insert_child(ticks, NodeKind::Bookmark(bookmark));
        self.current = id;
        self.notify(HistoryChangeKind::Add, id)?;
        Ok(id)
    }

    /// Remove `id` and its whole subtree.
    ///
    /// Returns `Ok(false)` without changes when `id` is the current node or
    /// one of its ancestors. Otherwise an open run is finalized first.
    ///
    /// # Errors
    ///
    /// Deleting the root or a node of another history is a usage error.
    pub fn delete_branch(&mut self, id: NodeId) -> Result<bool> {
        self.check_deletable(id)?;
        if self.is_ancestor_or_self(id, self.current) {
            return Ok(false);
        }

        self.close_open_run()?;
        self.detach(id);
        let mut stack = vec![id];
        let mut removed_root = None;
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                stack.extend(node.children.iter().copied());
                if next == id {
                    removed_root = Some(node);
                }
            }
        }

        match removed_root {
            Some(mut node) => {
                node.parent = None;
                node.children.clear();
                self.notify_detached(HistoryChangeKind::DeleteBranch, &node)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove the single node `id`, reparenting its children to its parent at
    /// its position, in their original order.
    ///
    /// Returns `Ok(false)` without changes when `id` is the current node.
    /// Otherwise an open run is finalized first.
    ///
    /// # Errors
    ///
    /// Deleting the root or a node of another history is a usage error.
    pub fn delete_bookmark(&mut self, id: NodeId) -> Result<bool> {
        self.check_deletable(id)?;
        if id == self.current {
            return Ok(false);
        }

        self.close_open_run()?;
        let Some(mut node) = self.nodes.remove(&id) else {
            return Ok(false);
        };
        let parent_id = node.parent.unwrap_or(NodeId::ROOT);
        let children = std::mem::take(&mut node.children);
        for child in &children {
            if let Some(c) = self.nodes.get_mut(child) {
                c.parent = Some(parent_id);
            }
        }
        if let Some(parent) = self.nodes.get_mut(&parent_id) {
            match parent.children.iter().position(|c| *c == id) {
                Some(pos) => {
                    parent.children.splice(pos..=pos, children);
                }
                None => parent.children.extend(children),
            }
        }

        node.parent = None;
        self.notify_detached(HistoryChangeKind::DeleteBookmark, &node)?;
        Ok(true)
    }

    /// Move the current pointer, finalizing any open run first.
    ///
    /// # Errors
    ///
    /// `id` must belong to this history.
    pub fn set_current(&mut self, id: NodeId) -> Result<()> {
        self.check_member(id)?;
        if id == self.current {
            return Ok(());
        }
        self.close_open_run()?;
        self.current = id;
        self.notify(HistoryChangeKind::SetCurrent, id)
    }

    /// Finalize the open run, if any, reporting it to observers
    pub fn close_open_run(&mut self) -> Result<()> {
        match self.open_run.take() {
            Some(id) if self.nodes.contains_key(&id) => self.notify(HistoryChangeKind::Add, id),
            _ => Ok(()),
        }
    }

    /// Insert a closed node read from storage as a child of the current node
    /// and make it current. No observers are notified.
    pub(crate) fn insert_loaded(&mut self, id: NodeId, ticks: u64, kind: NodeKind) -> Result<()> {
        if id.is_root() || self.nodes.contains_key(&id) {
            return Err(TicklineError::FileFormat(format!("Duplicate event id {id}")));
        }
        if matches!(kind, NodeKind::Bookmark(_)) && ticks < self.current().end_ticks() {
            return Err(TicklineError::FileFormat(format!(
                "Bookmark {id} at tick {ticks} precedes its parent at tick {}",
                self.current().end_ticks()
            )));
        }
        let parent = self.current;
        self.nodes
            .insert(id, HistoryNode::new(id, ticks, kind, Some(parent)));
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.push(id);
        }
        self.current = id;
        self.next_id = self.next_id.max(id.0 + 1);
        Ok(())
    }

    fn insert_child(&mut self, ticks: u64, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let parent = self.current;
        self.nodes
            .insert(id, HistoryNode::new(id, ticks, kind, Some(parent)));
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.push(id);
        }
        id
    }

    fn detach(&mut self, id: NodeId) {
        let parent = self.nodes.get(&id).and_then(|n| n.parent);
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            p.children.retain(|c| *c != id);
        }
    }

    fn check_member(&self, id: NodeId) -> Result<()> {
        if self.nodes.contains_key(&id) {
            Ok(())
        } else {
            Err(TicklineError::Usage(format!(
                "Node {id} does not belong to this history"
            )))
        }
    }

    fn check_deletable(&self, id: NodeId) -> Result<()> {
        if id.is_root() {
            return Err(TicklineError::Usage("The root node cannot be deleted".into()));
        }
        self.check_member(id)
    }

    fn notify(&mut self, kind: HistoryChangeKind, id: NodeId) -> Result<()> {
        if self.observers.is_empty() {
            return Ok(());
        }
        let mut observers = std::mem::take(&mut self.observers);
        let result = match self.nodes.get(&id) {
            Some(node) => dispatch(&mut observers, self, &HistoryChange { kind, node }),
            None => Ok(()),
        };
        self.observers = observers;
        result
    }

    fn notify_detached(&mut self, kind: HistoryChangeKind, node: &HistoryNode) -> Result<()> {
        if self.observers.is_empty() {
            return Ok(());
        }
        let mut observers = std::mem::take(&mut self.observers);
        let result = dispatch(&mut observers, self, &HistoryChange { kind, node });
        self.observers = observers;
        result
    }
}

/// Deliver a change to every observer; the first failure is returned after
/// all observers have run.
fn dispatch(observers: &mut ObserverList, history: &History, change: &HistoryChange<'_>) -> Result<()> {
    let mut first_error = None;
    for (_, observer) in observers.iter_mut() {
        if let Err(e) = observer.on_history_change(history, change) {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("History")
            .field("nodes", &self.nodes.len())
            .field("current", &self.current)
            .field("open_run", &self.open_run)
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn key(ticks: u64) -> CoreAction {
        CoreAction::new(ticks, ActionKind::KeyPress { key: 1, down: true })
    }

    fn bookmark() -> Bookmark {
        Bookmark::new(false, 1, vec![1], vec![2])
    }

    fn recorder(history: &mut History) -> Arc<Mutex<Vec<(HistoryChangeKind, NodeId)>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        history.subscribe_fn(move |_, change| {
            sink.lock().push((change.kind, change.node.id()));
            Ok(())
        });
        log
    }

    #[test]
    fn test_run_until_collapses_while_open() {
        let mut history = History::new();
        let a = history.add_action(CoreAction::run_until(0, 100)).unwrap();
        let b = history.add_action(CoreAction::run_until(100, 250)).unwrap();
        assert_eq!(a, b);
        assert_eq!(history.len(), 2);
        assert_eq!(history.current().ticks(), 0);
        assert_eq!(history.current().end_ticks(), 250);
    }

    #[test]
    fn test_open_run_is_finalized_before_trigger() {
        let mut history = History::new();
        let log = recorder(&mut history);
        let run = history.add_action(CoreAction::run_until(0, 100)).unwrap();
        assert!(log.lock().is_empty(), "open runs are not reported");

        let k = history.add_action(key(100)).unwrap();
        assert_eq!(
            *log.lock(),
            vec![(HistoryChangeKind::Add, run), (HistoryChangeKind::Add, k)]
        );
    }

    #[test]
    fn test_run_after_other_action_is_new_node() {
        let mut history = History::new();
        let run1 = history.add_action(CoreAction::run_until(0, 100)).unwrap();
        history.add_action(key(100)).unwrap();
        let run2 = history.add_action(CoreAction::run_until(100, 200)).unwrap();
        assert_ne!(run1, run2);
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn test_set_current_finalizes_open_run() {
        let mut history = History::new();
        let log = recorder(&mut history);
        let run = history.add_action(CoreAction::run_until(0, 100)).unwrap();
        history.set_current(NodeId::ROOT).unwrap();
        assert_eq!(
            *log.lock(),
            vec![
                (HistoryChangeKind::Add, run),
                (HistoryChangeKind::SetCurrent, NodeId::ROOT)
            ]
        );
        assert!(!history.is_open(run));
        // A later run is a sibling, not an extension
        let run2 = history.add_action(CoreAction::run_until(0, 50)).unwrap();
        assert_ne!(run, run2);
        assert_eq!(history.root().children(), &[run, run2]);
    }

    #[test]
    fn test_bookmark_before_current_fails_without_mutation() {
        let mut history = History::new();
        history.add_action(CoreAction::run_until(0, 500)).unwrap();
        let before = history.len();
        let err = history.add_bookmark(400, bookmark()).unwrap_err();
        assert!(matches!(err, TicklineError::Usage(_)));
        assert_eq!(history.len(), before);
        assert!(history.is_open(history.current_id()));
    }

    #[test]
    fn test_bookmark_closes_open_run() {
        let mut history = History::new();
        let run = history.add_action(CoreAction::run_until(0, 500)).unwrap();
        let bm = history.add_bookmark(500, bookmark()).unwrap();
        assert!(!history.is_open(run));
        assert_eq!(history.node(bm).unwrap().parent(), Some(run));
    }

    #[test]
    fn test_delete_branch_rules() {
        let mut history = History::new();
        let a = history.add_action(key(10)).unwrap();
        let b = history.add_action(key(20)).unwrap();
        history.set_current(a).unwrap();
        let c = history.add_action(key(30)).unwrap();

        assert!(history.delete_branch(NodeId::ROOT).is_err());
        assert!(history.delete_branch(NodeId(99)).is_err());
        assert!(!history.delete_branch(a).unwrap(), "ancestor of current");
        assert!(!history.delete_branch(c).unwrap(), "current");

        let children_before = history.node(a).unwrap().children().len();
        assert!(history.delete_branch(b).unwrap());
        assert_eq!(history.node(a).unwrap().children().len(), children_before - 1);
        assert!(!history.contains(b));
    }

    #[test]
    fn test_delete_bookmark_reparents_in_order() {
        let mut history = History::new();
        let bm = history.add_bookmark(0, bookmark()).unwrap();
        let x = history.add_action(key(1)).unwrap();
        history.set_current(bm).unwrap();
        let y = history.add_action(key(2)).unwrap();
        history.set_current(NodeId::ROOT).unwrap();
        let z = history.add_action(key(3)).unwrap();

        let removed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&removed);
        history.subscribe_fn(move |_, change| {
            if change.kind == HistoryChangeKind::DeleteBookmark {
                *sink.lock() = Some((change.node.parent(), change.node.children().len()));
            }
            Ok(())
        });

        assert!(history.delete_bookmark(bm).unwrap());
        assert_eq!(history.root().children(), &[x, y, z]);
        assert_eq!(history.node(x).unwrap().parent(), Some(NodeId::ROOT));
        assert_eq!(*removed.lock(), Some((None, 0)));
        assert!(!history.delete_bookmark(z).unwrap(), "current node");
    }

    #[test]
    fn test_delete_finalizes_open_run_first() {
        let mut history = History::new();
        let log = recorder(&mut history);
        let pressed = history.add_action(key(0)).unwrap();
        let run = history.add_action(CoreAction::run_until(0, 100)).unwrap();

        assert!(history.delete_bookmark(pressed).unwrap());
        assert_eq!(
            log.lock()[1..],
            [
                (HistoryChangeKind::Add, run),
                (HistoryChangeKind::DeleteBookmark, pressed)
            ]
        );
        assert!(!history.is_open(run));
        assert_eq!(history.root().children(), &[run]);

        // Runs after the delete start a new node
        let next = history.add_action(CoreAction::run_until(100, 200)).unwrap();
        assert_ne!(next, run);

        // A refused delete leaves the open run alone
        log.lock().clear();
        assert!(!history.delete_bookmark(next).unwrap());
        assert!(!history.delete_branch(run).unwrap());
        assert!(history.is_open(next));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_set_current_rejects_foreign_node() {
        let mut history = History::new();
        assert!(matches!(
            history.set_current(NodeId(42)),
            Err(TicklineError::Usage(_))
        ));
    }

    #[test]
    fn test_snapshot_actions_are_rejected() {
        let mut history = History::new();
        let err = history
            .add_action(CoreAction::new(0, ActionKind::CreateSnapshot { id: 1 }))
            .unwrap_err();
        assert!(matches!(err, TicklineError::Usage(_)));
    }

    #[test]
    fn test_last_closed_skips_open_run() {
        let mut history = History::new();
        let k = history.add_action(key(0)).unwrap();
        assert_eq!(history.last_closed_id(), k);
        history.add_action(CoreAction::run_until(0, 10)).unwrap();
        assert_eq!(history.last_closed_id(), k);
    }

    #[test]
    fn test_observer_error_is_reported_after_mutation() {
        let mut history = History::new();
        history.subscribe_fn(|_, _| Err(TicklineError::Other("disk full".into())));
        assert!(history.add_action(key(0)).is_err());
        assert_eq!(history.len(), 2);
    }
}
