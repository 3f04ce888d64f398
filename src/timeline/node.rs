//! History tree nodes

use super::{Bookmark, CoreAction};
use std::fmt;
use std::time::SystemTime;

/// Arena id of a history node. Ids are assigned monotonically and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl NodeId {
    /// The root node of every history
    pub const ROOT: NodeId = NodeId(0);

    /// Whether this is the root id
    pub fn is_root(self) -> bool {
        self == NodeId::ROOT
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload of a node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Tree root, tick 0
    Root,
    /// Recorded action
    Action(CoreAction),
    /// Saved machine state
    Bookmark(Bookmark),
}

/// One event in the history tree
#[derive(Debug, Clone)]
pub struct HistoryNode {
    pub(crate) id: NodeId,
    pub(crate) ticks: u64,
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) created_at: SystemTime,
}

impl HistoryNode {
    pub(crate) fn new(id: NodeId, ticks: u64, kind: NodeKind, parent: Option<NodeId>) -> Self {
        HistoryNode {
            id,
            ticks,
            kind,
            parent,
            children: Vec::new(),
            created_at: SystemTime::now(),
        }
    }

    /// Node id
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Start tick
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Last tick covered by the node (the stop tick for runs)
    pub fn end_ticks(&self) -> u64 {
        match &self.kind {
            NodeKind::Action(action) => action.end_ticks(),
            NodeKind::Root | NodeKind::Bookmark(_) => self.ticks,
        }
    }

    /// Node payload
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Parent id; `None` for the root and for detached nodes
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in insertion order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Creation time
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Recorded action, if this is an action node
    pub fn action(&self) -> Option<&CoreAction> {
        match &self.kind {
            NodeKind::Action(action) => Some(action),
            _ => None,
        }
    }

    /// Attached bookmark, if this is a bookmark node
    pub fn bookmark(&self) -> Option<&Bookmark> {
        match &self.kind {
            NodeKind::Bookmark(bookmark) => Some(bookmark),
            _ => None,
        }
    }

    /// Whether the node records a run segment
    pub fn is_run_until(&self) -> bool {
        self.action().is_some_and(|a| a.kind.is_run_until())
    }

    /// Short label for listings
    pub fn label(&self) -> &'static str {
        match &self.kind {
            NodeKind::Root => "root",
            NodeKind::Action(action) => action.kind.name(),
            NodeKind::Bookmark(b) if b.system => "bookmark(system)",
            NodeKind::Bookmark(_) => "bookmark",
        }
    }
}
