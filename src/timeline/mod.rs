//! Branching timeline: recorded actions, bookmarks and the history tree

mod action;
mod bookmark;
mod history;
mod node;

pub use action::{ActionKind, CoreAction};
pub use bookmark::{Blob, Bookmark};
pub use history::{History, HistoryChange, HistoryChangeKind, HistoryObserver, ObserverId};
pub use node::{HistoryNode, NodeId, NodeKind};
