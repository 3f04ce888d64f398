//! Integration tests for the text command log
//!
//! A history mirrored through the incremental writer must read back to the
//! same tree, and compaction must preserve it while dropping deleted events.

#![cfg(feature = "persist")]

use parking_lot::Mutex;
use std::sync::Arc;
use tickline::persist::{
    compact_file, read_timeline, read_timeline_file, CommandLog, LogObserver, MemorySink,
};
use tickline::timeline::{ActionKind, Blob, Bookmark, CoreAction, History, NodeId};

/// Structural fingerprint: (id, parent, ticks, end ticks, label) in pre-order
fn shape(history: &History) -> Vec<(NodeId, Option<NodeId>, u64, u64, &'static str)> {
    history
        .preorder()
        .into_iter()
        .filter_map(|id| history.node(id))
        .map(|n| (n.id(), n.parent(), n.ticks(), n.end_ticks(), n.label()))
        .collect()
}

fn logged_history() -> (History, MemorySink) {
    let sink = MemorySink::new();
    let log = CommandLog::new(Box::new(sink.clone()));
    let mut history = History::new();
    history.subscribe(Box::new(LogObserver::new(Arc::new(Mutex::new(log)))));
    (history, sink)
}

fn run(from: u64, to: u64) -> CoreAction {
    CoreAction::run_until(from, to)
}

fn key(ticks: u64, key: u8) -> CoreAction {
    CoreAction::new(ticks, ActionKind::KeyPress { key, down: true })
}

fn bookmark(state: u8) -> Bookmark {
    Bookmark::new(false, 1, vec![state; 8], vec![0xAA, state])
}

#[test]
fn test_linear_chain_roundtrip() {
    let (mut history, sink) = logged_history();
    history.add_action(CoreAction::new(0, ActionKind::Reset)).unwrap();
    history.add_action(run(0, 400)).unwrap();
    history.add_action(run(400, 1000)).unwrap();
    history.add_action(key(1000, 7)).unwrap();
    history
        .add_action(CoreAction::new(
            1000,
            ActionKind::LoadTape {
                media: Some(Blob::new(vec![1, 2, 3, 0xFF])),
            },
        ))
        .unwrap();
    history.add_action(run(1000, 2500)).unwrap();
    history.close_open_run().unwrap();

    let loaded = read_timeline(sink.text().as_bytes()).unwrap();
    assert_eq!(shape(&loaded.history), shape(&history));
    assert_eq!(loaded.history.current_id(), history.current_id());
    assert_eq!(loaded.next_blob_id, 1);

    let tape = loaded
        .history
        .node(NodeId(4))
        .and_then(|n| n.action())
        .cloned()
        .unwrap();
    match tape.kind {
        ActionKind::LoadTape { media: Some(media) } => {
            assert_eq!(media.get().unwrap(), &[1, 2, 3, 0xFF])
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_bookmark_branch_and_rejoin_roundtrip() {
    let (mut history, sink) = logged_history();
    history.add_action(CoreAction::new(0, ActionKind::Reset)).unwrap();
    history.add_action(run(0, 100)).unwrap();
    let mark = history.add_bookmark(100, bookmark(1)).unwrap();
    history.add_action(key(100, 1)).unwrap();
    let first_branch = history.add_action(run(100, 300)).unwrap();

    history.set_current(mark).unwrap();
    history.add_action(key(100, 2)).unwrap();
    history.add_action(run(100, 250)).unwrap();

    history.set_current(first_branch).unwrap();

    let loaded = read_timeline(sink.text().as_bytes()).unwrap();
    assert_eq!(shape(&loaded.history), shape(&history));
    assert_eq!(loaded.history.current_id(), first_branch);
    assert_eq!(loaded.history.node(mark).unwrap().children().len(), 2);

    let restored = loaded.history.node(mark).unwrap().bookmark().unwrap().clone();
    assert_eq!(restored.state.get().unwrap(), &[1; 8]);
    assert_eq!(restored.screen.get().unwrap(), &[0xAA, 1]);
}

#[test]
fn test_deleted_bookmark_reparents_on_reload() {
    let (mut history, sink) = logged_history();
    let reset = history.add_action(CoreAction::new(0, ActionKind::Reset)).unwrap();
    let mark = history.add_bookmark(0, bookmark(3)).unwrap();
    let a = history.add_action(key(0, 1)).unwrap();
    history.set_current(mark).unwrap();
    let b = history.add_action(key(0, 2)).unwrap();

    assert!(history.delete_bookmark(mark).unwrap());
    assert_eq!(history.node(reset).unwrap().children(), &[a, b]);

    let loaded = read_timeline(sink.text().as_bytes()).unwrap();
    assert_eq!(shape(&loaded.history), shape(&history));
    assert!(!loaded.history.contains(mark));
    assert_eq!(loaded.history.node(a).unwrap().parent(), Some(reset));
}

#[test]
fn test_deleted_branch_stays_deleted() {
    let (mut history, sink) = logged_history();
    let reset = history.add_action(CoreAction::new(0, ActionKind::Reset)).unwrap();
    let doomed = history.add_action(key(0, 1)).unwrap();
    history.add_action(run(0, 80)).unwrap();
    history.set_current(reset).unwrap();
    assert!(history.delete_branch(doomed).unwrap());
    history.add_action(key(0, 9)).unwrap();

    let loaded = read_timeline(sink.text().as_bytes()).unwrap();
    assert_eq!(shape(&loaded.history), shape(&history));
    assert_eq!(loaded.history.len(), 3);
}

#[test]
fn test_deleting_parent_of_open_run_reloads() {
    let (mut history, sink) = logged_history();
    let pressed = history.add_action(key(0, 1)).unwrap();
    let open = history.add_action(run(0, 100)).unwrap();
    assert!(history.is_open(open));

    assert!(history.delete_bookmark(pressed).unwrap());
    history.add_action(CoreAction::new(100, ActionKind::Reset)).unwrap();
    history.add_action(run(100, 300)).unwrap();
    history.close_open_run().unwrap();

    let loaded = read_timeline(sink.text().as_bytes()).unwrap();
    assert_eq!(shape(&loaded.history), shape(&history));
    assert_eq!(loaded.history.current_id(), history.current_id());
    assert_eq!(loaded.history.node(open).unwrap().parent(), Some(NodeId::ROOT));
}

#[test]
fn test_deleting_sibling_branch_during_open_run_reloads() {
    let (mut history, sink) = logged_history();
    let reset = history.add_action(CoreAction::new(0, ActionKind::Reset)).unwrap();
    let doomed = history.add_action(key(0, 1)).unwrap();
    history.add_action(run(0, 50)).unwrap();
    history.set_current(reset).unwrap();
    let open = history.add_action(run(0, 200)).unwrap();

    assert!(history.delete_branch(doomed).unwrap());
    history.add_action(run(200, 400)).unwrap();
    let mark = history.add_bookmark(400, bookmark(2)).unwrap();
    history.set_current(open).unwrap();
    history.add_action(key(200, 3)).unwrap();

    let loaded = read_timeline(sink.text().as_bytes()).unwrap();
    assert_eq!(shape(&loaded.history), shape(&history));
    assert_eq!(loaded.history.current_id(), history.current_id());
    assert_eq!(loaded.history.node(reset).unwrap().children(), &[open]);
    assert_eq!(loaded.history.nearest_bookmark(mark), Some(mark));
}

#[test]
fn test_legacy_argument_file_loads() {
    let text = "name:old\n\
                arg:0,0102\n\
                arg:1,ff00\n\
                reset:1,0\n\
                bookmark:2,0,1,1,$0,$1\n\
                run:3,0,5000\n";
    let loaded = read_timeline(text.as_bytes()).unwrap();
    assert_eq!(loaded.name.as_deref(), Some("old"));
    let mark = loaded.history.node(NodeId(2)).unwrap().bookmark().unwrap().clone();
    assert!(mark.system);
    assert_eq!(mark.state.get().unwrap(), &[1, 2]);
    assert_eq!(loaded.history.current().end_ticks(), 5000);
}

#[test]
fn test_compaction_preserves_tree_and_shrinks_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.tl");

    let (mut history, sink) = logged_history();
    let reset = history.add_action(CoreAction::new(0, ActionKind::Reset)).unwrap();
    for i in 0..20u8 {
        let doomed = history.add_action(key(0, i)).unwrap();
        history.set_current(reset).unwrap();
        history.delete_branch(doomed).unwrap();
    }
    history.add_action(run(0, 800)).unwrap();
    history.add_bookmark(800, bookmark(5)).unwrap();
    std::fs::write(&path, sink.text()).unwrap();

    let before = std::fs::metadata(&path).unwrap().len();
    let loaded = read_timeline_file(&path).unwrap();
    assert_eq!(shape(&loaded.history), shape(&history));

    compact_file(&path, &loaded.history, Some("session")).unwrap();
    let after = std::fs::metadata(&path).unwrap().len();
    assert!(after < before, "{after} >= {before}");

    let compacted = read_timeline_file(&path).unwrap();
    assert_eq!(shape(&compacted.history), shape(&history));
    assert_eq!(compacted.history.current_id(), history.current_id());
    assert_eq!(compacted.name.as_deref(), Some("session"));
}
