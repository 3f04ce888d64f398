//! Integration tests for the history tree through its public API

use parking_lot::Mutex;
use std::sync::Arc;
use tickline::timeline::{
    ActionKind, Bookmark, CoreAction, History, HistoryChange, HistoryChangeKind, NodeId,
};
use tickline::TicklineError;

fn key(ticks: u64, key: u8) -> CoreAction {
    CoreAction::new(ticks, ActionKind::KeyPress { key, down: true })
}

fn snapshot_tree(history: &History) -> Vec<(NodeId, Option<NodeId>, Vec<NodeId>, u64)> {
    history
        .preorder()
        .into_iter()
        .filter_map(|id| history.node(id))
        .map(|n| (n.id(), n.parent(), n.children().to_vec(), n.end_ticks()))
        .collect()
}

#[test]
fn test_observer_sees_finalized_run_before_its_successor() {
    let mut history = History::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    history.subscribe_fn(move |_: &History, change: &HistoryChange<'_>| {
        sink.lock()
            .push((change.kind, change.node.id(), change.node.end_ticks()));
        Ok(())
    });

    let run = history.add_action(CoreAction::run_until(0, 100)).unwrap();
    assert_eq!(history.add_action(CoreAction::run_until(100, 250)).unwrap(), run);
    assert!(log.lock().is_empty(), "open runs are not reported");

    let pressed = history.add_action(key(250, 4)).unwrap();
    assert_eq!(
        *log.lock(),
        vec![
            (HistoryChangeKind::Add, run, 250),
            (HistoryChangeKind::Add, pressed, 250),
        ]
    );
}

#[test]
fn test_deletion_rules_over_a_bushy_tree() {
    let mut history = History::new();
    let reset = history.add_action(CoreAction::new(0, ActionKind::Reset)).unwrap();
    let mut leaves = Vec::new();
    for i in 0..5u8 {
        history.set_current(reset).unwrap();
        history.add_action(key(u64::from(i), i)).unwrap();
        leaves.push(history.add_action(key(u64::from(i), i + 10)).unwrap());
    }
    let current = history.current_id();
    let before = snapshot_tree(&history);

    for protected in [current, history.current().parent().unwrap(), reset] {
        assert!(!history.delete_branch(protected).unwrap());
        assert_eq!(snapshot_tree(&history), before);
    }
    assert!(matches!(
        history.delete_branch(NodeId::ROOT),
        Err(TicklineError::Usage(_))
    ));

    for leaf in &leaves[..4] {
        let parent = history.node(*leaf).unwrap().parent().unwrap();
        let count = history.node(parent).unwrap().children().len();
        assert!(history.delete_branch(*leaf).unwrap());
        assert_eq!(history.node(parent).unwrap().children().len(), count - 1);
        assert!(!history.contains(*leaf));
    }
}

#[test]
fn test_bookmark_ticks_must_not_go_backwards() {
    let mut history = History::new();
    history.add_action(CoreAction::run_until(0, 1000)).unwrap();
    let before = snapshot_tree(&history);

    let err = history
        .add_bookmark(999, Bookmark::new(false, 1, vec![1], vec![2]))
        .unwrap_err();
    assert!(matches!(err, TicklineError::Usage(_)), "{err}");
    assert_eq!(snapshot_tree(&history), before);
    assert!(history.is_open(history.current_id()));

    let mark = history
        .add_bookmark(1000, Bookmark::new(false, 1, vec![1], vec![2]))
        .unwrap();
    assert_eq!(history.nearest_bookmark(mark), Some(mark));
    assert_eq!(history.path_between(NodeId::ROOT, mark).map(|p| p.len()), Some(2));
}

#[test]
fn test_foreign_nodes_are_rejected() {
    let mut a = History::new();
    let mut b = History::new();
    a.add_action(key(0, 1)).unwrap();
    let only_in_a = a.add_action(key(0, 2)).unwrap();
    b.add_action(key(0, 1)).unwrap();

    assert!(matches!(b.set_current(only_in_a), Err(TicklineError::Usage(_))));
    assert!(matches!(b.delete_bookmark(only_in_a), Err(TicklineError::Usage(_))));
}
