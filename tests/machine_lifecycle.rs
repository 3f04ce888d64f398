//! Integration tests for the execution loop
//!
//! These tests drive a headless machine over the reference core: running
//! state transitions, request ordering, auto-pause, snapshots with reverse
//! playback, and persistence across close/open.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tickline::hardware::reference::TICKS_PER_FRAME;
use tickline::machine::{Machine, MachineConfig, Request, RunningState};
use tickline::timeline::{
    ActionKind, Blob, CoreAction, History, HistoryChange, HistoryChangeKind, NodeId,
};
use tickline::{HardwareCore, ReferenceCore, StopReasons, TicklineError};

const TIMEOUT: Duration = Duration::from_secs(10);

fn machine(config: MachineConfig) -> Machine {
    Machine::new("test", Box::new(ReferenceCore::new()), config).unwrap()
}

fn no_snapshots() -> MachineConfig {
    MachineConfig {
        snapshot_limit: 0,
        ..MachineConfig::headless()
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn record_actions(machine: &Machine) -> Arc<Mutex<Vec<CoreAction>>> {
    let actions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&actions);
    machine.subscribe_actions(move |action| sink.lock().push(action.clone()));
    actions
}

fn labels(history: &History) -> Vec<&'static str> {
    history
        .preorder()
        .into_iter()
        .filter_map(|id| history.node(id))
        .map(|n| n.label())
        .collect()
}

#[test]
fn test_start_stop_advances_only_while_running() {
    let machine = machine(no_snapshots());
    assert_eq!(machine.running_state(), RunningState::Paused);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(machine.ticks(), 0);

    machine.start();
    assert!(wait_until(|| machine.ticks() > 10 * TICKS_PER_FRAME));

    machine.stop();
    assert!(wait_until(|| machine.actual_state() == RunningState::Paused));
    let frozen = machine.ticks();
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(machine.ticks(), frozen);

    // The whole run collapses into one open node under the root
    machine.with_history(|h| {
        assert_eq!(labels(h), vec!["root", "run"]);
        assert_eq!(h.current().end_ticks(), frozen);
    });
}

#[test]
fn test_requests_are_applied_in_order() {
    let machine = machine(no_snapshots());
    let actions = record_actions(&machine);

    machine.push_request(Request::Reset);
    machine.push_request(Request::KeyPress { key: 3, down: true });
    machine.push_request(Request::RunUntil { stop_ticks: 5000 });
    machine.push_request(Request::KeyPress { key: 3, down: false });
    // Releasing an already released key changes nothing and is not recorded
    machine.push_request(Request::KeyPress { key: 3, down: false });
    assert_eq!(machine.pending_requests(), 5);

    machine.start();
    assert!(wait_until(|| machine.pending_requests() == 0));
    assert!(wait_until(|| machine.ticks() > 5000));
    machine.stop();

    let kinds: Vec<&str> = actions
        .lock()
        .iter()
        .map(|a| a.kind.name())
        .take(4)
        .collect();
    assert_eq!(kinds, vec!["reset", "key", "run", "key"]);

    machine.with_history(|h| {
        let labels = labels(h);
        assert_eq!(&labels[..5], &["root", "reset", "key", "run", "key"]);
        let run = h.node(NodeId(3)).unwrap();
        assert_eq!((run.ticks(), run.end_ticks()), (0, 5000));
    });
}

#[test]
fn test_auto_pause_blocks_the_loop() {
    let machine = machine(no_snapshots());
    machine.start();
    assert!(wait_until(|| machine.ticks() > 0));

    {
        let _outer = machine.auto_pause();
        assert_eq!(machine.actual_state(), RunningState::Paused);
        let held = machine.ticks();
        {
            let _inner = machine.auto_pause();
            std::thread::sleep(Duration::from_millis(40));
        }
        // Still paused by the outer guard
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(machine.ticks(), held);
        assert_eq!(machine.running_state(), RunningState::Running);
    }

    let resumed_from = machine.ticks();
    assert!(wait_until(|| machine.ticks() > resumed_from));
    machine.stop();
}

#[test]
fn test_overlapping_auto_pause_from_threads() {
    let machine = Arc::new(machine(no_snapshots()));
    machine.start();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let machine = Arc::clone(&machine);
            std::thread::spawn(move || {
                for _ in 0..10 {
                    let _pause = machine.auto_pause();
                    assert_eq!(machine.actual_state(), RunningState::Paused);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let resumed_from = machine.ticks();
    assert!(wait_until(|| machine.ticks() > resumed_from));
    machine.shutdown();
    machine.shutdown();
}

#[test]
fn test_snapshots_are_limited_and_reverse_rewinds() {
    let config = MachineConfig {
        snapshot_limit: 3,
        ..MachineConfig::headless()
    };
    let machine = machine(config);
    let actions = record_actions(&machine);
    let moves = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&moves);
    machine.subscribe_history(Box::new(
        move |_: &History, change: &HistoryChange<'_>| {
            if change.kind == HistoryChangeKind::SetCurrent {
                sink.lock().push(change.node.id());
            }
            Ok::<(), TicklineError>(())
        },
    ));

    assert!(!machine.reverse(), "reverse needs snapshots");
    // Snapshots point at the last closed node, the key press under the open run
    machine.push_request(Request::KeyPress { key: 2, down: true });
    machine.start();
    assert!(wait_until(|| machine.ticks() > 6 * TICKS_PER_FRAME));
    assert!(machine.snapshot_count() <= 3);
    assert!(actions
        .lock()
        .iter()
        .any(|a| matches!(a.kind, ActionKind::DeleteSnapshot { .. })));

    let before = machine.ticks();
    assert!(machine.reverse());
    let mut pcm = vec![0u8; 4 * 1024];
    let mut reversed = 0;
    assert!(wait_until(|| {
        if machine.actual_state() == RunningState::Reverse {
            reversed += machine.read_audio(&mut pcm, 0, 1024);
        }
        machine.running_state() != RunningState::Reverse
    }));
    machine.stop();
    assert!(reversed > 0, "snapshot audio was not played back");

    let actions = actions.lock();
    let reverts: Vec<&CoreAction> = actions
        .iter()
        .filter(|a| matches!(a.kind, ActionKind::RevertToSnapshot { .. }))
        .collect();
    assert!(!reverts.is_empty());
    assert!(reverts.iter().all(|a| a.ticks % TICKS_PER_FRAME == 0));
    assert!(reverts.windows(2).all(|w| w[1].ticks < w[0].ticks));
    assert!(reverts.last().unwrap().ticks < before);

    let pressed = NodeId(1);
    assert_eq!(*moves.lock(), vec![pressed]);
    machine.with_history(|h| {
        assert_eq!(h.node(pressed).unwrap().label(), "key");
        let current = h.current_id();
        assert!(current == pressed || h.current().parent() == Some(pressed));
        // The rewound run is closed; anything after it branches off again
        let children = h.node(pressed).unwrap().children().to_vec();
        let first = h.node(children[0]).unwrap();
        assert!(!h.is_open(first.id()));
        assert!(first.end_ticks() >= before);
        for later in &children[1..] {
            assert!(h.node(*later).unwrap().ticks() < first.end_ticks());
        }
    });
}

#[test]
fn test_bookmark_jump_restores_state() {
    let machine = machine(no_snapshots());
    machine.push_request(Request::KeyPress { key: 9, down: true });
    machine.start();
    assert!(wait_until(|| machine.ticks() > 2 * TICKS_PER_FRAME));
    machine.stop();

    let mark = machine.add_bookmark(false).unwrap();
    let marked_at = machine.ticks();

    machine.start();
    assert!(wait_until(|| machine.ticks() > marked_at + TICKS_PER_FRAME));
    machine.stop();

    machine.jump_to_bookmark(mark).unwrap();
    assert_eq!(machine.ticks(), marked_at);
    machine.with_history(|h| assert_eq!(h.current_id(), mark));

    let err = machine.jump_to_bookmark(NodeId::ROOT).unwrap_err();
    assert!(matches!(err, TicklineError::Usage(_)));
}

#[test]
fn test_corrupt_core_state_is_reported() {
    let machine = machine(no_snapshots());
    let before = machine.with_history(|h| h.len());
    let err = machine
        .load_core_state(Blob::new(vec![1, 2, 3]))
        .unwrap_err();
    assert!(matches!(err, TicklineError::Core(_)), "{err}");
    assert_eq!(machine.with_history(|h| h.len()), before);

    let mut donor = ReferenceCore::new();
    let mut samples = Vec::new();
    donor.run_until(3000, StopReasons::empty(), &mut samples);
    machine.load_core_state(Blob::new(donor.get_state())).unwrap();
    assert_eq!(machine.ticks(), 3000);
}

#[test]
fn test_bookmark_after_loading_earlier_state() {
    let machine = machine(no_snapshots());
    machine.start();
    assert!(wait_until(|| machine.ticks() > 2 * TICKS_PER_FRAME));
    machine.stop();

    let mut donor = ReferenceCore::new();
    let mut samples = Vec::new();
    donor.run_until(3000, StopReasons::empty(), &mut samples);
    machine.load_core_state(Blob::new(donor.get_state())).unwrap();
    assert_eq!(machine.ticks(), 3000);

    let mark = machine.add_bookmark(false).unwrap();
    machine.with_history(|h| {
        let node = h.node(mark).unwrap();
        assert_eq!(node.ticks(), 3000);
        let loaded = h.node(node.parent().unwrap()).unwrap();
        assert_eq!((loaded.label(), loaded.ticks()), ("state", 3000));
    });

    // Running on continues from the loaded tick
    machine.start();
    assert!(wait_until(|| machine.ticks() > 3000 + TICKS_PER_FRAME));
    machine.stop();
    machine.with_history(|h| {
        let run = h.node(mark).unwrap().children()[0];
        assert_eq!(h.node(run).unwrap().ticks(), 3000);
    });
}

#[test]
fn test_jump_drops_pending_requests() {
    let machine = machine(no_snapshots());
    machine.start();
    assert!(wait_until(|| machine.ticks() > TICKS_PER_FRAME));
    machine.stop();
    let mark = machine.add_bookmark(false).unwrap();

    machine.push_request(Request::Reset);
    machine.push_request(Request::KeyPress { key: 4, down: true });
    assert_eq!(machine.pending_requests(), 2);

    machine.jump_to_bookmark(mark).unwrap();
    assert_eq!(machine.pending_requests(), 0);

    let resumed = machine.ticks();
    machine.start();
    assert!(wait_until(|| machine.ticks() > resumed));
    machine.stop();
    machine.with_history(|h| {
        let labels = labels(h);
        assert!(!labels.contains(&"reset"), "{labels:?}");
        assert!(!labels.contains(&"key"), "{labels:?}");
    });
}

#[cfg(feature = "persist")]
mod persisted {
    use super::*;
    use tickline::persist::{FileRegistry, MemoryStore};

    #[test]
    fn test_close_and_reopen_restores_timeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machine.tl");
        let registry = FileRegistry::new();

        let machine = Machine::create(
            &path,
            "persisted",
            Box::new(ReferenceCore::new()),
            no_snapshots(),
            &registry,
        )
        .unwrap();
        assert!(registry.is_open(&path));

        let second = Machine::create(
            &path,
            "clash",
            Box::new(ReferenceCore::new()),
            no_snapshots(),
            &registry,
        );
        assert!(matches!(second, Err(TicklineError::Usage(_))));

        machine.push_request(Request::KeyPress { key: 1, down: true });
        machine.start();
        assert!(wait_until(|| machine.ticks() > 3 * TICKS_PER_FRAME));
        machine.stop();
        machine.set_name("renamed").unwrap();
        machine.close().unwrap();
        machine.close().unwrap();
        assert!(!registry.is_open(&path));

        let (ticks, shape) = machine.with_history(|h| (h.current().end_ticks(), labels(h)));
        assert_eq!(shape.last(), Some(&"bookmark(system)"));

        let reopened =
            Machine::open(&path, Box::new(ReferenceCore::new()), no_snapshots(), &registry).unwrap();
        assert_eq!(reopened.name(), "renamed");
        assert_eq!(reopened.ticks(), ticks);
        reopened.with_history(|h| assert_eq!(labels(h), shape));

        reopened.compact().unwrap();
        reopened.close().unwrap();

        // Closing again appends a second system bookmark
        let mut expected = shape.clone();
        expected.push("bookmark(system)");
        let again =
            Machine::open(&path, Box::new(ReferenceCore::new()), no_snapshots(), &registry).unwrap();
        again.with_history(|h| assert_eq!(labels(h), expected));
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FileRegistry::new();
        let result = Machine::open(
            &dir.path().join("absent.tl"),
            Box::new(ReferenceCore::new()),
            no_snapshots(),
            &registry,
        );
        assert!(matches!(result, Err(TicklineError::Io(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_in_memory_store_roundtrip() {
        let store = MemoryStore::new();
        let machine = Machine::create_in(
            Box::new(store.clone()),
            "mem",
            Box::new(ReferenceCore::new()),
            no_snapshots(),
        )
        .unwrap();
        assert_eq!(machine.path(), None);

        machine.push_request(Request::KeyPress { key: 6, down: true });
        machine.start();
        assert!(wait_until(|| machine.ticks() > 2 * TICKS_PER_FRAME));
        machine.stop();
        machine.compact().unwrap();
        machine.close().unwrap();
        assert_eq!(store.lines()[0], "name:mem");

        let (ticks, shape) = machine.with_history(|h| (h.current().end_ticks(), labels(h)));
        let reopened = Machine::open_in(
            Box::new(store.clone()),
            Box::new(ReferenceCore::new()),
            no_snapshots(),
        )
        .unwrap();
        assert_eq!(reopened.name(), "mem");
        assert_eq!(reopened.ticks(), ticks);
        reopened.with_history(|h| assert_eq!(labels(h), shape));
    }

    #[test]
    fn test_unreadable_log_aborts_open() {
        let store = MemoryStore::from_text("key:1,0,1,1\ndelete:1\n");
        let result = Machine::open_in(
            Box::new(store),
            Box::new(ReferenceCore::new()),
            no_snapshots(),
        );
        assert!(matches!(result, Err(TicklineError::FileFormat(_))));
    }
}
