//! Deterministic replay of recorded history into a core

use crate::hardware::{HardwareCore, StopReasons};
use crate::timeline::{ActionKind, Blob, Bookmark, CoreAction, History, HistoryNode, NodeId};
use crate::{Result, TicklineError};

/// Load a bookmark's version, state and screen into `core`
pub(crate) fn load_bookmark(core: &mut dyn HardwareCore, bookmark: &Bookmark) -> Result<()> {
    core.set_version(bookmark.version)?;
    core.load_state(bookmark.state.get()?)?;
    core.set_screen(bookmark.screen.get()?);
    Ok(())
}

/// Bring `core` to the history's current node: restore the nearest bookmark
/// at or above it (or reset when there is none), then replay the actions
/// recorded between that point and the current node.
pub(crate) fn restore_current(core: &mut dyn HardwareCore, history: &History) -> Result<()> {
    let target = history.current_id();
    let start = match history.nearest_bookmark(target) {
        Some(id) => {
            let bookmark = history
                .node(id)
                .and_then(HistoryNode::bookmark)
                .ok_or_else(|| TicklineError::Other(format!("Node {id} lost its bookmark")))?;
            load_bookmark(core, bookmark)?;
            id
        }
        None => {
            core.reset();
            NodeId::ROOT
        }
    };

    let path = history.path_between(start, target).ok_or_else(|| {
        TicklineError::Other(format!("Node {start} is not above node {target}"))
    })?;
    let mut replayed = 0usize;
    for id in path {
        if let Some(action) = history.node(id).and_then(HistoryNode::action) {
            replay_action(core, action)?;
            replayed += 1;
        }
    }
    tracing::debug!(from = %start, to = %target, replayed, ticks = core.ticks(), "history replayed");
    Ok(())
}

fn media(blob: &Option<Blob>) -> Result<Option<&[u8]>> {
    blob.as_ref().map(Blob::get).transpose()
}

/// Re-apply one recorded action
pub(crate) fn replay_action(core: &mut dyn HardwareCore, action: &CoreAction) -> Result<()> {
    match &action.kind {
        ActionKind::KeyPress { key, down } => {
            core.key_press(*key, *down);
        }
        ActionKind::Reset => core.reset(),
        ActionKind::LoadDisc { drive, media: disc } => core.load_disc(*drive, media(disc)?),
        ActionKind::LoadTape { media: tape } => core.load_tape(media(tape)?),
        ActionKind::RunUntil { stop_ticks, .. } => {
            let mut scratch = Vec::new();
            while core.ticks() < *stop_ticks {
                let before = core.ticks();
                scratch.clear();
                core.run_until(*stop_ticks, StopReasons::empty(), &mut scratch);
                if core.ticks() == before {
                    return Err(TicklineError::Core(format!(
                        "Core stalled at tick {before} replaying to {stop_ticks}"
                    )));
                }
            }
        }
        ActionKind::CoreVersion { version } => core.set_version(*version)?,
        ActionKind::LoadCoreState { state } => core.load_state(state.get()?)?,
        // Never recorded in a history
        ActionKind::CreateSnapshot { .. }
        | ActionKind::DeleteSnapshot { .. }
        | ActionKind::RevertToSnapshot { .. } => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::ReferenceCore;

    #[test]
    fn test_replay_matches_live_run() {
        let mut live = ReferenceCore::new();
        let mut history = History::new();
        let mut samples = Vec::new();

        live.key_press(3, true);
        history
            .add_action(CoreAction::new(0, ActionKind::KeyPress { key: 3, down: true }))
            .unwrap();
        live.run_until(5_000, StopReasons::empty(), &mut samples);
        history.add_action(CoreAction::run_until(0, 5_000)).unwrap();

        let mut replayed = ReferenceCore::new();
        restore_current(&mut replayed, &history).unwrap();
        assert_eq!(replayed.get_state(), live.get_state());
    }

    #[test]
    fn test_replay_starts_from_bookmark() {
        let mut source = ReferenceCore::new();
        let mut samples = Vec::new();
        source.run_until(2_000, StopReasons::empty(), &mut samples);

        let mut history = History::new();
        history.add_action(CoreAction::run_until(0, 2_000)).unwrap();
        let bookmark = Bookmark::new(false, source.version(), source.get_state(), source.get_screen());
        history.add_bookmark(2_000, bookmark).unwrap();
        history.add_action(CoreAction::run_until(2_000, 3_000)).unwrap();
        source.run_until(3_000, StopReasons::empty(), &mut samples);

        let mut replayed = ReferenceCore::new();
        restore_current(&mut replayed, &history).unwrap();
        assert_eq!(replayed.ticks(), 3_000);
        assert_eq!(replayed.get_state(), source.get_state());
    }

    #[test]
    fn test_corrupt_bookmark_aborts() {
        let mut history = History::new();
        history
            .add_bookmark(0, Bookmark::new(false, 1, vec![0xde, 0xad], vec![]))
            .unwrap();
        let mut core = ReferenceCore::new();
        assert!(matches!(
            restore_current(&mut core, &history),
            Err(TicklineError::Core(_))
        ));
    }
}
