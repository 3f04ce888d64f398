//! Execution loop run on the machine's dedicated thread

use super::{Inner, Request, RunningState, Shared};
use crate::audio::WAIT_TIMEOUT_MS;
use crate::hardware::StopReasons;
use crate::timeline::{ActionKind, Blob, CoreAction};
use crate::Result;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_millis(WAIT_TIMEOUT_MS);

/// Result of applying one request to the core
struct Applied {
    action: Option<CoreAction>,
    /// A vertical sync was crossed: time for a snapshot
    vsync: bool,
    /// The request's target was fully reached
    reached: bool,
}

impl Applied {
    fn done(action: Option<CoreAction>) -> Self {
        Applied {
            action,
            vsync: false,
            reached: true,
        }
    }
}

pub(crate) fn run(shared: Arc<Shared>) {
    shared.control.register_worker();
    tracing::debug!("execution loop started");

    while !shared.quit.load(Ordering::Acquire) {
        let outcome = match shared.control.enter_iteration() {
            RunningState::Paused => {
                shared.control.wait(WAIT);
                Ok(())
            }
            RunningState::Running => step_running(&shared),
            RunningState::Reverse => step_reverse(&shared),
        };
        if let Err(e) = outcome {
            tracing::error!(error = %e, "execution step failed");
        }
    }

    shared.control.mark_stopped();
    tracing::debug!("execution loop stopped");
}

fn step_running(shared: &Shared) -> Result<()> {
    let (request, synthesized) = match shared.queue.pop() {
        Some(request) => (request, false),
        None => {
            let stop_ticks = shared
                .ticks
                .load(Ordering::Acquire)
                .saturating_add(shared.config.idle_step_ticks);
            (Request::RunUntil { stop_ticks }, true)
        }
    };

    if matches!(request, Request::RunUntil { .. })
        && shared.config.throttle_to_audio
        && !shared.audio.wait_for_underrun(WAIT)
    {
        if !synthesized {
            shared.queue.push_front(request);
        }
        return Ok(());
    }

    let applied = {
        let mut inner = shared.inner.lock();
        let applied = apply(shared, &mut inner, &request);
        shared.ticks.store(inner.core.ticks(), Ordering::Release);
        applied?
    };

    if !applied.reached && !synthesized {
        shared.queue.push_front(request);
    }

    let Some(action) = applied.action else {
        return Ok(());
    };
    shared.notify_action(&action);

    let follow_up = {
        let mut inner = shared.inner.lock();
        let mut follow_up = Vec::new();
        if matches!(action.kind, ActionKind::LoadCoreState { .. }) {
            follow_up.extend(discard_snapshots(shared, &mut inner)?);
        }
        if !action.kind.is_snapshot() {
            inner.history.add_action(action)?;
        }
        if applied.vsync {
            follow_up.extend(take_snapshot(shared, &mut inner)?);
        }
        follow_up
    };
    for action in &follow_up {
        shared.notify_action(action);
    }
    Ok(())
}

fn blob_bytes(media: &Option<Blob>) -> Result<Option<&[u8]>> {
    media.as_ref().map(Blob::get).transpose()
}

fn apply(shared: &Shared, inner: &mut Inner, request: &Request) -> Result<Applied> {
    let core = inner.core.as_mut();
    let ticks = core.ticks();
    let applied = match request {
        Request::KeyPress { key, down } => {
            if core.key_press(*key, *down) {
                Applied::done(Some(CoreAction::new(
                    ticks,
                    ActionKind::KeyPress {
                        key: *key,
                        down: *down,
                    },
                )))
            } else {
                Applied::done(None)
            }
        }
        Request::Reset => {
            core.reset();
            Applied::done(Some(CoreAction::new(ticks, ActionKind::Reset)))
        }
        Request::LoadDisc { drive, media } => {
            core.load_disc(*drive, blob_bytes(media)?);
            Applied::done(Some(CoreAction::new(
                ticks,
                ActionKind::LoadDisc {
                    drive: *drive,
                    media: media.clone(),
                },
            )))
        }
        Request::LoadTape { media } => {
            core.load_tape(blob_bytes(media)?);
            Applied::done(Some(CoreAction::new(
                ticks,
                ActionKind::LoadTape {
                    media: media.clone(),
                },
            )))
        }
        Request::RunUntil { stop_ticks } => run_slice(shared, inner, *stop_ticks),
        Request::CoreVersion { version } => {
            core.set_version(*version)?;
            Applied::done(Some(CoreAction::new(
                ticks,
                ActionKind::CoreVersion { version: *version },
            )))
        }
        Request::LoadCoreState { state } => {
            core.load_state(state.get()?)?;
            Applied::done(Some(CoreAction::new(
                core.ticks(),
                ActionKind::LoadCoreState {
                    state: state.clone(),
                },
            )))
        }
    };
    Ok(applied)
}

fn run_slice(shared: &Shared, inner: &mut Inner, stop_ticks: u64) -> Applied {
    let core = inner.core.as_mut();
    let start = core.ticks();
    if stop_ticks <= start {
        return Applied::done(None);
    }

    let target = stop_ticks.min(start.saturating_add(shared.config.max_slice_ticks));
    let mut mask = StopReasons::AUDIO_OVERRUN;
    let mut snapshots = shared.snapshots.lock();
    if snapshots.is_enabled() {
        mask |= StopReasons::VSYNC;
    }

    let mut samples = Vec::new();
    let fired = core.run_until(target, mask, &mut samples);
    let end = core.ticks();
    shared.audio.write(&samples);
    snapshots.record(&samples);
    drop(snapshots);

    tracing::trace!(start, end, samples = samples.len(), ?fired, "slice");
    let action = (end > start).then(|| {
        CoreAction::new(
            start,
            ActionKind::RunUntil {
                stop_ticks: end,
                samples: Some(samples),
            },
        )
    });
    Applied {
        action,
        vsync: fired.contains(StopReasons::VSYNC),
        reached: end >= stop_ticks,
    }
}

/// Snapshot the core, recording the last closed node as the revert target,
/// and prune past the limit
fn take_snapshot(shared: &Shared, inner: &mut Inner) -> Result<Vec<CoreAction>> {
    let mut list = shared.snapshots.lock();
    let id = list.allocate_id();
    inner.core.create_snapshot(id)?;
    let ticks = inner.core.ticks();
    let node = inner.history.last_closed_id();
    let pruned = list.push(id, node);
    tracing::debug!(id, ticks, %node, "snapshot taken");

    let mut actions = vec![CoreAction::new(ticks, ActionKind::CreateSnapshot { id })];
    for old in pruned {
        inner.core.delete_snapshot(old)?;
        tracing::debug!(id = old, "snapshot pruned");
        actions.push(CoreAction::new(ticks, ActionKind::DeleteSnapshot { id: old }));
    }
    Ok(actions)
}

/// Drop every snapshot from the core and the list
pub(crate) fn discard_snapshots(shared: &Shared, inner: &mut Inner) -> Result<Vec<CoreAction>> {
    let ids = shared.snapshots.lock().clear();
    let ticks = inner.core.ticks();
    let mut actions = Vec::with_capacity(ids.len());
    for id in ids {
        inner.core.delete_snapshot(id)?;
        actions.push(CoreAction::new(ticks, ActionKind::DeleteSnapshot { id }));
    }
    Ok(actions)
}

fn step_reverse(shared: &Shared) -> Result<()> {
    let exhausted = shared
        .snapshots
        .lock()
        .latest()
        .map(|snapshot| snapshot.audio.is_empty());
    match exhausted {
        None => {
            shared.control.end_reverse();
            Ok(())
        }
        Some(false) => {
            shared.control.wait(WAIT);
            Ok(())
        }
        Some(true) => revert_latest(shared),
    }
}

/// Restore the core to the most recent snapshot, move the history back to
/// the node it recorded and discard it
fn revert_latest(shared: &Shared) -> Result<()> {
    let mut inner = shared.inner.lock();
    let Some(snapshot) = shared.snapshots.lock().pop_latest() else {
        return Ok(());
    };

    inner.core.revert_to_snapshot(snapshot.id)?;
    inner.core.delete_snapshot(snapshot.id)?;
    let ticks = inner.core.ticks();
    shared.ticks.store(ticks, Ordering::Release);
    shared.audio.clear();
    tracing::debug!(id = snapshot.id, ticks, node = %snapshot.node, "reverted to snapshot");

    if inner.history.contains(snapshot.node) {
        inner.history.set_current(snapshot.node)?;
    } else {
        tracing::warn!(node = %snapshot.node, "snapshot target no longer exists; current node kept");
    }
    drop(inner);

    shared.notify_action(&CoreAction::new(
        ticks,
        ActionKind::RevertToSnapshot { id: snapshot.id },
    ));
    shared.notify_action(&CoreAction::new(
        ticks,
        ActionKind::DeleteSnapshot { id: snapshot.id },
    ));
    Ok(())
}
