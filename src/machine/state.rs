//! Running-state control shared between callers and the execution thread
//!
//! The requested state, the auto-pause count and the state the worker has
//! actually reached live under one lock, so the worker's "effective state"
//! decision and an [`AutoPause`] entering are strictly ordered.

use crate::audio::WAIT_TIMEOUT_MS;
use parking_lot::{Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

/// Execution mode of a machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunningState {
    /// Not advancing
    #[default]
    Paused,
    /// Advancing and recording
    Running,
    /// Playing snapshot audio backwards and reverting
    Reverse,
}

#[derive(Debug)]
struct Fields {
    requested: RunningState,
    /// Requested state to restore when reverse playback ends
    pre_reverse: RunningState,
    auto_pause: usize,
    actual: RunningState,
    worker: Option<ThreadId>,
    stopped: bool,
}

#[derive(Debug)]
pub(crate) struct StateControl {
    fields: Mutex<Fields>,
    changed: Condvar,
}

impl StateControl {
    pub(crate) fn new() -> Self {
        StateControl {
            fields: Mutex::new(Fields {
                requested: RunningState::Paused,
                pre_reverse: RunningState::Paused,
                auto_pause: 0,
                actual: RunningState::Paused,
                worker: None,
                stopped: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn requested(&self) -> RunningState {
        self.fields.lock().requested
    }

    pub(crate) fn actual(&self) -> RunningState {
        self.fields.lock().actual
    }

    /// Set the requested state. Leaving reverse this way forgets the
    /// pre-reverse state. Returns the previous request.
    pub(crate) fn set_requested(&self, state: RunningState) -> RunningState {
        let mut fields = self.fields.lock();
        let previous = std::mem::replace(&mut fields.requested, state);
        if previous != state {
            tracing::debug!(?previous, ?state, "running state requested");
        }
        drop(fields);
        self.changed.notify_all();
        previous
    }

    /// Flip between running and paused. Has no effect during reverse.
    pub(crate) fn toggle(&self) -> RunningState {
        let mut fields = self.fields.lock();
        fields.requested = match fields.requested {
            RunningState::Paused => RunningState::Running,
            RunningState::Running => RunningState::Paused,
            RunningState::Reverse => RunningState::Reverse,
        };
        let state = fields.requested;
        drop(fields);
        self.changed.notify_all();
        state
    }

    /// Enter reverse, remembering the current request. Only valid while
    /// running; the caller checks that a snapshot exists.
    pub(crate) fn begin_reverse(&self) -> bool {
        let mut fields = self.fields.lock();
        if fields.requested != RunningState::Running {
            return false;
        }
        fields.pre_reverse = fields.requested;
        fields.requested = RunningState::Reverse;
        drop(fields);
        tracing::debug!("reverse playback requested");
        self.changed.notify_all();
        true
    }

    /// Leave reverse, restoring the request active before it. Returns
    /// `false` if not reversing.
    pub(crate) fn end_reverse(&self) -> bool {
        let mut fields = self.fields.lock();
        if fields.requested != RunningState::Reverse {
            return false;
        }
        fields.requested = fields.pre_reverse;
        let restored = fields.requested;
        drop(fields);
        tracing::debug!(?restored, "reverse playback ended");
        self.changed.notify_all();
        true
    }

    /// Called by the worker at the top of each iteration: decide the state
    /// to act in and publish it as the actual state
    pub(crate) fn enter_iteration(&self) -> RunningState {
        let mut fields = self.fields.lock();
        let effective = if fields.auto_pause > 0 {
            RunningState::Paused
        } else {
            fields.requested
        };
        if fields.actual != effective {
            fields.actual = effective;
            drop(fields);
            self.changed.notify_all();
        }
        effective
    }

    /// Bounded wait for any state change
    pub(crate) fn wait(&self, timeout: Duration) {
        let mut fields = self.fields.lock();
        self.changed.wait_for(&mut fields, timeout);
    }

    pub(crate) fn register_worker(&self) {
        self.fields.lock().worker = Some(thread::current().id());
    }

    /// Worker exited; nothing will touch the core any more
    pub(crate) fn mark_stopped(&self) {
        let mut fields = self.fields.lock();
        fields.stopped = true;
        fields.actual = RunningState::Paused;
        drop(fields);
        self.changed.notify_all();
    }

    /// Force the worker to pause until the returned guard is dropped.
    ///
    /// Blocks until the worker has observably reached paused. Called from
    /// the worker itself (e.g. inside an action callback) it returns at once.
    pub(crate) fn auto_pause(&self) -> AutoPause<'_> {
        let mut fields = self.fields.lock();
        fields.auto_pause += 1;
        let on_worker = fields.worker == Some(thread::current().id());
        self.changed.notify_all();
        while !on_worker && !fields.stopped && fields.actual != RunningState::Paused {
            self.changed
                .wait_for(&mut fields, Duration::from_millis(WAIT_TIMEOUT_MS));
        }
        AutoPause { control: self }
    }
}

/// Scope guard keeping the execution loop paused.
///
/// Guards nest and overlap freely; the loop resumes its requested state once
/// the last guard is dropped.
#[must_use = "the machine resumes as soon as the guard is dropped"]
#[derive(Debug)]
pub struct AutoPause<'a> {
    control: &'a StateControl,
}

impl Drop for AutoPause<'_> {
    fn drop(&mut self) {
        let mut fields = self.control.fields.lock();
        fields.auto_pause = fields.auto_pause.saturating_sub(1);
        drop(fields);
        self.control.changed.notify_all();
    }
}
