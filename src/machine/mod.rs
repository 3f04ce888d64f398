//! Execution loop
//!
//! A [`Machine`] owns one hardware core, its history and its audio path. A
//! dedicated worker thread drains the request queue, applies requests to the
//! core, reports the resulting actions and records them in the history.
//! Callers only touch the core through the queue or while holding an
//! [`AutoPause`] guard.

pub mod config;
mod queue;
mod replay;
pub mod request;
mod snapshot;
mod state;
mod worker;

pub use config::MachineConfig;
pub use queue::RequestQueue;
pub use request::{KindTag, Request};
pub use state::{AutoPause, RunningState};

use crate::audio::{AudioStats, PcmSource, SharedAudioBuffer};
use crate::hardware::HardwareCore;
use crate::timeline::{ActionKind, Blob, Bookmark, CoreAction, History, HistoryObserver, NodeId, ObserverId};
use crate::{Result, TicklineError};
use parking_lot::Mutex;
use snapshot::SnapshotList;
use state::StateControl;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

#[cfg(feature = "persist")]
use crate::persist::{FileRegistry, LoadedTimeline, TimelineFile, TimelineStore};
#[cfg(feature = "persist")]
use std::path::Path;

/// Callback receiving every applied action, snapshot kinds included
pub type ActionCallback = Arc<dyn Fn(&CoreAction) + Send + Sync>;

/// Handle returned by [`Machine::subscribe_actions`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// State only the worker (or an auto-paused caller) may touch
pub(crate) struct Inner {
    pub(crate) core: Box<dyn HardwareCore>,
    pub(crate) history: History,
    #[cfg(feature = "persist")]
    pub(crate) file: Option<TimelineFile>,
}

pub(crate) struct Shared {
    pub(crate) config: MachineConfig,
    pub(crate) queue: RequestQueue,
    pub(crate) control: StateControl,
    pub(crate) inner: Mutex<Inner>,
    pub(crate) audio: SharedAudioBuffer,
    pub(crate) snapshots: Mutex<SnapshotList>,
    /// Core tick count as of the last completed step
    pub(crate) ticks: AtomicU64,
    pub(crate) quit: AtomicBool,
    name: Mutex<String>,
    volume: AtomicU8,
    subscribers: Mutex<Vec<(SubscriptionId, ActionCallback)>>,
    next_subscriber: AtomicU64,
}

impl Shared {
    /// Fan an action out to subscribers. Never called with `inner` locked.
    pub(crate) fn notify_action(&self, action: &CoreAction) {
        let callbacks: Vec<ActionCallback> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(action);
        }
    }
}

/// One emulated machine with its timeline, audio path and worker thread
pub struct Machine {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Machine {
    /// In-memory machine with an empty history
    pub fn new(name: &str, core: Box<dyn HardwareCore>, config: MachineConfig) -> Result<Self> {
        let inner = Inner {
            core,
            history: History::new(),
            #[cfg(feature = "persist")]
            file: None,
        };
        Self::start_worker(name, inner, config)
    }

    /// Machine recording into a new timeline file at `path`
    #[cfg(feature = "persist")]
    pub fn create(
        path: &Path,
        name: &str,
        core: Box<dyn HardwareCore>,
        config: MachineConfig,
        registry: &FileRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let file = TimelineFile::create(path, name, registry)?;
        Self::with_file(file, History::new(), name, core, config)
    }

    /// Machine recording into a new log held by `store`
    #[cfg(feature = "persist")]
    pub fn create_in(
        store: Box<dyn TimelineStore>,
        name: &str,
        core: Box<dyn HardwareCore>,
        config: MachineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let file = TimelineFile::create_in(store, name)?;
        Self::with_file(file, History::new(), name, core, config)
    }

    /// Machine restored from the timeline file at `path`.
    ///
    /// The core is brought to the file's current node by loading the nearest
    /// bookmark above it and replaying the actions in between. Any failure
    /// aborts the open.
    #[cfg(feature = "persist")]
    pub fn open(
        path: &Path,
        core: Box<dyn HardwareCore>,
        config: MachineConfig,
        registry: &FileRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let (file, loaded) = TimelineFile::open(path, registry)?;
        Self::restore(file, loaded, core, config)
    }

    /// Machine restored from the log held by `store`, as [`Machine::open`]
    #[cfg(feature = "persist")]
    pub fn open_in(
        store: Box<dyn TimelineStore>,
        core: Box<dyn HardwareCore>,
        config: MachineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (file, loaded) = TimelineFile::open_in(store)?;
        Self::restore(file, loaded, core, config)
    }

    #[cfg(feature = "persist")]
    fn restore(
        file: TimelineFile,
        loaded: LoadedTimeline,
        mut core: Box<dyn HardwareCore>,
        config: MachineConfig,
    ) -> Result<Self> {
        replay::restore_current(core.as_mut(), &loaded.history)?;
        let name = loaded.name.unwrap_or_else(|| {
            file.path()
                .and_then(Path::file_stem)
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        Self::with_file(file, loaded.history, &name, core, config)
    }

    #[cfg(feature = "persist")]
    fn with_file(
        file: TimelineFile,
        mut history: History,
        name: &str,
        core: Box<dyn HardwareCore>,
        config: MachineConfig,
    ) -> Result<Self> {
        history.subscribe(file.observer());
        let inner = Inner {
            core,
            history,
            file: Some(file),
        };
        Self::start_worker(name, inner, config)
    }

    fn start_worker(name: &str, inner: Inner, config: MachineConfig) -> Result<Self> {
        config.validate()?;
        let audio = SharedAudioBuffer::new(config.audio_capacity, config.overrun_threshold)?;
        let shared = Arc::new(Shared {
            queue: RequestQueue::new(),
            control: StateControl::new(),
            audio,
            snapshots: Mutex::new(SnapshotList::new(config.snapshot_limit)),
            ticks: AtomicU64::new(inner.core.ticks()),
            quit: AtomicBool::new(false),
            name: Mutex::new(name.to_owned()),
            volume: AtomicU8::new(inner.core.volume()),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber: AtomicU64::new(0),
            inner: Mutex::new(inner),
            config,
        });

        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(format!("tickline-{name}"))
            .spawn(move || worker::run(worker_shared))?;
        tracing::info!(name, "machine started");

        Ok(Machine {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Display name
    pub fn name(&self) -> String {
        self.shared.name.lock().clone()
    }

    /// Rename the machine, recording the name in its file
    pub fn set_name(&self, name: &str) -> Result<()> {
        *self.shared.name.lock() = name.to_owned();
        #[cfg(feature = "persist")]
        if let Some(file) = &self.shared.inner.lock().file {
            file.write_name(name)?;
        }
        Ok(())
    }

    /// Configuration in effect
    pub fn config(&self) -> &MachineConfig {
        &self.shared.config
    }

    /// Queue a request for the worker
    pub fn push_request(&self, request: Request) {
        self.shared.queue.push(request);
    }

    /// Number of requests not yet applied
    pub fn pending_requests(&self) -> usize {
        self.shared.queue.len()
    }

    /// Request running
    pub fn start(&self) {
        self.shared.control.set_requested(RunningState::Running);
    }

    /// Request paused
    pub fn stop(&self) {
        self.shared.control.set_requested(RunningState::Paused);
    }

    /// Flip between running and paused; returns the new request
    pub fn toggle_running(&self) -> RunningState {
        self.shared.control.toggle()
    }

    /// Start reverse playback. Only possible while running with at least one
    /// snapshot retained.
    pub fn reverse(&self) -> bool {
        let snapshots = self.shared.snapshots.lock();
        if snapshots.is_empty() {
            return false;
        }
        self.shared.control.begin_reverse()
    }

    /// Leave reverse playback, restoring the state requested before it
    pub fn reverse_stop(&self) -> bool {
        self.shared.control.end_reverse()
    }

    /// Requested running state
    pub fn running_state(&self) -> RunningState {
        self.shared.control.requested()
    }

    /// State the worker is actually in
    pub fn actual_state(&self) -> RunningState {
        self.shared.control.actual()
    }

    /// Pause the worker until the guard is dropped; blocks until paused
    pub fn auto_pause(&self) -> AutoPause<'_> {
        self.shared.control.auto_pause()
    }

    /// Core ticks as of the last completed step
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Acquire)
    }

    /// Number of retained reverse snapshots
    pub fn snapshot_count(&self) -> usize {
        self.shared.snapshots.lock().len()
    }

    /// Subscribe to applied actions. Callbacks run on the worker thread.
    pub fn subscribe_actions<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&CoreAction) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed));
        self.shared
            .subscribers
            .lock()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove an action subscription
    pub fn unsubscribe_actions(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.shared.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Subscribe to history changes. Observers run with the machine locked
    /// and must not call back into it.
    pub fn subscribe_history(&self, observer: Box<dyn HistoryObserver>) -> ObserverId {
        self.shared.inner.lock().history.subscribe(observer)
    }

    /// Remove a history subscription
    pub fn unsubscribe_history(&self, id: ObserverId) -> bool {
        self.shared.inner.lock().history.unsubscribe(id)
    }

    /// Run `f` with read access to the history
    pub fn with_history<R>(&self, f: impl FnOnce(&History) -> R) -> R {
        f(&self.shared.inner.lock().history)
    }

    /// Render audio for the output device: the main buffer forwards, or the
    /// latest snapshot's audio backwards while reversing
    pub fn read_audio(&self, buffer: &mut [u8], offset: usize, samples_requested: usize) -> usize {
        let volume = self.shared.volume.load(Ordering::Relaxed);
        if self.shared.control.actual() == RunningState::Reverse {
            return match self.shared.snapshots.lock().latest_mut() {
                Some(snapshot) => {
                    snapshot
                        .audio
                        .render(volume, buffer, offset, samples_requested, true)
                }
                None => 0,
            };
        }
        self.shared
            .audio
            .render(volume, buffer, offset, samples_requested, false)
    }

    /// Playback speed multiplier; 1 is real time
    pub fn set_turbo(&self, multiplier: usize) {
        self.shared.audio.set_read_speed_multiplier(multiplier);
    }

    /// Current playback speed multiplier
    pub fn turbo(&self) -> usize {
        self.shared.audio.read_speed_multiplier()
    }

    /// Main audio buffer counters
    pub fn audio_stats(&self) -> AudioStats {
        self.shared.audio.stats()
    }

    /// Output volume
    pub fn volume(&self) -> u8 {
        self.shared.volume.load(Ordering::Relaxed)
    }

    /// Set the output volume
    pub fn set_volume(&self, volume: u8) {
        self.shared.volume.store(volume, Ordering::Relaxed);
        let _pause = self.auto_pause();
        self.shared.inner.lock().core.set_volume(volume);
    }

    /// Bookmark the current core state as a child of the current node
    pub fn add_bookmark(&self, system: bool) -> Result<NodeId> {
        let _pause = self.auto_pause();
        let mut inner = self.shared.inner.lock();
        let core = &inner.core;
        let ticks = core.ticks();
        let bookmark = Bookmark::new(system, core.version(), core.get_state(), core.get_screen());
        let id = inner.history.add_bookmark(ticks, bookmark)?;
        tracing::debug!(%id, ticks, system, "bookmark added");
        Ok(id)
    }

    /// Make bookmark `id` current and restore its state. Reverse snapshots
    /// and requests still queued for the abandoned branch are discarded.
    pub fn jump_to_bookmark(&self, id: NodeId) -> Result<()> {
        let _pause = self.auto_pause();
        let actions = {
            let mut inner = self.shared.inner.lock();
            let bookmark = inner
                .history
                .node(id)
                .and_then(|node| node.bookmark())
                .cloned()
                .ok_or_else(|| TicklineError::Usage(format!("Node {id} is not a bookmark")))?;
            replay::load_bookmark(inner.core.as_mut(), &bookmark)?;
            inner.history.set_current(id)?;
            let dropped = self.shared.queue.clear();
            if dropped > 0 {
                tracing::debug!(dropped, "pending requests dropped by jump");
            }
            let actions = worker::discard_snapshots(&self.shared, &mut inner)?;
            self.shared
                .ticks
                .store(inner.core.ticks(), Ordering::Release);
            actions
        };
        self.shared.audio.clear();
        for action in &actions {
            self.shared.notify_action(action);
        }
        tracing::debug!(%id, "jumped to bookmark");
        Ok(())
    }

    /// Delete `id` and its subtree; `false` if it is on the current path
    pub fn delete_branch(&self, id: NodeId) -> Result<bool> {
        let _pause = self.auto_pause();
        self.shared.inner.lock().history.delete_branch(id)
    }

    /// Delete the single node `id`, keeping its children; `false` if current
    pub fn delete_bookmark(&self, id: NodeId) -> Result<bool> {
        let _pause = self.auto_pause();
        self.shared.inner.lock().history.delete_bookmark(id)
    }

    /// Load a whole core state now, on the calling thread, so a corrupt
    /// state is reported to the caller. Recorded like a queued request, at
    /// the tick the loaded state resumes from.
    pub fn load_core_state(&self, state: Blob) -> Result<()> {
        let _pause = self.auto_pause();
        let (action, discarded) = {
            let mut inner = self.shared.inner.lock();
            inner.core.load_state(state.get()?)?;
            let ticks = inner.core.ticks();
            self.shared.ticks.store(ticks, Ordering::Release);
            let discarded = worker::discard_snapshots(&self.shared, &mut inner)?;
            let action = CoreAction::new(ticks, ActionKind::LoadCoreState { state });
            inner.history.add_action(action.clone())?;
            (action, discarded)
        };
        self.shared.notify_action(&action);
        for action in &discarded {
            self.shared.notify_action(action);
        }
        Ok(())
    }

    /// Rewrite the timeline file from the live tree
    #[cfg(feature = "persist")]
    pub fn compact(&self) -> Result<()> {
        let _pause = self.auto_pause();
        let name = self.name();
        let mut inner = self.shared.inner.lock();
        inner.history.close_open_run()?;
        let inner = &mut *inner;
        match &inner.file {
            Some(file) => file.compact(&inner.history, &name),
            None => Err(TicklineError::Usage(
                "Machine has no timeline file to compact".into(),
            )),
        }
    }

    /// Path of the timeline file, if any
    #[cfg(feature = "persist")]
    pub fn path(&self) -> Option<std::path::PathBuf> {
        self.shared
            .inner
            .lock()
            .file
            .as_ref()
            .and_then(|file| file.path().map(Path::to_path_buf))
    }

    /// Close the machine: write a system bookmark to its file, stop the
    /// worker and release the file. Later calls do nothing.
    pub fn close(&self) -> Result<()> {
        if self.shared.quit.load(Ordering::Acquire) {
            return Ok(());
        }
        #[cfg(feature = "persist")]
        let result = {
            let has_file = self.shared.inner.lock().file.is_some();
            if has_file {
                self.add_bookmark(true).map(|_| ())
            } else {
                Ok(())
            }
        };
        #[cfg(not(feature = "persist"))]
        let result = Ok(());

        self.shutdown();
        #[cfg(feature = "persist")]
        {
            self.shared.inner.lock().file = None;
        }
        tracing::info!(name = %self.name(), "machine closed");
        result
    }

    /// Stop and join the worker thread. Idempotent.
    pub fn shutdown(&self) {
        self.shared.quit.store(true, Ordering::Release);
        self.shared.control.set_requested(RunningState::Paused);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("execution thread panicked");
            }
        }
    }
}

impl PcmSource for Machine {
    fn read_pcm(&self, buffer: &mut [u8], offset: usize, samples_requested: usize) -> usize {
        self.read_audio(buffer, offset, samples_requested)
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("name", &self.name())
            .field("state", &self.running_state())
            .field("ticks", &self.ticks())
            .finish()
    }
}
