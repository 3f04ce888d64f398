//! Client side: mirrors a remote machine's timeline

use super::connection::{Connection, MessageSender};
use super::message::Message;
use crate::machine::Request;
use crate::timeline::{CoreAction, History};
use crate::{Result, TicklineError};
use parking_lot::{Condvar, Mutex};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct RemoteState {
    name: Option<String>,
    machines: Option<Vec<String>>,
    last_pong: Option<u64>,
    history: History,
    actions: u64,
}

#[derive(Default)]
struct Mirror {
    state: Mutex<RemoteState>,
    changed: Condvar,
}

impl Mirror {
    fn update(&self, f: impl FnOnce(&mut RemoteState)) {
        f(&mut self.state.lock());
        self.changed.notify_all();
    }

    fn wait_for<T>(&self, timeout: Duration, mut check: impl FnMut(&RemoteState) -> Option<T>) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(value) = check(&state) {
                return Some(value);
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return check(&state);
            }
        }
    }
}

/// Connection to a [`MachineServer`](super::MachineServer)
///
/// Received actions are mirrored into a local [`History`] (snapshot kinds
/// excepted) and passed to the `on_action` callback on the reader thread.
pub struct RemoteMachine {
    connection: Connection,
    mirror: Arc<Mirror>,
    next_ping: AtomicU64,
}

impl RemoteMachine {
    /// Connect to a server
    pub fn connect<F>(addr: impl ToSocketAddrs, on_action: F) -> Result<Self>
    where
        F: Fn(&CoreAction) + Send + 'static,
    {
        let stream = TcpStream::connect(addr)?;
        let mirror = Arc::new(Mirror::default());
        let handler_mirror = Arc::clone(&mirror);
        let connection = Connection::spawn(stream, move |sender, message| {
            handle_message(&handler_mirror, &on_action, sender, message)
        })?;
        Ok(RemoteMachine {
            connection,
            mirror,
            next_ping: AtomicU64::new(1),
        })
    }

    /// Ask the server for its machine names
    pub fn request_machines(&self) -> Result<()> {
        self.mirror.update(|state| state.machines = None);
        self.connection.send(&Message::RequestAvailableMachines)
    }

    /// Wait for the answer to [`request_machines`](Self::request_machines)
    pub fn available_machines(&self, timeout: Duration) -> Option<Vec<String>> {
        self.mirror.wait_for(timeout, |state| state.machines.clone())
    }

    /// Start mirroring the machine called `name`. The local history is reset.
    pub fn select(&self, name: &str) -> Result<()> {
        self.mirror.update(|state| {
            state.name = None;
            state.history = History::new();
            state.actions = 0;
        });
        self.connection
            .send(&Message::SelectMachine(name.to_owned()))
    }

    /// Name confirmed by the server after [`select`](Self::select)
    pub fn name(&self, timeout: Duration) -> Option<String> {
        self.mirror.wait_for(timeout, |state| state.name.clone())
    }

    /// Queue a request on the selected machine
    pub fn push_request(&self, request: Request) -> Result<()> {
        self.connection.send(&Message::CoreRequest(request))
    }

    /// Round-trip a ping, returning the elapsed time
    pub fn ping(&self, timeout: Duration) -> Result<Duration> {
        let id = self.next_ping.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        self.connection.send(&Message::Ping {
            response: false,
            id,
        })?;
        self.mirror
            .wait_for(timeout, |state| (state.last_pong == Some(id)).then_some(()))
            .map(|()| start.elapsed())
            .ok_or_else(|| TicklineError::Protocol(format!("No answer to ping {id}")))
    }

    /// Wait until at least `count` actions were received since selection
    pub fn wait_for_actions(&self, count: u64, timeout: Duration) -> bool {
        self.mirror
            .wait_for(timeout, |state| (state.actions >= count).then_some(()))
            .is_some()
    }

    /// Run `f` with read access to the mirrored history
    pub fn with_history<R>(&self, f: impl FnOnce(&History) -> R) -> R {
        f(&self.mirror.state.lock().history)
    }

    /// Whether the connection is gone
    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Disconnect
    pub fn close(&self) {
        self.connection.close();
    }
}

impl std::fmt::Debug for RemoteMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteMachine")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

fn handle_message<F>(mirror: &Mirror, on_action: &F, sender: &Arc<MessageSender>, message: Message) -> Result<()>
where
    F: Fn(&CoreAction),
{
    match message {
        Message::Ping {
            response: false,
            id,
        } => sender.send(&Message::Ping { response: true, id })?,
        Message::Ping { response: true, id } => mirror.update(|state| state.last_pong = Some(id)),
        Message::Name(name) => mirror.update(|state| state.name = Some(name)),
        Message::AvailableMachines(names) => mirror.update(|state| state.machines = Some(names)),
        Message::CoreAction(action) => {
            if !action.kind.is_snapshot() {
                let mut state = mirror.state.lock();
                if let Err(e) = state.history.add_action(action.clone()) {
                    tracing::warn!("mirrored history rejected {}: {e}", action.kind.name());
                }
            }
            mirror.update(|state| state.actions += 1);
            on_action(&action);
        }
        other => {
            return Err(TicklineError::Protocol(format!(
                "Unexpected {:?} from server",
                other.tag()
            )))
        }
    }
    Ok(())
}
