//! Host side: exposes machines to remote observers

use super::connection::{Connection, MessageSender};
use super::framing::encode_frame;
use super::message::Message;
use crate::machine::{Machine, SubscriptionId};
use crate::{Result, TicklineError};
use parking_lot::Mutex;
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const ACCEPT_POLL: Duration = Duration::from_millis(20);

type Selection = Arc<Mutex<Option<(Arc<Machine>, SubscriptionId)>>>;

/// One accepted client
struct ServerSession {
    connection: Connection,
    selection: Selection,
}

impl ServerSession {
    fn start(stream: std::net::TcpStream, machines: Arc<Vec<Arc<Machine>>>) -> Result<Self> {
        let selection: Selection = Arc::new(Mutex::new(None));
        let handler_selection = Arc::clone(&selection);
        let connection = Connection::spawn(stream, move |sender, message| {
            handle_message(&machines, &handler_selection, sender, message)
        })?;
        Ok(ServerSession {
            connection,
            selection,
        })
    }

    fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.connection.close();
        unselect(&self.selection);
    }
}

fn unselect(selection: &Selection) {
    if let Some((machine, id)) = selection.lock().take() {
        machine.unsubscribe_actions(id);
    }
}

fn handle_message(
    machines: &[Arc<Machine>],
    selection: &Selection,
    sender: &Arc<MessageSender>,
    message: Message,
) -> Result<()> {
    match message {
        Message::Ping {
            response: false,
            id,
        } => sender.send(&Message::Ping { response: true, id }),
        Message::Ping { response: true, .. } => Ok(()),
        Message::RequestAvailableMachines => {
            let names = machines.iter().map(|m| m.name()).collect();
            sender.send(&Message::AvailableMachines(names))
        }
        Message::SelectMachine(name) => {
            let machine = machines
                .iter()
                .find(|m| m.name() == name)
                .cloned()
                .ok_or_else(|| TicklineError::Protocol(format!("No machine named {name:?}")))?;
            unselect(selection);
            sender.send(&Message::Name(machine.name()))?;

            let forward = Arc::downgrade(sender);
            let id = machine.subscribe_actions(move |action| {
                let Some(sender) = forward.upgrade() else {
                    return;
                };
                if sender.is_closed() {
                    return;
                }
                let frame = Message::CoreAction(action.clone())
                    .encode()
                    .map(|payload| encode_frame(&payload));
                if let Err(e) = frame.and_then(|frame| sender.send_frame(&frame)) {
                    tracing::debug!("dropping mirrored action: {e}");
                    sender.close();
                }
            });
            tracing::info!(machine = %name, "remote selected machine");
            *selection.lock() = Some((machine, id));
            Ok(())
        }
        Message::CoreRequest(request) => {
            let guard = selection.lock();
            let (machine, _) = guard
                .as_ref()
                .ok_or_else(|| TicklineError::Protocol("Request before machine selection".into()))?;
            machine.push_request(request);
            Ok(())
        }
        other => Err(TicklineError::Protocol(format!(
            "Unexpected {:?} from client",
            other.tag()
        ))),
    }
}

/// TCP server relaying machine actions and requests
pub struct MachineServer {
    addr: SocketAddr,
    quit: Arc<AtomicBool>,
    sessions: Arc<Mutex<Vec<ServerSession>>>,
    accept: Mutex<Option<JoinHandle<()>>>,
}

impl MachineServer {
    /// Listen on `addr` and serve `machines` until [`shutdown`](Self::shutdown)
    pub fn bind(addr: impl ToSocketAddrs, machines: Vec<Arc<Machine>>) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let quit = Arc::new(AtomicBool::new(false));
        let sessions = Arc::new(Mutex::new(Vec::new()));
        let machines = Arc::new(machines);

        let accept = {
            let quit = Arc::clone(&quit);
            let sessions = Arc::clone(&sessions);
            thread::Builder::new()
                .name("tickline-server".into())
                .spawn(move || accept_loop(listener, machines, sessions, quit))?
        };
        tracing::info!(%addr, "machine server listening");

        Ok(MachineServer {
            addr,
            quit,
            sessions,
            accept: Mutex::new(Some(accept)),
        })
    }

    /// Bound address, including the OS-assigned port
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of live client sessions
    pub fn session_count(&self) -> usize {
        let mut sessions = self.sessions.lock();
        sessions.retain(|s| !s.is_closed());
        sessions.len()
    }

    /// Stop accepting, close every session and join the accept thread.
    /// Idempotent.
    pub fn shutdown(&self) {
        self.quit.store(true, Ordering::Release);
        if let Some(handle) = self.accept.lock().take() {
            if handle.join().is_err() {
                tracing::error!("server accept thread panicked");
            }
        }
        let sessions = std::mem::take(&mut *self.sessions.lock());
        drop(sessions);
    }
}

impl Drop for MachineServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for MachineServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineServer")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

fn accept_loop(
    listener: TcpListener,
    machines: Arc<Vec<Arc<Machine>>>,
    sessions: Arc<Mutex<Vec<ServerSession>>>,
    quit: Arc<AtomicBool>,
) {
    while !quit.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => match ServerSession::start(stream, Arc::clone(&machines)) {
                Ok(session) => {
                    tracing::info!(%peer, "client connected");
                    let mut sessions = sessions.lock();
                    sessions.retain(|s| !s.is_closed());
                    sessions.push(session);
                }
                Err(e) => tracing::warn!(%peer, "rejecting client: {e}"),
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                tracing::warn!("accept failed: {e}");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}
