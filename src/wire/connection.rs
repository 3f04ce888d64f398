//! Message-oriented TCP connection
//!
//! Outgoing messages are framed and written under a lock; a reader thread
//! polls the socket with a short timeout, reassembles frames and hands each
//! decoded [`Message`] to a handler. A handler error closes the connection.

use super::framing::{encode_frame, FrameDecoder};
use super::message::Message;
use crate::{Result, TicklineError};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Reader poll interval
const POLL_INTERVAL: Duration = Duration::from_millis(20);

const READ_CHUNK: usize = 4096;

/// Write half of a connection, shareable with subscribers on other threads
#[derive(Debug)]
pub struct MessageSender {
    stream: Mutex<TcpStream>,
    closed: AtomicBool,
}

impl MessageSender {
    fn new(stream: TcpStream) -> Self {
        MessageSender {
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        }
    }

    /// Encode, frame and write one message
    pub fn send(&self, message: &Message) -> Result<()> {
        let frame = encode_frame(&message.encode()?);
        self.send_frame(&frame)
    }

    /// Write an already framed message
    pub fn send_frame(&self, frame: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(TicklineError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection closed",
            )));
        }
        let mut stream = self.stream.lock();
        stream.write_all(frame)?;
        stream.flush()?;
        Ok(())
    }

    /// Whether [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Shut the socket down. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.stream.lock().shutdown(Shutdown::Both) {
                tracing::debug!("socket shutdown: {e}");
            }
        }
    }
}

/// A framed connection with its reader thread
pub struct Connection {
    sender: Arc<MessageSender>,
    peer: Option<SocketAddr>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Start reading from `stream`, calling `handler` for every message
    pub fn spawn<H>(stream: TcpStream, handler: H) -> Result<Self>
    where
        H: FnMut(&Arc<MessageSender>, Message) -> Result<()> + Send + 'static,
    {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        let read_half = stream.try_clone()?;
        read_half.set_read_timeout(Some(POLL_INTERVAL))?;

        let sender = Arc::new(MessageSender::new(stream));
        let reader_sender = Arc::clone(&sender);
        let reader = thread::Builder::new()
            .name("tickline-wire".into())
            .spawn(move || read_loop(read_half, reader_sender, handler))?;

        tracing::debug!(?peer, "connection opened");
        Ok(Connection {
            sender,
            peer,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Write half
    pub fn sender(&self) -> &Arc<MessageSender> {
        &self.sender
    }

    /// Send one message
    pub fn send(&self, message: &Message) -> Result<()> {
        self.sender.send(message)
    }

    /// Remote address, if known
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Whether the socket was closed by either side
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Close the socket and join the reader thread. Idempotent; does not
    /// join when called from the reader thread itself.
    pub fn close(&self) {
        self.sender.close();
        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!(peer = ?self.peer, "wire reader panicked");
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn read_loop<H>(mut stream: TcpStream, sender: Arc<MessageSender>, mut handler: H)
where
    H: FnMut(&Arc<MessageSender>, Message) -> Result<()>,
{
    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; READ_CHUNK];
    while !sender.is_closed() {
        let read = match stream.read(&mut chunk) {
            Ok(0) => {
                tracing::debug!("peer closed connection");
                break;
            }
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                if !sender.is_closed() {
                    tracing::warn!("wire read failed: {e}");
                }
                break;
            }
        };

        let handled = decoder.push(&chunk[..read]).and_then(|payloads| {
            payloads
                .iter()
                .try_for_each(|payload| handler(&sender, Message::decode(payload)?))
        });
        if let Err(e) = handled {
            tracing::warn!("closing connection: {e}");
            break;
        }
    }
    sender.close();
}
