//! Binary wire protocol
//!
//! Mirrors a machine's action stream to remote observers and relays their
//! requests back. Messages are tag-prefixed little-endian records carried in
//! byte-stuffed frames over TCP.

pub mod connection;
pub mod framing;
pub mod message;
mod remote;
mod server;

pub use connection::{Connection, MessageSender};
pub use framing::{encode_frame, FrameDecoder, FRAME_END, FRAME_ESCAPE};
pub use message::{Message, MessageTag};
pub use remote::RemoteMachine;
pub use server::MachineServer;
