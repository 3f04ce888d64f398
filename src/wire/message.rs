//! Binary message codec
//!
//! A message is one tag byte followed by little-endian fields. Strings and
//! byte arrays carry a `u32` length; optional arrays a leading presence byte.

use crate::hardware::NativeSample;
use crate::machine::{KindTag, Request};
use crate::timeline::{ActionKind, Blob, CoreAction};
use crate::{Result, TicklineError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::io::{self, Cursor, Read};

/// Leading byte of every message
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum MessageTag {
    /// Liveness ping or its answer
    Ping = 1,
    /// Name of the selected machine
    Name = 2,
    /// Client picks a machine to mirror
    SelectMachine = 3,
    /// Client asks for the machine list
    RequestAvailableMachines = 4,
    /// Server's machine list
    AvailableMachines = 5,
    /// Mirrored action
    CoreAction = 6,
    /// Relayed request
    CoreRequest = 7,
}

/// Decoded protocol message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Ping; the answer echoes `id` with `response` set
    Ping {
        /// Whether this answers a ping
        response: bool,
        /// Correlation id
        id: u64,
    },
    /// Name of the selected machine
    Name(String),
    /// Select a machine by name
    SelectMachine(String),
    /// Ask for the machine list
    RequestAvailableMachines,
    /// Machine names
    AvailableMachines(Vec<String>),
    /// Action applied on the host
    CoreAction(CoreAction),
    /// Request to queue on the host
    CoreRequest(Request),
}

impl Message {
    /// Tag of this message
    pub fn tag(&self) -> MessageTag {
        match self {
            Message::Ping { .. } => MessageTag::Ping,
            Message::Name(_) => MessageTag::Name,
            Message::SelectMachine(_) => MessageTag::SelectMachine,
            Message::RequestAvailableMachines => MessageTag::RequestAvailableMachines,
            Message::AvailableMachines(_) => MessageTag::AvailableMachines,
            Message::CoreAction(_) => MessageTag::CoreAction,
            Message::CoreRequest(_) => MessageTag::CoreRequest,
        }
    }

    /// Serialize to an unframed payload. Fails only if a lazy blob cannot be
    /// materialized.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.tag() as u8];
        match self {
            Message::Ping { response, id } => {
                out.push(u8::from(*response));
                out.write_u64::<LittleEndian>(*id)?;
            }
            Message::Name(name) | Message::SelectMachine(name) => write_string(&mut out, name)?,
            Message::RequestAvailableMachines => {}
            Message::AvailableMachines(names) => {
                out.write_u32::<LittleEndian>(len_u32(names.len())?)?;
                for name in names {
                    write_string(&mut out, name)?;
                }
            }
            Message::CoreAction(action) => write_action(&mut out, action)?,
            Message::CoreRequest(request) => write_request(&mut out, request)?,
        }
        Ok(out)
    }

    /// Parse an unframed payload. Unknown tags, truncation and trailing bytes
    /// are protocol errors.
    pub fn decode(payload: &[u8]) -> Result<Message> {
        let mut cursor = Cursor::new(payload);
        let message = read_message(&mut cursor).map_err(protocol)?;
        if (cursor.position() as usize) != payload.len() {
            return Err(TicklineError::Protocol(format!(
                "{} trailing bytes after {:?}",
                payload.len() - cursor.position() as usize,
                message.tag()
            )));
        }
        Ok(message)
    }
}

fn protocol(e: io::Error) -> TicklineError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => TicklineError::Protocol("Truncated message".into()),
        _ => TicklineError::Protocol(e.to_string()),
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| TicklineError::Protocol(format!("Field too long: {len}")))
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    out.write_u32::<LittleEndian>(len_u32(bytes.len())?)?;
    out.extend_from_slice(bytes);
    Ok(())
}

fn write_string(out: &mut Vec<u8>, text: &str) -> Result<()> {
    write_bytes(out, text.as_bytes())
}

fn write_blob(out: &mut Vec<u8>, blob: Option<&Blob>) -> Result<()> {
    match blob {
        Some(blob) => {
            out.push(1);
            write_bytes(out, blob.get()?)
        }
        None => {
            out.push(0);
            Ok(())
        }
    }
}

fn write_samples(out: &mut Vec<u8>, samples: Option<&Vec<NativeSample>>) -> Result<()> {
    match samples {
        Some(samples) => {
            out.push(1);
            out.write_u32::<LittleEndian>(len_u32(samples.len())?)?;
            for sample in samples {
                out.write_u16::<LittleEndian>(*sample)?;
            }
        }
        None => out.push(0),
    }
    Ok(())
}

fn write_action(out: &mut Vec<u8>, action: &CoreAction) -> Result<()> {
    out.push(action.kind.tag() as u8);
    out.write_u64::<LittleEndian>(action.ticks)?;
    match &action.kind {
        ActionKind::KeyPress { key, down } => {
            out.push(*key);
            out.push(u8::from(*down));
        }
        ActionKind::Reset => {}
        ActionKind::LoadDisc { drive, media } => {
            out.push(*drive);
            write_blob(out, media.as_ref())?;
        }
        ActionKind::LoadTape { media } => write_blob(out, media.as_ref())?,
        ActionKind::RunUntil {
            stop_ticks,
            samples,
        } => {
            out.write_u64::<LittleEndian>(*stop_ticks)?;
            write_samples(out, samples.as_ref())?;
        }
        ActionKind::CoreVersion { version } => out.write_u32::<LittleEndian>(*version)?,
        ActionKind::LoadCoreState { state } => write_bytes(out, state.get()?)?,
        ActionKind::CreateSnapshot { id }
        | ActionKind::DeleteSnapshot { id }
        | ActionKind::RevertToSnapshot { id } => out.write_u64::<LittleEndian>(*id)?,
    }
    Ok(())
}

fn write_request(out: &mut Vec<u8>, request: &Request) -> Result<()> {
    out.push(request.tag() as u8);
    match request {
        Request::KeyPress { key, down } => {
            out.push(*key);
            out.push(u8::from(*down));
        }
        Request::Reset => {}
        Request::LoadDisc { drive, media } => {
            out.push(*drive);
            write_blob(out, media.as_ref())?;
        }
        Request::LoadTape { media } => write_blob(out, media.as_ref())?,
        Request::RunUntil { stop_ticks } => out.write_u64::<LittleEndian>(*stop_ticks)?,
        Request::CoreVersion { version } => out.write_u32::<LittleEndian>(*version)?,
        Request::LoadCoreState { state } => write_bytes(out, state.get()?)?,
    }
    Ok(())
}

fn read_bool(input: &mut Cursor<&[u8]>) -> io::Result<bool> {
    match input.read_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(invalid(format!("Invalid boolean {other}"))),
    }
}

fn read_bytes(input: &mut Cursor<&[u8]>) -> io::Result<Vec<u8>> {
    let len = input.read_u32::<LittleEndian>()? as usize;
    let remaining = input.get_ref().len() - input.position() as usize;
    if len > remaining {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "array longer than message",
        ));
    }
    let mut bytes = vec![0u8; len];
    input.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn read_string(input: &mut Cursor<&[u8]>) -> io::Result<String> {
    String::from_utf8(read_bytes(input)?).map_err(|e| invalid(format!("Invalid UTF-8: {e}")))
}

fn read_blob(input: &mut Cursor<&[u8]>) -> io::Result<Option<Blob>> {
    if read_bool(input)? {
        Ok(Some(Blob::new(read_bytes(input)?)))
    } else {
        Ok(None)
    }
}

fn read_samples(input: &mut Cursor<&[u8]>) -> io::Result<Option<Vec<NativeSample>>> {
    if !read_bool(input)? {
        return Ok(None);
    }
    let count = input.read_u32::<LittleEndian>()? as usize;
    let remaining = input.get_ref().len() - input.position() as usize;
    if count.saturating_mul(2) > remaining {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "sample array longer than message",
        ));
    }
    (0..count)
        .map(|_| input.read_u16::<LittleEndian>())
        .collect::<io::Result<Vec<_>>>()
        .map(Some)
}

fn read_kind_tag(input: &mut Cursor<&[u8]>) -> io::Result<KindTag> {
    let raw = input.read_u8()?;
    KindTag::from_u8(raw).ok_or_else(|| invalid(format!("Unknown action kind {raw}")))
}

fn read_action(input: &mut Cursor<&[u8]>) -> io::Result<CoreAction> {
    let tag = read_kind_tag(input)?;
    let ticks = input.read_u64::<LittleEndian>()?;
    let kind = match tag {
        KindTag::KeyPress => ActionKind::KeyPress {
            key: input.read_u8()?,
            down: read_bool(input)?,
        },
        KindTag::Reset => ActionKind::Reset,
        KindTag::LoadDisc => ActionKind::LoadDisc {
            drive: input.read_u8()?,
            media: read_blob(input)?,
        },
        KindTag::LoadTape => ActionKind::LoadTape {
            media: read_blob(input)?,
        },
        KindTag::RunUntil => ActionKind::RunUntil {
            stop_ticks: input.read_u64::<LittleEndian>()?,
            samples: read_samples(input)?,
        },
        KindTag::CoreVersion => ActionKind::CoreVersion {
            version: input.read_u32::<LittleEndian>()?,
        },
        KindTag::LoadCoreState => ActionKind::LoadCoreState {
            state: Blob::new(read_bytes(input)?),
        },
        KindTag::CreateSnapshot => ActionKind::CreateSnapshot {
            id: input.read_u64::<LittleEndian>()?,
        },
        KindTag::DeleteSnapshot => ActionKind::DeleteSnapshot {
            id: input.read_u64::<LittleEndian>()?,
        },
        KindTag::RevertToSnapshot => ActionKind::RevertToSnapshot {
            id: input.read_u64::<LittleEndian>()?,
        },
    };
    Ok(CoreAction::new(ticks, kind))
}

fn read_request(input: &mut Cursor<&[u8]>) -> io::Result<Request> {
    let tag = read_kind_tag(input)?;
    let request = match tag {
        KindTag::KeyPress => Request::KeyPress {
            key: input.read_u8()?,
            down: read_bool(input)?,
        },
        KindTag::Reset => Request::Reset,
        KindTag::LoadDisc => Request::LoadDisc {
            drive: input.read_u8()?,
            media: read_blob(input)?,
        },
        KindTag::LoadTape => Request::LoadTape {
            media: read_blob(input)?,
        },
        KindTag::RunUntil => Request::RunUntil {
            stop_ticks: input.read_u64::<LittleEndian>()?,
        },
        KindTag::CoreVersion => Request::CoreVersion {
            version: input.read_u32::<LittleEndian>()?,
        },
        KindTag::LoadCoreState => Request::LoadCoreState {
            state: Blob::new(read_bytes(input)?),
        },
        KindTag::CreateSnapshot | KindTag::DeleteSnapshot | KindTag::RevertToSnapshot => {
            return Err(invalid(format!("{tag:?} cannot be requested")));
        }
    };
    Ok(request)
}

fn read_message(input: &mut Cursor<&[u8]>) -> io::Result<Message> {
    let raw = input.read_u8()?;
    let tag = MessageTag::from_u8(raw).ok_or_else(|| invalid(format!("Unknown message tag {raw}")))?;
    let message = match tag {
        MessageTag::Ping => Message::Ping {
            response: read_bool(input)?,
            id: input.read_u64::<LittleEndian>()?,
        },
        MessageTag::Name => Message::Name(read_string(input)?),
        MessageTag::SelectMachine => Message::SelectMachine(read_string(input)?),
        MessageTag::RequestAvailableMachines => Message::RequestAvailableMachines,
        MessageTag::AvailableMachines => {
            let count = input.read_u32::<LittleEndian>()?;
            let names = (0..count)
                .map(|_| read_string(input))
                .collect::<io::Result<Vec<_>>>()?;
            Message::AvailableMachines(names)
        }
        MessageTag::CoreAction => Message::CoreAction(read_action(input)?),
        MessageTag::CoreRequest => Message::CoreRequest(read_request(input)?),
    };
    Ok(message)
}
