//! Text command grammar of the timeline log
//!
//! One command per line, `tag:arg,arg,...`. Parsing uses `nom`; formatting
//! goes through `Display`, and the two are exact inverses for every command
//! the writer produces.

use crate::{Result, TicklineError};
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{char, u32 as dec_u32, u64 as dec_u64, u8 as dec_u8};
use nom::combinator::{all_consuming, map, rest, success, value};
use nom::sequence::{preceded, separated_pair, tuple};
use nom::IResult;
use std::fmt;

/// Reference from an event command to binary data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobRef {
    /// No data (e.g. an ejected drive)
    None,
    /// A `blob` command by id
    Id(u64),
    /// Legacy `$id` indirection to an `arg` command
    Arg(u64),
}

/// One line of a timeline log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Machine display name
    Name(String),
    /// Key press or release event
    Key {
        /// Node id
        id: u64,
        /// Tick
        ticks: u64,
        /// Key code
        key: u8,
        /// Pressed when `true`
        down: bool,
    },
    /// Reset event
    Reset {
        /// Node id
        id: u64,
        /// Tick
        ticks: u64,
    },
    /// Disc insert or eject event
    Disc {
        /// Node id
        id: u64,
        /// Tick
        ticks: u64,
        /// Drive index
        drive: u8,
        /// Disc image
        media: BlobRef,
    },
    /// Tape insert or eject event
    Tape {
        /// Node id
        id: u64,
        /// Tick
        ticks: u64,
        /// Tape image
        media: BlobRef,
    },
    /// Whole-state load event
    State {
        /// Node id
        id: u64,
        /// Tick
        ticks: u64,
        /// Serialized core state
        state: BlobRef,
    },
    /// Core version switch event
    Version {
        /// Node id
        id: u64,
        /// Tick
        ticks: u64,
        /// New version
        version: u32,
    },
    /// Run segment event
    Run {
        /// Node id
        id: u64,
        /// Start tick
        ticks: u64,
        /// Stop tick
        stop: u64,
    },
    /// Bookmark event
    Bookmark {
        /// Node id
        id: u64,
        /// Tick
        ticks: u64,
        /// Written automatically
        system: bool,
        /// Core version of the state
        version: u32,
        /// Serialized core state
        state: BlobRef,
        /// Screen contents
        screen: BlobRef,
    },
    /// Remove one node, reparenting its children
    Delete(u64),
    /// Remove a node and its subtree
    DeleteBranch(u64),
    /// Move the current pointer; `None` is the root
    Current(Option<u64>),
    /// Hex-encoded binary data
    Blob {
        /// Blob id
        id: u64,
        /// Lowercase hex payload
        hex: String,
    },
    /// Batch of newline-joined commands, hex-encoded and optionally
    /// LZ4-compressed
    Compound {
        /// Payload is LZ4 compressed (size-prepended)
        compressed: bool,
        /// Hex payload
        hex: String,
    },
    /// Legacy inline argument referenced as `$id`
    Arg {
        /// Argument id
        id: u64,
        /// Hex payload
        hex: String,
    },
}

type Parsed<'a, T> = IResult<&'a str, T>;

fn next<'a, T>(
    parser: impl FnMut(&'a str) -> Parsed<'a, T>,
) -> impl FnMut(&'a str) -> Parsed<'a, T> {
    preceded(char(','), parser)
}

fn flag(input: &str) -> Parsed<'_, bool> {
    alt((value(false, char('0')), value(true, char('1'))))(input)
}

fn hex_text(input: &str) -> Parsed<'_, String> {
    map(take_while(|c: char| c.is_ascii_hexdigit()), str::to_owned)(input)
}

fn blob_ref(input: &str) -> Parsed<'_, BlobRef> {
    alt((
        map(preceded(char('$'), dec_u64), BlobRef::Arg),
        map(dec_u64, BlobRef::Id),
        success(BlobRef::None),
    ))(input)
}

fn head(input: &str) -> Parsed<'_, (&str, &str)> {
    separated_pair(take_while1(|c: char| c.is_ascii_lowercase()), char(':'), rest)(input)
}

fn args<'a>(tag_name: &str, input: &'a str) -> Parsed<'a, Command> {
    match tag_name {
        "name" => map(rest, |text: &str| Command::Name(text.to_owned()))(input),
        "key" => map(
            tuple((dec_u64, next(dec_u64), next(dec_u8), next(flag))),
            |(id, ticks, key, down)| Command::Key {
                id,
                ticks,
                key,
                down,
            },
        )(input),
        "reset" => map(tuple((dec_u64, next(dec_u64))), |(id, ticks)| {
            Command::Reset { id, ticks }
        })(input),
        "disc" => map(
            tuple((dec_u64, next(dec_u64), next(dec_u8), next(blob_ref))),
            |(id, ticks, drive, media)| Command::Disc {
                id,
                ticks,
                drive,
                media,
            },
        )(input),
        "tape" => map(
            tuple((dec_u64, next(dec_u64), next(blob_ref))),
            |(id, ticks, media)| Command::Tape { id, ticks, media },
        )(input),
        "state" => map(
            tuple((dec_u64, next(dec_u64), next(blob_ref))),
            |(id, ticks, state)| Command::State { id, ticks, state },
        )(input),
        "version" => map(
            tuple((dec_u64, next(dec_u64), next(dec_u32))),
            |(id, ticks, version)| Command::Version { id, ticks, version },
        )(input),
        "run" => map(
            tuple((dec_u64, next(dec_u64), next(dec_u64))),
            |(id, ticks, stop)| Command::Run { id, ticks, stop },
        )(input),
        "bookmark" => map(
            tuple((
                dec_u64,
                next(dec_u64),
                next(flag),
                next(dec_u32),
                next(blob_ref),
                next(blob_ref),
            )),
            |(id, ticks, system, version, state, screen)| Command::Bookmark {
                id,
                ticks,
                system,
                version,
                state,
                screen,
            },
        )(input),
        "delete" => map(dec_u64, Command::Delete)(input),
        "deletebranch" => map(dec_u64, Command::DeleteBranch)(input),
        "current" => alt((
            value(Command::Current(None), tag("root")),
            map(dec_u64, |id| Command::Current(Some(id))),
        ))(input),
        "blob" => map(tuple((dec_u64, next(hex_text))), |(id, hex)| Command::Blob {
            id,
            hex,
        })(input),
        "compound" => map(tuple((flag, next(hex_text))), |(compressed, hex)| {
            Command::Compound { compressed, hex }
        })(input),
        "arg" => map(tuple((dec_u64, next(hex_text))), |(id, hex)| Command::Arg {
            id,
            hex,
        })(input),
        _ => Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        ))),
    }
}

impl Command {
    /// Parse one line (without its terminator)
    pub fn parse(line: &str) -> Result<Command> {
        let (_, (tag_name, arguments)) = head(line).map_err(|_| {
            TicklineError::FileFormat(format!("Missing command separator in {line:?}"))
        })?;
        match all_consuming(|i| args(tag_name, i))(arguments) {
            Ok((_, command)) => Ok(command),
            Err(nom::Err::Failure(e)) if e.code == nom::error::ErrorKind::Tag => Err(
                TicklineError::FileFormat(format!("Unknown command {tag_name:?}")),
            ),
            Err(_) => Err(TicklineError::FileFormat(format!(
                "Malformed {tag_name} command: {line:?}"
            ))),
        }
    }

    /// Node id of an event command
    pub fn event_id(&self) -> Option<u64> {
        match self {
            Command::Key { id, .. }
            | Command::Reset { id, .. }
            | Command::Disc { id, .. }
            | Command::Tape { id, .. }
            | Command::State { id, .. }
            | Command::Version { id, .. }
            | Command::Run { id, .. }
            | Command::Bookmark { id, .. } => Some(*id),
            Command::Name(_)
            | Command::Delete(_)
            | Command::DeleteBranch(_)
            | Command::Current(_)
            | Command::Blob { .. }
            | Command::Compound { .. }
            | Command::Arg { .. } => None,
        }
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobRef::None => Ok(()),
            BlobRef::Id(id) => write!(f, "{id}"),
            BlobRef::Arg(id) => write!(f, "${id}"),
        }
    }
}

fn bit(value: bool) -> u8 {
    u8::from(value)
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Name(name) => write!(f, "name:{name}"),
            Command::Key {
                id,
                ticks,
                key,
                down,
            } => write!(f, "key:{id},{ticks},{key},{}", bit(*down)),
            Command::Reset { id, ticks } => write!(f, "reset:{id},{ticks}"),
            Command::Disc {
                id,
                ticks,
                drive,
                media,
            } => write!(f, "disc:{id},{ticks},{drive},{media}"),
            Command::Tape { id, ticks, media } => write!(f, "tape:{id},{ticks},{media}"),
            Command::State { id, ticks, state } => write!(f, "state:{id},{ticks},{state}"),
            Command::Version { id, ticks, version } => {
                write!(f, "version:{id},{ticks},{version}")
            }
            Command::Run { id, ticks, stop } => write!(f, "run:{id},{ticks},{stop}"),
            Command::Bookmark {
                id,
                ticks,
                system,
                version,
                state,
                screen,
            } => write!(
                f,
                "bookmark:{id},{ticks},{},{version},{state},{screen}",
                bit(*system)
            ),
            Command::Delete(id) => write!(f, "delete:{id}"),
            Command::DeleteBranch(id) => write!(f, "deletebranch:{id}"),
            Command::Current(None) => f.write_str("current:root"),
            Command::Current(Some(id)) => write!(f, "current:{id}"),
            Command::Blob { id, hex } => write!(f, "blob:{id},{hex}"),
            Command::Compound { compressed, hex } => {
                write!(f, "compound:{},{hex}", bit(*compressed))
            }
            Command::Arg { id, hex } => write!(f, "arg:{id},{hex}"),
        }
    }
}

/// Pack commands into one compound command
pub fn encode_compound(commands: &[Command], compress: bool) -> Command {
    let text = commands
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    let payload = if compress {
        lz4_flex::compress_prepend_size(text.as_bytes())
    } else {
        text.into_bytes()
    };
    Command::Compound {
        compressed: compress,
        hex: hex::encode(payload),
    }
}

/// Unpack a compound payload into its commands
pub fn decode_compound(compressed: bool, hex_payload: &str) -> Result<Vec<Command>> {
    let raw = hex::decode(hex_payload)
        .map_err(|e| TicklineError::FileFormat(format!("Bad compound payload: {e}")))?;
    let bytes = if compressed {
        lz4_flex::decompress_size_prepended(&raw)
            .map_err(|e| TicklineError::FileFormat(format!("Bad compound compression: {e}")))?
    } else {
        raw
    };
    let text = String::from_utf8(bytes)
        .map_err(|e| TicklineError::FileFormat(format!("Compound is not UTF-8: {e}")))?;
    text.lines()
        .filter(|line| !line.is_empty())
        .map(Command::parse)
        .collect()
}
