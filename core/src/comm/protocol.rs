//! Companion editor message contract
//!
//! Typed messages exchanged with the companion editor, serialized as
//! length-framed binary. The message ids and payload layouts are part of the
//! protocol; both sides must agree on them exactly.
//!
//! # Wire Format
//!
//! ```text
//! [length:u32][id:u8][payload...]
//! ```
//!
//! `length` counts the id byte plus the payload. All integers are little
//! endian; strings are a `u32` byte length followed by UTF-8; booleans are a
//! single byte with zero meaning false.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

use crate::input::commands::AutoCompleteEntry;
use crate::playback::hotkeys::HotkeyId;

/// Frame header size: the `u32` length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Upper bound on a single frame body, as a guard against reading garbage
/// lengths off the transport.
pub const MAX_FRAME_LEN: u32 = 4 * 1024 * 1024;

/// Wire ids. Id 0 is reserved and never sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    // Editor -> core
    FilePath = 1,
    Hotkey = 2,
    RequestGameData = 3,
    RequestCommandAutoComplete = 4,

    // Core -> editor
    State = 5,
    Reset = 6,
    CommandList = 7,
    CommandAutoComplete = 8,
    GameDataResponse = 9,
    CurrentBindings = 10,
}

impl MessageId {
    pub fn from_u8(value: u8) -> Option<MessageId> {
        match value {
            1 => Some(MessageId::FilePath),
            2 => Some(MessageId::Hotkey),
            3 => Some(MessageId::RequestGameData),
            4 => Some(MessageId::RequestCommandAutoComplete),
            5 => Some(MessageId::State),
            6 => Some(MessageId::Reset),
            7 => Some(MessageId::CommandList),
            8 => Some(MessageId::CommandAutoComplete),
            9 => Some(MessageId::GameDataResponse),
            10 => Some(MessageId::CurrentBindings),
            _ => None,
        }
    }
}

/// Game-data query kinds, shared by request and response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GameDataKind {
    ConsoleCommand = 0,
    SettingValue = 1,
    CommandHash = 2,
}

impl GameDataKind {
    pub fn from_u8(value: u8) -> Option<GameDataKind> {
        match value {
            0 => Some(GameDataKind::ConsoleCommand),
            1 => Some(GameDataKind::SettingValue),
            2 => Some(GameDataKind::CommandHash),
            _ => None,
        }
    }
}

/// A game-data query from the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameDataRequest {
    /// Console command reproducing the current position; `simple` omits the
    /// exact coordinates.
    ConsoleCommand { simple: bool },
    /// Current value of a named setting.
    SettingValue { name: String },
    /// Hash identifying an auto-complete context, so stale batches can be
    /// discarded editor-side.
    CommandHash {
        name: String,
        args: Vec<String>,
        file_path: String,
        file_line: u32,
    },
}

impl GameDataRequest {
    pub fn kind(&self) -> GameDataKind {
        match self {
            GameDataRequest::ConsoleCommand { .. } => GameDataKind::ConsoleCommand,
            GameDataRequest::SettingValue { .. } => GameDataKind::SettingValue,
            GameDataRequest::CommandHash { .. } => GameDataKind::CommandHash,
        }
    }
}

/// Answer to a [`GameDataRequest`], tagged with the same kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameDataResponse {
    ConsoleCommand(String),
    SettingValue(String),
    CommandHash(i32),
}

impl GameDataResponse {
    pub fn kind(&self) -> GameDataKind {
        match self {
            GameDataResponse::ConsoleCommand(_) => GameDataKind::ConsoleCommand,
            GameDataResponse::SettingValue(_) => GameDataKind::SettingValue,
            GameDataResponse::CommandHash(_) => GameDataKind::CommandHash,
        }
    }
}

/// One command in the advertised command list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandListEntry {
    pub name: String,
    /// Whether the editor can request argument completion for it.
    pub has_auto_complete: bool,
}

/// One completion candidate on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireAutoCompleteEntry {
    pub name: String,
    /// Text the editor prepends before `name`.
    pub prefix: String,
    /// Whether the argument is complete after inserting this entry.
    pub is_done: bool,
    /// Whether another argument follows.
    pub has_next: bool,
}

impl From<AutoCompleteEntry> for WireAutoCompleteEntry {
    fn from(entry: AutoCompleteEntry) -> Self {
        Self {
            name: entry.name,
            prefix: entry.prefix,
            is_done: entry.is_done,
            has_next: entry.has_next,
        }
    }
}

/// One hotkey binding in the advertised binding set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingEntry {
    pub id: HotkeyId,
    pub keys: Vec<String>,
}

/// Playback status snapshot pushed to the editor every meta tick.
#[derive(Debug, Clone, PartialEq)]
pub struct StudioState {
    /// 0-based root-file line of the input just played, -1 when none.
    pub current_line: i32,
    /// Progress text shown beside the line, e.g. `3 / 10`.
    pub current_line_suffix: String,
    pub current_frame_in_tas: u32,
    pub total_frames: u32,
    /// Root-file line of the save-state marker, -1 when none.
    pub save_state_line: i32,
    pub running: bool,
    pub paused: bool,
    pub game_info: String,
    pub level_name: String,
    pub chapter_time: String,
    pub show_subpixel_indicator: bool,
    pub subpixel_remainder: (f32, f32),
}

impl Default for StudioState {
    fn default() -> Self {
        Self {
            current_line: -1,
            current_line_suffix: String::new(),
            current_frame_in_tas: 0,
            total_frames: 0,
            save_state_line: -1,
            running: false,
            paused: false,
            game_info: String::new(),
            level_name: String::new(),
            chapter_time: String::new(),
            show_subpixel_indicator: false,
            subpixel_remainder: (0.0, 0.0),
        }
    }
}

/// Every message either side can send.
#[derive(Debug, Clone, PartialEq)]
pub enum StudioMessage {
    // Editor -> core
    /// Sets the active script path.
    FilePath(String),
    /// Remote press or release of a playback hotkey.
    Hotkey { id: HotkeyId, released: bool },
    RequestGameData(GameDataRequest),
    RequestCommandAutoComplete {
        hash: i32,
        name: String,
        args: Vec<String>,
        file_path: String,
        file_line: u32,
    },

    // Core -> editor
    State(StudioState),
    /// Tells the editor to drop all cached state about this session.
    Reset,
    CommandList(Vec<CommandListEntry>),
    CommandAutoComplete {
        hash: i32,
        entries: Vec<WireAutoCompleteEntry>,
        is_done: bool,
    },
    GameDataResponse(GameDataResponse),
    CurrentBindings(Vec<BindingEntry>),
}

impl StudioMessage {
    pub fn id(&self) -> MessageId {
        match self {
            StudioMessage::FilePath(_) => MessageId::FilePath,
            StudioMessage::Hotkey { .. } => MessageId::Hotkey,
            StudioMessage::RequestGameData(_) => MessageId::RequestGameData,
            StudioMessage::RequestCommandAutoComplete { .. } => {
                MessageId::RequestCommandAutoComplete
            }
            StudioMessage::State(_) => MessageId::State,
            StudioMessage::Reset => MessageId::Reset,
            StudioMessage::CommandList(_) => MessageId::CommandList,
            StudioMessage::CommandAutoComplete { .. } => MessageId::CommandAutoComplete,
            StudioMessage::GameDataResponse(_) => MessageId::GameDataResponse,
            StudioMessage::CurrentBindings(_) => MessageId::CurrentBindings,
        }
    }

    /// Serializes the message as a complete frame, header included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = vec![self.id() as u8];
        self.encode_payload(&mut body);

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        frame
    }

    /// Deserializes a complete frame, header included.
    pub fn from_bytes(bytes: &[u8]) -> Result<StudioMessage, ProtocolError> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::TooShort);
        }
        let length = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if length > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge { length });
        }
        let end = FRAME_HEADER_SIZE + length as usize;
        if bytes.len() < end {
            return Err(ProtocolError::IncompleteFrame {
                expected: length as usize,
                got: bytes.len() - FRAME_HEADER_SIZE,
            });
        }
        StudioMessage::from_frame_body(&bytes[FRAME_HEADER_SIZE..end])
    }

    /// Deserializes a frame body (`[id][payload]`) whose length prefix has
    /// already been consumed by the transport.
    pub fn from_frame_body(body: &[u8]) -> Result<StudioMessage, ProtocolError> {
        let (&id, payload) = body.split_first().ok_or(ProtocolError::TooShort)?;
        let id = MessageId::from_u8(id).ok_or(ProtocolError::UnknownMessageId(id))?;
        let mut cur = Cursor::new(payload);

        let message = match id {
            MessageId::FilePath => StudioMessage::FilePath(read_string(&mut cur)?),
            MessageId::Hotkey => {
                let raw = cur.read_u8()?;
                let id = HotkeyId::from_u8(raw).ok_or(ProtocolError::UnknownHotkeyId(raw))?;
                let released = read_bool(&mut cur)?;
                StudioMessage::Hotkey { id, released }
            }
            MessageId::RequestGameData => {
                let raw = cur.read_u8()?;
                let kind =
                    GameDataKind::from_u8(raw).ok_or(ProtocolError::UnknownGameDataKind(raw))?;
                let request = match kind {
                    GameDataKind::ConsoleCommand => GameDataRequest::ConsoleCommand {
                        simple: read_bool(&mut cur)?,
                    },
                    GameDataKind::SettingValue => GameDataRequest::SettingValue {
                        name: read_string(&mut cur)?,
                    },
                    GameDataKind::CommandHash => GameDataRequest::CommandHash {
                        name: read_string(&mut cur)?,
                        args: read_string_list(&mut cur)?,
                        file_path: read_string(&mut cur)?,
                        file_line: cur.read_u32::<LittleEndian>()?,
                    },
                };
                StudioMessage::RequestGameData(request)
            }
            MessageId::RequestCommandAutoComplete => StudioMessage::RequestCommandAutoComplete {
                hash: cur.read_i32::<LittleEndian>()?,
                name: read_string(&mut cur)?,
                args: read_string_list(&mut cur)?,
                file_path: read_string(&mut cur)?,
                file_line: cur.read_u32::<LittleEndian>()?,
            },
            MessageId::State => StudioMessage::State(StudioState {
                current_line: cur.read_i32::<LittleEndian>()?,
                current_line_suffix: read_string(&mut cur)?,
                current_frame_in_tas: cur.read_u32::<LittleEndian>()?,
                total_frames: cur.read_u32::<LittleEndian>()?,
                save_state_line: cur.read_i32::<LittleEndian>()?,
                running: read_bool(&mut cur)?,
                paused: read_bool(&mut cur)?,
                game_info: read_string(&mut cur)?,
                level_name: read_string(&mut cur)?,
                chapter_time: read_string(&mut cur)?,
                show_subpixel_indicator: read_bool(&mut cur)?,
                subpixel_remainder: (
                    cur.read_f32::<LittleEndian>()?,
                    cur.read_f32::<LittleEndian>()?,
                ),
            }),
            MessageId::Reset => StudioMessage::Reset,
            MessageId::CommandList => {
                let count = cur.read_u32::<LittleEndian>()? as usize;
                let mut commands = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    commands.push(CommandListEntry {
                        name: read_string(&mut cur)?,
                        has_auto_complete: read_bool(&mut cur)?,
                    });
                }
                StudioMessage::CommandList(commands)
            }
            MessageId::CommandAutoComplete => {
                let hash = cur.read_i32::<LittleEndian>()?;
                let count = cur.read_u32::<LittleEndian>()? as usize;
                let mut entries = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    entries.push(WireAutoCompleteEntry {
                        name: read_string(&mut cur)?,
                        prefix: read_string(&mut cur)?,
                        is_done: read_bool(&mut cur)?,
                        has_next: read_bool(&mut cur)?,
                    });
                }
                let is_done = read_bool(&mut cur)?;
                StudioMessage::CommandAutoComplete {
                    hash,
                    entries,
                    is_done,
                }
            }
            MessageId::GameDataResponse => {
                let raw = cur.read_u8()?;
                let kind =
                    GameDataKind::from_u8(raw).ok_or(ProtocolError::UnknownGameDataKind(raw))?;
                let response = match kind {
                    GameDataKind::ConsoleCommand => {
                        GameDataResponse::ConsoleCommand(read_string(&mut cur)?)
                    }
                    GameDataKind::SettingValue => {
                        GameDataResponse::SettingValue(read_string(&mut cur)?)
                    }
                    GameDataKind::CommandHash => {
                        GameDataResponse::CommandHash(cur.read_i32::<LittleEndian>()?)
                    }
                };
                StudioMessage::GameDataResponse(response)
            }
            MessageId::CurrentBindings => {
                let count = cur.read_u32::<LittleEndian>()? as usize;
                let mut bindings = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    let raw = cur.read_u8()?;
                    let id = HotkeyId::from_u8(raw).ok_or(ProtocolError::UnknownHotkeyId(raw))?;
                    let keys = read_string_list(&mut cur)?;
                    bindings.push(BindingEntry { id, keys });
                }
                StudioMessage::CurrentBindings(bindings)
            }
        };
        Ok(message)
    }

    fn encode_payload(&self, out: &mut Vec<u8>) {
        match self {
            StudioMessage::FilePath(path) => put_string(out, path),
            StudioMessage::Hotkey { id, released } => {
                out.push(*id as u8);
                put_bool(out, *released);
            }
            StudioMessage::RequestGameData(request) => {
                out.push(request.kind() as u8);
                match request {
                    GameDataRequest::ConsoleCommand { simple } => put_bool(out, *simple),
                    GameDataRequest::SettingValue { name } => put_string(out, name),
                    GameDataRequest::CommandHash {
                        name,
                        args,
                        file_path,
                        file_line,
                    } => {
                        put_string(out, name);
                        put_string_list(out, args);
                        put_string(out, file_path);
                        put_u32(out, *file_line);
                    }
                }
            }
            StudioMessage::RequestCommandAutoComplete {
                hash,
                name,
                args,
                file_path,
                file_line,
            } => {
                put_i32(out, *hash);
                put_string(out, name);
                put_string_list(out, args);
                put_string(out, file_path);
                put_u32(out, *file_line);
            }
            StudioMessage::State(state) => {
                put_i32(out, state.current_line);
                put_string(out, &state.current_line_suffix);
                put_u32(out, state.current_frame_in_tas);
                put_u32(out, state.total_frames);
                put_i32(out, state.save_state_line);
                put_bool(out, state.running);
                put_bool(out, state.paused);
                put_string(out, &state.game_info);
                put_string(out, &state.level_name);
                put_string(out, &state.chapter_time);
                put_bool(out, state.show_subpixel_indicator);
                put_f32(out, state.subpixel_remainder.0);
                put_f32(out, state.subpixel_remainder.1);
            }
            StudioMessage::Reset => {}
            StudioMessage::CommandList(commands) => {
                put_u32(out, commands.len() as u32);
                for command in commands {
                    put_string(out, &command.name);
                    put_bool(out, command.has_auto_complete);
                }
            }
            StudioMessage::CommandAutoComplete {
                hash,
                entries,
                is_done,
            } => {
                put_i32(out, *hash);
                put_u32(out, entries.len() as u32);
                for entry in entries {
                    put_string(out, &entry.name);
                    put_string(out, &entry.prefix);
                    put_bool(out, entry.is_done);
                    put_bool(out, entry.has_next);
                }
                put_bool(out, *is_done);
            }
            StudioMessage::GameDataResponse(response) => {
                out.push(response.kind() as u8);
                match response {
                    GameDataResponse::ConsoleCommand(text) => put_string(out, text),
                    GameDataResponse::SettingValue(value) => put_string(out, value),
                    GameDataResponse::CommandHash(hash) => put_i32(out, *hash),
                }
            }
            StudioMessage::CurrentBindings(bindings) => {
                put_u32(out, bindings.len() as u32);
                for binding in bindings {
                    out.push(binding.id as u8);
                    put_string_list(out, &binding.keys);
                }
            }
        }
    }
}

/// Errors decoding a frame off the companion channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("message too short for a frame header")]
    TooShort,
    #[error("frame length {length} exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge { length: u32 },
    #[error("incomplete frame: expected {expected} body bytes, got {got}")]
    IncompleteFrame { expected: usize, got: usize },
    #[error("unknown message id {0}")]
    UnknownMessageId(u8),
    #[error("unknown game data kind {0}")]
    UnknownGameDataKind(u8),
    #[error("unknown hotkey id {0}")]
    UnknownHotkeyId(u8),
    #[error("payload truncated")]
    Truncated,
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,
}

impl From<std::io::Error> for ProtocolError {
    fn from(_: std::io::Error) -> Self {
        ProtocolError::Truncated
    }
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_f32(out: &mut Vec<u8>, value: f32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_bool(out: &mut Vec<u8>, value: bool) {
    out.push(value as u8);
}

fn put_string(out: &mut Vec<u8>, text: &str) {
    put_u32(out, text.len() as u32);
    out.extend_from_slice(text.as_bytes());
}

fn put_string_list(out: &mut Vec<u8>, items: &[String]) {
    put_u32(out, items.len() as u32);
    for item in items {
        put_string(out, item);
    }
}

fn read_bool(cur: &mut Cursor<&[u8]>) -> Result<bool, ProtocolError> {
    Ok(cur.read_u8()? != 0)
}

fn read_string(cur: &mut Cursor<&[u8]>) -> Result<String, ProtocolError> {
    let len = cur.read_u32::<LittleEndian>()? as usize;
    let remaining = cur.get_ref().len().saturating_sub(cur.position() as usize);
    if len > remaining {
        return Err(ProtocolError::Truncated);
    }
    let mut buf = vec![0u8; len];
    cur.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| ProtocolError::InvalidUtf8)
}

fn read_string_list(cur: &mut Cursor<&[u8]>) -> Result<Vec<String>, ProtocolError> {
    let count = cur.read_u32::<LittleEndian>()? as usize;
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        items.push(read_string(cur)?);
    }
    Ok(items)
}
