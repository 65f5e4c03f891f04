//! Companion editor channel
//!
//! Everything spoken with the companion editor: the typed message contract
//! with its length-framed binary codec, and the localhost TCP endpoint that
//! carries it. Playback state stays on the game thread; inbound traffic is
//! queued as [`StudioAction`]s and drained once per meta update.
//!
//! # Module Structure
//!
//! - `protocol`: message ids, payload layouts, encode/decode
//! - `adapter`: connection lifecycle, action queue, auto-complete workers

pub mod adapter;
pub mod protocol;

// Re-export the channel surface
pub use adapter::{DEFAULT_STUDIO_PORT, StudioAction, StudioServer};
pub use protocol::{
    BindingEntry, CommandListEntry, GameDataKind, GameDataRequest, GameDataResponse, MessageId,
    ProtocolError, StudioMessage, StudioState, WireAutoCompleteEntry,
};
