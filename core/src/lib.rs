//! TAS playback core
//!
//! Frame-precise input-script playback for deterministic games. A script is a
//! plain-text file of frame lines, commands and markers; this crate parses it
//! into an expanded timeline and replays it against a host engine one
//! simulated frame at a time, with studio-style controls layered on top:
//! pause, frame advance, fast/slow forward, label jumps and a companion
//! editor channel.
//!
//! # Architecture
//!
//! - [`TasSession`] - One playback instance owning everything below
//! - [`InputController`] - The parsed script: timeline, commands, markers
//! - [`PlaybackManager`] - The playback state machine driving the host
//! - [`GameHost`] - Trait the embedding engine implements
//! - [`StudioServer`] - Companion editor channel over localhost TCP
//! - [`TasTracer`] - Determinism traces compared across runs

pub mod abort;
pub mod comm;
pub mod host;
pub mod input;
pub mod playback;
pub mod session;
pub mod settings;
pub mod tracer;

// Re-export the embedding surface
pub use host::{GameHost, ManualHost};
pub use session::TasSession;

// Re-export parsing types
pub use input::{
    Actions, Command, CommandInfo, CommandRegistry, DEFAULT_FAST_FORWARD_SPEED, FastForward,
    InputController, InputFrame, MAX_FRAMES,
};

// Re-export playback types
pub use playback::{
    Hotkey, HotkeyId, Hotkeys, LifecycleHooks, PlaybackContext, PlaybackManager, State,
};

// Re-export companion channel types
pub use comm::{
    DEFAULT_STUDIO_PORT, ProtocolError, StudioAction, StudioMessage, StudioServer, StudioState,
};

// Re-export settings and tracing
pub use abort::AbortChannel;
pub use settings::{SettingId, SettingsError, TasSettings};
pub use tracer::{Mismatch, TasTracer};
