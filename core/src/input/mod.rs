//! Input-script parsing
//!
//! Turns a script file into the tables playback runs from: an expanded
//! per-frame input timeline, a per-frame command schedule, fast-forward and
//! label markers, and a content checksum.
//!
//! # Script format
//!
//! One instruction per line:
//!
//! ```text
//! 10,R,J       frame line: 10 frames of right + jump
//! ***10        fast-forward marker, speed 10; ***! also takes a save state
//! #respawn     comment, usable as a jump label
//! Read,sub,10  command line, resolved against the command registry
//! ```
//!
//! # Module Structure
//!
//! - `actions`: the action bitmask and its character encoding
//! - `frame`: one parsed frame line, with canonical re-emission
//! - `commands`: command registry, dispatch and the built-in commands
//! - `controller`: the parsed-script aggregate and playback cursor
//! - `watcher`: script file watching feeding the reload flag

pub mod actions;
pub mod commands;
pub mod controller;
pub mod frame;
pub mod watcher;

// Re-export the parsing surface
pub use actions::Actions;
pub use commands::{
    AutoCompleteEntry, AutoCompleteProvider, AutoCompleteRequest, AutoCompleteSource, Command,
    CommandInfo, CommandLine, CommandRegistry, ExecuteTiming, ParseContext, RuntimeContext,
};
pub use controller::{Comment, FastForward, InputController, DEFAULT_FAST_FORWARD_SPEED};
pub use frame::{InputFrame, MAX_FRAMES};
pub use watcher::ScriptWatcher;
