//! Playback control
//!
//! The state machine that drives a parsed script against the host, the
//! hotkeys that steer it, and the lifecycle callback registry hosts extend.
//!
//! # Module Structure
//!
//! - [`manager`]: playback state machine and per-tick procedure
//! - [`hotkeys`]: hotkey combos with press/repeat/double-press edges

pub mod hotkeys;
pub mod manager;

use std::fmt;

use crate::input::frame::InputFrame;

// Re-export playback control types
pub use hotkeys::{Hotkey, HotkeyId, Hotkeys};
pub use manager::{PlaybackContext, PlaybackManager, State};

/// Ordered lifecycle callback lists. Hosts register extensions here instead
/// of patching into the core; registration order is invocation order.
#[derive(Default)]
pub struct LifecycleHooks {
    initialize: Vec<Box<dyn FnMut()>>,
    enable_run: Vec<Box<dyn FnMut()>>,
    disable_run: Vec<Box<dyn FnMut()>>,
    parse_file_end: Vec<Box<dyn FnMut()>>,
    before_frame: Vec<Box<dyn FnMut(&InputFrame)>>,
    after_frame: Vec<Box<dyn FnMut(&InputFrame)>>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs once when the owning session initializes.
    pub fn on_initialize(&mut self, hook: impl FnMut() + 'static) {
        self.initialize.push(Box::new(hook));
    }

    /// Runs after a script is parsed and playback starts.
    pub fn on_enable_run(&mut self, hook: impl FnMut() + 'static) {
        self.enable_run.push(Box::new(hook));
    }

    /// Runs when playback stops, before the controller rewinds.
    pub fn on_disable_run(&mut self, hook: impl FnMut() + 'static) {
        self.disable_run.push(Box::new(hook));
    }

    /// Runs after every successful script parse, including hot reloads.
    pub fn on_parse_file_end(&mut self, hook: impl FnMut() + 'static) {
        self.parse_file_end.push(Box::new(hook));
    }

    /// Runs right before an input frame is fed to the host.
    pub fn on_before_frame(&mut self, hook: impl FnMut(&InputFrame) + 'static) {
        self.before_frame.push(Box::new(hook));
    }

    /// Runs after the host stepped a frame, before the cursor advances.
    pub fn on_after_frame(&mut self, hook: impl FnMut(&InputFrame) + 'static) {
        self.after_frame.push(Box::new(hook));
    }

    pub fn fire_initialize(&mut self) {
        for hook in &mut self.initialize {
            hook();
        }
    }

    pub fn fire_enable_run(&mut self) {
        for hook in &mut self.enable_run {
            hook();
        }
    }

    pub fn fire_disable_run(&mut self) {
        for hook in &mut self.disable_run {
            hook();
        }
    }

    pub fn fire_parse_file_end(&mut self) {
        for hook in &mut self.parse_file_end {
            hook();
        }
    }

    pub fn fire_before_frame(&mut self, input: &InputFrame) {
        for hook in &mut self.before_frame {
            hook(input);
        }
    }

    pub fn fire_after_frame(&mut self, input: &InputFrame) {
        for hook in &mut self.after_frame {
            hook(input);
        }
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("initialize", &self.initialize.len())
            .field("enable_run", &self.enable_run.len())
            .field("disable_run", &self.disable_run.len())
            .field("parse_file_end", &self.parse_file_end.len())
            .field("before_frame", &self.before_frame.len())
            .field("after_frame", &self.after_frame.len())
            .finish()
    }
}
