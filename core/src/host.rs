//! Host engine interface
//!
//! The playback core never talks to an engine directly. The host implements
//! [`GameHost`] and the core drives it: one simulated frame per accepted
//! input, plus the queries the status payload and hotkeys need. Everything
//! except frame stepping has a neutral default so a host only implements
//! what it supports.

use anyhow::Result;
use hashbrown::HashSet;

use crate::input::frame::InputFrame;

/// Extension points the host engine implements for the playback core.
pub trait GameHost {
    /// Advances the simulation by exactly one frame fed with `input`.
    fn step_frame(&mut self, input: &InputFrame) -> Result<()>;

    /// Whether a loading transition is in progress. Playback suspends
    /// entirely while this is true.
    fn is_loading(&self) -> bool {
        false
    }

    /// Applies a fixed simulation framerate requested by the script.
    fn set_framerate(&mut self, _fps: f32) {}

    /// `Some(scale)` forces the engine time scale; `None` hands it back.
    fn override_time_scale(&mut self, _scale: Option<f32>) {}

    /// Advisory speed multiplier for this tick. Hosts that cannot run
    /// faster than realtime may ignore it.
    fn apply_playback_speed(&mut self, _speed: f32) {}

    /// Whether the named physical key is currently down.
    fn is_key_down(&self, _key: &str) -> bool {
        false
    }

    /// Console command that reproduces the current position, shown in the
    /// companion editor. `simple` omits the exact coordinates.
    fn console_command(&self, _simple: bool) -> String {
        String::new()
    }

    /// Freeform game-state text for the status payload.
    fn game_info(&self) -> String {
        String::new()
    }

    fn level_name(&self) -> String {
        String::new()
    }

    fn chapter_time(&self) -> String {
        String::new()
    }

    fn file_time(&self) -> String {
        String::new()
    }

    /// Sub-pixel position remainder for the indicator overlay.
    fn position_remainder(&self) -> (f32, f32) {
        (0.0, 0.0)
    }
}

/// Scriptable host for tests and headless runs. Records every stepped frame
/// and answers queries from settable fields.
#[derive(Debug, Default)]
pub struct ManualHost {
    pressed_keys: HashSet<String>,
    loading: bool,
    framerate: Option<f32>,
    time_scale: Option<f32>,
    playback_speed: f32,
    steps: Vec<String>,
    fail_next_step: Option<String>,
    game_info: String,
    level_name: String,
    chapter_time: String,
    file_time: String,
    position_remainder: (f32, f32),
}

impl ManualHost {
    pub fn new() -> Self {
        Self {
            playback_speed: 1.0,
            ..Self::default()
        }
    }

    pub fn press_key(&mut self, key: impl Into<String>) {
        self.pressed_keys.insert(key.into());
    }

    pub fn release_key(&mut self, key: &str) {
        self.pressed_keys.remove(key);
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    /// Makes the next `step_frame` fail with `message`.
    pub fn fail_next_step(&mut self, message: impl Into<String>) {
        self.fail_next_step = Some(message.into());
    }

    pub fn set_game_info(&mut self, text: impl Into<String>) {
        self.game_info = text.into();
    }

    pub fn set_level_name(&mut self, text: impl Into<String>) {
        self.level_name = text.into();
    }

    pub fn set_chapter_time(&mut self, text: impl Into<String>) {
        self.chapter_time = text.into();
    }

    pub fn set_file_time(&mut self, text: impl Into<String>) {
        self.file_time = text.into();
    }

    pub fn set_position_remainder(&mut self, remainder: (f32, f32)) {
        self.position_remainder = remainder;
    }

    /// Canonical text of every frame stepped so far, in order.
    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Last framerate the core applied, if any.
    pub fn framerate(&self) -> Option<f32> {
        self.framerate
    }

    pub fn time_scale(&self) -> Option<f32> {
        self.time_scale
    }

    pub fn playback_speed(&self) -> f32 {
        self.playback_speed
    }
}

impl GameHost for ManualHost {
    fn step_frame(&mut self, input: &InputFrame) -> Result<()> {
        if let Some(message) = self.fail_next_step.take() {
            anyhow::bail!("{message}");
        }
        self.steps.push(input.to_string());
        Ok(())
    }

    fn is_loading(&self) -> bool {
        self.loading
    }

    fn set_framerate(&mut self, fps: f32) {
        self.framerate = Some(fps);
    }

    fn override_time_scale(&mut self, scale: Option<f32>) {
        self.time_scale = scale;
    }

    fn apply_playback_speed(&mut self, speed: f32) {
        self.playback_speed = speed;
    }

    fn is_key_down(&self, key: &str) -> bool {
        self.pressed_keys.contains(key)
    }

    fn console_command(&self, simple: bool) -> String {
        if simple {
            format!("load {}", self.level_name)
        } else {
            format!(
                "load {} {:.2} {:.2}",
                self.level_name, self.position_remainder.0, self.position_remainder.1
            )
        }
    }

    fn game_info(&self) -> String {
        self.game_info.clone()
    }

    fn level_name(&self) -> String {
        self.level_name.clone()
    }

    fn chapter_time(&self) -> String {
        self.chapter_time.clone()
    }

    fn file_time(&self) -> String {
        self.file_time.clone()
    }

    fn position_remainder(&self) -> (f32, f32) {
        self.position_remainder
    }
}
