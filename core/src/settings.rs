//! Playback settings (TOML)
//!
//! User-configurable playback behavior and hotkey bindings, persisted as a
//! TOML file. The companion editor reads and writes a closed subset of these
//! through [`SettingId`], with the same range clamping applied on every
//! write path.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const MIN_FAST_FORWARD_SPEED: f32 = 2.0;
pub const MAX_FAST_FORWARD_SPEED: f32 = 30.0;
pub const MIN_SLOW_FORWARD_SPEED: f32 = 0.01;
pub const MAX_SLOW_FORWARD_SPEED: f32 = 0.9;
pub const MAX_SUBPIXEL_DECIMALS: u32 = 12;

/// Playback configuration.
///
/// Every field has a serde default so partial files load cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TasSettings {
    /// Master switch for the whole playback core (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Try to connect to the companion editor at startup (default: true)
    #[serde(default = "default_true")]
    pub attempt_connect_studio: bool,
    /// Pause instead of stopping when a draft script runs out (default: false)
    #[serde(default)]
    pub pause_on_end_draft: bool,
    /// Show the sub-pixel position indicator (default: true)
    #[serde(default = "default_true")]
    pub show_subpixel_indicator: bool,
    /// Decimal places of the sub-pixel indicator (default: 2, range: 0-12)
    #[serde(default = "default_subpixel_decimals")]
    pub subpixel_indicator_decimals: u32,
    /// Manual fast-forward speed multiplier (default: 10, range: 2-30)
    #[serde(default = "default_fast_forward_speed")]
    pub fast_forward_speed: f32,
    /// Manual slow-forward speed multiplier (default: 0.1, range: 0.01-0.9)
    #[serde(default = "default_slow_forward_speed")]
    pub slow_forward_speed: f32,
    /// Hotkey bindings
    #[serde(default)]
    pub bindings: HotkeyBindings,
}

/// Hotkey bindings. Each list is a key combo: every named key must be held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotkeyBindings {
    #[serde(default = "default_start_stop_binding")]
    pub start_stop: Vec<String>,
    #[serde(default = "default_restart_binding")]
    pub restart: Vec<String>,
    #[serde(default = "default_fast_forward_binding")]
    pub fast_forward: Vec<String>,
    #[serde(default = "default_fast_forward_label_binding")]
    pub fast_forward_label: Vec<String>,
    #[serde(default = "default_frame_advance_binding")]
    pub frame_advance: Vec<String>,
    #[serde(default = "default_pause_resume_binding")]
    pub pause_resume: Vec<String>,
    #[serde(default = "default_slow_forward_binding")]
    pub slow_forward: Vec<String>,
}

impl Default for TasSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            attempt_connect_studio: default_true(),
            pause_on_end_draft: false,
            show_subpixel_indicator: default_true(),
            subpixel_indicator_decimals: default_subpixel_decimals(),
            fast_forward_speed: default_fast_forward_speed(),
            slow_forward_speed: default_slow_forward_speed(),
            bindings: HotkeyBindings::default(),
        }
    }
}

impl Default for HotkeyBindings {
    fn default() -> Self {
        Self {
            start_stop: default_start_stop_binding(),
            restart: default_restart_binding(),
            fast_forward: default_fast_forward_binding(),
            fast_forward_label: default_fast_forward_label_binding(),
            frame_advance: default_frame_advance_binding(),
            pause_resume: default_pause_resume_binding(),
            slow_forward: default_slow_forward_binding(),
        }
    }
}

impl TasSettings {
    /// Loads settings from `path`. A missing or unparsable file yields
    /// defaults; out-of-range values are clamped.
    pub fn load(path: &Path) -> TasSettings {
        let mut settings: TasSettings = std::fs::read_to_string(path)
            .ok()
            .and_then(|content| toml::from_str(&content).ok())
            .unwrap_or_default();
        settings.clamp_ranges();
        settings
    }

    /// Saves settings as pretty TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Forces every ranged field back into its documented range.
    pub fn clamp_ranges(&mut self) {
        self.fast_forward_speed = self
            .fast_forward_speed
            .clamp(MIN_FAST_FORWARD_SPEED, MAX_FAST_FORWARD_SPEED);
        self.slow_forward_speed = self
            .slow_forward_speed
            .clamp(MIN_SLOW_FORWARD_SPEED, MAX_SLOW_FORWARD_SPEED);
        self.subpixel_indicator_decimals =
            self.subpixel_indicator_decimals.min(MAX_SUBPIXEL_DECIMALS);
    }

    /// Current value of a setting, in display form.
    pub fn get(&self, id: SettingId) -> String {
        match id {
            SettingId::Enabled => self.enabled.to_string(),
            SettingId::AttemptConnectStudio => self.attempt_connect_studio.to_string(),
            SettingId::PauseOnEndDraft => self.pause_on_end_draft.to_string(),
            SettingId::ShowSubpixelIndicator => self.show_subpixel_indicator.to_string(),
            SettingId::SubpixelIndicatorDecimals => self.subpixel_indicator_decimals.to_string(),
            SettingId::FastForwardSpeed => self.fast_forward_speed.to_string(),
            SettingId::SlowForwardSpeed => self.slow_forward_speed.to_string(),
        }
    }

    /// Parses and applies a setting value, clamping ranged fields.
    pub fn set(&mut self, id: SettingId, value: &str) -> Result<(), SettingsError> {
        let invalid = || SettingsError::InvalidValue {
            name: id.name(),
            value: value.to_string(),
        };
        match id {
            SettingId::Enabled => self.enabled = value.parse().map_err(|_| invalid())?,
            SettingId::AttemptConnectStudio => {
                self.attempt_connect_studio = value.parse().map_err(|_| invalid())?;
            }
            SettingId::PauseOnEndDraft => {
                self.pause_on_end_draft = value.parse().map_err(|_| invalid())?;
            }
            SettingId::ShowSubpixelIndicator => {
                self.show_subpixel_indicator = value.parse().map_err(|_| invalid())?;
            }
            SettingId::SubpixelIndicatorDecimals => {
                self.subpixel_indicator_decimals = value.parse().map_err(|_| invalid())?;
            }
            SettingId::FastForwardSpeed => {
                self.fast_forward_speed = value.parse().map_err(|_| invalid())?;
            }
            SettingId::SlowForwardSpeed => {
                self.slow_forward_speed = value.parse().map_err(|_| invalid())?;
            }
        }
        self.clamp_ranges();
        Ok(())
    }

    /// Warnings for binding problems. Bad bindings never fail loading; a
    /// hotkey with an unknown key name just cannot trigger from the keyboard.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for (name, keys) in self.bindings.iter_named() {
            if keys.is_empty() {
                warnings.push(format!("Hotkey '{name}' has no keys bound"));
                continue;
            }
            for key in keys {
                if !is_known_key_name(key) {
                    warnings.push(format!("Unknown key name '{key}' for hotkey '{name}'"));
                }
            }
        }
        warnings
    }
}

impl HotkeyBindings {
    /// Bindings with their settings-file names, in wire-id order.
    pub fn iter_named(&self) -> [(&'static str, &Vec<String>); 7] {
        [
            ("start_stop", &self.start_stop),
            ("restart", &self.restart),
            ("fast_forward", &self.fast_forward),
            ("fast_forward_label", &self.fast_forward_label),
            ("frame_advance", &self.frame_advance),
            ("slow_forward", &self.slow_forward),
            ("pause_resume", &self.pause_resume),
        ]
    }
}

/// Closed set of settings the companion editor may read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingId {
    Enabled,
    AttemptConnectStudio,
    PauseOnEndDraft,
    ShowSubpixelIndicator,
    SubpixelIndicatorDecimals,
    FastForwardSpeed,
    SlowForwardSpeed,
}

impl SettingId {
    pub const ALL: [SettingId; 7] = [
        SettingId::Enabled,
        SettingId::AttemptConnectStudio,
        SettingId::PauseOnEndDraft,
        SettingId::ShowSubpixelIndicator,
        SettingId::SubpixelIndicatorDecimals,
        SettingId::FastForwardSpeed,
        SettingId::SlowForwardSpeed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SettingId::Enabled => "Enabled",
            SettingId::AttemptConnectStudio => "AttemptConnectStudio",
            SettingId::PauseOnEndDraft => "PauseOnEndDraft",
            SettingId::ShowSubpixelIndicator => "ShowSubpixelIndicator",
            SettingId::SubpixelIndicatorDecimals => "SubpixelIndicatorDecimals",
            SettingId::FastForwardSpeed => "FastForwardSpeed",
            SettingId::SlowForwardSpeed => "SlowForwardSpeed",
        }
    }

    pub fn from_name(name: &str) -> Option<SettingId> {
        SettingId::ALL
            .into_iter()
            .find(|id| id.name().eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("unknown setting '{0}'")]
    UnknownSetting(String),
    #[error("invalid value '{value}' for setting {name}")]
    InvalidValue { name: &'static str, value: String },
}

fn default_true() -> bool {
    true
}
fn default_subpixel_decimals() -> u32 {
    2
}
fn default_fast_forward_speed() -> f32 {
    10.0
}
fn default_slow_forward_speed() -> f32 {
    0.1
}

fn default_start_stop_binding() -> Vec<String> {
    vec!["RightControl".to_string()]
}
fn default_restart_binding() -> Vec<String> {
    vec!["Equals".to_string()]
}
fn default_fast_forward_binding() -> Vec<String> {
    vec!["RightShift".to_string()]
}
fn default_fast_forward_label_binding() -> Vec<String> {
    vec!["RightAlt".to_string(), "RightShift".to_string()]
}
fn default_frame_advance_binding() -> Vec<String> {
    vec!["OpenBracket".to_string()]
}
fn default_pause_resume_binding() -> Vec<String> {
    vec!["CloseBracket".to_string()]
}
fn default_slow_forward_binding() -> Vec<String> {
    vec!["Backslash".to_string()]
}

/// Key names a binding may reference. Single characters bind themselves.
fn is_known_key_name(name: &str) -> bool {
    const NAMED_KEYS: &[&str] = &[
        "LeftControl",
        "RightControl",
        "LeftShift",
        "RightShift",
        "LeftAlt",
        "RightAlt",
        "Space",
        "Enter",
        "Tab",
        "Backspace",
        "Escape",
        "Minus",
        "Equals",
        "OpenBracket",
        "CloseBracket",
        "Backslash",
        "Semicolon",
        "Quote",
        "Comma",
        "Period",
        "Slash",
        "BackQuote",
        "Up",
        "Down",
        "Left",
        "Right",
        "Home",
        "End",
        "PageUp",
        "PageDown",
        "Insert",
        "Delete",
    ];

    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return c.is_ascii_alphanumeric();
    }
    if let Some(digits) = name.strip_prefix('F') {
        if let Ok(n) = digits.parse::<u32>() {
            return (1..=15).contains(&n);
        }
    }
    NAMED_KEYS.contains(&name)
}
