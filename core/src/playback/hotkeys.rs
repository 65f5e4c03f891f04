//! Playback hotkeys
//!
//! Edge detection for the seven playback hotkeys. Each hotkey is bound to a
//! key combo (every key must be held) and tracks press, release, double-press
//! and key-repeat edges against a caller-supplied clock, so transitions stay
//! deterministic under test.
//!
//! The companion editor can inject presses remotely: a momentary override is
//! consumed by the next update, while overrides for held hotkeys (fast- and
//! slow-forward) stay active until the editor clears them.

use std::time::{Duration, Instant};

use crate::host::GameHost;
use crate::settings::TasSettings;

const DOUBLE_PRESS_WINDOW: Duration = Duration::from_millis(200);
const REPEAT_DELAY: Duration = Duration::from_millis(500);

/// Identifies a hotkey on the companion wire. The discriminants are part of
/// the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HotkeyId {
    StartStop = 0,
    Restart = 1,
    FastForward = 2,
    FastForwardLabel = 3,
    FrameAdvance = 4,
    SlowForward = 5,
    PauseResume = 6,
}

impl HotkeyId {
    pub const ALL: [HotkeyId; 7] = [
        HotkeyId::StartStop,
        HotkeyId::Restart,
        HotkeyId::FastForward,
        HotkeyId::FastForwardLabel,
        HotkeyId::FrameAdvance,
        HotkeyId::SlowForward,
        HotkeyId::PauseResume,
    ];

    pub fn from_u8(value: u8) -> Option<HotkeyId> {
        HotkeyId::ALL.into_iter().find(|id| *id as u8 == value)
    }
}

/// A single hotkey with its bound combo and edge state.
#[derive(Debug, Clone)]
pub struct Hotkey {
    id: HotkeyId,
    keys: Vec<String>,
    /// Held hotkeys act while down instead of triggering on the press edge.
    held: bool,
    override_check: bool,
    check: bool,
    last_check: bool,
    pressed: bool,
    released: bool,
    double_pressed: bool,
    repeated: bool,
    double_press_timeout: Option<Instant>,
    repeat_timeout: Option<Instant>,
}

impl Hotkey {
    fn new(id: HotkeyId, keys: Vec<String>, held: bool) -> Hotkey {
        Hotkey {
            id,
            keys,
            held,
            override_check: false,
            check: false,
            last_check: false,
            pressed: false,
            released: false,
            double_pressed: false,
            repeated: false,
            double_press_timeout: None,
            repeat_timeout: None,
        }
    }

    pub fn id(&self) -> HotkeyId {
        self.id
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Whether the combo is currently active (keys down or overridden).
    pub fn check(&self) -> bool {
        self.check
    }

    /// True on the update where the combo went from up to down.
    pub fn pressed(&self) -> bool {
        self.pressed
    }

    /// True on the update where the combo went from down to up.
    pub fn released(&self) -> bool {
        self.released
    }

    /// True when this press follows the previous one inside the double-press
    /// window.
    pub fn double_pressed(&self) -> bool {
        self.double_pressed
    }

    /// True on the initial press and again while held past the repeat delay.
    pub fn repeated(&self) -> bool {
        self.repeated
    }

    fn update(&mut self, host: &dyn GameHost, now: Instant) {
        self.last_check = self.check;

        if self.override_check {
            self.check = true;
            if !self.held {
                self.override_check = false;
            }
        } else {
            self.check = !self.keys.is_empty() && self.keys.iter().all(|key| host.is_key_down(key));
        }

        self.pressed = !self.last_check && self.check;
        self.released = self.last_check && !self.check;

        if self.pressed {
            self.double_pressed = self.double_press_timeout.is_some_and(|t| now < t);
            self.double_press_timeout = if self.double_pressed {
                None
            } else {
                Some(now + DOUBLE_PRESS_WINDOW)
            };
            self.repeated = true;
            self.repeat_timeout = Some(now + REPEAT_DELAY);
        } else if self.check {
            self.double_pressed = false;
            self.repeated = self.repeat_timeout.is_some_and(|t| now >= t);
        } else {
            self.double_pressed = false;
            self.repeated = false;
            self.repeat_timeout = None;
        }
    }
}

/// All playback hotkeys, indexed by [`HotkeyId`].
#[derive(Debug, Clone)]
pub struct Hotkeys {
    hotkeys: [Hotkey; 7],
}

impl Hotkeys {
    /// Builds the hotkey set from configured bindings.
    pub fn from_settings(settings: &TasSettings) -> Hotkeys {
        let bindings = &settings.bindings;
        let hotkey = |id: HotkeyId, keys: &Vec<String>, held: bool| {
            Hotkey::new(id, keys.clone(), held)
        };
        Hotkeys {
            hotkeys: [
                hotkey(HotkeyId::StartStop, &bindings.start_stop, false),
                hotkey(HotkeyId::Restart, &bindings.restart, false),
                hotkey(HotkeyId::FastForward, &bindings.fast_forward, true),
                hotkey(HotkeyId::FastForwardLabel, &bindings.fast_forward_label, false),
                hotkey(HotkeyId::FrameAdvance, &bindings.frame_advance, false),
                hotkey(HotkeyId::SlowForward, &bindings.slow_forward, true),
                hotkey(HotkeyId::PauseResume, &bindings.pause_resume, false),
            ],
        }
    }

    /// Recomputes every hotkey's edges from the host keyboard state.
    pub fn update(&mut self, host: &dyn GameHost, now: Instant) {
        for hotkey in &mut self.hotkeys {
            hotkey.update(host, now);
        }
    }

    pub fn get(&self, id: HotkeyId) -> &Hotkey {
        &self.hotkeys[id as usize]
    }

    /// Activates or clears a remote press from the companion editor.
    pub fn set_override(&mut self, id: HotkeyId, active: bool) {
        self.hotkeys[id as usize].override_check = active;
    }

    /// Clears every remote override, e.g. when playback stops.
    pub fn release_all_overrides(&mut self) {
        for hotkey in &mut self.hotkeys {
            hotkey.override_check = false;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hotkey> {
        self.hotkeys.iter()
    }
}

#[cfg(test)]
mod tests {
    use crate::host::ManualHost;

    use super::*;

    fn hotkeys_with(id: HotkeyId, keys: &[&str]) -> Hotkeys {
        let mut settings = TasSettings::default();
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        match id {
            HotkeyId::StartStop => settings.bindings.start_stop = keys,
            HotkeyId::Restart => settings.bindings.restart = keys,
            HotkeyId::FastForward => settings.bindings.fast_forward = keys,
            HotkeyId::FastForwardLabel => settings.bindings.fast_forward_label = keys,
            HotkeyId::FrameAdvance => settings.bindings.frame_advance = keys,
            HotkeyId::SlowForward => settings.bindings.slow_forward = keys,
            HotkeyId::PauseResume => settings.bindings.pause_resume = keys,
        }
        Hotkeys::from_settings(&settings)
    }

    #[test]
    fn combo_requires_every_key() {
        let mut hotkeys = hotkeys_with(HotkeyId::FastForwardLabel, &["RightAlt", "RightShift"]);
        let mut host = ManualHost::new();
        let t0 = Instant::now();

        host.press_key("RightAlt");
        hotkeys.update(&host, t0);
        assert!(!hotkeys.get(HotkeyId::FastForwardLabel).check());

        host.press_key("RightShift");
        hotkeys.update(&host, t0 + Duration::from_millis(10));
        let hotkey = hotkeys.get(HotkeyId::FastForwardLabel);
        assert!(hotkey.check());
        assert!(hotkey.pressed());
    }

    #[test]
    fn pressed_and_released_fire_on_edges_only() {
        let mut hotkeys = hotkeys_with(HotkeyId::StartStop, &["RightControl"]);
        let mut host = ManualHost::new();
        let t0 = Instant::now();

        host.press_key("RightControl");
        hotkeys.update(&host, t0);
        assert!(hotkeys.get(HotkeyId::StartStop).pressed());

        hotkeys.update(&host, t0 + Duration::from_millis(10));
        let hotkey = hotkeys.get(HotkeyId::StartStop);
        assert!(!hotkey.pressed());
        assert!(hotkey.check());

        host.release_key("RightControl");
        hotkeys.update(&host, t0 + Duration::from_millis(20));
        let hotkey = hotkeys.get(HotkeyId::StartStop);
        assert!(hotkey.released());
        assert!(!hotkey.check());
    }

    #[test]
    fn double_press_requires_the_window() {
        let mut hotkeys = hotkeys_with(HotkeyId::StartStop, &["RightControl"]);
        let mut host = ManualHost::new();
        let t0 = Instant::now();

        host.press_key("RightControl");
        hotkeys.update(&host, t0);
        assert!(!hotkeys.get(HotkeyId::StartStop).double_pressed());

        host.release_key("RightControl");
        hotkeys.update(&host, t0 + Duration::from_millis(50));
        host.press_key("RightControl");
        hotkeys.update(&host, t0 + Duration::from_millis(100));
        assert!(hotkeys.get(HotkeyId::StartStop).double_pressed());

        // The double press consumed the window; the next press starts over.
        host.release_key("RightControl");
        hotkeys.update(&host, t0 + Duration::from_millis(120));
        host.press_key("RightControl");
        hotkeys.update(&host, t0 + Duration::from_millis(150));
        assert!(!hotkeys.get(HotkeyId::StartStop).double_pressed());
    }

    #[test]
    fn repeat_fires_on_press_then_after_the_delay() {
        let mut hotkeys = hotkeys_with(HotkeyId::FrameAdvance, &["OpenBracket"]);
        let mut host = ManualHost::new();
        let t0 = Instant::now();

        host.press_key("OpenBracket");
        hotkeys.update(&host, t0);
        assert!(hotkeys.get(HotkeyId::FrameAdvance).repeated());

        hotkeys.update(&host, t0 + Duration::from_millis(100));
        assert!(!hotkeys.get(HotkeyId::FrameAdvance).repeated());

        hotkeys.update(&host, t0 + Duration::from_millis(600));
        assert!(hotkeys.get(HotkeyId::FrameAdvance).repeated());
    }

    #[test]
    fn momentary_override_is_consumed_by_one_update() {
        let mut hotkeys = hotkeys_with(HotkeyId::StartStop, &["RightControl"]);
        let host = ManualHost::new();
        let t0 = Instant::now();

        hotkeys.set_override(HotkeyId::StartStop, true);
        hotkeys.update(&host, t0);
        assert!(hotkeys.get(HotkeyId::StartStop).pressed());

        hotkeys.update(&host, t0 + Duration::from_millis(10));
        let hotkey = hotkeys.get(HotkeyId::StartStop);
        assert!(!hotkey.check());
        assert!(hotkey.released());
    }

    #[test]
    fn held_override_persists_until_cleared() {
        let mut hotkeys = hotkeys_with(HotkeyId::FastForward, &["RightShift"]);
        let host = ManualHost::new();
        let t0 = Instant::now();

        hotkeys.set_override(HotkeyId::FastForward, true);
        hotkeys.update(&host, t0);
        hotkeys.update(&host, t0 + Duration::from_millis(10));
        assert!(hotkeys.get(HotkeyId::FastForward).check());

        hotkeys.set_override(HotkeyId::FastForward, false);
        hotkeys.update(&host, t0 + Duration::from_millis(20));
        assert!(hotkeys.get(HotkeyId::FastForward).released());
    }

    #[test]
    fn release_all_overrides_stops_held_hotkeys() {
        let mut hotkeys = hotkeys_with(HotkeyId::SlowForward, &["Backslash"]);
        let host = ManualHost::new();
        let t0 = Instant::now();

        hotkeys.set_override(HotkeyId::SlowForward, true);
        hotkeys.update(&host, t0);
        assert!(hotkeys.get(HotkeyId::SlowForward).check());

        hotkeys.release_all_overrides();
        hotkeys.update(&host, t0 + Duration::from_millis(10));
        assert!(!hotkeys.get(HotkeyId::SlowForward).check());
    }

    #[test]
    fn empty_binding_never_triggers() {
        let mut hotkeys = hotkeys_with(HotkeyId::Restart, &[]);
        let host = ManualHost::new();
        hotkeys.update(&host, Instant::now());
        assert!(!hotkeys.get(HotkeyId::Restart).check());
    }

    #[test]
    fn hotkey_ids_round_trip_through_the_wire_value() {
        for id in HotkeyId::ALL {
            assert_eq!(HotkeyId::from_u8(id as u8), Some(id));
        }
        assert_eq!(HotkeyId::from_u8(7), None);
    }
}
