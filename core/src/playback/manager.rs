//! Playback state machine
//!
//! Drives a parsed script against the host one frame at a time. The machine
//! keeps a current and a next state so every transition takes effect on a
//! frame boundary: hotkeys and the companion editor request a state, the next
//! [`PlaybackManager::update`] commits it.
//!
//! Per frame while active: runtime commands due on the cursor's frame fire in
//! declaration order, the host steps exactly one simulated frame with the
//! cursor's input, the cursor advances, and scripted fast-forward markers are
//! checked for a break. Loading screens suspend all of it. A raised abort is
//! the single path from "corrupt or runaway script" to a safe stop.

use std::time::Instant;

use crate::host::GameHost;
use crate::input::commands::{CommandRegistry, ExecuteTiming, RuntimeContext};
use crate::input::controller::InputController;
use crate::playback::hotkeys::{HotkeyId, Hotkeys};
use crate::playback::LifecycleHooks;
use crate::settings::TasSettings;
use crate::tracer::TasTracer;

/// Playback state. `Disabled` is the initial state and reachable from every
/// other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    /// No script is active.
    #[default]
    Disabled,
    /// Playing back at the resolved speed multiplier.
    Running,
    /// Holding position with the engine clock frozen.
    Paused,
    /// Stepping a single frame, then decaying back to `Paused`.
    FrameAdvance,
    /// Playing back slowly while the slow-forward hold lasts.
    SlowForward,
}

/// Borrowed session pieces the state machine drives each tick.
pub struct PlaybackContext<'a> {
    pub host: &'a mut dyn GameHost,
    pub controller: &'a mut InputController,
    pub registry: &'a CommandRegistry,
    pub hotkeys: &'a mut Hotkeys,
    pub settings: &'a TasSettings,
    pub hooks: &'a mut LifecycleHooks,
}

#[derive(Debug)]
pub struct PlaybackManager {
    curr_state: State,
    next_state: State,
    playback_speed: f32,
    did_complete: bool,
    tracer: Option<TasTracer>,
}

impl PlaybackManager {
    pub fn new() -> Self {
        Self {
            curr_state: State::Disabled,
            next_state: State::Disabled,
            playback_speed: 1.0,
            did_complete: false,
            tracer: None,
        }
    }

    /// Attaches a determinism tracer; traces record from the next run start.
    pub fn set_tracer(&mut self, tracer: TasTracer) {
        self.tracer = Some(tracer);
    }

    pub fn tracer_mut(&mut self) -> Option<&mut TasTracer> {
        self.tracer.as_mut()
    }

    pub fn state(&self) -> State {
        self.curr_state
    }

    /// Whether a run is active in any state.
    pub fn is_running(&self) -> bool {
        self.curr_state != State::Disabled
    }

    pub fn is_paused(&self) -> bool {
        self.curr_state == State::Paused
    }

    /// Speed multiplier resolved by the last meta update.
    pub fn playback_speed(&self) -> f32 {
        self.playback_speed
    }

    /// Whether the last run reached the end of its script.
    pub fn did_complete(&self) -> bool {
        self.did_complete
    }

    /// Starts playing the controller's script from the beginning.
    pub fn enable_run(&mut self, ctx: &mut PlaybackContext<'_>) {
        if self.curr_state != State::Disabled {
            return;
        }
        log::info!("Starting TAS: {}", ctx.controller.file_path().display());

        self.did_complete = false;
        self.curr_state = State::Running;
        self.next_state = State::Running;
        self.playback_speed = 1.0;

        ctx.controller.stop();
        if ctx.controller.refresh_inputs(ctx.registry, true) {
            ctx.hooks.fire_parse_file_end();
        }
        if ctx.controller.abort.take() {
            self.disable_run(ctx);
            return;
        }

        if let Some(tracer) = &mut self.tracer {
            tracer.begin_trace(ctx.controller);
        }
        ctx.hooks.fire_enable_run();
    }

    /// Stops the active run and rewinds the controller.
    pub fn disable_run(&mut self, ctx: &mut PlaybackContext<'_>) {
        if self.curr_state == State::Disabled {
            return;
        }
        log::info!("Stopping TAS");
        ctx.hooks.fire_disable_run();

        if self.curr_state == State::Paused {
            ctx.host.override_time_scale(None);
        }
        self.curr_state = State::Disabled;
        self.next_state = State::Disabled;
        self.playback_speed = 1.0;

        ctx.hotkeys.release_all_overrides();
        ctx.controller.stop();
        if let Some(tracer) = &mut self.tracer {
            let _ = tracer.end_trace(self.did_complete);
        }
    }

    /// Per-frame tick: commits the pending state, then advances playback by
    /// one frame unless disabled, paused or loading.
    pub fn update(&mut self, ctx: &mut PlaybackContext<'_>) {
        if ctx.controller.abort.take() {
            self.disable_run(ctx);
            return;
        }

        let last_state = self.curr_state;
        self.curr_state = self.next_state;
        if self.curr_state == State::Paused && last_state != State::Paused {
            ctx.host.override_time_scale(Some(0.0));
        } else if self.curr_state != State::Paused && last_state == State::Paused {
            ctx.host.override_time_scale(None);
        }

        if self.curr_state == State::Disabled || self.curr_state == State::Paused {
            return;
        }
        if ctx.host.is_loading() {
            return;
        }

        // A single stepped frame falls back to Paused unless a scripted
        // marker still wants to run.
        if self.curr_state == State::FrameAdvance {
            self.next_state = State::Paused;
        }
        if ctx.controller.has_fast_forward() {
            self.next_state = State::Running;
        }

        let could_playback = self.advance_frame(ctx);
        if !could_playback {
            if ctx.controller.abort.take() {
                self.disable_run(ctx);
            } else if ctx.controller.inputs.is_empty() {
                ctx.controller.abort.abort(format!(
                    "Script \"{}\" has no playable inputs",
                    ctx.controller.file_path().display()
                ));
                self.disable_run(ctx);
            } else {
                self.did_complete = true;
                if ctx.controller.is_draft() && ctx.settings.pause_on_end_draft {
                    self.next_state = State::Paused;
                } else {
                    self.disable_run(ctx);
                }
            }
            return;
        }

        if ctx.controller.is_break()
            && (ctx.controller.can_playback() || ctx.controller.is_draft())
        {
            ctx.controller.next_label_fast_forward = None;
            self.playback_speed = 1.0;
            self.next_state = State::Paused;
        }
    }

    /// Runs due commands and steps the host once. Returns whether playable
    /// input existed at entry; commands still fire at the end of the script
    /// so completion-time commands see the final frame.
    fn advance_frame(&mut self, ctx: &mut PlaybackContext<'_>) -> bool {
        if ctx.controller.refresh_inputs(ctx.registry, false) {
            ctx.hooks.fire_parse_file_end();
        }
        let could_playback = ctx.controller.can_playback();

        let frame = ctx.controller.current_frame();
        if let Some(commands) = ctx.controller.commands.get(&frame).cloned() {
            for command in commands {
                if !command.info.timing.contains(ExecuteTiming::RUNTIME) {
                    continue;
                }
                let Some(handler) = command.info.runtime_handler().cloned() else {
                    continue;
                };
                let mut runtime = RuntimeContext {
                    controller: &mut *ctx.controller,
                    host: &mut *ctx.host,
                    settings: ctx.settings,
                };
                handler(&mut runtime, &command);
                // The command rewrote the timeline under the cursor; the
                // remaining commands of this frame no longer apply.
                if command.info.mutates_schedule {
                    break;
                }
            }
        }

        if !ctx.controller.can_playback() {
            return could_playback;
        }
        let Some(input) = ctx.controller.current().cloned() else {
            return could_playback;
        };

        ctx.hooks.fire_before_frame(&input);
        if let Some(tracer) = &mut self.tracer {
            tracer.begin_frame();
        }
        if let Err(err) = ctx.host.step_frame(&input) {
            ctx.controller
                .abort
                .abort(format!("Failed to step the game simulation: {err:#}"));
            return false;
        }
        ctx.hooks.fire_after_frame(&input);
        ctx.controller.advance_cursor();
        if let Some(tracer) = &mut self.tracer {
            tracer.trace_frame(ctx.controller, ctx.host);
        }
        could_playback
    }

    /// Meta tick: recomputes hotkey edges, applies requested transitions and
    /// resolves the playback speed. Runs on the render/UI cadence, not the
    /// simulation cadence.
    pub fn update_meta(&mut self, ctx: &mut PlaybackContext<'_>, now: Instant) {
        ctx.hotkeys.update(ctx.host, now);

        // A queued transition settles before new input is accepted.
        if self.next_state != self.curr_state {
            return;
        }

        let start_stop_pressed = ctx.hotkeys.get(HotkeyId::StartStop).pressed();
        let restart_pressed = ctx.hotkeys.get(HotkeyId::Restart).pressed();
        let label_pressed = ctx.hotkeys.get(HotkeyId::FastForwardLabel).pressed();
        let pause_pressed = ctx.hotkeys.get(HotkeyId::PauseResume).pressed();
        let frame_advance_pressed = ctx.hotkeys.get(HotkeyId::FrameAdvance).pressed();
        let frame_advance_repeated = ctx.hotkeys.get(HotkeyId::FrameAdvance).repeated();
        let fast_forward_down = ctx.hotkeys.get(HotkeyId::FastForward).check();
        let slow_forward_down = ctx.hotkeys.get(HotkeyId::SlowForward).check();

        if start_stop_pressed {
            if self.curr_state == State::Disabled {
                self.enable_run(ctx);
            } else {
                self.disable_run(ctx);
            }
            return;
        }
        if restart_pressed {
            self.disable_run(ctx);
            self.enable_run(ctx);
            return;
        }
        if self.curr_state == State::Disabled {
            return;
        }

        if label_pressed {
            // Skip ahead to the next label, dropping any pending single-step.
            ctx.controller.fast_forward_to_next_label();
            self.next_state = State::Running;
            return;
        }

        match self.curr_state {
            State::Running => {
                if pause_pressed || frame_advance_pressed {
                    self.next_state = State::Paused;
                }
                self.playback_speed = if fast_forward_down {
                    ctx.settings.fast_forward_speed
                } else if slow_forward_down {
                    ctx.settings.slow_forward_speed
                } else {
                    ctx.controller.fast_forward_speed()
                };
            }
            State::FrameAdvance => {
                self.playback_speed = 1.0;
            }
            State::Paused | State::SlowForward => {
                if pause_pressed {
                    self.next_state = State::Running;
                    self.playback_speed = 1.0;
                } else if frame_advance_repeated || fast_forward_down {
                    if ctx.controller.refresh_inputs(ctx.registry, false) {
                        ctx.hooks.fire_parse_file_end();
                    }
                    if ctx.controller.can_playback() {
                        self.next_state = State::FrameAdvance;
                    }
                    self.playback_speed = 1.0;
                } else if slow_forward_down {
                    self.next_state = State::SlowForward;
                    self.playback_speed = ctx.settings.slow_forward_speed;
                } else {
                    self.next_state = State::Paused;
                    self.playback_speed = 1.0;
                }
            }
            State::Disabled => {}
        }

        ctx.host.apply_playback_speed(self.playback_speed);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::Write;
    use std::rc::Rc;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::host::ManualHost;

    use super::*;

    struct Fixture {
        _dir: TempDir,
        host: ManualHost,
        controller: InputController,
        registry: CommandRegistry,
        hotkeys: Hotkeys,
        settings: TasSettings,
        hooks: LifecycleHooks,
        manager: PlaybackManager,
        clock: Instant,
    }

    impl Fixture {
        fn new(script: &str) -> Fixture {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("run.tas");
            let mut file = std::fs::File::create(&path).unwrap();
            file.write_all(script.as_bytes()).unwrap();

            let settings = TasSettings::default();
            Fixture {
                controller: InputController::new(&path),
                registry: CommandRegistry::with_builtins(),
                hotkeys: Hotkeys::from_settings(&settings),
                settings,
                host: ManualHost::new(),
                hooks: LifecycleHooks::new(),
                manager: PlaybackManager::new(),
                clock: Instant::now(),
                _dir: dir,
            }
        }

        fn enable(&mut self) {
            let mut ctx = PlaybackContext {
                host: &mut self.host,
                controller: &mut self.controller,
                registry: &self.registry,
                hotkeys: &mut self.hotkeys,
                settings: &self.settings,
                hooks: &mut self.hooks,
            };
            self.manager.enable_run(&mut ctx);
        }

        fn update(&mut self) {
            let mut ctx = PlaybackContext {
                host: &mut self.host,
                controller: &mut self.controller,
                registry: &self.registry,
                hotkeys: &mut self.hotkeys,
                settings: &self.settings,
                hooks: &mut self.hooks,
            };
            self.manager.update(&mut ctx);
        }

        fn update_meta(&mut self) {
            self.clock += Duration::from_millis(17);
            let now = self.clock;
            let mut ctx = PlaybackContext {
                host: &mut self.host,
                controller: &mut self.controller,
                registry: &self.registry,
                hotkeys: &mut self.hotkeys,
                settings: &self.settings,
                hooks: &mut self.hooks,
            };
            self.manager.update_meta(&mut ctx, now);
        }

        /// Presses a hotkey through the override path and settles the edge.
        fn press(&mut self, id: HotkeyId) {
            self.hotkeys.set_override(id, true);
            self.update_meta();
        }

        /// Updates until playback pauses or disables itself.
        fn run_until_stopped(&mut self, max_updates: u32) {
            for _ in 0..max_updates {
                self.update();
                if !self.manager.is_running() || self.manager.is_paused() {
                    return;
                }
            }
            panic!("playback did not settle within {max_updates} updates");
        }
    }

    #[test]
    fn enable_parses_the_script_and_runs() {
        let mut f = Fixture::new("5,R\n");
        f.enable();

        assert_eq!(f.manager.state(), State::Running);
        assert!(f.controller.can_playback());
        assert_eq!(f.controller.inputs.len(), 5);
    }

    #[test]
    fn start_stop_hotkey_toggles_the_run() {
        let mut f = Fixture::new("5,R\n");

        f.press(HotkeyId::StartStop);
        assert_eq!(f.manager.state(), State::Running);

        f.press(HotkeyId::StartStop);
        assert_eq!(f.manager.state(), State::Disabled);
    }

    #[test]
    fn restart_hotkey_rewinds_playback() {
        let mut f = Fixture::new("10,R\n");
        f.enable();
        for _ in 0..4 {
            f.update();
        }
        assert_eq!(f.controller.current_frame(), 4);

        f.press(HotkeyId::Restart);
        assert_eq!(f.manager.state(), State::Running);
        assert_eq!(f.controller.current_frame(), 0);
    }

    #[test]
    fn state_machine_walkthrough() {
        let mut f = Fixture::new("100,R\n");

        // Disabled -> Running
        f.press(HotkeyId::StartStop);
        assert_eq!(f.manager.state(), State::Running);
        f.update();

        // Running -> Paused
        f.press(HotkeyId::PauseResume);
        f.update();
        assert_eq!(f.manager.state(), State::Paused);
        assert_eq!(f.host.time_scale(), Some(0.0));

        // Paused -> FrameAdvance for exactly one frame -> Paused
        let before = f.host.step_count();
        f.press(HotkeyId::FrameAdvance);
        f.update();
        assert_eq!(f.manager.state(), State::FrameAdvance);
        assert_eq!(f.host.step_count(), before + 1);
        f.update();
        assert_eq!(f.manager.state(), State::Paused);
        assert_eq!(f.host.step_count(), before + 1);

        // Any state -> Disabled
        f.press(HotkeyId::StartStop);
        assert_eq!(f.manager.state(), State::Disabled);
        assert_eq!(f.host.time_scale(), None);
    }

    #[test]
    fn pause_resume_returns_to_running() {
        let mut f = Fixture::new("50,R\n");
        f.enable();
        f.update();

        f.press(HotkeyId::PauseResume);
        f.update();
        assert_eq!(f.manager.state(), State::Paused);

        f.press(HotkeyId::PauseResume);
        f.update();
        assert_eq!(f.manager.state(), State::Running);
        assert_eq!(f.host.time_scale(), None);
    }

    #[test]
    fn slow_forward_holds_while_paused() {
        let mut f = Fixture::new("50,R\n");
        f.enable();
        f.update();
        f.press(HotkeyId::PauseResume);
        f.update();
        assert_eq!(f.manager.state(), State::Paused);

        f.hotkeys.set_override(HotkeyId::SlowForward, true);
        f.update_meta();
        f.update();
        assert_eq!(f.manager.state(), State::SlowForward);
        assert_eq!(f.manager.playback_speed(), f.settings.slow_forward_speed);
        let before = f.host.step_count();
        f.update();
        assert!(f.host.step_count() > before);

        f.hotkeys.set_override(HotkeyId::SlowForward, false);
        f.update_meta();
        f.update();
        assert_eq!(f.manager.state(), State::Paused);
        assert_eq!(f.manager.playback_speed(), 1.0);
    }

    #[test]
    fn end_to_end_scenario_counts_every_input_tick() {
        let mut f = Fixture::new("60,R\n30,\n***10\n5,J\n");
        f.enable();
        assert_eq!(f.controller.inputs.len(), 95);

        // Runs until the scripted marker at frame 90 breaks into a pause.
        f.run_until_stopped(200);
        assert_eq!(f.manager.state(), State::Paused);
        assert_eq!(f.host.step_count(), 90);

        // Resuming plays the remaining five frames, then the run completes.
        f.press(HotkeyId::PauseResume);
        f.run_until_stopped(200);
        assert_eq!(f.manager.state(), State::Disabled);
        assert_eq!(f.host.step_count(), 95);
        assert!(f.manager.did_complete());
    }

    #[test]
    fn scripted_marker_speed_caps_at_remaining_distance() {
        let mut f = Fixture::new("100,R\n***10\n50,J\n");
        f.settings.fast_forward_speed = 25.0;
        f.enable();
        for _ in 0..50 {
            f.update();
        }
        assert_eq!(f.controller.current_frame(), 50);

        // Marker at frame 100, speed 10: min(100 - 50, 10) = 10.
        f.update_meta();
        assert_eq!(f.manager.playback_speed(), 10.0);
        assert_eq!(f.host.playback_speed(), 10.0);
    }

    #[test]
    fn manual_fast_forward_outranks_the_scripted_marker() {
        let mut f = Fixture::new("100,R\n***10\n50,J\n");
        f.settings.fast_forward_speed = 25.0;
        f.enable();
        for _ in 0..50 {
            f.update();
        }

        f.hotkeys.set_override(HotkeyId::FastForward, true);
        f.update_meta();
        assert_eq!(f.manager.playback_speed(), 25.0);

        f.hotkeys.set_override(HotkeyId::FastForward, false);
        f.update_meta();
        f.update_meta();
        assert_eq!(f.manager.playback_speed(), 10.0);
    }

    #[test]
    fn speed_reverts_to_one_past_the_last_marker() {
        let mut f = Fixture::new("100,R\n***10\n50,J\n");
        f.enable();
        f.run_until_stopped(200);
        assert_eq!(f.manager.state(), State::Paused);
        assert_eq!(f.controller.current_frame(), 100);

        f.press(HotkeyId::PauseResume);
        f.update();
        f.update();
        assert_eq!(f.controller.current_frame(), 102);
        f.update_meta();
        assert_eq!(f.manager.playback_speed(), 1.0);
    }

    #[test]
    fn label_jump_runs_to_the_marker_and_breaks() {
        let mut f = Fixture::new("10,R\n#checkpoint\n20,J\n");
        f.enable();
        f.update();

        f.press(HotkeyId::FastForwardLabel);
        assert!(f.controller.next_label_fast_forward.is_some());
        f.run_until_stopped(100);

        assert_eq!(f.manager.state(), State::Paused);
        assert_eq!(f.host.step_count(), 10);
        assert!(f.controller.next_label_fast_forward.is_none());
    }

    #[test]
    fn loading_suspends_advancement() {
        let mut f = Fixture::new("5,R\n");
        f.enable();
        f.host.set_loading(true);
        for _ in 0..3 {
            f.update();
        }
        assert_eq!(f.host.step_count(), 0);
        assert_eq!(f.manager.state(), State::Running);

        f.host.set_loading(false);
        f.update();
        assert_eq!(f.host.step_count(), 1);
    }

    #[test]
    fn step_failure_aborts_and_disables() {
        let mut f = Fixture::new("5,R\n");
        f.enable();
        f.host.fail_next_step("simulation desync");
        f.update();

        assert_eq!(f.manager.state(), State::Disabled);
        assert_eq!(f.host.step_count(), 0);
        assert!(!f.manager.did_complete());
        let messages = f.controller.abort.drain_messages();
        assert!(messages.iter().any(|m| m.contains("simulation desync")));
    }

    #[test]
    fn parse_failure_on_enable_stops_immediately() {
        let mut f = Fixture::new("Bogus,1\n10,R\n");
        f.enable();

        assert_eq!(f.manager.state(), State::Disabled);
        assert!(!f.manager.did_complete());
        assert_eq!(f.host.step_count(), 0);
    }

    #[test]
    fn empty_script_aborts_instead_of_completing() {
        let mut f = Fixture::new("# nothing playable\n");
        f.enable();
        f.update();

        assert_eq!(f.manager.state(), State::Disabled);
        assert!(!f.manager.did_complete());
        let messages = f.controller.abort.drain_messages();
        assert!(messages.iter().any(|m| m.contains("no playable inputs")));
    }

    #[test]
    fn draft_completion_pauses_when_configured() {
        let mut f = Fixture::new("3,R\n");
        f.settings.pause_on_end_draft = true;
        f.enable();
        for _ in 0..4 {
            f.update();
        }
        f.update();

        assert_eq!(f.manager.state(), State::Paused);
        assert!(f.manager.did_complete());
        assert!(f.controller.is_draft());
    }

    #[test]
    fn completed_scripts_disable_even_with_draft_pausing() {
        let mut f = Fixture::new("3,R\nFileTime\n");
        f.settings.pause_on_end_draft = true;
        f.enable();
        for _ in 0..4 {
            f.update();
        }

        assert_eq!(f.manager.state(), State::Disabled);
        assert!(f.manager.did_complete());
        assert!(!f.controller.is_draft());
    }

    #[test]
    fn lifecycle_hooks_fire_in_order() {
        let mut f = Fixture::new("1,R\n");
        let order = Rc::new(RefCell::new(Vec::new()));
        let log = order.clone();
        f.hooks.on_parse_file_end(move || log.borrow_mut().push("parse"));
        let log = order.clone();
        f.hooks.on_enable_run(move || log.borrow_mut().push("enable"));
        let log = order.clone();
        f.hooks.on_before_frame(move |_| log.borrow_mut().push("before"));
        let log = order.clone();
        f.hooks.on_after_frame(move |_| log.borrow_mut().push("after"));
        let log = order.clone();
        f.hooks.on_disable_run(move || log.borrow_mut().push("disable"));

        f.enable();
        f.update();
        f.update();

        assert_eq!(
            *order.borrow(),
            vec!["parse", "enable", "before", "after", "disable"]
        );
    }

    #[test]
    fn abort_from_a_previous_tick_tears_the_run_down() {
        let mut f = Fixture::new("5,R\n");
        f.enable();
        f.update();
        f.controller.abort.abort("raised by an extension");

        f.update();
        assert_eq!(f.manager.state(), State::Disabled);
        assert_eq!(f.host.step_count(), 1);
    }
}
