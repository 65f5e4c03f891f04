//! Owned playback session
//!
//! [`TasSession`] bundles everything one playback instance needs: settings,
//! the command registry, the parsed script, the state machine, hotkeys,
//! lifecycle hooks and the optional companion channel. The embedding host
//! keeps one session and calls [`TasSession::update`] once per simulated
//! frame and [`TasSession::update_meta`] once per render tick.
//!
//! Companion traffic stays off the game thread: socket threads queue
//! [`StudioAction`]s and `update_meta` drains them before anything else runs,
//! then pushes a fresh [`StudioState`] snapshot back to the editor.

use std::path::PathBuf;
use std::time::Instant;

use crate::comm::adapter::{DEFAULT_STUDIO_PORT, StudioAction, StudioServer};
use crate::comm::protocol::{
    BindingEntry, CommandListEntry, GameDataRequest, GameDataResponse, StudioMessage, StudioState,
};
use crate::host::GameHost;
use crate::input::commands::{AutoCompleteRequest, CommandRegistry, default_command_hash};
use crate::input::controller::InputController;
use crate::input::frame::InputFrame;
use crate::playback::{Hotkeys, LifecycleHooks, PlaybackContext, PlaybackManager, State};
use crate::settings::{SettingId, TasSettings};
use crate::tracer::TasTracer;

/// One playback instance and everything it owns.
pub struct TasSession {
    settings: TasSettings,
    registry: CommandRegistry,
    controller: InputController,
    manager: PlaybackManager,
    hotkeys: Hotkeys,
    hooks: LifecycleHooks,
    studio: Option<StudioServer>,
}

impl TasSession {
    /// Builds a session around `script_path` with the built-in command set.
    /// No file access happens until a run is enabled.
    pub fn new(script_path: impl Into<PathBuf>, settings: TasSettings) -> TasSession {
        let hotkeys = Hotkeys::from_settings(&settings);
        TasSession {
            settings,
            registry: CommandRegistry::with_builtins(),
            controller: InputController::new(script_path),
            manager: PlaybackManager::new(),
            hotkeys,
            hooks: LifecycleHooks::new(),
            studio: None,
        }
    }

    /// Fires the initialize hooks, surfaces settings problems and opens the
    /// companion channel when configured to.
    pub fn initialize(&mut self) {
        self.hooks.fire_initialize();
        for warning in self.settings.validate() {
            log::warn!("{warning}");
        }
        if self.settings.attempt_connect_studio {
            self.connect_studio(DEFAULT_STUDIO_PORT);
        }
    }

    /// Opens the companion channel on `port`. Failure is logged and the
    /// session keeps running without an editor.
    pub fn connect_studio(&mut self, port: u16) {
        match StudioServer::start(port) {
            Ok(server) => self.studio = Some(server),
            Err(err) => log::error!("Failed to open the companion channel: {err:#}"),
        }
    }

    pub fn settings(&self) -> &TasSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut TasSettings {
        &mut self.settings
    }

    pub fn controller(&self) -> &InputController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut InputController {
        &mut self.controller
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut CommandRegistry {
        &mut self.registry
    }

    pub fn manager(&self) -> &PlaybackManager {
        &self.manager
    }

    pub fn hooks_mut(&mut self) -> &mut LifecycleHooks {
        &mut self.hooks
    }

    pub fn studio(&self) -> Option<&StudioServer> {
        self.studio.as_ref()
    }

    /// Routes determinism traces through the manager for every later run.
    pub fn set_tracer(&mut self, tracer: TasTracer) {
        self.manager.set_tracer(tracer);
    }

    /// Switches the active script. Takes effect when the next run is enabled.
    pub fn set_script_path(&mut self, path: impl Into<PathBuf>) {
        self.controller.set_file_path(path);
    }

    /// Rebuilds hotkeys after a bindings change and tells the editor.
    pub fn reload_bindings(&mut self) {
        self.hotkeys = Hotkeys::from_settings(&self.settings);
        if let Some(studio) = &self.studio {
            studio.send(&StudioMessage::CurrentBindings(binding_entries(
                &self.hotkeys,
            )));
        }
    }

    pub fn enable_run(&mut self, host: &mut dyn GameHost) {
        let mut ctx = PlaybackContext {
            host,
            controller: &mut self.controller,
            registry: &self.registry,
            hotkeys: &mut self.hotkeys,
            settings: &self.settings,
            hooks: &mut self.hooks,
        };
        self.manager.enable_run(&mut ctx);
    }

    pub fn disable_run(&mut self, host: &mut dyn GameHost) {
        let mut ctx = PlaybackContext {
            host,
            controller: &mut self.controller,
            registry: &self.registry,
            hotkeys: &mut self.hotkeys,
            settings: &self.settings,
            hooks: &mut self.hooks,
        };
        self.manager.disable_run(&mut ctx);
    }

    /// Per-simulated-frame entry point. Inert while the master switch is off.
    pub fn update(&mut self, host: &mut dyn GameHost) {
        if !self.settings.enabled {
            return;
        }
        let mut ctx = PlaybackContext {
            host,
            controller: &mut self.controller,
            registry: &self.registry,
            hotkeys: &mut self.hotkeys,
            settings: &self.settings,
            hooks: &mut self.hooks,
        };
        self.manager.update(&mut ctx);
    }

    /// Per-render-tick entry point: drains editor actions, runs hotkeys and
    /// state transitions, then reports the resulting state to the editor.
    pub fn update_meta(&mut self, host: &mut dyn GameHost, now: Instant) {
        if !self.settings.enabled {
            return;
        }
        self.apply_studio_actions(&*host);

        let mut ctx = PlaybackContext {
            host: &mut *host,
            controller: &mut self.controller,
            registry: &self.registry,
            hotkeys: &mut self.hotkeys,
            settings: &self.settings,
            hooks: &mut self.hooks,
        };
        self.manager.update_meta(&mut ctx, now);

        if let Some(studio) = &self.studio {
            if studio.is_connected() {
                let state = self.studio_state(&*host);
                studio.send(&StudioMessage::State(state));
            }
        }
    }

    fn apply_studio_actions(&mut self, host: &dyn GameHost) {
        let Some(studio) = &self.studio else {
            return;
        };
        for action in studio.drain_actions() {
            match action {
                StudioAction::Connected => {
                    studio.send(&StudioMessage::CurrentBindings(binding_entries(
                        &self.hotkeys,
                    )));
                    studio.send(&StudioMessage::CommandList(command_entries(&self.registry)));
                }
                StudioAction::Disconnected => {}
                StudioAction::SetFilePath(path) => {
                    log::info!("Companion editor selected {}", path.display());
                    self.controller.set_file_path(path);
                }
                StudioAction::HotkeyOverride { id, active } => {
                    self.hotkeys.set_override(id, active);
                }
                StudioAction::GameData(request) => {
                    let response =
                        answer_game_data(request, host, &self.settings, &self.registry);
                    studio.send(&StudioMessage::GameDataResponse(response));
                }
                StudioAction::AutoComplete {
                    hash,
                    name,
                    request,
                } => {
                    let provider = self
                        .registry
                        .get(&name)
                        .and_then(|info| info.auto_complete_provider().cloned());
                    match provider {
                        Some(provider) => {
                            studio.spawn_auto_complete(hash, name, provider, request);
                        }
                        None => {
                            studio.send(&StudioMessage::CommandAutoComplete {
                                hash,
                                entries: Vec::new(),
                                is_done: true,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Status snapshot the editor renders beside the script.
    fn studio_state(&self, host: &dyn GameHost) -> StudioState {
        let previous = self.controller.previous();
        let frame_offset = previous.map_or(0, |input| input.frame_offset);
        let repeat = previous.map(InputFrame::repeat_string).unwrap_or_default();
        StudioState {
            current_line: previous.map_or(-1, |input| input.line as i32),
            current_line_suffix: format!(
                "{}{repeat}",
                self.controller.current_frame_in_input() as i32 + frame_offset
            ),
            current_frame_in_tas: self.controller.current_frame(),
            total_frames: self.controller.inputs.len() as u32,
            save_state_line: self
                .controller
                .fast_forwards
                .values()
                .find(|marker| marker.save_state)
                .map_or(-1, |marker| marker.line as i32),
            running: self.manager.state() != State::Disabled,
            paused: self.manager.is_paused(),
            game_info: host.game_info(),
            level_name: host.level_name(),
            chapter_time: host.chapter_time(),
            show_subpixel_indicator: self.settings.show_subpixel_indicator,
            subpixel_remainder: host.position_remainder(),
        }
    }
}

fn binding_entries(hotkeys: &Hotkeys) -> Vec<BindingEntry> {
    hotkeys
        .iter()
        .map(|hotkey| BindingEntry {
            id: hotkey.id(),
            keys: hotkey.keys().to_vec(),
        })
        .collect()
}

fn command_entries(registry: &CommandRegistry) -> Vec<CommandListEntry> {
    let mut names = registry.names();
    names.sort_unstable();
    names
        .into_iter()
        .map(|name| CommandListEntry {
            name: name.to_string(),
            has_auto_complete: registry
                .get(name)
                .is_some_and(|info| info.auto_complete_provider().is_some()),
        })
        .collect()
}

fn answer_game_data(
    request: GameDataRequest,
    host: &dyn GameHost,
    settings: &TasSettings,
    registry: &CommandRegistry,
) -> GameDataResponse {
    match request {
        GameDataRequest::ConsoleCommand { simple } => {
            GameDataResponse::ConsoleCommand(host.console_command(simple))
        }
        GameDataRequest::SettingValue { name } => GameDataResponse::SettingValue(
            SettingId::from_name(&name)
                .map(|id| settings.get(id))
                .unwrap_or_default(),
        ),
        GameDataRequest::CommandHash {
            name,
            args,
            file_path,
            file_line,
        } => {
            let request = AutoCompleteRequest {
                args,
                file_path: PathBuf::from(file_path),
                file_line,
            };
            let hash = match registry.get(&name) {
                Some(info) => info.auto_complete_hash(&request),
                None => default_command_hash(&request.args),
            };
            GameDataResponse::CommandHash(hash)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::path::Path;
    use std::rc::Rc;
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::comm::protocol::FRAME_HEADER_SIZE;
    use crate::host::ManualHost;
    use crate::input::commands::{
        AutoCompleteEntry, AutoCompleteProvider, AutoCompleteSource, CommandInfo, ExecuteTiming,
        VecSource,
    };
    use crate::playback::HotkeyId;

    fn fixture(script: &str) -> (TasSession, ManualHost, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.tas");
        std::fs::write(&path, script).unwrap();
        let session = TasSession::new(&path, TasSettings::default());
        (session, ManualHost::new(), dir)
    }

    fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("timed out waiting for {what}");
    }

    fn connect_editor(session: &mut TasSession) -> TcpStream {
        session.connect_studio(0);
        let addr = session.studio().unwrap().local_addr();
        let client = TcpStream::connect(addr).unwrap();
        let studio = session.studio().unwrap();
        wait_until("the editor connection", || studio.is_connected());
        client
    }

    fn read_message(stream: &mut TcpStream) -> StudioMessage {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        stream.read_exact(&mut header).unwrap();
        let length = u32::from_le_bytes(header) as usize;
        let mut body = vec![0u8; length];
        stream.read_exact(&mut body).unwrap();
        StudioMessage::from_frame_body(&body).unwrap()
    }

    /// Reads until `pick` accepts a message, skipping everything else.
    fn read_until<T>(
        stream: &mut TcpStream,
        mut pick: impl FnMut(StudioMessage) -> Option<T>,
    ) -> T {
        for _ in 0..100 {
            if let Some(found) = pick(read_message(stream)) {
                return found;
            }
        }
        panic!("expected message never arrived");
    }

    /// Writes a sentinel FilePath message and pumps `update_meta` until the
    /// session has applied it. Everything written before the sentinel is
    /// guaranteed drained by then.
    fn sync_actions(
        session: &mut TasSession,
        host: &mut ManualHost,
        client: &mut TcpStream,
        marker: &str,
    ) {
        client
            .write_all(&StudioMessage::FilePath(marker.to_string()).to_bytes())
            .unwrap();
        wait_until("the sentinel file path to apply", || {
            session.update_meta(host, Instant::now());
            session.controller().file_path() == Path::new(marker)
        });
    }

    #[test]
    fn runs_a_script_end_to_end() {
        let (mut session, mut host, _dir) = fixture("2,R\n1,J\n");

        session.enable_run(&mut host);
        assert!(session.manager().is_running());

        for _ in 0..8 {
            session.update(&mut host);
            if session.manager().state() == State::Disabled {
                break;
            }
        }

        assert_eq!(host.steps(), ["2,R", "2,R", "1,J"]);
        assert_eq!(session.manager().state(), State::Disabled);
        assert!(session.manager().did_complete());
    }

    #[test]
    fn master_switch_freezes_the_session() {
        let (mut session, mut host, _dir) = fixture("5,R\n");
        session.enable_run(&mut host);

        session.settings_mut().enabled = false;
        for _ in 0..3 {
            session.update(&mut host);
            session.update_meta(&mut host, Instant::now());
        }
        assert_eq!(host.step_count(), 0);
        assert!(session.manager().is_running());

        session.settings_mut().enabled = true;
        session.update(&mut host);
        assert_eq!(host.step_count(), 1);
    }

    #[test]
    fn initialize_fires_hooks_and_honors_the_connect_setting() {
        let (mut session, _host, _dir) = fixture("1,R\n");
        let fired = Rc::new(RefCell::new(0));
        let counter = fired.clone();
        session.hooks_mut().on_initialize(move || {
            *counter.borrow_mut() += 1;
        });
        session.settings_mut().attempt_connect_studio = false;

        session.initialize();

        assert_eq!(*fired.borrow(), 1);
        assert!(session.studio().is_none());
    }

    #[test]
    fn connecting_editor_gets_bindings_command_list_and_state() {
        let (mut session, mut host, _dir) = fixture("1,R\n");
        let mut client = connect_editor(&mut session);

        session.update_meta(&mut host, Instant::now());

        match read_message(&mut client) {
            StudioMessage::CurrentBindings(bindings) => {
                assert_eq!(bindings.len(), 7);
                let start_stop = bindings
                    .iter()
                    .find(|binding| binding.id == HotkeyId::StartStop)
                    .unwrap();
                assert_eq!(start_stop.keys, ["RightControl"]);
            }
            other => panic!("expected bindings, got {other:?}"),
        }
        match read_message(&mut client) {
            StudioMessage::CommandList(commands) => {
                let read = commands.iter().find(|entry| entry.name == "Read").unwrap();
                assert!(read.has_auto_complete);
                assert!(commands.iter().any(|entry| entry.name == "FileTime"));
            }
            other => panic!("expected the command list, got {other:?}"),
        }
        match read_message(&mut client) {
            StudioMessage::State(state) => {
                assert!(!state.running);
                assert_eq!(state.current_line, -1);
                assert_eq!(state.current_line_suffix, "0");
            }
            other => panic!("expected a state snapshot, got {other:?}"),
        }
    }

    #[test]
    fn remote_hotkey_starts_the_run() {
        let (mut session, mut host, _dir) = fixture("3,R\n");
        let mut client = connect_editor(&mut session);

        client
            .write_all(
                &StudioMessage::Hotkey {
                    id: HotkeyId::StartStop,
                    released: false,
                }
                .to_bytes(),
            )
            .unwrap();

        wait_until("the remote hotkey to start playback", || {
            session.update_meta(&mut host, Instant::now());
            session.manager().is_running()
        });
    }

    #[test]
    fn editor_selected_script_drives_the_next_run() {
        let (mut session, mut host, dir) = fixture("1,R\n");
        let other = dir.path().join("other.tas");
        std::fs::write(&other, "2,J\n").unwrap();
        let mut client = connect_editor(&mut session);

        client
            .write_all(&StudioMessage::FilePath(other.to_string_lossy().into_owned()).to_bytes())
            .unwrap();
        wait_until("the script switch", || {
            session.update_meta(&mut host, Instant::now());
            session.controller().file_path() == other
        });

        session.enable_run(&mut host);
        session.update(&mut host);
        assert_eq!(host.steps(), ["2,J"]);
    }

    #[test]
    fn game_data_queries_are_answered() {
        let (mut session, mut host, _dir) = fixture("1,R\n");
        host.set_level_name("forest_3");
        host.set_position_remainder((0.25, -0.5));
        let mut client = connect_editor(&mut session);

        let args = vec!["x".to_string(), "part".to_string()];
        for message in [
            StudioMessage::RequestGameData(GameDataRequest::SettingValue {
                name: "FastForwardSpeed".into(),
            }),
            StudioMessage::RequestGameData(GameDataRequest::ConsoleCommand { simple: false }),
            StudioMessage::RequestGameData(GameDataRequest::CommandHash {
                name: "NoSuchCommand".into(),
                args: args.clone(),
                file_path: "run.tas".into(),
                file_line: 3,
            }),
        ] {
            client.write_all(&message.to_bytes()).unwrap();
        }
        sync_actions(&mut session, &mut host, &mut client, "sentinel.tas");

        let mut responses = Vec::new();
        for _ in 0..3 {
            responses.push(read_until(&mut client, |message| match message {
                StudioMessage::GameDataResponse(response) => Some(response),
                _ => None,
            }));
        }
        assert_eq!(responses[0], GameDataResponse::SettingValue("10".into()));
        assert_eq!(
            responses[1],
            GameDataResponse::ConsoleCommand("load forest_3 0.25 -0.50".into())
        );
        assert_eq!(
            responses[2],
            GameDataResponse::CommandHash(default_command_hash(&args))
        );
    }

    #[test]
    fn unknown_setting_answers_with_an_empty_value() {
        let (mut session, mut host, _dir) = fixture("1,R\n");
        let mut client = connect_editor(&mut session);

        client
            .write_all(
                &StudioMessage::RequestGameData(GameDataRequest::SettingValue {
                    name: "NoSuchSetting".into(),
                })
                .to_bytes(),
            )
            .unwrap();
        sync_actions(&mut session, &mut host, &mut client, "sentinel.tas");

        let value = read_until(&mut client, |message| match message {
            StudioMessage::GameDataResponse(GameDataResponse::SettingValue(value)) => Some(value),
            _ => None,
        });
        assert_eq!(value, "");
    }

    struct FixedEntries;

    impl AutoCompleteProvider for FixedEntries {
        fn entries(&self, _request: &AutoCompleteRequest) -> Box<dyn AutoCompleteSource> {
            Box::new(VecSource::new(vec![
                AutoCompleteEntry::new("alpha").done(),
                AutoCompleteEntry::new("beta").done(),
            ]))
        }
    }

    #[test]
    fn auto_complete_streams_entries_from_the_registered_provider() {
        let (mut session, mut host, _dir) = fixture("1,R\n");
        session.registry_mut().register(
            CommandInfo::new("Marker", ExecuteTiming::PARSE).with_auto_complete(FixedEntries),
        );
        let mut client = connect_editor(&mut session);

        client
            .write_all(
                &StudioMessage::RequestCommandAutoComplete {
                    hash: 99,
                    name: "Marker".into(),
                    args: vec![String::new()],
                    file_path: "run.tas".into(),
                    file_line: 1,
                }
                .to_bytes(),
            )
            .unwrap();
        sync_actions(&mut session, &mut host, &mut client, "sentinel.tas");

        let mut names = Vec::new();
        loop {
            let done = read_until(&mut client, |message| match message {
                StudioMessage::CommandAutoComplete {
                    hash,
                    entries,
                    is_done,
                } => {
                    assert_eq!(hash, 99);
                    Some((entries, is_done))
                }
                _ => None,
            });
            names.extend(done.0.into_iter().map(|entry| entry.name));
            if done.1 {
                break;
            }
        }
        assert_eq!(names, ["alpha", "beta"]);
    }

    #[test]
    fn auto_complete_for_unknown_commands_finishes_empty() {
        let (mut session, mut host, _dir) = fixture("1,R\n");
        let mut client = connect_editor(&mut session);

        client
            .write_all(
                &StudioMessage::RequestCommandAutoComplete {
                    hash: 5,
                    name: "NoSuchCommand".into(),
                    args: Vec::new(),
                    file_path: "run.tas".into(),
                    file_line: 1,
                }
                .to_bytes(),
            )
            .unwrap();
        sync_actions(&mut session, &mut host, &mut client, "sentinel.tas");

        let (entries, is_done) = read_until(&mut client, |message| match message {
            StudioMessage::CommandAutoComplete {
                hash,
                entries,
                is_done,
            } => {
                assert_eq!(hash, 5);
                Some((entries, is_done))
            }
            _ => None,
        });
        assert!(entries.is_empty());
        assert!(is_done);
    }

    #[test]
    fn state_snapshot_tracks_playback_progress() {
        let (mut session, mut host, _dir) = fixture("#start\n2,R\n***!5\n3,J\n");
        host.set_game_info("Pos: 12.0, 3.5");
        host.set_level_name("cave_2");
        host.set_chapter_time("0:12.345");
        host.set_position_remainder((0.125, 0.0));

        session.enable_run(&mut host);
        session.update(&mut host);
        session.update(&mut host);
        session.update(&mut host);

        let mut client = connect_editor(&mut session);
        session.update_meta(&mut host, Instant::now());

        let state = read_until(&mut client, |message| match message {
            StudioMessage::State(state) => Some(state),
            _ => None,
        });
        // Cursor halted on the marker between the two lines.
        assert!(state.running);
        assert!(state.paused);
        assert_eq!(state.total_frames, 5);
        assert_eq!(state.current_frame_in_tas, 2);
        assert_eq!(state.current_line, 1);
        assert_eq!(state.current_line_suffix, "2");
        assert_eq!(state.save_state_line, 2);
        assert_eq!(state.game_info, "Pos: 12.0, 3.5");
        assert_eq!(state.level_name, "cave_2");
        assert_eq!(state.chapter_time, "0:12.345");
        assert!(state.show_subpixel_indicator);
        assert_eq!(state.subpixel_remainder, (0.125, 0.0));
    }

    #[test]
    fn reload_bindings_pushes_the_new_set_to_the_editor() {
        let (mut session, mut host, _dir) = fixture("1,R\n");
        let mut client = connect_editor(&mut session);
        session.update_meta(&mut host, Instant::now());
        // Skip the connect-time bindings, command list and state snapshot.
        for _ in 0..3 {
            read_message(&mut client);
        }

        session.settings_mut().bindings.start_stop = vec!["F5".to_string()];
        session.reload_bindings();

        let keys = read_until(&mut client, |message| match message {
            StudioMessage::CurrentBindings(bindings) => bindings
                .into_iter()
                .find(|binding| binding.id == HotkeyId::StartStop)
                .map(|binding| binding.keys),
            _ => None,
        });
        assert_eq!(keys, ["F5"]);
    }
}
