//! Script controller
//!
//! Owns everything parsed out of a script: the expanded frame timeline, the
//! per-frame command schedule, fast-forward and label markers, comments and
//! the content checksum. Also owns the playback cursor, the reload flag fed
//! by the file watcher, and the bounded re-parse retry loop.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hashbrown::{HashMap, HashSet};
use sha2::{Digest, Sha256};

use crate::abort::AbortChannel;
use crate::input::commands::time::{COMPLETION_COMMANDS, MIDWAY_COMPLETION_COMMANDS};
use crate::input::commands::{Command, CommandLine, CommandRegistry, ExecuteTiming, ParseContext};
use crate::input::frame::InputFrame;
use crate::input::watcher::ScriptWatcher;

/// Speed of a bare `***` line, effectively "as fast as the host allows".
pub const DEFAULT_FAST_FORWARD_SPEED: f32 = 400.0;

/// Re-parse attempts before giving up on a transiently unreadable file.
const RELOAD_TRIES: u32 = 5;
const RELOAD_RETRY_DELAY: Duration = Duration::from_millis(50);

/// A `***` marker: play fast up to `frame`, then break.
#[derive(Debug, Clone, PartialEq)]
pub struct FastForward {
    /// Frame the marker halts at.
    pub frame: u32,
    pub speed: f32,
    /// `***!` markers also want a save state captured at the halt.
    pub save_state: bool,
    /// 0-based line in the root-file view.
    pub line: u32,
}

impl FastForward {
    /// Parses the text after the `***`. A leading `!` requests a save state;
    /// anything left is a speed, defaulting very fast.
    pub fn new(frame: u32, modifiers: &str, line: u32) -> Self {
        let modifiers = modifiers.trim();
        let (save_state, speed_text) = match modifiers.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, modifiers),
        };
        let speed = speed_text
            .trim()
            .parse()
            .unwrap_or(DEFAULT_FAST_FORWARD_SPEED);
        Self {
            frame,
            speed,
            save_state,
            line,
        }
    }
}

/// A `#` line kept as display text, grouped per originating file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub file_path: PathBuf,
    /// Frame the comment precedes.
    pub frame: u32,
    /// 1-based line within `file_path`.
    pub file_line: u32,
    pub text: String,
}

/// The parsed-script aggregate and playback cursor.
///
/// All tables are rebuilt wholesale by [`InputController::refresh_inputs`];
/// the playback tick never sees a half-updated mix of old and new state.
pub struct InputController {
    file_path: PathBuf,
    /// Timeline expanded so a `5,R` line occupies five consecutive slots.
    pub inputs: Vec<InputFrame>,
    /// Frame -> commands firing there, in declaration order.
    pub commands: BTreeMap<u32, Vec<Command>>,
    /// Frame -> scripted `***` marker.
    pub fast_forwards: BTreeMap<u32, FastForward>,
    /// Frame -> label marker derived from a `#` line. The parser appends a
    /// synthetic entry at the final frame so label jumps can target EOF.
    pub fast_forward_comments: BTreeMap<u32, FastForward>,
    pub comments: HashMap<PathBuf, Vec<Comment>>,
    /// Target of a fast-forward-to-next-label request, if any.
    pub next_label_fast_forward: Option<FastForward>,
    pub abort: AbortChannel,
    used_files: HashSet<PathBuf>,
    /// Set by the watcher on an arbitrary thread; consumed on the playback
    /// tick by [`InputController::refresh_inputs`].
    needs_reload: Arc<AtomicBool>,
    watcher: Option<ScriptWatcher>,
    /// Inclusion descriptors of the parse in progress, for cycle detection.
    read_stack: Vec<String>,
    checksum: Option<String>,
    savestate_checksum: Option<String>,
    current_parsing_frame: u32,
    /// 0-based playback cursor into `inputs`.
    current_frame: u32,
    /// 1-based progress within the current input line, for display.
    current_frame_in_input: u32,
}

impl InputController {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            inputs: Vec::new(),
            commands: BTreeMap::new(),
            fast_forwards: BTreeMap::new(),
            fast_forward_comments: BTreeMap::new(),
            comments: HashMap::new(),
            next_label_fast_forward: None,
            abort: AbortChannel::new(),
            used_files: HashSet::new(),
            needs_reload: Arc::new(AtomicBool::new(true)),
            watcher: None,
            read_stack: Vec::new(),
            checksum: None,
            savestate_checksum: None,
            current_parsing_frame: 0,
            current_frame: 0,
            current_frame_in_input: 0,
        }
    }

    /// Root script file of the active session.
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Switches the active script. All parsed state is dropped; the next
    /// refresh re-parses from the new path.
    pub fn set_file_path(&mut self, file_path: impl Into<PathBuf>) {
        let file_path = file_path.into();
        if self.file_path == file_path {
            return;
        }
        self.file_path = file_path;
        self.clear();
    }

    /// 0-based playback cursor into the expanded timeline.
    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    /// 1-based frame counter within the current input line.
    pub fn current_frame_in_input(&self) -> u32 {
        self.current_frame_in_input
    }

    /// Frame index the parser will assign to the next line it reads.
    pub fn current_parsing_frame(&self) -> u32 {
        self.current_parsing_frame
    }

    pub fn needs_reload(&self) -> bool {
        self.needs_reload.load(Ordering::SeqCst)
    }

    pub fn previous(&self) -> Option<&InputFrame> {
        let index = self.current_frame.checked_sub(1)?;
        self.inputs.get(index as usize)
    }

    pub fn current(&self) -> Option<&InputFrame> {
        self.inputs.get(self.current_frame as usize)
    }

    pub fn next(&self) -> Option<&InputFrame> {
        self.inputs.get(self.current_frame as usize + 1)
    }

    /// Commands scheduled on the cursor's frame, in declaration order.
    pub fn current_commands(&self) -> Option<&Vec<Command>> {
        self.commands.get(&self.current_frame)
    }

    pub fn can_playback(&self) -> bool {
        (self.current_frame as usize) < self.inputs.len()
    }

    /// The marker controlling playback speed right now: an explicit label
    /// jump target wins, then the nearest scripted marker ahead of the
    /// cursor, then the last marker in the file ("hold at end").
    fn current_fast_forward(&self) -> Option<&FastForward> {
        if let Some(label) = &self.next_label_fast_forward {
            return Some(label);
        }
        self.fast_forwards
            .range(self.current_frame + 1..)
            .next()
            .map(|(_, marker)| marker)
            .or_else(|| self.fast_forwards.values().next_back())
    }

    /// Whether a marker still lies ahead of the cursor.
    pub fn has_fast_forward(&self) -> bool {
        self.current_fast_forward()
            .is_some_and(|marker| marker.frame > self.current_frame)
    }

    /// Speed multiplier requested by the active marker, capped by the
    /// remaining distance so a burst never overshoots the marker.
    pub fn fast_forward_speed(&self) -> f32 {
        match self.current_fast_forward() {
            Some(marker) if marker.frame > self.current_frame => {
                ((marker.frame - self.current_frame) as f32).min(marker.speed)
            }
            _ => 1.0,
        }
    }

    /// True when the cursor sits exactly on the active marker's frame.
    pub fn is_break(&self) -> bool {
        self.current_fast_forward()
            .is_some_and(|marker| marker.frame == self.current_frame)
    }

    /// Whether the script records no completion time: no file/chapter time
    /// command anywhere and no midway variant on the final frame. Drafts get
    /// gentler end-of-script handling.
    pub fn is_draft(&self) -> bool {
        let completes = self
            .commands
            .values()
            .flatten()
            .any(|command| COMPLETION_COMMANDS.iter().any(|name| command.is(name)));
        if completes {
            return false;
        }
        let end = self.inputs.len() as u32;
        !self
            .commands
            .get(&end)
            .into_iter()
            .flatten()
            .any(|command| MIDWAY_COMPLETION_COMMANDS.iter().any(|name| command.is(name)))
    }

    /// Checksum of the whole parsed script. Lazy; dropped by [`Self::clear`].
    pub fn checksum(&mut self) -> String {
        if let Some(checksum) = &self.checksum {
            return checksum.clone();
        }
        let checksum = self.calc_checksum(self.inputs.len().saturating_sub(1) as u32);
        self.checksum = Some(checksum.clone());
        checksum
    }

    /// Checksum up to the current cursor, used to validate save states.
    pub fn savestate_checksum(&mut self) -> String {
        if let Some(checksum) = &self.savestate_checksum {
            return checksum.clone();
        }
        let checksum = self.calc_checksum(self.current_frame);
        self.savestate_checksum = Some(checksum.clone());
        checksum
    }

    /// Digest over the script path, the canonical action text of every frame
    /// before `to_frame`, and the literal text of every checksum-relevant
    /// command in that range. Two scripts that expand to the same playable
    /// content hash identically even if their run-length grouping differs.
    pub fn calc_checksum(&self, to_frame: u32) -> String {
        let mut text = self.file_path.to_string_lossy().into_owned();
        text.push('\n');

        for (frame, input) in self.inputs.iter().take(to_frame as usize).enumerate() {
            text.push_str(&input.to_actions_string());
            text.push('\n');

            if let Some(commands) = self.commands.get(&(frame as u32)) {
                for command in commands {
                    if command.info.calc_checksum {
                        text.push_str(&command.line_text);
                        text.push('\n');
                    }
                }
            }
        }

        hex::encode(Sha256::digest(text.as_bytes()))
    }

    /// Re-parses the script when the reload flag is set, retrying briefly so
    /// an editor mid-write does not kill the run. Total failure leaves the
    /// controller empty. Returns true when a re-parse succeeded, so the
    /// caller can fire its parse-done hooks.
    ///
    /// `rewind` additionally resets the cursor to frame zero first, for run
    /// starts.
    pub fn refresh_inputs(&mut self, registry: &CommandRegistry, rewind: bool) -> bool {
        if rewind {
            self.stop();
        }
        if !self.needs_reload.load(Ordering::SeqCst) {
            return false;
        }

        let last_checksum = self.checksum();
        let first_run = self.used_files.is_empty();
        let mut parsed = false;

        self.clear();
        let root = self.file_path.clone();
        let mut tries = RELOAD_TRIES;
        while tries > 0 {
            if self.read_file(registry, &root, 0, u32::MAX, 0) {
                if self.abort.is_aborted() {
                    self.clear();
                } else {
                    self.needs_reload.store(false, Ordering::SeqCst);
                    self.start_watchers();
                    parsed = true;
                    if !first_run && last_checksum != self.checksum() {
                        log::debug!(
                            "Script content changed, checksum now {}",
                            self.checksum()
                        );
                    }
                }
                break;
            }
            thread::sleep(RELOAD_RETRY_DELAY);
            tries -= 1;
            self.clear();
        }

        self.current_frame = self.current_frame.min(self.inputs.len() as u32);
        parsed
    }

    /// Rewinds playback to the start without touching parsed state.
    pub fn stop(&mut self) {
        self.current_frame = 0;
        self.current_frame_in_input = 0;
        self.next_label_fast_forward = None;
    }

    /// Drops all parsed state and schedules a reload.
    pub fn clear(&mut self) {
        self.current_parsing_frame = 0;
        self.checksum = None;
        self.savestate_checksum = None;
        self.inputs.clear();
        self.commands.clear();
        self.fast_forwards.clear();
        self.fast_forward_comments.clear();
        self.comments.clear();
        self.used_files.clear();
        self.read_stack.clear();
        self.needs_reload.store(true, Ordering::SeqCst);
        self.stop_watchers();
    }

    /// Parses `path` and appends its contents to the tables. Returns false
    /// when the file cannot be read, leaving the caller to retry.
    ///
    /// `start_line` and `end_line` are 1-based and inclusive; `studio_line`
    /// is the 0-based root-file line the first parsed line maps to.
    pub fn read_file(
        &mut self,
        registry: &CommandRegistry,
        path: &Path,
        start_line: u32,
        end_line: u32,
        studio_line: u32,
    ) -> bool {
        if !path.is_file() {
            return false;
        }
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                log::warn!("Failed to read {}: {err}", path.display());
                return false;
            }
        };

        self.used_files.insert(path.to_path_buf());
        let take = usize::try_from(end_line).unwrap_or(usize::MAX);
        let lines: Vec<String> = text.lines().take(take).map(String::from).collect();
        self.read_lines(registry, &lines, path, start_line, studio_line, 0, 0);
        true
    }

    /// Classifies and applies each line. Priority: command line, `***`
    /// marker, `#` comment, frame line. A `Play` command ends the current
    /// file immediately; its handler already scheduled the continuation.
    pub fn read_lines(
        &mut self,
        registry: &CommandRegistry,
        lines: &[String],
        path: &Path,
        start_line: u32,
        studio_line: u32,
        repeat_index: u32,
        repeat_count: u32,
    ) {
        let top_level = path == self.file_path;
        let mut studio_line = studio_line;

        for (index, raw) in lines.iter().enumerate() {
            let file_line = index as u32 + 1;
            if file_line < start_line {
                continue;
            }
            let line = raw.trim();

            if let Some(command_line) = CommandLine::parse(line) {
                if self.dispatch_command(registry, &command_line, line, path, file_line, studio_line) {
                    return;
                }
            } else if let Some(rest) = line.strip_prefix("***") {
                let marker = FastForward::new(self.current_parsing_frame, rest, studio_line);
                match self.fast_forwards.get(&self.current_parsing_frame) {
                    // A save-state marker is never demoted by a plain marker
                    // landing on the same frame.
                    Some(existing) if existing.save_state && !marker.save_state => {}
                    _ => {
                        self.fast_forwards.insert(self.current_parsing_frame, marker);
                    }
                }
            } else if line.starts_with('#') {
                self.fast_forward_comments.insert(
                    self.current_parsing_frame,
                    FastForward::new(self.current_parsing_frame, "", studio_line),
                );
                self.comments
                    .entry(path.to_path_buf())
                    .or_default()
                    .push(Comment {
                        file_path: path.to_path_buf(),
                        frame: self.current_parsing_frame,
                        file_line,
                        text: line.to_string(),
                    });
            } else {
                self.add_frames(line, studio_line, repeat_index, repeat_count, 0);
            }

            if top_level {
                studio_line += 1;
            }
        }

        // Label jumps can target the end of the script.
        if top_level {
            self.fast_forward_comments.insert(
                self.current_parsing_frame,
                FastForward::new(self.current_parsing_frame, "", studio_line),
            );
        }
    }

    /// Records a registered command on the parsing frame and runs its
    /// parse-time handler. Returns true for `Play`, which must stop the
    /// current file so parsing continues only at its target.
    fn dispatch_command(
        &mut self,
        registry: &CommandRegistry,
        command_line: &CommandLine,
        line_text: &str,
        path: &Path,
        file_line: u32,
        studio_line: u32,
    ) -> bool {
        let Some(info) = registry.get(&command_line.name) else {
            self.abort.abort(format!(
                "Failed to parse command \"{line_text}\" at line {file_line} of the file \"{}\"",
                path.display()
            ));
            return false;
        };

        let command = Command {
            info,
            args: command_line.args.clone(),
            line_text: line_text.to_string(),
            file_path: path.to_path_buf(),
            file_line,
            studio_line,
            frame: self.current_parsing_frame,
        };
        let play = command.is("Play");

        self.commands
            .entry(self.current_parsing_frame)
            .or_default()
            .push(command.clone());

        if command.info.timing.contains(ExecuteTiming::PARSE) {
            if let Some(handler) = command.info.parse_handler().cloned() {
                let mut ctx = ParseContext {
                    controller: self,
                    registry,
                };
                handler(&mut ctx, &command);
            }
        }

        play
    }

    /// Parses a frame line and appends its expansion to the timeline. Lines
    /// that fail to parse are skipped.
    pub fn add_line(&mut self, line: &str, studio_line: u32) {
        self.add_frames(line, studio_line, 0, 0, 0);
    }

    fn add_frames(
        &mut self,
        line: &str,
        studio_line: u32,
        repeat_index: u32,
        repeat_count: u32,
        frame_offset: i32,
    ) {
        let Some(frame) =
            InputFrame::parse_with_repeat(line, studio_line, repeat_index, repeat_count, frame_offset)
        else {
            return;
        };
        for _ in 0..frame.frames {
            self.inputs.push(frame.clone());
        }
        self.current_parsing_frame += frame.frames;
    }

    /// Moves the cursor one frame forward, maintaining the within-line
    /// frame counter the editor displays.
    pub fn advance_cursor(&mut self) {
        let same_line = match (self.current(), self.previous()) {
            (Some(current), Some(previous)) => {
                current.line == previous.line
                    && current.repeat_index == previous.repeat_index
                    && current.frame_offset == previous.frame_offset
            }
            _ => false,
        };
        if self.current_frame_in_input == 0 || same_line {
            self.current_frame_in_input += 1;
        } else {
            self.current_frame_in_input = 1;
        }
        self.current_frame += 1;
    }

    /// Retargets playback at the next label marker past the cursor. A
    /// scripted marker that halts earlier keeps priority, so the run still
    /// breaks there first.
    pub fn fast_forward_to_next_label(&mut self) {
        self.next_label_fast_forward = None;
        let next = self
            .fast_forward_comments
            .range(self.current_frame + 1..)
            .next()
            .map(|(_, marker)| marker.clone());

        let scripted_halts_first = match (&next, self.current_fast_forward()) {
            (Some(next), Some(current)) => {
                current.frame > self.current_frame && next.frame > current.frame
            }
            _ => false,
        };
        if !scripted_halts_first {
            self.next_label_fast_forward = next;
        }
    }

    pub fn read_stack(&self) -> &[String] {
        &self.read_stack
    }

    pub fn push_read_stack(&mut self, detail: String) {
        self.read_stack.push(detail);
    }

    pub fn pop_read_stack(&mut self) {
        self.read_stack.pop();
    }

    /// Deep-copies the parsed tables and playback progress for a save state.
    /// The copy's save-state checksum is pinned to the cursor position; the
    /// copy does not watch files.
    pub fn clone_for_savestate(&self) -> InputController {
        let mut clone = InputController {
            file_path: self.file_path.clone(),
            inputs: self.inputs.clone(),
            commands: self.commands.clone(),
            fast_forwards: self.fast_forwards.clone(),
            fast_forward_comments: self.fast_forward_comments.clone(),
            comments: self.comments.clone(),
            next_label_fast_forward: None,
            abort: self.abort.clone(),
            used_files: self.used_files.clone(),
            needs_reload: Arc::new(AtomicBool::new(self.needs_reload.load(Ordering::SeqCst))),
            watcher: None,
            read_stack: self.read_stack.clone(),
            checksum: self.checksum.clone(),
            savestate_checksum: None,
            current_parsing_frame: self.current_parsing_frame,
            current_frame: self.current_frame,
            current_frame_in_input: self.current_frame_in_input,
        };
        clone.savestate_checksum = Some(clone.calc_checksum(clone.current_frame));
        clone
    }

    /// Restores parsed tables and playback progress from a snapshot. The
    /// watcher and the reload-flag identity stay with this controller, so
    /// file events keep landing after a restore.
    pub fn copy_from(&mut self, other: &InputController) {
        self.file_path = other.file_path.clone();
        self.inputs = other.inputs.clone();
        self.commands = other.commands.clone();
        self.fast_forwards = other.fast_forwards.clone();
        self.fast_forward_comments = other.fast_forward_comments.clone();
        self.comments = other.comments.clone();
        self.used_files = other.used_files.clone();
        self.needs_reload
            .store(other.needs_reload.load(Ordering::SeqCst), Ordering::SeqCst);
        self.checksum = other.checksum.clone();
        self.savestate_checksum = other.savestate_checksum.clone();
        self.current_parsing_frame = other.current_parsing_frame;
        self.current_frame = other.current_frame;
        self.current_frame_in_input = other.current_frame_in_input;
    }

    /// Rebuilds the file watcher over every file the parse consulted.
    fn start_watchers(&mut self) {
        let files: Vec<PathBuf> = self.used_files.iter().cloned().collect();
        match ScriptWatcher::new(&files, self.needs_reload.clone()) {
            Ok(watcher) => self.watcher = Some(watcher),
            Err(err) => log::warn!("Failed to watch script files: {err:#}"),
        }
    }

    fn stop_watchers(&mut self) {
        self.watcher = None;
    }
}
