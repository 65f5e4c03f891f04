//! Script commands
//!
//! A command line is any line whose first token starts with a letter. The
//! token is resolved case-insensitively against the registry; hits are
//! recorded on the parsing frame and optionally executed at parse time, at
//! runtime when the cursor reaches their frame, or both. Misses raise a
//! parse error but do not stop the rest of the file from parsing.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::host::GameHost;
use crate::input::controller::InputController;
use crate::settings::TasSettings;

pub mod framerate;
pub mod play;
pub mod read;
pub mod time;

bitflags::bitflags! {
    /// When a command's handlers run.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExecuteTiming: u8 {
        /// While the script is being parsed, in file order.
        const PARSE = 1 << 0;
        /// When the playback cursor reaches the command's frame.
        const RUNTIME = 1 << 1;
    }
}

/// A command line split into name and arguments. Space and comma both
/// separate tokens; empty tokens are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub name: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Splits a trimmed line. Returns `None` unless the first token starts
    /// with a letter, which is what separates command lines from frame lines
    /// and markers.
    pub fn parse(line: &str) -> Option<CommandLine> {
        let mut tokens = line
            .split(|c: char| c == ' ' || c == ',')
            .map(str::trim)
            .filter(|token| !token.is_empty());

        let name = tokens.next()?.to_string();
        if !name.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
            return None;
        }

        Some(CommandLine {
            name,
            args: tokens.map(String::from).collect(),
        })
    }
}

/// Context for parse-time handlers. Handlers may parse further files through
/// the controller, so the registry rides along for recursive dispatch.
pub struct ParseContext<'a> {
    pub controller: &'a mut InputController,
    pub registry: &'a CommandRegistry,
}

/// Context for runtime handlers, invoked when the cursor reaches the
/// command's frame.
pub struct RuntimeContext<'a> {
    pub controller: &'a mut InputController,
    pub host: &'a mut dyn GameHost,
    pub settings: &'a TasSettings,
}

pub type ParseHandler = Arc<dyn Fn(&mut ParseContext<'_>, &Command) + Send + Sync>;
pub type RuntimeHandler = Arc<dyn Fn(&mut RuntimeContext<'_>, &Command) + Send + Sync>;
pub type HashProvider = Arc<dyn Fn(&AutoCompleteRequest) -> i32 + Send + Sync>;

/// Static description of a registered command.
pub struct CommandInfo {
    pub name: &'static str,
    pub timing: ExecuteTiming,
    /// Excluded from the script checksum when false, so editing the command
    /// does not look like a content change.
    pub calc_checksum: bool,
    /// Runtime execution stops after this command on the frame it fires,
    /// because it rewrote the timeline under the cursor.
    pub mutates_schedule: bool,
    parse: Option<ParseHandler>,
    runtime: Option<RuntimeHandler>,
    auto_complete: Option<Arc<dyn AutoCompleteProvider>>,
    hash: Option<HashProvider>,
}

impl CommandInfo {
    pub fn new(name: &'static str, timing: ExecuteTiming) -> Self {
        Self {
            name,
            timing,
            calc_checksum: true,
            mutates_schedule: false,
            parse: None,
            runtime: None,
            auto_complete: None,
            hash: None,
        }
    }

    pub fn no_checksum(mut self) -> Self {
        self.calc_checksum = false;
        self
    }

    pub fn schedule_mutating(mut self) -> Self {
        self.mutates_schedule = true;
        self
    }

    pub fn on_parse(
        mut self,
        handler: impl Fn(&mut ParseContext<'_>, &Command) + Send + Sync + 'static,
    ) -> Self {
        self.parse = Some(Arc::new(handler));
        self
    }

    pub fn on_runtime(
        mut self,
        handler: impl Fn(&mut RuntimeContext<'_>, &Command) + Send + Sync + 'static,
    ) -> Self {
        self.runtime = Some(Arc::new(handler));
        self
    }

    pub fn with_auto_complete(mut self, provider: impl AutoCompleteProvider + 'static) -> Self {
        self.auto_complete = Some(Arc::new(provider));
        self
    }

    pub fn with_hash(
        mut self,
        hash: impl Fn(&AutoCompleteRequest) -> i32 + Send + Sync + 'static,
    ) -> Self {
        self.hash = Some(Arc::new(hash));
        self
    }

    pub fn parse_handler(&self) -> Option<&ParseHandler> {
        self.parse.as_ref()
    }

    pub fn runtime_handler(&self) -> Option<&RuntimeHandler> {
        self.runtime.as_ref()
    }

    pub fn auto_complete_provider(&self) -> Option<&Arc<dyn AutoCompleteProvider>> {
        self.auto_complete.as_ref()
    }

    /// Auto-complete session hash. Commands without their own provider get
    /// the default, which covers every argument except the one being typed.
    pub fn auto_complete_hash(&self, request: &AutoCompleteRequest) -> i32 {
        match &self.hash {
            Some(hash) => hash(request),
            None => default_command_hash(&request.args),
        }
    }
}

impl fmt::Debug for CommandInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandInfo")
            .field("name", &self.name)
            .field("timing", &self.timing)
            .field("calc_checksum", &self.calc_checksum)
            .field("mutates_schedule", &self.mutates_schedule)
            .finish()
    }
}

/// A command recorded on the playback timeline.
#[derive(Clone)]
pub struct Command {
    pub info: Arc<CommandInfo>,
    pub args: Vec<String>,
    /// Raw line text as written in the script, fed into the checksum.
    pub line_text: String,
    pub file_path: PathBuf,
    /// 1-based line within `file_path`.
    pub file_line: u32,
    /// 0-based line in the root-file view.
    pub studio_line: u32,
    /// Playback frame the command fires on.
    pub frame: u32,
}

impl Command {
    pub fn is(&self, name: &str) -> bool {
        self.info.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.info.name)
            .field("args", &self.args)
            .field("frame", &self.frame)
            .field("file_line", &self.file_line)
            .finish()
    }
}

/// Case-insensitive command name lookup plus the registration-ordered list
/// sent to the companion editor.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    by_name: HashMap<String, Arc<CommandInfo>>,
    ordered: Vec<Arc<CommandInfo>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, info: CommandInfo) {
        let key = info.name.to_ascii_lowercase();
        let info = Arc::new(info);
        if self.by_name.insert(key, info.clone()).is_some() {
            log::warn!("Command '{}' registered twice; replacing", info.name);
            self.ordered.retain(|existing| !existing.name.eq_ignore_ascii_case(info.name));
        }
        self.ordered.push(info);
    }

    pub fn get(&self, name: &str) -> Option<Arc<CommandInfo>> {
        self.by_name.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.ordered.iter().map(|info| info.name).collect()
    }
}

/// Registers the built-in command set.
pub fn register_builtins(registry: &mut CommandRegistry) {
    read::register(registry);
    play::register(registry);
    framerate::register(registry);
    time::register(registry);
}

/// An auto-complete request forwarded from the companion editor.
#[derive(Debug, Clone)]
pub struct AutoCompleteRequest {
    /// Arguments typed so far, the last one possibly partial.
    pub args: Vec<String>,
    /// Root script file the command is being typed in.
    pub file_path: PathBuf,
    /// 1-based line being edited.
    pub file_line: u32,
}

/// One completion candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoCompleteEntry {
    pub name: String,
    /// Text the editor prepends before `name`, e.g. the directory part.
    pub prefix: String,
    /// Whether the argument is complete after inserting this entry.
    pub is_done: bool,
    /// Whether another argument follows, so the editor appends a separator.
    pub has_next: bool,
}

impl AutoCompleteEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: String::new(),
            is_done: false,
            has_next: false,
        }
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn done(mut self) -> Self {
        self.is_done = true;
        self
    }

    pub fn then_next(mut self) -> Self {
        self.has_next = true;
        self
    }
}

pub trait AutoCompleteProvider: Send + Sync {
    /// Opens an entry stream for the request. Called on a worker thread, so
    /// providers are free to hit the filesystem.
    fn entries(&self, request: &AutoCompleteRequest) -> Box<dyn AutoCompleteSource>;
}

/// Pull-based entry stream. Collection and transmission run on separate
/// workers, so entries are pulled one at a time and a faulty source only
/// loses the remainder of its own batch.
pub trait AutoCompleteSource: Send {
    fn next_entry(&mut self) -> anyhow::Result<Option<AutoCompleteEntry>>;
}

/// Source over a precomputed list.
pub struct VecSource {
    entries: std::vec::IntoIter<AutoCompleteEntry>,
}

impl VecSource {
    pub fn new(entries: Vec<AutoCompleteEntry>) -> Self {
        Self {
            entries: entries.into_iter(),
        }
    }
}

impl AutoCompleteSource for VecSource {
    fn next_entry(&mut self) -> anyhow::Result<Option<AutoCompleteEntry>> {
        Ok(self.entries.next())
    }
}

/// Deterministic 32-bit string hash. Identical across processes and
/// platforms, unlike the standard library hasher.
pub fn stable_hash(text: &str) -> i32 {
    let chars: Vec<char> = text.chars().collect();
    let mut hash1: i32 = 5381;
    let mut hash2: i32 = 5381;

    let mut i = 0;
    while i < chars.len() {
        hash1 = hash1.wrapping_shl(5).wrapping_add(hash1) ^ chars[i] as i32;
        if i + 1 >= chars.len() {
            break;
        }
        hash2 = hash2.wrapping_shl(5).wrapping_add(hash2) ^ chars[i + 1] as i32;
        i += 2;
    }

    hash1.wrapping_add(hash2.wrapping_mul(1566083941))
}

/// Default auto-complete session hash: every argument except the one being
/// typed, so candidates refresh when an earlier argument changes.
pub fn default_command_hash(args: &[String]) -> i32 {
    args[..args.len().saturating_sub(1)]
        .iter()
        .fold(17i32, |hash, arg| {
            hash.wrapping_mul(31)
                .wrapping_add(stable_hash(arg).wrapping_mul(17))
        })
}
