//! The `Play` command: jump forward within the root file
//!
//! `Play, <start>[, <frames-to-wait>]` splices the root file's tail starting
//! at a label or line number into the timeline, optionally after a run of
//! empty wait frames. Only forward jumps are allowed, which keeps repeated
//! `Play` chains finite without loop bookkeeping.

use crate::input::commands::read::try_get_line;
use crate::input::commands::{
    stable_hash, AutoCompleteEntry, AutoCompleteProvider, AutoCompleteRequest, AutoCompleteSource,
    Command, CommandInfo, CommandRegistry, ExecuteTiming, ParseContext, VecSource,
};

pub fn register(registry: &mut CommandRegistry) {
    registry.register(
        CommandInfo::new("Play", ExecuteTiming::PARSE)
            .on_parse(play)
            .with_hash(play_hash)
            .with_auto_complete(PlayAutoComplete),
    );
}

fn play(ctx: &mut ParseContext<'_>, command: &Command) {
    let args = &command.args;
    let first = match args.first() {
        Some(first) => first.clone(),
        None => {
            ctx.controller.abort.abort("\"Play\" failed\nMissing starting label");
            return;
        }
    };

    let root_path = ctx.controller.file_path().to_path_buf();
    let start_line = match try_get_line(&first, &root_path) {
        Some(line) => line,
        None => {
            ctx.controller
                .abort
                .abort(format!("\"Play, {}\" failed\n{first} is invalid", args.join(", ")));
            return;
        }
    };

    // An integer second argument is a run of empty frames before the jump.
    if args.len() > 1 && args[1].parse::<i32>().is_ok() {
        ctx.controller.add_line(&args[1], command.studio_line);
    }

    if start_line <= command.studio_line + 1 {
        log::warn!("Play command does not allow playback from before the current line");
        return;
    }

    ctx.controller
        .read_file(ctx.registry, &root_path, start_line, u32::MAX, start_line - 1);
}

/// Candidates depend on the whole file text and the line being edited, since
/// only labels after the current line are legal targets.
fn play_hash(request: &AutoCompleteRequest) -> i32 {
    let contents = std::fs::read_to_string(&request.file_path).unwrap_or_default();
    stable_hash(&contents)
        .wrapping_mul(31)
        .wrapping_add((request.file_line as i32).wrapping_mul(17))
}

struct PlayAutoComplete;

impl AutoCompleteProvider for PlayAutoComplete {
    fn entries(&self, request: &AutoCompleteRequest) -> Box<dyn AutoCompleteSource> {
        Box::new(VecSource::new(collect_entries(request)))
    }
}

fn collect_entries(request: &AutoCompleteRequest) -> Vec<AutoCompleteEntry> {
    if request.args.len() != 1 {
        return Vec::new();
    }
    let content = match std::fs::read_to_string(&request.file_path) {
        Ok(content) => content,
        Err(_) => return Vec::new(),
    };

    // Labels at or before the current line are in the past.
    content
        .lines()
        .skip(request.file_line as usize)
        .filter_map(|line| {
            let rest = line.strip_prefix('#')?;
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return None;
            }
            Some(AutoCompleteEntry::new(rest).done())
        })
        .collect()
}
