//! Completion-time commands
//!
//! `FileTime` and `ChapterTime` mark where a finished run records its final
//! time; the `Midway` variants mark intermediate splits. Their presence also
//! decides whether a script counts as a draft: a draft has no completion
//! command anywhere and no midway command on its final frame. They are
//! excluded from the script checksum so updating a recorded time does not
//! read as a content change.

use crate::input::commands::{Command, CommandInfo, CommandRegistry, ExecuteTiming, RuntimeContext};

pub const FILE_TIME: &str = "FileTime";
pub const CHAPTER_TIME: &str = "ChapterTime";
pub const MIDWAY_FILE_TIME: &str = "MidwayFileTime";
pub const MIDWAY_CHAPTER_TIME: &str = "MidwayChapterTime";

/// Command names whose presence anywhere makes the script a finished run.
pub const COMPLETION_COMMANDS: &[&str] = &[FILE_TIME, CHAPTER_TIME];

/// Command names that mark the final frame of a finished run.
pub const MIDWAY_COMPLETION_COMMANDS: &[&str] = &[MIDWAY_FILE_TIME, MIDWAY_CHAPTER_TIME];

pub fn register(registry: &mut CommandRegistry) {
    for name in [FILE_TIME, MIDWAY_FILE_TIME] {
        registry.register(
            CommandInfo::new(name, ExecuteTiming::RUNTIME)
                .no_checksum()
                .on_runtime(record_file_time),
        );
    }
    for name in [CHAPTER_TIME, MIDWAY_CHAPTER_TIME] {
        registry.register(
            CommandInfo::new(name, ExecuteTiming::RUNTIME)
                .no_checksum()
                .on_runtime(record_chapter_time),
        );
    }
}

fn record_file_time(ctx: &mut RuntimeContext<'_>, command: &Command) {
    let time = ctx.host.file_time();
    if time.is_empty() {
        log::info!("{} reached at frame {}", command.info.name, command.frame);
    } else {
        log::info!("{}: {time}", command.info.name);
    }
}

fn record_chapter_time(ctx: &mut RuntimeContext<'_>, command: &Command) {
    let time = ctx.host.chapter_time();
    if time.is_empty() {
        log::info!("{} reached at frame {}", command.info.name, command.frame);
    } else {
        log::info!("{}: {time}", command.info.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_commands_skip_the_checksum() {
        let mut registry = CommandRegistry::default();
        register(&mut registry);

        for name in [FILE_TIME, CHAPTER_TIME, MIDWAY_FILE_TIME, MIDWAY_CHAPTER_TIME] {
            let info = registry.get(name).unwrap();
            assert!(!info.calc_checksum, "{name} must not affect the checksum");
            assert_eq!(info.timing, ExecuteTiming::RUNTIME);
        }
    }
}
