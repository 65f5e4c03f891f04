//! The `Read` command: include another script file
//!
//! `Read, <file>[, <start>[, <end>]]` splices lines from another file into
//! the timeline at parse time. The file argument resolves relative to the
//! directory of the file containing the command, tolerates case mismatches
//! per path component and allows an optional suffix on the file name. Start
//! and end accept either 1-based line numbers or `#` labels.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::input::commands::{
    default_command_hash, stable_hash, AutoCompleteEntry, AutoCompleteProvider,
    AutoCompleteRequest, AutoCompleteSource, Command, CommandInfo, CommandRegistry, ExecuteTiming,
    ParseContext, VecSource,
};

pub fn register(registry: &mut CommandRegistry) {
    registry.register(
        CommandInfo::new("Read", ExecuteTiming::PARSE)
            .on_parse(read)
            .with_hash(read_hash)
            .with_auto_complete(ReadAutoComplete),
    );
}

fn read(ctx: &mut ParseContext<'_>, command: &Command) {
    let args = &command.args;
    if args.is_empty() {
        return;
    }

    let command_name = format!("Read, {}", args.join(", "));

    let mut file_directory = command
        .file_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    if file_directory.as_os_str().is_empty() {
        match std::env::current_dir() {
            Ok(dir) => file_directory = dir,
            Err(err) => {
                log::error!("Failed to get current directory for read command: {err}");
                return;
            }
        }
    }

    let path = match find_target_file(&command_name, &file_directory, &args[0]) {
        Ok(path) => path,
        Err(message) => {
            ctx.controller.abort.abort(message);
            return;
        }
    };

    let same_file = match (path.canonicalize(), command.file_path.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => path == command.file_path,
    };
    if same_file {
        ctx.controller.abort.abort(format!("\"{command_name}\" failed\nDo not allow reading the file itself"));
        return;
    }

    let mut start_line = 0;
    let mut end_line = u32::MAX;
    if args.len() > 1 {
        match try_get_line(&args[1], &path) {
            Some(line) => start_line = line,
            None => {
                ctx.controller.abort.abort(format!("\"{command_name}\" failed\n{} is invalid", args[1]));
                return;
            }
        }
        if args.len() > 2 {
            match try_get_line(&args[2], &path) {
                Some(line) => end_line = line,
                None => {
                    ctx.controller.abort.abort(format!("\"{command_name}\" failed\n{} is invalid", args[2]));
                    return;
                }
            }
        }
    }

    let detail = format!(
        "{command_name}: line {} of the file \"{}\"",
        command.file_line,
        command.file_path.display()
    );
    if ctx.controller.read_stack().contains(&detail) {
        log::error!(
            "Multiple read commands lead to dead loops:\n{}",
            ctx.controller.read_stack().join("\n")
        );
        ctx.controller.abort.abort("Multiple read commands lead to dead loops\nPlease check the log for more details");
        return;
    }

    ctx.controller.push_read_stack(detail);
    ctx.controller
        .read_file(ctx.registry, &path, start_line, end_line, command.studio_line);
    ctx.controller.pop_read_stack();
}

/// Resolves the file argument to an existing path. Checks the exact path
/// first, then retries per component ignoring case, and finally accepts a
/// unique file whose name merely starts with the requested stem, e.g.
/// `9D_04` for `9D_04_Curiosity.tas`.
fn find_target_file(
    command_name: &str,
    file_directory: &Path,
    target: &str,
) -> Result<PathBuf, String> {
    let mut target = target.to_string();
    if !target.ends_with(".tas") {
        target.push_str(".tas");
    }

    let direct = file_directory.join(&target);
    if direct.is_file() {
        return Ok(direct);
    }

    let components: Vec<&str> = target
        .split(|c| c == '/' || c == '\\')
        .filter(|component| !component.is_empty())
        .collect();
    if components.is_empty() {
        return Err(format!("\"{command_name}\" failed\nFile not found"));
    }

    let mut real_directory = file_directory.to_path_buf();
    for component in &components[..components.len() - 1] {
        let matches = matching_entries(&real_directory, component, true);
        match matches.len() {
            0 => {
                return Err(format!(
                    "\"{command_name}\" failed\nCouldn't find directory '{component}'"
                ))
            }
            1 => real_directory = real_directory.join(&matches[0]),
            _ => {
                return Err(format!(
                    "\"{command_name}\" failed\nAmbiguous match for directory '{component}'"
                ))
            }
        }
    }

    let file = components[components.len() - 1];
    let matches = matching_entries(&real_directory, file, false);
    if matches.len() > 1 {
        return Err(format!(
            "\"{command_name}\" failed\nAmbiguous match for file '{file}'"
        ));
    }
    if let Some(name) = matches.first() {
        let path = real_directory.join(name);
        if path.is_file() {
            return Ok(path);
        }
    }

    let stem = file.strip_suffix(".tas").unwrap_or(file);
    let suffix_matches = entries_with_stem_prefix(&real_directory, stem);
    match suffix_matches.len() {
        1 => Ok(real_directory.join(&suffix_matches[0])),
        0 => Err(format!("\"{command_name}\" failed\nFile not found")),
        _ => Err(format!(
            "\"{command_name}\" failed\nAmbiguous match for file '{file}'"
        )),
    }
}

fn matching_entries(directory: &Path, name: &str, want_dir: bool) -> Vec<OsString> {
    let mut out = Vec::new();
    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(_) => return out,
    };
    let wanted = name.to_lowercase();
    for entry in entries.flatten() {
        let is_dir = entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false);
        if is_dir != want_dir {
            continue;
        }
        let entry_name = entry.file_name();
        if entry_name.to_string_lossy().to_lowercase() == wanted {
            out.push(entry_name);
        }
    }
    out.sort();
    out
}

fn entries_with_stem_prefix(directory: &Path, stem: &str) -> Vec<OsString> {
    let mut out = Vec::new();
    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(_) => return out,
    };
    let wanted = stem.to_lowercase();
    for entry in entries.flatten() {
        let is_file = entry.file_type().map(|kind| kind.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        let entry_name = entry.file_name();
        if entry_name.to_string_lossy().to_lowercase().starts_with(&wanted) {
            out.push(entry_name);
        }
    }
    out.sort();
    out
}

/// Turns a line-number or label argument into a 1-based line. Labels match
/// `#` lines whose text equals the argument, ignoring surrounding whitespace.
pub(crate) fn try_get_line(label_or_line: &str, path: &Path) -> Option<u32> {
    if let Ok(number) = label_or_line.parse::<i32>() {
        return Some(number.max(0) as u32);
    }

    let content = std::fs::read_to_string(path).ok()?;
    for (i, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if let Some(rest) = line.strip_prefix('#') {
            if rest.trim() == label_or_line {
                return Some(i as u32 + 1);
            }
        }
    }
    None
}

/// A label the auto-complete offers: `#` immediately followed by text.
fn is_label(line: &str) -> bool {
    match line.strip_prefix('#') {
        Some(rest) => !rest.is_empty() && !rest.starts_with(char::is_whitespace),
        None => false,
    }
}

/// Directory part of a typed path argument, textual so the editor gets back
/// exactly what the user wrote.
fn arg_directory(arg: &str) -> &str {
    match arg.rfind(|c| c == '/' || c == '\\') {
        Some(i) => &arg[..i],
        None => "",
    }
}

/// Candidates refresh when anything that feeds them changes: earlier
/// arguments, the file being edited, or the directory being browsed.
fn read_hash(request: &AutoCompleteRequest) -> i32 {
    let mut hash = default_command_hash(&request.args);
    hash = hash
        .wrapping_mul(31)
        .wrapping_add(stable_hash(&request.file_path.display().to_string()).wrapping_mul(17));

    let first = match request.args.first() {
        Some(first) if !first.trim().is_empty() => first,
        _ => return hash,
    };
    let file_dir = match request.file_path.parent() {
        Some(dir) => dir,
        None => return hash,
    };

    let target = file_dir.join(arg_directory(first));
    if !target.is_dir() {
        return hash;
    }

    let mut fold = |names: Vec<OsString>| {
        for name in names {
            let path = target.join(&name);
            hash = hash
                .wrapping_mul(31)
                .wrapping_add(stable_hash(&path.display().to_string()).wrapping_mul(17));
        }
    };
    fold(directory_children(&target, true));
    fold(directory_children(&target, false));
    hash
}

fn directory_children(directory: &Path, want_dir: bool) -> Vec<OsString> {
    let mut out = Vec::new();
    if let Ok(entries) = std::fs::read_dir(directory) {
        for entry in entries.flatten() {
            let is_dir = entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false);
            if is_dir == want_dir {
                out.push(entry.file_name());
            }
        }
    }
    out.sort();
    out
}

struct ReadAutoComplete;

impl AutoCompleteProvider for ReadAutoComplete {
    fn entries(&self, request: &AutoCompleteRequest) -> Box<dyn AutoCompleteSource> {
        Box::new(VecSource::new(collect_entries(request)))
    }
}

fn collect_entries(request: &AutoCompleteRequest) -> Vec<AutoCompleteEntry> {
    let file_dir = match request.file_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        Some(_) => PathBuf::from("."),
        None => return Vec::new(),
    };

    match request.args.len() {
        1 => file_name_entries(&file_dir, &request.args[0]),
        2 | 3 => label_entries(&file_dir, &request.args),
        _ => Vec::new(),
    }
}

fn file_name_entries(file_dir: &Path, arg: &str) -> Vec<AutoCompleteEntry> {
    let sub_dir = arg_directory(arg);
    let target = if sub_dir.is_empty() {
        file_dir.to_path_buf()
    } else {
        file_dir.join(sub_dir)
    };
    if !target.is_dir() {
        return Vec::new();
    }

    let prefix = if sub_dir.is_empty() {
        String::new()
    } else {
        format!("{}/", sub_dir.replace('\\', "/"))
    };

    let mut entries = vec![AutoCompleteEntry::new("../").prefix(&prefix)];

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    if let Ok(read_dir) = std::fs::read_dir(&target) {
        for entry in read_dir.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.trim().is_empty() || name.starts_with('.') {
                continue;
            }
            match entry.file_type() {
                Ok(kind) if kind.is_dir() => dirs.push(name),
                Ok(kind) if kind.is_file() && name.ends_with(".tas") => files.push(name),
                _ => {}
            }
        }
    }
    dirs.sort();
    files.sort();

    for dir in dirs {
        entries.push(AutoCompleteEntry::new(format!("{dir}/")).prefix(&prefix));
    }
    for file in files {
        let stem = file.strip_suffix(".tas").unwrap_or(&file);
        entries.push(AutoCompleteEntry::new(stem).prefix(&prefix).done().then_next());
    }
    entries
}

fn label_entries(file_dir: &Path, args: &[String]) -> Vec<AutoCompleteEntry> {
    let full_path = file_dir.join(format!("{}.tas", args[0]));
    let content = match std::fs::read_to_string(&full_path) {
        Ok(content) => content,
        Err(_) => return Vec::new(),
    };

    // For the ending label only labels after the chosen starting one count.
    let mut after_starting_label = args.len() == 2;
    let mut entries = Vec::new();
    for line in content.lines() {
        if !is_label(line) {
            continue;
        }
        let label = &line[1..];
        if !after_starting_label {
            after_starting_label = label == args[1];
            continue;
        }
        let mut entry = AutoCompleteEntry::new(label).done();
        if args.len() == 2 {
            entry = entry.then_next();
        }
        entries.push(entry);
    }
    entries
}
