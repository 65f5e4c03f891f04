//! Script file watcher
//!
//! Every file pulled into the timeline is watched while a script is loaded.
//! Changes only set the shared reload flag; the next tick notices it and
//! reparses. Uses the platform-native watcher backend when available and
//! falls back to polling every 500 ms.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hashbrown::HashSet;
use notify::{Config as NotifyConfig, Event, PollWatcher, RecursiveMode, Watcher};

/// Watches the parent directories of every script file and flips the reload
/// flag whenever one of the watched file names changes. Watching directories
/// instead of files survives editors that save via rename-and-replace.
pub struct ScriptWatcher {
    _watcher: Box<dyn Watcher + Send>,
}

impl fmt::Debug for ScriptWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptWatcher").finish_non_exhaustive()
    }
}

fn make_event_handler(
    filenames: Arc<HashSet<OsString>>,
    flag: Arc<AtomicBool>,
) -> impl Fn(std::result::Result<Event, notify::Error>) + Send + 'static {
    move |result| {
        if let Ok(event) = result {
            if !matches!(
                event.kind,
                notify::EventKind::Modify(_)
                    | notify::EventKind::Create(_)
                    | notify::EventKind::Remove(_)
            ) {
                return;
            }

            let matches_script = event
                .paths
                .iter()
                .any(|path| path.file_name().map(|name| filenames.contains(name)).unwrap_or(false));

            if matches_script {
                log::debug!("Script file changed; scheduling reload");
                flag.store(true, Ordering::SeqCst);
            }
        }
    }
}

impl ScriptWatcher {
    pub fn new(files: &[PathBuf], flag: Arc<AtomicBool>) -> Result<Self> {
        let mut filenames = HashSet::new();
        let mut directories: Vec<PathBuf> = Vec::new();
        for file in files {
            let canonical = file.canonicalize().unwrap_or_else(|_| file.clone());
            if let Some(name) = canonical.file_name() {
                filenames.insert(name.to_os_string());
            }
            if let Some(parent) = canonical.parent() {
                if !directories.iter().any(|dir| dir == parent) {
                    directories.push(parent.to_path_buf());
                }
            }
        }
        anyhow::ensure!(!filenames.is_empty(), "No script files to watch");

        let filenames = Arc::new(filenames);
        let mut watcher = Self::create_watcher(filenames, flag)?;
        for directory in &directories {
            if let Err(err) = watcher.watch(directory, RecursiveMode::NonRecursive) {
                log::warn!(
                    "Failed to watch script directory {}: {err}",
                    directory.display()
                );
            }
        }

        Ok(Self { _watcher: watcher })
    }

    /// Native backend first; polling when that is unavailable (containers,
    /// network filesystems).
    fn create_watcher(
        filenames: Arc<HashSet<OsString>>,
        flag: Arc<AtomicBool>,
    ) -> Result<Box<dyn Watcher + Send>> {
        match notify::recommended_watcher(make_event_handler(filenames.clone(), flag.clone())) {
            Ok(watcher) => {
                log::debug!("Script watcher: using native backend");
                Ok(Box::new(watcher))
            }
            Err(err) => {
                log::warn!(
                    "Script watcher: native backend unavailable ({err}); falling back to polling"
                );
                let poll = PollWatcher::new(
                    make_event_handler(filenames, flag),
                    NotifyConfig::default().with_poll_interval(Duration::from_millis(500)),
                )
                .context("Failed to create fallback poll watcher")?;
                Ok(Box::new(poll))
            }
        }
    }
}
