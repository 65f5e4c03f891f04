//! Determinism tracer
//!
//! Records a name→value bag for every played frame and compares completed
//! runs of the same script against each other. Two runs with an identical
//! checksum should produce identical traces; a divergence means the game
//! simulation is nondeterministic and the affected frame and field are
//! reported. Diagnostic only: a mismatch never halts playback.
//!
//! Completed traces are persisted as JSON under
//! `<trace_dir>/<script-stem>/<timestamp>.json`, with a `latest/` directory
//! that resets whenever the script checksum changes so stale traces do not
//! accumulate across edits.
//!
//! # Module Structure
//!
//! - [`compare`]: structural deep comparison with divergence paths

pub mod compare;

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Local;
use hashbrown::HashMap;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::host::GameHost;
use crate::input::controller::InputController;

pub use compare::{first_mismatch, Mismatch};

/// One recorded run: the script identity plus one value bag per frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TasTrace {
    pub checksum: String,
    /// Root script path with forward-slash separators, so artifacts compare
    /// across platforms.
    pub file_path: String,
    pub frames: Vec<Value>,
}

/// Callback contributing one named value per frame.
pub type TraceProvider = Box<dyn Fn(&dyn GameHost) -> Value>;

pub struct TasTracer {
    trace_dir: PathBuf,
    active: Option<TasTrace>,
    /// Sub-events recorded since the previous frame; drained into the next
    /// frame record.
    frame_history: Vec<Value>,
    providers: Vec<(&'static str, TraceProvider)>,
    /// Most recent completed trace per checksum.
    previous: HashMap<String, TasTrace>,
}

impl TasTracer {
    pub fn new(trace_dir: impl Into<PathBuf>) -> TasTracer {
        TasTracer {
            trace_dir: trace_dir.into(),
            active: None,
            frame_history: Vec::new(),
            providers: Vec::new(),
            previous: HashMap::new(),
        }
    }

    /// Registers a named per-frame value source, e.g. the player position.
    pub fn register_provider(
        &mut self,
        name: &'static str,
        provider: impl Fn(&dyn GameHost) -> Value + 'static,
    ) {
        self.providers.push((name, Box::new(provider)));
    }

    /// The run currently being recorded.
    pub fn active(&self) -> Option<&TasTrace> {
        self.active.as_ref()
    }

    /// Opens a trace for the controller's current script.
    pub fn begin_trace(&mut self, controller: &mut InputController) {
        self.frame_history.clear();
        self.active = Some(TasTrace {
            checksum: controller.checksum(),
            file_path: controller.file_path().to_string_lossy().replace('\\', "/"),
            frames: Vec::new(),
        });
    }

    /// Marks the start of a frame step, dropping events that leaked in
    /// between frames.
    pub fn begin_frame(&mut self) {
        self.frame_history.clear();
    }

    /// Buffers a sub-event for the frame currently being stepped.
    pub fn record_event(&mut self, event: Value) {
        if self.active.is_some() {
            self.frame_history.push(event);
        }
    }

    /// Records the frame the cursor just advanced past.
    pub fn trace_frame(&mut self, controller: &InputController, host: &dyn GameHost) {
        let Some(trace) = &mut self.active else {
            self.frame_history.clear();
            return;
        };

        let mut frame = Map::new();
        frame.insert(
            "Frame".into(),
            Value::String(
                controller
                    .previous()
                    .map(|input| input.to_string())
                    .unwrap_or_default(),
            ),
        );
        frame.insert("FrameOffset".into(), Value::from(controller.current_frame()));
        for (name, provider) in &self.providers {
            frame.insert((*name).into(), provider(host));
        }
        frame.insert(
            "FrameHistory".into(),
            Value::Array(std::mem::take(&mut self.frame_history)),
        );
        trace.frames.push(Value::Object(frame));
    }

    /// Closes the active trace. Aborted runs are discarded; completed runs
    /// are compared against the most recent run with the same checksum,
    /// persisted, and cached. Returns the first divergence, already logged.
    pub fn end_trace(&mut self, did_complete: bool) -> Option<Mismatch> {
        self.frame_history.clear();
        let trace = self.active.take()?;
        if !did_complete {
            return None;
        }

        let mismatch = self.compare_with_previous(&trace);
        if let Some(m) = &mismatch {
            log::warn!(
                "TAS nondeterminism detected! {}: expected {}, got {}",
                m.path,
                m.expected,
                m.actual
            );
        }
        if let Err(err) = self.persist(&trace) {
            log::warn!("Failed to persist trace: {err:#}");
        }
        self.previous.insert(trace.checksum.clone(), trace);
        mismatch
    }

    fn compare_with_previous(&self, trace: &TasTrace) -> Option<Mismatch> {
        let previous = self.previous.get(&trace.checksum)?;
        if previous.frames.len() != trace.frames.len() {
            return Some(Mismatch {
                path: "<trace_length_mismatch>".into(),
                expected: previous.frames.len().to_string(),
                actual: trace.frames.len().to_string(),
            });
        }
        previous
            .frames
            .iter()
            .zip(&trace.frames)
            .enumerate()
            .find_map(|(i, (expected, actual))| {
                first_mismatch(&format!("[{i}]"), expected, actual)
            })
    }

    fn persist(&self, trace: &TasTrace) -> anyhow::Result<()> {
        let stem = Path::new(&trace.file_path)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("script");
        let base = self.trace_dir.join(stem);
        let latest = base.join("latest");
        let checksum_path = latest.join("checksum.txt");

        if let Ok(existing) = std::fs::read_to_string(&checksum_path) {
            if existing.trim() != trace.checksum {
                std::fs::remove_dir_all(&latest)?;
            }
        }
        std::fs::create_dir_all(&latest)?;

        let file_name = format!("{}.json", Local::now().format("%Y-%m-%d_%H-%M-%S%.3f"));
        let json = serde_json::to_string_pretty(trace)?;
        std::fs::write(base.join(&file_name), &json)?;
        std::fs::write(latest.join(&file_name), &json)?;
        std::fs::write(&checksum_path, &trace.checksum)?;
        Ok(())
    }
}

impl fmt::Debug for TasTracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TasTracer")
            .field("trace_dir", &self.trace_dir)
            .field("active", &self.active.is_some())
            .field("providers", &self.providers.len())
            .field("cached_runs", &self.previous.len())
            .finish()
    }
}
