//! Companion editor connection
//!
//! Hosts the TCP endpoint the companion editor attaches to. A background
//! thread accepts connections on localhost; per connection, a reader thread
//! decodes inbound frames and a writer thread flushes queued outbound frames,
//! so playback never blocks on the socket.
//!
//! Inbound messages are translated into [`StudioAction`]s on a queue that the
//! session drains once per meta update. The socket threads never touch
//! playback state directly.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context as _;

use crate::comm::protocol::{
    FRAME_HEADER_SIZE, GameDataRequest, MAX_FRAME_LEN, StudioMessage,
};
use crate::input::commands::{AutoCompleteEntry, AutoCompleteProvider, AutoCompleteRequest};
use crate::playback::hotkeys::HotkeyId;

/// Default port the companion editor dials.
pub const DEFAULT_STUDIO_PORT: u16 = 34729;

/// How often the auto-complete sender flushes a partial batch.
const AUTO_COMPLETE_BATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Hard limit on a single auto-complete collection. Past it the sender gives
/// up and finalizes with whatever was gathered.
const AUTO_COMPLETE_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval of the accept loop, which doubles as its shutdown latency.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An inbound editor message, rephrased as work for the session to perform on
/// the game thread.
#[derive(Debug, Clone)]
pub enum StudioAction {
    /// An editor attached; bindings and the command list should be re-sent.
    Connected,
    Disconnected,
    /// The editor selected a script file.
    SetFilePath(PathBuf),
    /// Remote hotkey edge. `active` is true on press, false on release.
    HotkeyOverride { id: HotkeyId, active: bool },
    GameData(GameDataRequest),
    /// Argument completion for `name`; answered asynchronously under `hash`.
    AutoComplete {
        hash: i32,
        name: String,
        request: AutoCompleteRequest,
    },
}

/// TCP endpoint for the companion editor. One editor at a time; a new
/// connection replaces the current one.
pub struct StudioServer {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
}

struct Shared {
    /// Bumped on every accepted connection, so a replaced connection's
    /// teardown cannot clobber its successor's state.
    generation: AtomicU64,
    connected: AtomicBool,
    shutdown: AtomicBool,
    actions: Mutex<Vec<StudioAction>>,
    /// Outbound frame queue of the current connection.
    writer: Mutex<Option<Sender<Vec<u8>>>>,
    /// Handle kept around to unblock the reader on replace or shutdown.
    stream: Mutex<Option<TcpStream>>,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            generation: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            actions: Mutex::new(Vec::new()),
            writer: Mutex::new(None),
            stream: Mutex::new(None),
        }
    }
}

impl StudioServer {
    /// Binds localhost and starts accepting editor connections. Pass port 0
    /// to let the OS pick one; [`StudioServer::local_addr`] reports it.
    pub fn start(port: u16) -> anyhow::Result<StudioServer> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .with_context(|| format!("failed to bind the companion port {port}"))?;
        listener
            .set_nonblocking(true)
            .context("failed to configure the companion listener")?;
        let local_addr = listener
            .local_addr()
            .context("failed to query the companion listener address")?;

        let shared = Arc::new(Shared::default());
        let accept_shared = shared.clone();
        thread::spawn(move || accept_loop(listener, accept_shared));

        log::info!("Listening for the companion editor on {local_addr}");
        Ok(StudioServer { shared, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Takes every action queued by the socket threads since the last call.
    pub fn drain_actions(&self) -> Vec<StudioAction> {
        let mut actions = lock(&self.shared.actions, "action queue");
        std::mem::take(&mut *actions)
    }

    /// Queues a message for the current connection. Returns false when no
    /// editor is attached; the message is dropped, not buffered.
    pub fn send(&self, message: &StudioMessage) -> bool {
        self.shared.send(message)
    }

    /// Answers an auto-complete request on worker threads: a collector pulls
    /// entries from the provider one at a time, and a sender flushes partial
    /// batches until the collector finishes or the hard timeout expires. The
    /// final batch always carries `is_done`, even when empty.
    pub fn spawn_auto_complete(
        &self,
        hash: i32,
        name: String,
        provider: Arc<dyn AutoCompleteProvider>,
        request: AutoCompleteRequest,
    ) {
        let entries: Arc<Mutex<Vec<AutoCompleteEntry>>> = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(AtomicBool::new(false));

        let collector_shared = self.shared.clone();
        let collector_entries = entries.clone();
        let collector_done = done.clone();
        let collector_name = name.clone();
        thread::spawn(move || {
            let mut source = provider.entries(&request);
            while collector_shared.connected.load(Ordering::SeqCst) {
                match source.next_entry() {
                    Ok(Some(entry)) => {
                        lock(&collector_entries, "auto-complete buffer").push(entry);
                    }
                    Ok(None) => break,
                    Err(err) => {
                        log::error!(
                            "Failed to collect auto-complete entries for {collector_name}: {err:#}"
                        );
                        break;
                    }
                }
            }
            collector_done.store(true, Ordering::SeqCst);
        });

        let sender_shared = self.shared.clone();
        thread::spawn(move || {
            let deadline = Instant::now() + AUTO_COMPLETE_TIMEOUT;
            while sender_shared.connected.load(Ordering::SeqCst)
                && !done.load(Ordering::SeqCst)
            {
                if Instant::now() >= deadline {
                    log::warn!("Auto-complete for {name} timed out; finalizing early");
                    break;
                }
                thread::sleep(AUTO_COMPLETE_BATCH_INTERVAL);

                let batch = {
                    let mut buffer = lock(&entries, "auto-complete buffer");
                    std::mem::take(&mut *buffer)
                };
                if batch.is_empty() {
                    continue;
                }
                let message = StudioMessage::CommandAutoComplete {
                    hash,
                    entries: batch.into_iter().map(Into::into).collect(),
                    is_done: false,
                };
                if !sender_shared.send(&message) {
                    return;
                }
            }

            let batch = {
                let mut buffer = lock(&entries, "auto-complete buffer");
                std::mem::take(&mut *buffer)
            };
            let message = StudioMessage::CommandAutoComplete {
                hash,
                entries: batch.into_iter().map(Into::into).collect(),
                is_done: true,
            };
            sender_shared.send(&message);
        });
    }
}

impl Drop for StudioServer {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        // Tell the editor the session is gone, then close the channel; the
        // writer drains queued frames before exiting.
        self.shared.send(&StudioMessage::Reset);
        self.shared.connected.store(false, Ordering::SeqCst);
        *lock(&self.shared.writer, "writer queue") = None;
        if let Some(stream) = lock(&self.shared.stream, "connection handle").take() {
            // Read half only: the write half stays open until the writer has
            // flushed the reset frame.
            let _ = stream.shutdown(Shutdown::Read);
        }
    }
}

impl Shared {
    fn send(&self, message: &StudioMessage) -> bool {
        let writer = lock(&self.writer, "writer queue");
        match writer.as_ref() {
            Some(frames) => frames.send(message.to_bytes()).is_ok(),
            None => false,
        }
    }

    fn push_action(&self, action: StudioAction) {
        lock(&self.actions, "action queue").push(action);
    }

    /// Installs a freshly accepted connection, replacing any current one.
    fn attach(self: &Arc<Self>, stream: TcpStream) {
        let writer_stream = match stream.try_clone() {
            Ok(clone) => clone,
            Err(err) => {
                log::warn!("Failed to clone the companion stream: {err}");
                return;
            }
        };
        let handle = match stream.try_clone() {
            Ok(clone) => clone,
            Err(err) => {
                log::warn!("Failed to clone the companion stream: {err}");
                return;
            }
        };

        if let Some(old) = lock(&self.stream, "connection handle").take() {
            let _ = old.shutdown(Shutdown::Both);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let (frames_tx, frames_rx) = channel();
        *lock(&self.writer, "writer queue") = Some(frames_tx);
        *lock(&self.stream, "connection handle") = Some(handle);

        // The connect notification must be queued before the reader can queue
        // decoded traffic, and before the connected flag becomes visible.
        self.push_action(StudioAction::Connected);
        self.connected.store(true, Ordering::SeqCst);

        let reader_shared = self.clone();
        thread::spawn(move || reader_loop(stream, reader_shared, generation));
        thread::spawn(move || writer_loop(writer_stream, frames_rx));
    }

    /// Tears down connection state when the reader exits, unless the
    /// connection was already replaced by a newer one.
    fn detach(&self, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        self.connected.store(false, Ordering::SeqCst);
        *lock(&self.writer, "writer queue") = None;
        if let Some(stream) = lock(&self.stream, "connection handle").take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.push_action(StudioAction::Disconnected);
        log::info!("Companion editor disconnected");
    }

    fn handle_message(&self, message: StudioMessage) {
        let action = match message {
            StudioMessage::FilePath(path) => {
                log::debug!("Companion editor selected {path}");
                StudioAction::SetFilePath(PathBuf::from(path))
            }
            StudioMessage::Hotkey { id, released } => StudioAction::HotkeyOverride {
                id,
                active: !released,
            },
            StudioMessage::RequestGameData(request) => StudioAction::GameData(request),
            StudioMessage::RequestCommandAutoComplete {
                hash,
                name,
                args,
                file_path,
                file_line,
            } => StudioAction::AutoComplete {
                hash,
                name,
                request: AutoCompleteRequest {
                    args,
                    file_path: PathBuf::from(file_path),
                    file_line,
                },
            },
            other => {
                log::warn!("Ignoring unexpected {:?} message from the editor", other.id());
                return;
            }
        };
        self.push_action(action);
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            return;
        }
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(err) = stream.set_nonblocking(false) {
                    log::warn!("Failed to configure the companion stream: {err}");
                    continue;
                }
                log::info!("Companion editor connected from {addr}");
                shared.attach(stream);
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) => {
                log::warn!("Failed to accept a companion connection: {err}");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

fn reader_loop(mut stream: TcpStream, shared: Arc<Shared>, generation: u64) {
    loop {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        if stream.read_exact(&mut header).is_err() {
            break;
        }
        let length = u32::from_le_bytes(header);
        if length == 0 || length > MAX_FRAME_LEN {
            log::warn!("Dropping the companion connection after a bad frame length {length}");
            break;
        }
        let mut body = vec![0u8; length as usize];
        if stream.read_exact(&mut body).is_err() {
            break;
        }
        match StudioMessage::from_frame_body(&body) {
            Ok(message) => shared.handle_message(message),
            Err(err) => log::warn!("Ignoring a malformed companion message: {err}"),
        }
    }
    shared.detach(generation);
}

fn writer_loop(mut stream: TcpStream, frames: Receiver<Vec<u8>>) {
    while let Ok(frame) = frames.recv() {
        if let Err(err) = stream.write_all(&frame) {
            log::debug!("Companion write failed: {err}");
            return;
        }
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::warn!("Companion {what} mutex poisoned; continuing");
        poisoned.into_inner()
    })
}
