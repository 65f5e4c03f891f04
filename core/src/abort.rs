//! Abort channel for fatal playback errors
//!
//! Parse and runtime failures can surface deep inside script parsing or
//! command execution, far from the playback state machine. They are recorded
//! here and polled once per tick; the state machine tears the run down on the
//! update after an abort is raised, while parsing is free to keep going and
//! surface further errors from the same pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Cloneable handle shared between the parser, command handlers and the
/// playback state machine. All clones observe the same abort state.
#[derive(Clone, Default)]
pub struct AbortChannel {
    inner: Arc<AbortInner>,
}

#[derive(Default)]
struct AbortInner {
    aborted: AtomicBool,
    messages: Mutex<Vec<String>>,
}

impl AbortChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fatal playback error and logs it. The run keeps going until
    /// the state machine polls the flag.
    pub fn abort(&self, message: impl Into<String>) {
        let message = message.into();
        log::error!("{message}");
        let mut messages = self.inner.messages.lock().unwrap_or_else(|e| {
            log::warn!("Abort channel mutex poisoned; continuing");
            e.into_inner()
        });
        messages.push(message);
        self.inner.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Clears the flag, returning whether an abort was pending.
    pub fn take(&self) -> bool {
        self.inner.aborted.swap(false, Ordering::SeqCst)
    }

    /// Drains every message recorded since the last call.
    pub fn drain_messages(&self) -> Vec<String> {
        let mut messages = self.inner.messages.lock().unwrap_or_else(|e| {
            log::warn!("Abort channel mutex poisoned; continuing");
            e.into_inner()
        });
        std::mem::take(&mut *messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_sets_flag_and_records_message() {
        let abort = AbortChannel::new();
        assert!(!abort.is_aborted());

        abort.abort("first failure");
        abort.abort("second failure");

        assert!(abort.is_aborted());
        assert_eq!(abort.drain_messages(), vec!["first failure", "second failure"]);
        assert!(abort.drain_messages().is_empty());
    }

    #[test]
    fn take_clears_the_flag() {
        let abort = AbortChannel::new();
        abort.abort("boom");

        assert!(abort.take());
        assert!(!abort.is_aborted());
        assert!(!abort.take());
    }

    #[test]
    fn clones_share_state() {
        let abort = AbortChannel::new();
        let clone = abort.clone();

        clone.abort("raised on the clone");
        assert!(abort.is_aborted());
    }
}
