//! Diagnostic sinks
//!
//! Where quest diagnostics and script `print` output end up.

use std::sync::{Mutex, PoisonError};

use tracing::info;

/// Receives diagnostic messages from the quest system
pub trait LogSink: Send + Sync {
    fn log(&self, message: &str);
}

/// Forwards messages to `tracing` under the current span
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, message: &str) {
        info!(target: "quest_script::script", "{}", message);
    }
}

/// Keeps every message in arrival order
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all messages logged so far
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl LogSink for MemorySink {
    fn log(&self, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }
}
