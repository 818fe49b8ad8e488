//! Persistence interface for finalized transcription results.
//!
//! Durable storage is an external collaborator; the pipeline only needs a
//! place to hand a [`crate::scheduler::TranscriptionResult`] once it has
//! one. A simple in-memory sink is provided for tests and the demo binary.

use std::sync::Mutex;

use crate::scheduler::TranscriptionResult;

/// Errors surfaced when persisting a transcription result.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkError {
    WriteFailed(String),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::WriteFailed(msg) => write!(f, "failed to persist result: {msg}"),
        }
    }
}

impl std::error::Error for SinkError {}

/// A blocking persistence sink. Called once per transcription result,
/// typically most often for the `final` level.
pub trait TranscriptionSink: Send + Sync {
    fn insert(&self, result: &TranscriptionResult) -> Result<(), SinkError>;
}

/// An in-memory sink used by tests and as the demo binary's default when no
/// real store is wired up.
#[derive(Default)]
pub struct MemorySink {
    results: Mutex<Vec<TranscriptionResult>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<TranscriptionResult> {
        self.results.lock().expect("memory sink lock poisoned").clone()
    }
}

impl TranscriptionSink for MemorySink {
    fn insert(&self, result: &TranscriptionResult) -> Result<(), SinkError> {
        self.results
            .lock()
            .map_err(|_| SinkError::WriteFailed("lock poisoned".into()))?
            .push(result.clone());
        Ok(())
    }
}
