//! Event stream: the pipeline's primary observable interface.
//!
//! Every component reports what it does as a line-delimited JSON record
//! rather than through return values the caller must poll — `{wall_time,
//! event_type, data}` per record, written in submission order. Emission is
//! non-blocking from the producer's side: a bounded channel absorbs bursts,
//! and a dedicated thread does the actual (possibly slow) write.

use std::collections::BTreeMap;
use std::io::Write;
use std::thread::{self, JoinHandle};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};

/// Depth of the internal event channel. Generous enough to absorb a burst
/// of per-frame errors without blocking a reader thread.
const EVENT_CHANNEL_BUFFER_SIZE: usize = 256;

/// One event, tagged by type with its payload under `data`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum EventKind {
    System {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    WakeWordDetected {
        wake_word: String,
        stream_position: f64,
        start: f64,
        end: f64,
    },
    SessionStart {
        session_id: String,
        wake_word: String,
    },
    SilenceDetected {
        session_id: String,
        stream_position: f64,
    },
    TranscriptionStart {
        session_id: String,
        level: String,
        duration: f64,
    },
    TranscriptionResult {
        session_id: String,
        level: String,
        text: String,
        duration: f64,
        processing_time_ms: u64,
    },
    TranscriptionChanged {
        session_id: String,
        text: String,
        no_change_count: u32,
    },
    TranscriptionUnchanged {
        session_id: String,
        text: String,
        no_change_count: u32,
    },
    SessionEnd {
        session_id: String,
        all_levels: BTreeMap<String, String>,
    },
    /// Emitted the moment repetition finalizes a session, ahead of the
    /// `session_end` that still follows once its `final` result lands (or
    /// fails to).
    SessionEndByRepetition {
        session_id: String,
    },
    Error {
        worker: String,
        error: String,
    },
}

/// A fully-formed, serializable record: `{wall_time, event_type, data}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Record {
    pub wall_time: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Producer-side handle. Cheap to clone; every reader/session/worker thread
/// gets its own and emits independently.
#[derive(Clone)]
pub struct EventEmitter {
    sender: Sender<Record>,
}

impl EventEmitter {
    /// Build a bounded channel and return the producer handle alongside the
    /// receiver half, which the caller hands to [`spawn_writer`].
    pub fn channel() -> (Self, Receiver<Record>) {
        let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);
        (Self { sender }, receiver)
    }

    /// Emit an event stamped with the current wall-clock time. Never blocks:
    /// if the channel is full, the record is dropped and logged, since a
    /// backed-up event stream must never stall the pipeline itself.
    pub fn emit(&self, kind: EventKind) {
        let record = Record {
            wall_time: chrono::Utc::now().to_rfc3339(),
            kind,
        };
        if let Err(TrySendError::Full(_)) = self.sender.try_send(record) {
            log::warn!("event channel full, dropping record");
        }
    }
}

/// Drain `receiver` on the current thread, writing one JSON line per record
/// to `sink`. Intended to run on its own dedicated thread via
/// [`spawn_writer`]; uses `blocking_recv` so no Tokio runtime is required.
fn writer_loop(mut receiver: Receiver<Record>, mut sink: Box<dyn Write + Send>) {
    while let Some(record) = receiver.blocking_recv() {
        match serde_json::to_string(&record) {
            Ok(line) => {
                if writeln!(sink, "{line}").is_err() {
                    log::error!("event sink write failed, stopping event writer");
                    break;
                }
                let _ = sink.flush();
            }
            Err(err) => log::error!("failed to serialize event record: {err}"),
        }
    }
}

/// Spawn the dedicated writer thread that drains `receiver` to `sink` for
/// the lifetime of the returned handle's owner.
pub fn spawn_writer(receiver: Receiver<Record>, sink: Box<dyn Write + Send>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("event_writer".to_string())
        .spawn(move || writer_loop(receiver, sink))
        .expect("failed to spawn event writer thread")
}

/// A synchronous, in-memory sink for tests: collects every emitted record
/// without a writer thread or channel, useful for asserting on exact event
/// sequences produced by pipeline logic under test.
#[derive(Default)]
pub struct RecordingEmitter {
    records: std::sync::Mutex<Vec<Record>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, kind: EventKind) {
        let record = Record {
            wall_time: chrono::Utc::now().to_rfc3339(),
            kind,
        };
        self.records
            .lock()
            .expect("recording emitter lock poisoned")
            .push(record);
    }

    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .expect("recording emitter lock poisoned")
            .clone()
    }
}
