//! Multi-level transcription scheduling.
//!
//! Decides, once per control-loop tick, which sessions are due for another
//! transcription attempt at which level; holds the bounded, priority-aware
//! request queue those requests land in; and runs the fixed pool of worker
//! threads that actually call the ASR engine.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::asr::{AsrEngine, Segment};
use crate::buffer::RingBuffer;
use crate::config::LevelTable;
use crate::session::Session;

/// A request to transcribe `[start, end)` of stream time at a given level.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscribeRequest {
    pub session_id: String,
    pub level: String,
    pub start: f64,
    pub end: f64,
    pub priority: u8,
    pub requested_at: f64,
    pub wake_word: String,
    pub wake_word_type: String,
}

/// The outcome of one transcription attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionResult {
    pub session_id: String,
    pub level: String,
    pub text: String,
    pub segments: Vec<Segment>,
    pub start: f64,
    pub end: f64,
    pub requested_at: f64,
    pub completed_at: f64,
    pub wake_word: String,
    pub wake_word_type: String,
    pub language: String,
    pub audio_duration_s: f64,
}

/// Decide which of the session's fixed-duration levels are due at
/// `current_stream_pos`. A level is due once `current_stream_pos` has
/// advanced `duration_secs` past the wake word's end, and at least
/// `min_interval_secs()` has elapsed since that level was last requested
/// for this session.
pub fn due_requests(
    session: &Session,
    current_stream_pos: f64,
    levels: &LevelTable,
) -> Vec<TranscribeRequest> {
    let wake_end = session.wake_word.end;
    let mut due = Vec::new();

    for (name, level) in levels.iter() {
        let since_wake = current_stream_pos - wake_end;
        if since_wake < level.duration_secs {
            continue;
        }
        let last = session.last_level_request.get(name).copied();
        let ready = match last {
            Some(last_time) => current_stream_pos - last_time >= level.min_interval_secs(),
            None => true,
        };
        if !ready {
            continue;
        }

        let end = (wake_end + level.duration_secs).min(current_stream_pos);
        due.push(TranscribeRequest {
            session_id: session.id.clone(),
            level: name.to_string(),
            start: wake_end,
            end,
            priority: level.priority,
            requested_at: current_stream_pos,
            wake_word: session.wake_word.name.clone(),
            wake_word_type: session.wake_word.word_type.clone(),
        });
    }

    due
}

/// Build the `final` level's request, covering the whole session up to
/// observed silence — never up to "now", so repeated finalization attempts
/// (there should only ever be one) stay reproducible.
pub fn final_request(session: &Session, final_priority: u8, requested_at: f64) -> Option<TranscribeRequest> {
    let silence_start = session.silence_start?;
    Some(TranscribeRequest {
        session_id: session.id.clone(),
        level: crate::config::FINAL_LEVEL.to_string(),
        start: session.wake_word.end,
        end: silence_start,
        priority: final_priority,
        requested_at,
        wake_word: session.wake_word.name.clone(),
        wake_word_type: session.wake_word.word_type.clone(),
    })
}

/// Bounded request queue with priority-based eviction: when full, a new
/// request only displaces the current lowest-priority occupant, and only if
/// it outranks it. `final > long > medium > short` per [`LevelTable`]'s
/// priority assignment.
pub struct RequestQueue {
    capacity: usize,
    state: Mutex<VecDeque<TranscribeRequest>>,
    condvar: Condvar,
}

/// What happened to a request pushed onto a full-or-not queue.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Accepted,
    /// The new request displaced a lower-priority one, returned here.
    Evicted(TranscribeRequest),
    /// The queue was full of equal-or-higher priority work; the new
    /// request itself was dropped.
    Dropped,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
        }
    }

    pub fn push(&self, request: TranscribeRequest) -> PushOutcome {
        let mut queue = self.state.lock().expect("request queue lock poisoned");
        if queue.len() < self.capacity {
            queue.push_back(request);
            self.condvar.notify_one();
            return PushOutcome::Accepted;
        }

        let min_idx = queue
            .iter()
            .enumerate()
            .min_by_key(|(_, r)| r.priority)
            .map(|(i, _)| i)
            .expect("queue full implies non-empty");

        if queue[min_idx].priority < request.priority {
            let dropped = queue.remove(min_idx).expect("index from this queue");
            queue.push_back(request);
            self.condvar.notify_one();
            PushOutcome::Evicted(dropped)
        } else {
            PushOutcome::Dropped
        }
    }

    /// Block up to `timeout` for a request to become available.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<TranscribeRequest> {
        let queue = self.state.lock().expect("request queue lock poisoned");
        let (mut queue, _) = self
            .condvar
            .wait_timeout_while(queue, timeout, |q| q.is_empty())
            .expect("request queue lock poisoned");
        queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("request queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one worker's attempt to service a request, forwarded to
/// whoever is tracking session/transcription state and emitting events.
pub enum WorkItem {
    Completed(TranscriptionResult),
    /// Extraction or transcription failed; the request is dropped, the
    /// session is unaffected.
    Failed {
        request: TranscribeRequest,
        reason: String,
    },
}

/// Fixed pool of OS threads draining a [`RequestQueue`], each performing a
/// blocking extract-then-transcribe for every request it pops.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        num_workers: usize,
        queue: Arc<RequestQueue>,
        buffer: Arc<RingBuffer>,
        asr: Arc<dyn AsrEngine>,
        results_tx: Sender<WorkItem>,
        running: Arc<AtomicBool>,
        language: String,
    ) -> Self {
        let handles = (0..num_workers)
            .map(|worker_id| {
                let queue = Arc::clone(&queue);
                let buffer = Arc::clone(&buffer);
                let asr = Arc::clone(&asr);
                let results_tx = results_tx.clone();
                let running = Arc::clone(&running);
                let language = language.clone();
                thread::Builder::new()
                    .name(format!("worker[{worker_id}]"))
                    .spawn(move || worker_loop(&queue, &buffer, &asr, &results_tx, &running, &language))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self { handles }
    }

    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    queue: &RequestQueue,
    buffer: &RingBuffer,
    asr: &Arc<dyn AsrEngine>,
    results_tx: &Sender<WorkItem>,
    running: &AtomicBool,
    language: &str,
) {
    while running.load(Ordering::SeqCst) {
        let request = match queue.pop_timeout(Duration::from_millis(100)) {
            Some(r) => r,
            None => continue,
        };

        let samples = match buffer.extract(request.start, request.end) {
            Some(samples) => samples,
            None => {
                let _ = results_tx.send(WorkItem::Failed {
                    reason: "segment unavailable".to_string(),
                    request,
                });
                continue;
            }
        };

        let completed_at = buffer.stream_position();
        let audio_duration_s = samples.len() as f64 / buffer.sample_rate() as f64;
        match asr.transcribe(&samples) {
            Ok(transcription) => {
                let _ = results_tx.send(WorkItem::Completed(TranscriptionResult {
                    session_id: request.session_id,
                    level: request.level,
                    text: transcription.text,
                    segments: transcription.segments,
                    start: request.start,
                    end: request.end,
                    requested_at: request.requested_at,
                    completed_at,
                    wake_word: request.wake_word,
                    wake_word_type: request.wake_word_type,
                    language: language.to_string(),
                    audio_duration_s,
                }));
            }
            Err(err) => {
                let _ = results_tx.send(WorkItem::Failed {
                    reason: err.to_string(),
                    request,
                });
            }
        }
    }
}
