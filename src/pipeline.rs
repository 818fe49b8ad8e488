//! Wires the capture, detection, session, scheduling, and event components
//! into one running pipeline.
//!
//! Each concern gets its own named thread, matching the rest of the
//! codebase's dedicated-thread-per-concern style: `wake_reader` turns raw
//! frames into wake-word events, `buffer_reader` feeds the ring buffer and
//! drives per-session silence detection, `session_driver` handles timeouts
//! and dispatches the `final` level, `scheduler_tick` fans out fixed-level
//! requests, and the worker pool (owned by [`crate::scheduler::WorkerPool`])
//! actually calls the ASR engine. Only initialization failures and an
//! explicit [`Pipeline::shutdown`] call end the process; everything else is
//! recovered locally and reported as an `error` event.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver as StdReceiver};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::asr::AsrEngine;
use crate::audio::{AudioCaptureBackend, AudioThreadHandle, SampleQueues};
use crate::buffer::RingBuffer;
use crate::config::Config;
use crate::detector::{DetectorError, WakeDetector, WakeDetectorAdapter};
use crate::events::{EventEmitter, EventKind};
use crate::scheduler::{self, PushOutcome, RequestQueue, WorkItem, WorkerPool};
use crate::session::{FinalizeReason, SessionManager};
use crate::silence::{SilenceDetectionResult, SilenceMonitor};
use crate::sink::TranscriptionSink;

/// Poll granularity for every reader/driver thread's shutdown check.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Fatal errors that prevent the pipeline from reaching `ready`.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("detector initialization failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("audio initialization failed: {0}")]
    Audio(crate::audio::AudioCaptureError),
}

/// Per-session bookkeeping the pipeline needs that doesn't belong on
/// [`crate::session::Session`] itself (it's assembled from event handling
/// rather than being part of the session state machine).
#[derive(Default)]
struct SessionBookkeeping {
    silence_monitors: HashMap<String, SilenceMonitor>,
    levels_seen: HashMap<String, BTreeMap<String, String>>,
    final_requested: HashSet<String>,
}

/// A running pipeline. Holds every handle needed to shut it down cleanly.
pub struct Pipeline {
    running: Arc<AtomicBool>,
    audio_thread: AudioThreadHandle,
    worker_pool: Option<WorkerPool>,
    reader_threads: Vec<JoinHandle<()>>,
    events: EventEmitter,
}

impl Pipeline {
    /// Initialize and start every component. Returns `Err` only for
    /// detector or audio device initialization failures; both are fatal
    /// because the pipeline can never reach `ready` without them.
    pub fn start<D, A, S>(
        config: Config,
        detector: D,
        asr: A,
        sink: S,
        audio_backend: Box<dyn AudioCaptureBackend>,
        events: EventEmitter,
    ) -> Result<Self, PipelineError>
    where
        D: WakeDetector + 'static,
        A: AsrEngine + 'static,
        S: TranscriptionSink + 'static,
    {
        events.emit(EventKind::System {
            status: "initializing".to_string(),
            detail: None,
        });

        let mut adapter = WakeDetectorAdapter::new(detector);
        adapter
            .initialize()
            .map_err(PipelineError::Detector)?;

        let buffer = Arc::new(RingBuffer::new(config.buffer_seconds, config.sample_rate));
        let (sinks, detector_cons, buffer_cons) =
            SampleQueues::new(crate::audio::SAMPLE_QUEUE_CAPACITY);

        let audio_thread = AudioThreadHandle::spawn(audio_backend);
        audio_thread
            .start(sinks)
            .map_err(|err| PipelineError::Audio(crate::audio::AudioCaptureError::StreamError(err.to_string())))?;

        let running = Arc::new(AtomicBool::new(true));
        let session_manager = Arc::new(Mutex::new(SessionManager::new(config.repetition_limit)));
        let bookkeeping = Arc::new(Mutex::new(SessionBookkeeping::default()));
        let queue = Arc::new(RequestQueue::new(config.queue_capacity));
        let asr: Arc<dyn AsrEngine> = Arc::new(asr);
        let sink: Arc<dyn TranscriptionSink> = Arc::new(sink);

        let (results_tx, results_rx) = mpsc::channel();
        let worker_pool = WorkerPool::spawn(
            config.num_workers,
            Arc::clone(&queue),
            Arc::clone(&buffer),
            Arc::clone(&asr),
            results_tx,
            Arc::clone(&running),
            config.language.clone(),
        );

        let mut reader_threads = Vec::new();

        reader_threads.push(spawn_wake_reader(
            adapter,
            detector_cons,
            Arc::clone(&buffer),
            Arc::clone(&session_manager),
            Arc::clone(&bookkeeping),
            events.clone(),
            Arc::clone(&running),
            config.clone(),
        ));

        reader_threads.push(spawn_buffer_reader(
            buffer_cons,
            Arc::clone(&buffer),
            Arc::clone(&session_manager),
            Arc::clone(&bookkeeping),
            events.clone(),
            Arc::clone(&running),
            config.clone(),
        ));

        reader_threads.push(spawn_session_driver(
            Arc::clone(&session_manager),
            Arc::clone(&bookkeeping),
            Arc::clone(&buffer),
            Arc::clone(&queue),
            events.clone(),
            Arc::clone(&running),
            config.clone(),
        ));

        reader_threads.push(spawn_scheduler_tick(
            Arc::clone(&session_manager),
            Arc::clone(&buffer),
            Arc::clone(&queue),
            events.clone(),
            Arc::clone(&running),
            config.clone(),
        ));

        reader_threads.push(spawn_result_handler(
            results_rx,
            Arc::clone(&session_manager),
            Arc::clone(&bookkeeping),
            Arc::clone(&queue),
            sink,
            events.clone(),
            Arc::clone(&running),
        ));

        events.emit(EventKind::System {
            status: "ready".to_string(),
            detail: None,
        });

        Ok(Self {
            running,
            audio_thread,
            worker_pool: Some(worker_pool),
            reader_threads,
            events,
        })
    }

    /// Stop every thread and the audio device. Blocks until all workers
    /// and reader threads have exited.
    pub fn shutdown(mut self) {
        self.events.emit(EventKind::System {
            status: "shutting_down".to_string(),
            detail: None,
        });
        self.running.store(false, Ordering::SeqCst);
        let _ = self.audio_thread.stop();
        let _ = self.audio_thread.shutdown();

        for handle in self.reader_threads.drain(..) {
            let _ = handle.join();
        }
        if let Some(pool) = self.worker_pool.take() {
            pool.join();
        }
        self.events.emit(EventKind::System {
            status: "stopped".to_string(),
            detail: None,
        });
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_wake_reader<D: WakeDetector + 'static>(
    mut adapter: WakeDetectorAdapter<D>,
    mut detector_cons: ringbuf::HeapCons<i16>,
    buffer: Arc<RingBuffer>,
    session_manager: Arc<Mutex<SessionManager>>,
    bookkeeping: Arc<Mutex<SessionBookkeeping>>,
    events: EventEmitter,
    running: Arc<AtomicBool>,
    config: Config,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("wake_reader".to_string())
        .spawn(move || {
            let frame_len = adapter.frame_length();
            let mut pending = Vec::new();
            while running.load(Ordering::SeqCst) {
                pending.extend(crate::audio::drain_available(&mut detector_cons));
                if pending.len() < frame_len {
                    thread::sleep(SHUTDOWN_POLL);
                    continue;
                }
                while pending.len() >= frame_len {
                    let frame: Vec<i16> = pending.drain(..frame_len).collect();
                    match adapter.process(&frame, &buffer) {
                        Ok(Some(event)) => {
                            events.emit(EventKind::WakeWordDetected {
                                wake_word: event.name.clone(),
                                stream_position: event.emitted_at,
                                start: event.start,
                                end: event.end,
                            });

                            let wall_ms = std::time::SystemTime::now()
                                .duration_since(std::time::UNIX_EPOCH)
                                .map(|d| d.as_millis())
                                .unwrap_or(0);

                            let mut manager = session_manager.lock().expect("session manager lock poisoned");
                            let id = manager.open(event.clone(), wall_ms);
                            drop(manager);

                            let monitor = SilenceMonitor::new(
                                event.end,
                                config.silence_threshold,
                                config.silence_duration_secs,
                                config.initial_silence_ignore_secs,
                            );
                            let mut book = bookkeeping.lock().expect("bookkeeping lock poisoned");
                            book.silence_monitors.insert(id.clone(), monitor);
                            book.levels_seen.insert(id.clone(), BTreeMap::new());
                            drop(book);

                            events.emit(EventKind::SessionStart {
                                session_id: id,
                                wake_word: event.name,
                            });
                        }
                        Ok(None) => {}
                        Err(DetectorError::FrameFailed(msg)) => {
                            events.emit(EventKind::Error {
                                worker: "wake_reader".to_string(),
                                error: msg,
                            });
                        }
                        Err(DetectorError::InitFailed(msg)) => {
                            events.emit(EventKind::Error {
                                worker: "wake_reader".to_string(),
                                error: format!("detector re-initialization failed: {msg}"),
                            });
                        }
                    }
                }
            }
            adapter.cleanup();
        })
        .expect("failed to spawn wake_reader thread")
}

#[allow(clippy::too_many_arguments)]
fn spawn_buffer_reader(
    mut buffer_cons: ringbuf::HeapCons<i16>,
    buffer: Arc<RingBuffer>,
    session_manager: Arc<Mutex<SessionManager>>,
    bookkeeping: Arc<Mutex<SessionBookkeeping>>,
    events: EventEmitter,
    running: Arc<AtomicBool>,
    config: Config,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("buffer_reader".to_string())
        .spawn(move || {
            while running.load(Ordering::SeqCst) {
                let chunk = crate::audio::drain_available(&mut buffer_cons);
                if chunk.is_empty() {
                    thread::sleep(SHUTDOWN_POLL);
                    continue;
                }
                for piece in chunk.chunks(config.chunk_size.max(1)) {
                    buffer.push(piece);
                    let chunk_end = buffer.stream_position();

                    let mut manager = session_manager.lock().expect("session manager lock poisoned");
                    let active = manager.active_ids();
                    let mut book = bookkeeping.lock().expect("bookkeeping lock poisoned");
                    for id in active {
                        let Some(monitor) = book.silence_monitors.get_mut(&id) else {
                            continue;
                        };
                        if let SilenceDetectionResult::Stop { stream_time } =
                            monitor.process(piece, chunk_end)
                        {
                            if manager.on_silence(&id, stream_time).is_some() {
                                events.emit(EventKind::SilenceDetected {
                                    session_id: id.clone(),
                                    stream_position: stream_time,
                                });
                            }
                        }
                    }
                }
            }
        })
        .expect("failed to spawn buffer_reader thread")
}

#[allow(clippy::too_many_arguments)]
fn spawn_session_driver(
    session_manager: Arc<Mutex<SessionManager>>,
    bookkeeping: Arc<Mutex<SessionBookkeeping>>,
    buffer: Arc<RingBuffer>,
    queue: Arc<RequestQueue>,
    events: EventEmitter,
    running: Arc<AtomicBool>,
    config: Config,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("session_driver".to_string())
        .spawn(move || {
            while running.load(Ordering::SeqCst) {
                let stream_pos = buffer.stream_position();
                let mut manager = session_manager.lock().expect("session manager lock poisoned");
                for id in manager.active_ids() {
                    manager.check_timeout(
                        &id,
                        stream_pos,
                        config.session_timeout_secs,
                        config.silence_duration_secs,
                    );
                }

                // Revisit every known session, not just the ones that were
                // still Active at the top of this tick: `on_silence` (buffer
                // reader) and `on_transcription_result` (result handler) move
                // a session to Finalizing from other threads between ticks,
                // and it must still get its `final` request dispatched.
                let mut book = bookkeeping.lock().expect("bookkeeping lock poisoned");
                for id in manager.all_ids() {
                    let Some(session) = manager.get(&id) else { continue };
                    if book.final_requested.contains(&id) {
                        continue;
                    }
                    let Some(request) =
                        scheduler::final_request(session, config.levels.final_priority(), stream_pos)
                    else {
                        continue;
                    };
                    book.final_requested.insert(id.clone());
                    events.emit(EventKind::TranscriptionStart {
                        session_id: id,
                        level: request.level.clone(),
                        duration: request.end - request.start,
                    });
                    if let PushOutcome::Dropped = queue.push(request) {
                        events.emit(EventKind::Error {
                            worker: "session_driver".to_string(),
                            error: "final request dropped: queue full of equal-or-higher priority work".to_string(),
                        });
                    }
                }
                drop(book);
                drop(manager);
                thread::sleep(SHUTDOWN_POLL);
            }
        })
        .expect("failed to spawn session_driver thread")
}

fn spawn_scheduler_tick(
    session_manager: Arc<Mutex<SessionManager>>,
    buffer: Arc<RingBuffer>,
    queue: Arc<RequestQueue>,
    events: EventEmitter,
    running: Arc<AtomicBool>,
    config: Config,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("scheduler_tick".to_string())
        .spawn(move || {
            while running.load(Ordering::SeqCst) {
                let stream_pos = buffer.stream_position();
                let mut manager = session_manager.lock().expect("session manager lock poisoned");
                for id in manager.active_ids() {
                    let Some(session) = manager.get(&id) else { continue };
                    let due = scheduler::due_requests(session, stream_pos, &config.levels);
                    for request in due {
                        manager.record_level_request(&id, &request.level, stream_pos);
                        events.emit(EventKind::TranscriptionStart {
                            session_id: request.session_id.clone(),
                            level: request.level.clone(),
                            duration: request.end - request.start,
                        });
                        if let PushOutcome::Dropped = queue.push(request) {
                            events.emit(EventKind::Error {
                                worker: "scheduler_tick".to_string(),
                                error: "request dropped: queue full of equal-or-higher priority work".to_string(),
                            });
                        }
                    }
                }
                drop(manager);
                thread::sleep(Duration::from_millis(config.scheduler_tick_ms));
            }
        })
        .expect("failed to spawn scheduler_tick thread")
}

fn spawn_result_handler(
    results_rx: StdReceiver<WorkItem>,
    session_manager: Arc<Mutex<SessionManager>>,
    bookkeeping: Arc<Mutex<SessionBookkeeping>>,
    queue: Arc<RequestQueue>,
    sink: Arc<dyn TranscriptionSink>,
    events: EventEmitter,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let _ = &queue; // reserved for future re-issue-on-failure policy
    thread::Builder::new()
        .name("result_handler".to_string())
        .spawn(move || {
            while running.load(Ordering::SeqCst) {
                let item = match results_rx.recv_timeout(SHUTDOWN_POLL) {
                    Ok(item) => item,
                    Err(_) => continue,
                };

                match item {
                    WorkItem::Completed(result) => {
                        events.emit(EventKind::TranscriptionResult {
                            session_id: result.session_id.clone(),
                            level: result.level.clone(),
                            text: result.text.clone(),
                            duration: result.end - result.start,
                            processing_time_ms: ((result.completed_at - result.requested_at).max(0.0)
                                * 1000.0) as u64,
                        });

                        let mut manager = session_manager.lock().expect("session manager lock poisoned");
                        let finalize_reason = manager.on_transcription_result(
                            &result.session_id,
                            &result.text,
                            result.completed_at,
                        );
                        let no_change_count = manager.last_no_change_count(&result.session_id).unwrap_or(0);
                        drop(manager);

                        if finalize_reason == Some(FinalizeReason::Repetition) {
                            events.emit(EventKind::SessionEndByRepetition {
                                session_id: result.session_id.clone(),
                            });
                        }

                        if no_change_count == 0 {
                            events.emit(EventKind::TranscriptionChanged {
                                session_id: result.session_id.clone(),
                                text: result.text.clone(),
                                no_change_count,
                            });
                        } else {
                            events.emit(EventKind::TranscriptionUnchanged {
                                session_id: result.session_id.clone(),
                                text: result.text.clone(),
                                no_change_count,
                            });
                        }

                        let mut book = bookkeeping.lock().expect("bookkeeping lock poisoned");
                        book.levels_seen
                            .entry(result.session_id.clone())
                            .or_default()
                            .insert(result.level.clone(), result.text.clone());

                        if result.level == crate::config::FINAL_LEVEL {
                            if let Err(err) = sink.insert(&result) {
                                events.emit(EventKind::Error {
                                    worker: "result_handler".to_string(),
                                    error: err.to_string(),
                                });
                            }
                            let all_levels = book
                                .levels_seen
                                .remove(&result.session_id)
                                .unwrap_or_default();
                            book.silence_monitors.remove(&result.session_id);
                            book.final_requested.remove(&result.session_id);
                            drop(book);

                            session_manager
                                .lock()
                                .expect("session manager lock poisoned")
                                .close(&result.session_id);
                            events.emit(EventKind::SessionEnd {
                                session_id: result.session_id,
                                all_levels,
                            });
                        }
                    }
                    WorkItem::Failed { request, reason } => {
                        events.emit(EventKind::Error {
                            worker: format!("worker[{}]", request.level),
                            error: reason,
                        });

                        // A failed fixed-duration level just misses that
                        // result; the session carries on. A failed `final`
                        // has nothing left to retry (its range is bounded by
                        // already-observed silence), so the session still
                        // ends, just without a final transcript.
                        if request.level == crate::config::FINAL_LEVEL {
                            let mut book =
                                bookkeeping.lock().expect("bookkeeping lock poisoned");
                            let all_levels = book
                                .levels_seen
                                .remove(&request.session_id)
                                .unwrap_or_default();
                            book.silence_monitors.remove(&request.session_id);
                            book.final_requested.remove(&request.session_id);
                            drop(book);

                            session_manager
                                .lock()
                                .expect("session manager lock poisoned")
                                .close(&request.session_id);
                            events.emit(EventKind::SessionEnd {
                                session_id: request.session_id,
                                all_levels,
                            });
                        }
                    }
                }
            }
        })
        .expect("failed to spawn result_handler thread")
}

/// Why a session was last observed to finalize; exposed for callers (e.g.
/// integration tests) that want to assert on it via the session manager
/// directly rather than only through the event stream.
pub type SessionFinalizeReason = FinalizeReason;
