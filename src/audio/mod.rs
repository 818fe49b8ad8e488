//! Audio capture: one device callback feeding two independent consumers.
//!
//! The wake-word detector and the time-indexed ring buffer each need the
//! full captured stream, on their own schedule — the detector in fixed
//! frame-length chunks, the ring buffer in whatever chunk size the capture
//! callback happens to deliver. Rather than have one re-chunk for the
//! other, capture pushes every callback's samples into two independent
//! lock-free SPSC queues (`ringbuf`) and each reader drains its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;

mod cpal_backend;
pub use cpal_backend::CpalBackend;

pub mod synthetic;
pub use synthetic::SyntheticBackend;

pub mod thread;
pub use thread::AudioThreadHandle;

/// Target sample rate for capture (16 kHz mono, what the detector and ASR
/// contracts both require).
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Depth of each SPSC sample queue, in samples. Generous relative to the
/// expected drain rate (every ~32ms) so a momentarily slow reader doesn't
/// drop audio.
pub const SAMPLE_QUEUE_CAPACITY: usize = TARGET_SAMPLE_RATE as usize * 5;

type Producer16 = ringbuf::HeapProd<i16>;
type Consumer16 = ringbuf::HeapCons<i16>;

/// Producer-side handle shared by the capture backend. Pushes every
/// callback's samples into both the detector and ring-buffer queues.
#[derive(Clone)]
pub struct SampleSinks {
    detector: Arc<Mutex<Producer16>>,
    buffer: Arc<Mutex<Producer16>>,
    overflow_logged: Arc<AtomicBool>,
}

impl SampleSinks {
    /// Push a chunk of freshly captured samples to both queues. Never
    /// blocks; a full queue silently drops the overflow and logs once,
    /// per the "transient input errors: logged, loop continues" policy.
    pub fn push(&self, samples: &[i16]) {
        let mut dropped = false;
        if let Ok(mut prod) = self.detector.lock() {
            if prod.push_slice(samples) < samples.len() {
                dropped = true;
            }
        }
        if let Ok(mut prod) = self.buffer.lock() {
            if prod.push_slice(samples) < samples.len() {
                dropped = true;
            }
        }
        if dropped {
            if !self.overflow_logged.swap(true, Ordering::SeqCst) {
                log::warn!("sample queue overflow, dropping captured audio");
            }
        } else {
            self.overflow_logged.store(false, Ordering::SeqCst);
        }
    }
}

/// The two independent reader-side queues produced alongside [`SampleSinks`].
pub struct SampleQueues;

impl SampleQueues {
    /// Build a fresh pair of SPSC queues of `capacity` samples each and the
    /// shared producer handle that feeds both.
    pub fn new(capacity: usize) -> (SampleSinks, Consumer16, Consumer16) {
        let (detector_prod, detector_cons) = HeapRb::<i16>::new(capacity).split();
        let (buffer_prod, buffer_cons) = HeapRb::<i16>::new(capacity).split();
        let sinks = SampleSinks {
            detector: Arc::new(Mutex::new(detector_prod)),
            buffer: Arc::new(Mutex::new(buffer_prod)),
            overflow_logged: Arc::new(AtomicBool::new(false)),
        };
        (sinks, detector_cons, buffer_cons)
    }
}

/// Drain whatever is currently available from a consumer, without blocking.
pub fn drain_available(consumer: &mut Consumer16) -> Vec<i16> {
    let available = consumer.occupied_len();
    if available == 0 {
        return Vec::new();
    }
    let mut out = vec![0i16; available];
    consumer.pop_slice(&mut out);
    out
}

/// Errors that can occur during audio capture.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioCaptureError {
    NoDeviceAvailable,
    DeviceError(String),
    StreamError(String),
}

impl std::fmt::Display for AudioCaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioCaptureError::NoDeviceAvailable => write!(f, "no audio input device available"),
            AudioCaptureError::DeviceError(msg) => write!(f, "audio device error: {msg}"),
            AudioCaptureError::StreamError(msg) => write!(f, "audio stream error: {msg}"),
        }
    }
}

impl std::error::Error for AudioCaptureError {}

/// A pluggable audio capture backend. Production uses [`CpalBackend`]; tests
/// and the demo binary use [`SyntheticBackend`].
pub trait AudioCaptureBackend: Send {
    /// Start capturing, pushing every chunk to `sinks`. Returns the actual
    /// device sample rate, which must equal [`TARGET_SAMPLE_RATE`] for the
    /// rest of the pipeline to produce correct stream-time math.
    fn start(&mut self, sinks: SampleSinks) -> Result<u32, AudioCaptureError>;

    /// Stop capturing. Idempotent.
    fn stop(&mut self) -> Result<(), AudioCaptureError>;
}
