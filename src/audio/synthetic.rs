//! Hardware-free capture backend for tests and the demo binary.
//!
//! Generates deterministic audio on a background thread instead of reading
//! a microphone, so the rest of the pipeline can be exercised without real
//! hardware or a model. Useful with [`crate::asr::ScriptedAsr`] and
//! [`crate::detector::ScriptedDetector`] for end-to-end demos.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{AudioCaptureBackend, AudioCaptureError, SampleSinks, TARGET_SAMPLE_RATE};

/// One chunk worth of samples to generate, repeating for as long as capture
/// runs. `silence()` and `tone()` cover the common cases; callers can also
/// supply an arbitrary fixed waveform.
#[derive(Debug, Clone)]
pub enum Waveform {
    Silence,
    /// A constant-amplitude square wave, loud enough to clear the default
    /// silence threshold — stands in for speech.
    Tone { amplitude: i16 },
}

/// Generates `waveform` continuously at [`TARGET_SAMPLE_RATE`] until stopped.
pub struct SyntheticBackend {
    waveform: Waveform,
    chunk_samples: usize,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SyntheticBackend {
    pub fn new(waveform: Waveform, chunk_samples: usize) -> Self {
        Self {
            waveform,
            chunk_samples,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl AudioCaptureBackend for SyntheticBackend {
    fn start(&mut self, sinks: SampleSinks) -> Result<u32, AudioCaptureError> {
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let waveform = self.waveform.clone();
        let chunk_samples = self.chunk_samples;

        let chunk: Vec<i16> = match waveform {
            Waveform::Silence => vec![0; chunk_samples],
            Waveform::Tone { amplitude } => (0..chunk_samples)
                .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
                .collect(),
        };

        let chunk_duration =
            Duration::from_secs_f64(chunk_samples as f64 / TARGET_SAMPLE_RATE as f64);

        let handle = thread::Builder::new()
            .name("synthetic_capture".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    sinks.push(&chunk);
                    thread::sleep(chunk_duration);
                }
            })
            .expect("failed to spawn synthetic capture thread");

        self.handle = Some(handle);
        Ok(TARGET_SAMPLE_RATE)
    }

    fn stop(&mut self) -> Result<(), AudioCaptureError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}
