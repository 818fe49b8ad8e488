//! Wake-word detector adapter.
//!
//! The acoustic detector itself is an external black box (a Porcupine-style
//! keyword spotter, an always-on classifier, whatever the deployment picks).
//! This module only adapts its narrow interface to the rest of the pipeline:
//! feed it frames, turn a positive detection into a [`WakeWordEvent`] with a
//! correct stream-time window.

use crate::buffer::RingBuffer;

/// A single detected wake word, timestamped in stream time.
#[derive(Debug, Clone, PartialEq)]
pub struct WakeWordEvent {
    /// Display name of the recognized wake word (e.g. "Ok Sebas").
    pub name: String,
    /// Index into the detector's configured word list.
    pub word_index: usize,
    /// Stream-time start of the wake word utterance, in seconds.
    pub start: f64,
    /// Stream-time end of the wake word utterance, in seconds.
    pub end: f64,
    /// Stream-time at which this event was raised (>= `end`).
    pub emitted_at: f64,
    /// Category of wake word, as reported by the detector (e.g. "builtin",
    /// "custom"). `"unknown"` when the detector doesn't supply one.
    pub word_type: String,
}

/// Window used to derive `start` when the detector supplies no explicit
/// timestamps: `start = end - FALLBACK_WINDOW_SECS`.
const FALLBACK_WINDOW_SECS: f64 = 1.5;

/// Errors surfaced by the wake-word detector adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorError {
    /// The detector failed to initialize; this is fatal for the pipeline.
    InitFailed(String),
    /// A single frame failed to process; the frame is dropped and the
    /// detector keeps running.
    FrameFailed(String),
}

impl std::fmt::Display for DetectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorError::InitFailed(msg) => write!(f, "detector init failed: {msg}"),
            DetectorError::FrameFailed(msg) => write!(f, "detector frame failed: {msg}"),
        }
    }
}

impl std::error::Error for DetectorError {}

/// A detector hit: which configured word matched, with optional explicit
/// stream-time bounds. When the detector can't supply bounds itself, the
/// adapter falls back to `[now - 1.5s, now]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorHit {
    pub index: usize,
    pub name: String,
    pub start: Option<f64>,
    pub end: Option<f64>,
    /// Category of wake word, if the detector distinguishes one. Resolved
    /// to `"unknown"` on the adapted [`WakeWordEvent`] when absent.
    pub word_type: Option<String>,
}

/// The external wake-word engine's interface, as seen by this pipeline.
pub trait WakeDetector: Send {
    /// One-time setup (load a model, warm up, etc). Fatal on failure.
    fn initialize(&mut self) -> Result<(), DetectorError>;

    /// Number of samples the detector expects per call to [`process`].
    fn frame_length(&self) -> usize;

    /// Process exactly `frame_length()` samples of audio. Returns `Some`
    /// when a configured wake word was recognized in this frame.
    fn process(&mut self, frame: &[i16]) -> Result<Option<DetectorHit>, DetectorError>;

    /// Release any resources held by the detector.
    fn cleanup(&mut self);
}

/// Adapts a [`WakeDetector`] to the rest of the pipeline: turns detector
/// hits into timestamped [`WakeWordEvent`]s using the shared ring buffer's
/// stream clock.
pub struct WakeDetectorAdapter<D> {
    detector: D,
}

impl<D: WakeDetector> WakeDetectorAdapter<D> {
    pub fn new(detector: D) -> Self {
        Self { detector }
    }

    pub fn initialize(&mut self) -> Result<(), DetectorError> {
        self.detector.initialize()
    }

    pub fn frame_length(&self) -> usize {
        self.detector.frame_length()
    }

    pub fn cleanup(&mut self) {
        self.detector.cleanup();
    }

    /// Process one frame against the given buffer's current stream position,
    /// returning a fully-timestamped event on a hit.
    pub fn process(
        &mut self,
        frame: &[i16],
        buffer: &RingBuffer,
    ) -> Result<Option<WakeWordEvent>, DetectorError> {
        let hit = match self.detector.process(frame)? {
            Some(hit) => hit,
            None => return Ok(None),
        };

        let emitted_at = buffer.stream_position();
        let end = hit.end.unwrap_or(emitted_at);
        let start = hit.start.unwrap_or(end - FALLBACK_WINDOW_SECS);

        Ok(Some(WakeWordEvent {
            name: hit.name,
            word_index: hit.index,
            start,
            end,
            emitted_at,
            word_type: hit.word_type.unwrap_or_else(|| "unknown".to_string()),
        }))
    }
}

/// A deterministic stand-in for a real acoustic wake-word engine, used in
/// tests and the demo binary. A hit fires on a caller-scheduled frame index
/// rather than from any acoustic analysis.
#[derive(Debug, Default)]
pub struct ScriptedDetector {
    frame_length: usize,
    frames_seen: usize,
    schedule: Vec<(usize, DetectorHit)>,
    initialized: bool,
}

impl ScriptedDetector {
    pub fn new(frame_length: usize) -> Self {
        Self {
            frame_length,
            frames_seen: 0,
            schedule: Vec::new(),
            initialized: false,
        }
    }

    /// Fire `hit` the `at_frame`-th time `process` is called (0-indexed).
    pub fn schedule_hit(mut self, at_frame: usize, hit: DetectorHit) -> Self {
        self.schedule.push((at_frame, hit));
        self
    }
}

impl WakeDetector for ScriptedDetector {
    fn initialize(&mut self) -> Result<(), DetectorError> {
        self.initialized = true;
        Ok(())
    }

    fn frame_length(&self) -> usize {
        self.frame_length
    }

    fn process(&mut self, frame: &[i16]) -> Result<Option<DetectorHit>, DetectorError> {
        if !self.initialized {
            return Err(DetectorError::FrameFailed("not initialized".into()));
        }
        if frame.len() != self.frame_length {
            return Err(DetectorError::FrameFailed(format!(
                "expected frame of {} samples, got {}",
                self.frame_length,
                frame.len()
            )));
        }
        let current = self.frames_seen;
        self.frames_seen += 1;
        let hit = self
            .schedule
            .iter()
            .find(|(at, _)| *at == current)
            .map(|(_, hit)| hit.clone());
        Ok(hit)
    }

    fn cleanup(&mut self) {
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_hit_returns_none() {
        let mut adapter = WakeDetectorAdapter::new(ScriptedDetector::new(4));
        adapter.initialize().unwrap();
        let buffer = RingBuffer::new(1.0, 1000);
        buffer.push(&[0; 4]);
        assert_eq!(adapter.process(&[0; 4], &buffer).unwrap(), None);
    }

    #[test]
    fn hit_without_bounds_uses_fallback_window() {
        let detector = ScriptedDetector::new(4).schedule_hit(
            0,
            DetectorHit {
                index: 0,
                name: "Ok Sebas".into(),
                start: None,
                end: None,
                word_type: None,
            },
        );
        let mut adapter = WakeDetectorAdapter::new(detector);
        adapter.initialize().unwrap();

        let buffer = RingBuffer::new(10.0, 1000);
        buffer.push(&[0; 4000]); // stream position = 4.0s

        let event = adapter.process(&[0; 4], &buffer).unwrap().unwrap();
        assert_eq!(event.name, "Ok Sebas");
        assert_eq!(event.end, 4.0);
        assert_eq!(event.start, 4.0 - FALLBACK_WINDOW_SECS);
        assert_eq!(event.emitted_at, 4.0);
    }

    #[test]
    fn hit_with_explicit_bounds_is_preserved() {
        let detector = ScriptedDetector::new(4).schedule_hit(
            0,
            DetectorHit {
                index: 1,
                name: "Jarvis".into(),
                start: Some(1.0),
                end: Some(1.8),
                word_type: None,
            },
        );
        let mut adapter = WakeDetectorAdapter::new(detector);
        adapter.initialize().unwrap();
        let buffer = RingBuffer::new(10.0, 1000);
        let event = adapter.process(&[0; 4], &buffer).unwrap().unwrap();
        assert_eq!(event.start, 1.0);
        assert_eq!(event.end, 1.8);
    }

    #[test]
    fn missing_word_type_defaults_to_unknown() {
        let detector = ScriptedDetector::new(4).schedule_hit(
            0,
            DetectorHit {
                index: 0,
                name: "Ok Sebas".into(),
                start: Some(1.0),
                end: Some(1.8),
                word_type: None,
            },
        );
        let mut adapter = WakeDetectorAdapter::new(detector);
        adapter.initialize().unwrap();
        let buffer = RingBuffer::new(10.0, 1000);
        let event = adapter.process(&[0; 4], &buffer).unwrap().unwrap();
        assert_eq!(event.word_type, "unknown");
    }

    #[test]
    fn explicit_word_type_is_preserved() {
        let detector = ScriptedDetector::new(4).schedule_hit(
            0,
            DetectorHit {
                index: 0,
                name: "Ok Sebas".into(),
                start: Some(1.0),
                end: Some(1.8),
                word_type: Some("custom".into()),
            },
        );
        let mut adapter = WakeDetectorAdapter::new(detector);
        adapter.initialize().unwrap();
        let buffer = RingBuffer::new(10.0, 1000);
        let event = adapter.process(&[0; 4], &buffer).unwrap().unwrap();
        assert_eq!(event.word_type, "custom");
    }

    #[test]
    fn wrong_frame_length_is_a_frame_error_not_fatal() {
        let mut adapter = WakeDetectorAdapter::new(ScriptedDetector::new(4));
        adapter.initialize().unwrap();
        let buffer = RingBuffer::new(1.0, 1000);
        let err = adapter.process(&[0; 3], &buffer).unwrap_err();
        assert!(matches!(err, DetectorError::FrameFailed(_)));
    }
}
