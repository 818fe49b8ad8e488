//! Speech-to-text engine interface.
//!
//! The real transcription engine (Whisper, Parakeet, a cloud API, whatever
//! the deployment picks) is an external black box. This module only defines
//! the blocking call surface the scheduler's worker threads use to reach it.

/// Errors surfaced by an [`AsrEngine`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum AsrError {
    /// The engine has no model loaded and cannot transcribe.
    NotReady,
    /// The engine rejected the audio (wrong sample rate, empty, etc).
    InvalidAudio(String),
    /// Transcription itself failed.
    TranscriptionFailed(String),
}

impl std::fmt::Display for AsrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AsrError::NotReady => write!(f, "ASR engine not ready"),
            AsrError::InvalidAudio(msg) => write!(f, "invalid audio for transcription: {msg}"),
            AsrError::TranscriptionFailed(msg) => write!(f, "transcription failed: {msg}"),
        }
    }
}

impl std::error::Error for AsrError {}

/// One segment of a transcription, timestamped relative to the start of the
/// audio handed to [`AsrEngine::transcribe`] (not to session or stream time —
/// the caller adds its own request offset when it needs an absolute range).
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub start_rel: f64,
    pub end_rel: f64,
    pub text: String,
}

/// The full result of one transcription call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Transcription {
    pub text: String,
    pub segments: Vec<Segment>,
}

/// A blocking speech-to-text engine. Every method is called from a worker
/// thread and is expected to block for the duration of inference.
pub trait AsrEngine: Send + Sync {
    /// Transcribe 16kHz mono int16 samples.
    fn transcribe(&self, samples: &[i16]) -> Result<Transcription, AsrError>;
}

/// A deterministic stand-in ASR engine for tests and the demo binary.
///
/// Wraps a caller-provided closure that only produces text, so tests can
/// assert on the exact text a given segment produces without depending on
/// real model weights. Its `Transcription`s always carry an empty segment
/// list; [`ScriptedAsr::with_segments`] is for tests that need segments too.
pub struct ScriptedAsr<F> {
    transcribe_fn: F,
}

impl<F> ScriptedAsr<F>
where
    F: Fn(&[i16]) -> Result<String, AsrError> + Send + Sync,
{
    pub fn new(transcribe_fn: F) -> Self {
        Self { transcribe_fn }
    }
}

impl<F> AsrEngine for ScriptedAsr<F>
where
    F: Fn(&[i16]) -> Result<String, AsrError> + Send + Sync,
{
    fn transcribe(&self, samples: &[i16]) -> Result<Transcription, AsrError> {
        if samples.is_empty() {
            return Err(AsrError::InvalidAudio("empty segment".into()));
        }
        let text = (self.transcribe_fn)(samples)?;
        Ok(Transcription {
            text,
            segments: Vec::new(),
        })
    }
}

/// Like [`ScriptedAsr`], but the closure produces the full [`Transcription`]
/// (including segments) instead of bare text.
pub struct ScriptedAsrWithSegments<F> {
    transcribe_fn: F,
}

impl<F> ScriptedAsrWithSegments<F>
where
    F: Fn(&[i16]) -> Result<Transcription, AsrError> + Send + Sync,
{
    pub fn new(transcribe_fn: F) -> Self {
        Self { transcribe_fn }
    }
}

impl<F> AsrEngine for ScriptedAsrWithSegments<F>
where
    F: Fn(&[i16]) -> Result<Transcription, AsrError> + Send + Sync,
{
    fn transcribe(&self, samples: &[i16]) -> Result<Transcription, AsrError> {
        if samples.is_empty() {
            return Err(AsrError::InvalidAudio("empty segment".into()));
        }
        (self.transcribe_fn)(samples)
    }
}
