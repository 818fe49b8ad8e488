//! Centralized configuration for the listening pipeline.
//!
//! All tunables live here with the defaults carried over from the system
//! this pipeline replaces, so there is one place to look when a session
//! doesn't finalize when expected or a level fires too often.

use std::collections::BTreeMap;

/// Sample rate used throughout the pipeline (Hz). ASR and wake-word models
/// downstream both expect 16 kHz mono audio.
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Chunk size pushed to the ring buffer per read, in samples (~32ms at 16kHz).
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// RMS threshold (on the int16 sample scale) below which audio is silent.
pub const DEFAULT_SILENCE_THRESHOLD: i32 = 300;

/// How long continuous silence must last before a session finalizes, in seconds.
pub const DEFAULT_SILENCE_DURATION_SECS: f64 = 2.0;

/// Grace period after a wake word during which silence is not evaluated,
/// in seconds. Without this, a brief breath before the command would
/// finalize the session before any speech is captured.
pub const DEFAULT_INITIAL_SILENCE_IGNORE_SECS: f64 = 3.0;

/// Absolute session lifetime cap, in seconds, regardless of speech activity.
pub const DEFAULT_SESSION_TIMEOUT_SECS: f64 = 30.0;

/// Number of consecutive unchanged transcription results that force
/// finalization even without observed silence.
pub const DEFAULT_REPETITION_LIMIT: u32 = 3;

/// Number of dedicated ASR worker threads.
pub const DEFAULT_NUM_WORKERS: usize = 2;

/// Capacity of the bounded transcription request queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

/// Ring buffer retention window, in seconds. Must stay far larger than
/// `session_timeout_secs` so a `final` request is never evicted under
/// normal operation.
pub const DEFAULT_BUFFER_SECONDS: f64 = 300.0;

/// Interval of the scheduler's control loop, in milliseconds (~2 Hz).
pub const DEFAULT_SCHEDULER_TICK_MS: u64 = 500;

/// Language tag recorded against every persisted transcription result.
pub const DEFAULT_LANGUAGE: &str = "ja";

/// One progressively-more-accurate transcription tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Level {
    /// Window length requested for this level, in seconds.
    pub duration_secs: f64,
    /// Overlap with the previous request at this level, in seconds.
    /// `duration_secs - overlap_secs` is the minimum reissue interval.
    pub overlap_secs: f64,
    /// Relative priority when the scheduler queue is full and something
    /// must be dropped. Higher drops last.
    pub priority: u8,
}

impl Level {
    /// Minimum time between two consecutive requests at this level.
    pub fn min_interval_secs(&self) -> f64 {
        self.duration_secs - self.overlap_secs
    }
}

/// Name of the session-spanning final level, handled outside [`LevelTable`]
/// since its window is bounded by observed silence rather than a fixed
/// duration.
pub const FINAL_LEVEL: &str = "final";

/// The fixed-duration levels evaluated on every scheduler tick, keyed by
/// name (`"short"`, `"medium"`, `"long"`).
#[derive(Debug, Clone)]
pub struct LevelTable(BTreeMap<&'static str, Level>);

impl LevelTable {
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Level)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    pub fn get(&self, name: &str) -> Option<&Level> {
        self.0.get(name)
    }

    /// Priority of `final`, always the highest so it is never dropped while
    /// any fixed-duration request remains in the queue.
    pub fn final_priority(&self) -> u8 {
        self.0.values().map(|l| l.priority).max().unwrap_or(0) + 1
    }
}

impl Default for LevelTable {
    fn default() -> Self {
        let mut table = BTreeMap::new();
        table.insert(
            "short",
            Level {
                duration_secs: 3.0,
                overlap_secs: 1.0,
                priority: 1,
            },
        );
        table.insert(
            "medium",
            Level {
                duration_secs: 8.0,
                overlap_secs: 2.0,
                priority: 2,
            },
        );
        table.insert(
            "long",
            Level {
                duration_secs: 20.0,
                overlap_secs: 5.0,
                priority: 3,
            },
        );
        Self(table)
    }
}

/// Wake words the detector is configured to recognize, by display name.
/// The core treats these as opaque labels; only the external detector
/// implementation knows how to recognize them acoustically.
pub fn default_wake_words() -> Vec<String> {
    vec![
        "Ok Sebas".to_string(),
        "Alexa".to_string(),
        "Jarvis".to_string(),
        "Computer".to_string(),
    ]
}

/// All configuration the pipeline needs. Plain data, built by the binary
/// from CLI flags (or directly by tests); the core library never reads
/// environment variables or files on its own.
#[derive(Debug, Clone)]
pub struct Config {
    pub sample_rate: u32,
    pub chunk_size: usize,
    pub wake_words: Vec<String>,
    pub silence_threshold: i32,
    pub silence_duration_secs: f64,
    pub initial_silence_ignore_secs: f64,
    pub session_timeout_secs: f64,
    pub repetition_limit: u32,
    pub num_workers: usize,
    pub queue_capacity: usize,
    pub buffer_seconds: f64,
    pub scheduler_tick_ms: u64,
    pub levels: LevelTable,
    pub language: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            wake_words: default_wake_words(),
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            silence_duration_secs: DEFAULT_SILENCE_DURATION_SECS,
            initial_silence_ignore_secs: DEFAULT_INITIAL_SILENCE_IGNORE_SECS,
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            repetition_limit: DEFAULT_REPETITION_LIMIT,
            num_workers: DEFAULT_NUM_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            buffer_seconds: DEFAULT_BUFFER_SECONDS,
            scheduler_tick_ms: DEFAULT_SCHEDULER_TICK_MS,
            levels: LevelTable::default(),
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}
