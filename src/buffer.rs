//! Time-indexed ring buffer for captured audio.
//!
//! Holds a rolling window of the most recent samples and lets any number
//! of readers pull an arbitrary stream-time range out of it while a single
//! writer keeps appending. `total_samples` only ever increases, and is the
//! basis for every stream-time calculation elsewhere in the pipeline
//! (`stream_position = total_samples / sample_rate`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A fixed-capacity, time-indexed circular buffer of `i16` samples.
///
/// One writer calls [`RingBuffer::push`]; any number of readers call
/// [`RingBuffer::extract`] or [`RingBuffer::stream_position`] concurrently.
/// `total_samples` is updated only after the backing store has been written,
/// so a reader never observes a count that outruns the samples it covers.
pub struct RingBuffer {
    sample_rate: u32,
    inner: Mutex<Inner>,
    total_samples: AtomicU64,
}

struct Inner {
    data: Vec<i16>,
    capacity: usize,
    write_pos: usize,
    len: usize,
}

impl RingBuffer {
    /// Create a buffer retaining `duration_secs` seconds of audio at `sample_rate`.
    pub fn new(duration_secs: f64, sample_rate: u32) -> Self {
        let capacity = (duration_secs * sample_rate as f64).round() as usize;
        Self {
            sample_rate,
            inner: Mutex::new(Inner {
                data: vec![0; capacity.max(1)],
                capacity: capacity.max(1),
                write_pos: 0,
                len: 0,
            }),
            total_samples: AtomicU64::new(0),
        }
    }

    /// Append samples, overwriting the oldest retained samples once full.
    pub fn push(&self, samples: &[i16]) {
        if samples.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().expect("ring buffer lock poisoned");
        for &sample in samples {
            let capacity = inner.capacity;
            inner.data[inner.write_pos] = sample;
            inner.write_pos = (inner.write_pos + 1) % capacity;
            if inner.len < capacity {
                inner.len += 1;
            }
        }
        drop(inner);
        self.total_samples
            .fetch_add(samples.len() as u64, Ordering::SeqCst);
    }

    /// Current stream position in seconds: `total_samples / sample_rate`.
    pub fn stream_position(&self) -> f64 {
        self.total_samples.load(Ordering::SeqCst) as f64 / self.sample_rate as f64
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples.load(Ordering::SeqCst)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Extract the samples covering `[start, end)` stream-time seconds.
    ///
    /// Returns `None` if `start >= end`, or if the requested range falls
    /// entirely outside what the buffer currently retains. A range that
    /// starts before the retained window is clipped to the window's start
    /// rather than rejected, matching the audio that is actually still
    /// available.
    pub fn extract(&self, start: f64, end: f64) -> Option<Vec<i16>> {
        if start >= end {
            return None;
        }
        let inner = self.inner.lock().expect("ring buffer lock poisoned");
        let current_pos = self.total_samples.load(Ordering::SeqCst) as f64 / self.sample_rate as f64;
        let retained_secs = inner.len as f64 / self.sample_rate as f64;
        let window_start = current_pos - retained_secs;

        let clipped_start = start.max(window_start);
        let clipped_end = end.min(current_pos);
        if clipped_start >= clipped_end {
            return None;
        }

        let start_offset = ((clipped_start - window_start) * self.sample_rate as f64).round() as usize;
        let end_offset = ((clipped_end - window_start) * self.sample_rate as f64).round() as usize;
        let start_offset = start_offset.min(inner.len);
        let end_offset = end_offset.min(inner.len);
        if start_offset >= end_offset {
            return None;
        }

        // oldest sample lives at write_pos when the buffer has wrapped
        let oldest_index = if inner.len < inner.capacity {
            0
        } else {
            inner.write_pos
        };

        let mut result = Vec::with_capacity(end_offset - start_offset);
        for i in start_offset..end_offset {
            let idx = (oldest_index + i) % inner.capacity;
            result.push(inner.data[idx]);
        }
        Some(result)
    }
}
