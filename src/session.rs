//! Session lifecycle: idle -> active -> finalizing -> closed.
//!
//! A session is opened by every wake-word detection, independent of any
//! session already open — overlapping sessions are a deliberate property
//! of this design, not an oversight, so a second "Ok Sebas" while the first
//! command is still being transcribed starts its own session rather than
//! cancelling the first.

use std::collections::HashMap;

use crate::detector::WakeWordEvent;

/// Why a session moved from `active` to `finalizing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReason {
    Silence,
    Repetition,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Finalizing,
    Closed,
}

/// One open (or finalizing) voice command session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub wake_word: WakeWordEvent,
    pub state: SessionState,
    /// Stream-time each level was last requested at, for the scheduler's
    /// `min_interval` reissue gate.
    pub last_level_request: HashMap<String, f64>,
    /// Stream-time at which silence was confirmed, once known. Used as the
    /// upper bound of the `final` level's request range.
    pub silence_start: Option<f64>,
    last_text: Option<String>,
    no_change_count: u32,
}

impl Session {
    fn new(id: String, wake_word: WakeWordEvent) -> Self {
        Self {
            id,
            wake_word,
            state: SessionState::Active,
            last_level_request: HashMap::new(),
            silence_start: None,
            last_text: None,
            no_change_count: 0,
        }
    }
}

/// Strip whitespace and common ASCII/Japanese punctuation so near-identical
/// transcriptions compare equal regardless of incidental formatting.
fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| {
            !c.is_whitespace()
                && !matches!(
                    c,
                    '、' | '。' | '.' | ',' | '!' | '?' | ';' | ':' | '\'' | '"'
                )
        })
        .collect()
}

/// Owns every session currently active or finalizing, keyed by session id.
#[derive(Default)]
pub struct SessionManager {
    sessions: HashMap<String, Session>,
    repetition_limit: u32,
}

impl SessionManager {
    pub fn new(repetition_limit: u32) -> Self {
        Self {
            sessions: HashMap::new(),
            repetition_limit,
        }
    }

    /// Open a new session for a wake-word detection. Session ids derive
    /// from the wake word's wall-clock emission time, so two callers that
    /// both observe the same event agree on the id.
    pub fn open(&mut self, wake_word: WakeWordEvent, wall_ms: u128) -> String {
        let id = format!("session_{wall_ms}");
        self.sessions
            .insert(id.clone(), Session::new(id.clone(), wake_word));
        id
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Consecutive unchanged-result count last recorded for this session, if
    /// it still exists. Used by the pipeline to decide between emitting
    /// `transcription_changed` and `transcription_unchanged`.
    pub fn last_no_change_count(&self, id: &str) -> Option<u32> {
        self.sessions.get(id).map(|s| s.no_change_count)
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|(_, s)| s.state == SessionState::Active)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Every known session id, active or finalizing. Sessions move to
    /// `Finalizing` from threads other than whichever one is polling this
    /// manager (`on_silence` from the buffer reader, `on_transcription_result`
    /// from the result handler), so a caller that needs to keep driving a
    /// session once it starts finalizing — dispatching its `final` request —
    /// must use this instead of [`SessionManager::active_ids`], which would
    /// otherwise never surface it again.
    pub fn all_ids(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    pub fn record_level_request(&mut self, id: &str, level: &str, stream_time: f64) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.last_level_request.insert(level.to_string(), stream_time);
        }
    }

    /// Silence was observed for this session at `stream_time`. Finalizes the
    /// session unless it is already finalizing or closed.
    pub fn on_silence(&mut self, id: &str, stream_time: f64) -> Option<FinalizeReason> {
        let session = self.sessions.get_mut(id)?;
        if session.state != SessionState::Active {
            return None;
        }
        session.silence_start = Some(stream_time);
        session.state = SessionState::Finalizing;
        Some(FinalizeReason::Silence)
    }

    /// The session has been active longer than the timeout, measured from
    /// the wake word's end, as of `stream_time`. The `final` range's end is
    /// backdated by `silence_duration_secs`, matching the silence path: a
    /// session that times out was never heard to go quiet, but its last
    /// `silence_duration_secs` of "speech" is presumed to be the trailing
    /// silence the timeout is standing in for.
    pub fn check_timeout(
        &mut self,
        id: &str,
        stream_time: f64,
        timeout_secs: f64,
        silence_duration_secs: f64,
    ) -> Option<FinalizeReason> {
        let session = self.sessions.get(id)?;
        if session.state != SessionState::Active {
            return None;
        }
        if stream_time - session.wake_word.end >= timeout_secs {
            let session = self.sessions.get_mut(id)?;
            session
                .silence_start
                .get_or_insert(stream_time - silence_duration_secs);
            session.state = SessionState::Finalizing;
            Some(FinalizeReason::Timeout)
        } else {
            None
        }
    }

    /// A transcription result arrived for some level of this session.
    /// Tracks repetition across levels (any two consecutive results that
    /// normalize to the same or a containing string count as unchanged);
    /// forces finalization once `repetition_limit` consecutive results
    /// agree.
    pub fn on_transcription_result(
        &mut self,
        id: &str,
        text: &str,
        stream_time: f64,
    ) -> Option<FinalizeReason> {
        let session = self.sessions.get_mut(id)?;
        if session.state != SessionState::Active {
            return None;
        }

        let normalized = normalize(text);
        let unchanged = match &session.last_text {
            Some(last) => normalized == *last || normalized.contains(last.as_str()),
            None => false,
        };

        if unchanged {
            session.no_change_count += 1;
        } else {
            session.no_change_count = 0;
        }
        session.last_text = Some(normalized);

        if session.no_change_count >= self.repetition_limit.saturating_sub(1) {
            session.silence_start.get_or_insert(stream_time);
            session.state = SessionState::Finalizing;
            Some(FinalizeReason::Repetition)
        } else {
            None
        }
    }

    /// Remove a session once its `final` request has been issued and
    /// handled, completing the `finalizing -> closed` transition.
    pub fn close(&mut self, id: &str) {
        self.sessions.remove(id);
    }
}
