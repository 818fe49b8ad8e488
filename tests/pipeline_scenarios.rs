//! End-to-end scenarios driving the whole pipeline through its public
//! surface: a scripted detector and ASR, a scripted audio timeline, and the
//! JSON event stream as the only thing asserted on. No real microphone, no
//! real model — the same substitution the demo binary makes.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::Value;

use sebas_listen::asr::ScriptedAsr;
use sebas_listen::audio::synthetic::Waveform;
use sebas_listen::audio::{AudioCaptureBackend, AudioCaptureError, SampleSinks, TARGET_SAMPLE_RATE};
use sebas_listen::config::Config;
use sebas_listen::detector::{DetectorHit, ScriptedDetector};
use sebas_listen::events::{spawn_writer, EventEmitter};
use sebas_listen::pipeline::Pipeline;
use sebas_listen::sink::MemorySink;

/// A capture backend that plays a scripted sequence of waveforms, switching
/// at real elapsed wall-clock offsets. Lets a test describe an input
/// timeline ("speech from 2s to 8s, then silence") the way the scenarios in
/// the testable-properties section are written, without needing real audio
/// hardware.
struct TimelineBackend {
    segments: Vec<(f64, Waveform)>,
    chunk_samples: usize,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TimelineBackend {
    fn new(chunk_samples: usize, segments: Vec<(f64, Waveform)>) -> Self {
        Self {
            segments,
            chunk_samples,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    fn chunk_for(waveform: &Waveform, n: usize) -> Vec<i16> {
        match waveform {
            Waveform::Silence => vec![0; n],
            Waveform::Tone { amplitude } => {
                (0..n).map(|i| if i % 2 == 0 { *amplitude } else { -*amplitude }).collect()
            }
        }
    }
}

impl AudioCaptureBackend for TimelineBackend {
    fn start(&mut self, sinks: SampleSinks) -> Result<u32, AudioCaptureError> {
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let segments = self.segments.clone();
        let chunk_samples = self.chunk_samples;
        let chunk_duration = Duration::from_secs_f64(chunk_samples as f64 / TARGET_SAMPLE_RATE as f64);

        let handle = thread::Builder::new()
            .name("timeline_capture".to_string())
            .spawn(move || {
                let started = Instant::now();
                while running.load(Ordering::SeqCst) {
                    let elapsed = started.elapsed().as_secs_f64();
                    let waveform = segments
                        .iter()
                        .rev()
                        .find(|(offset, _)| *offset <= elapsed)
                        .map(|(_, w)| w.clone())
                        .unwrap_or(Waveform::Silence);
                    sinks.push(&Self::chunk_for(&waveform, chunk_samples));
                    thread::sleep(chunk_duration);
                }
            })
            .expect("failed to spawn timeline capture thread");

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

/// Sink that collects the written event lines in memory so a test can
/// inspect them after shutdown, without a temp file.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn collect_events() -> (EventEmitter, SharedSink, JoinHandle<()>) {
    let (emitter, receiver) = EventEmitter::channel();
    let sink = SharedSink::default();
    let writer = spawn_writer(receiver, Box::new(sink.clone()));
    (emitter, sink, writer)
}

fn parsed_records(sink: &SharedSink) -> Vec<Value> {
    let bytes = sink.0.lock().unwrap().clone();
    String::from_utf8(bytes)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).expect("event line is valid JSON"))
        .collect()
}

fn of_type<'a>(records: &'a [Value], event_type: &str) -> Vec<&'a Value> {
    records
        .iter()
        .filter(|r| r["event_type"] == event_type)
        .collect()
}

#[test]
fn s1_single_short_command_finalizes_with_one_final_result() {
    let config = Config::default();
    let detector = ScriptedDetector::new(config.chunk_size).schedule_hit(
        0,
        DetectorHit {
            index: 2,
            name: "Jarvis".to_string(),
            start: Some(1.0),
            end: Some(2.0),
            word_type: None,
        },
    );
    let asr = ScriptedAsr::new(|samples: &[i16]| Ok(format!("heard {} samples", samples.len())));
    let backend: Box<dyn AudioCaptureBackend> = Box::new(TimelineBackend::new(
        config.chunk_size,
        vec![(0.0, Waveform::Tone { amplitude: 6000 }), (6.0, Waveform::Silence)],
    ));
    let (emitter, sink, writer) = collect_events();

    let pipeline = Pipeline::start(config, detector, asr, MemorySink::new(), backend, emitter)
        .expect("pipeline starts");

    // initial_silence_ignore (3s) + silence_duration (2s) past the 6s tone
    // segment, plus scheduling slack.
    thread::sleep(Duration::from_secs(13));
    pipeline.shutdown();
    writer.join().unwrap();

    let records = parsed_records(&sink);
    assert_eq!(of_type(&records, "wake_word_detected").len(), 1);
    assert_eq!(of_type(&records, "session_start").len(), 1);
    assert_eq!(of_type(&records, "silence_detected").len(), 1);

    let finals: Vec<_> = of_type(&records, "transcription_result")
        .into_iter()
        .filter(|r| r["data"]["level"] == "final")
        .collect();
    assert_eq!(finals.len(), 1, "exactly one final result per session");

    assert_eq!(of_type(&records, "session_end").len(), 1);
}

#[test]
fn s2_long_monologue_produces_progressively_longer_results() {
    let config = Config::default();
    let detector = ScriptedDetector::new(config.chunk_size).schedule_hit(
        0,
        DetectorHit {
            index: 0,
            name: "Ok Sebas".to_string(),
            start: Some(0.0),
            end: Some(0.2),
            word_type: None,
        },
    );
    // Text grows with how much audio was handed in, so later (longer)
    // levels' results contain the shorter levels' results as a prefix.
    let asr = ScriptedAsr::new(|samples: &[i16]| {
        let secs = samples.len() as f64 / 16000.0;
        let text = if secs < 5.0 {
            "turn on"
        } else if secs < 12.0 {
            "turn on the"
        } else {
            "turn on the lights"
        };
        Ok(text.to_string())
    });
    let backend: Box<dyn AudioCaptureBackend> = Box::new(TimelineBackend::new(
        config.chunk_size,
        vec![(0.0, Waveform::Tone { amplitude: 6000 })],
    ));
    let (emitter, sink, writer) = collect_events();

    let pipeline = Pipeline::start(config, detector, asr, MemorySink::new(), backend, emitter)
        .expect("pipeline starts");

    // Long enough to clear short (3s), two medium reissues (8s, 14s) and
    // one long (20s) request.
    thread::sleep(Duration::from_secs(26));
    pipeline.shutdown();
    writer.join().unwrap();

    let records = parsed_records(&sink);
    let results = of_type(&records, "transcription_result");
    let levels: Vec<&str> = results.iter().map(|r| r["data"]["level"].as_str().unwrap()).collect();

    assert!(levels.contains(&"short"), "expected a short result, got {levels:?}");
    assert!(
        levels.iter().filter(|l| **l == "medium").count() >= 1,
        "expected at least one medium result, got {levels:?}"
    );

    for result in &results {
        let text = result["data"]["text"].as_str().unwrap();
        assert!(
            text == "turn on" || text == "turn on the" || text == "turn on the lights",
            "unexpected result text {text}"
        );
    }
}

#[test]
fn s3_overlapping_wake_words_produce_two_independent_sessions() {
    let config = Config::default();
    // Chunk duration at the default 512-sample/16kHz rate is 32ms; frame 62
    // and frame 187 land close to real elapsed 2.0s and 6.0s respectively.
    let detector = ScriptedDetector::new(config.chunk_size)
        .schedule_hit(
            62,
            DetectorHit {
                index: 2,
                name: "Jarvis".to_string(),
                start: Some(1.0),
                end: Some(2.0),
                word_type: None,
            },
        )
        .schedule_hit(
            187,
            DetectorHit {
                index: 1,
                name: "Alexa".to_string(),
                start: Some(5.0),
                end: Some(6.0),
                word_type: None,
            },
        );
    let asr = ScriptedAsr::new(|samples: &[i16]| Ok(format!("heard {} samples", samples.len())));
    let backend: Box<dyn AudioCaptureBackend> = Box::new(TimelineBackend::new(
        config.chunk_size,
        vec![(0.0, Waveform::Tone { amplitude: 6000 }), (14.0, Waveform::Silence)],
    ));
    let (emitter, sink, writer) = collect_events();

    let pipeline = Pipeline::start(config, detector, asr, MemorySink::new(), backend, emitter)
        .expect("pipeline starts");

    thread::sleep(Duration::from_secs(25));
    pipeline.shutdown();
    writer.join().unwrap();

    let records = parsed_records(&sink);
    let starts = of_type(&records, "session_start");
    assert_eq!(starts.len(), 2, "expected two independent sessions");

    let ids: Vec<&str> = starts.iter().map(|r| r["data"]["session_id"].as_str().unwrap()).collect();
    assert_ne!(ids[0], ids[1]);

    assert_eq!(of_type(&records, "session_end").len(), 2);
}

#[test]
fn s4_three_identical_results_finalize_by_repetition() {
    let mut config = Config::default();
    // Keep speech continuous throughout; repetition, not silence, should
    // drive finalization here.
    config.session_timeout_secs = 60.0;

    let detector = ScriptedDetector::new(config.chunk_size).schedule_hit(
        0,
        DetectorHit {
            index: 0,
            name: "Ok Sebas".to_string(),
            start: Some(0.0),
            end: Some(0.1),
            word_type: None,
        },
    );
    let asr = ScriptedAsr::new(|_: &[i16]| Ok("turn on the lights".to_string()));
    let backend: Box<dyn AudioCaptureBackend> = Box::new(TimelineBackend::new(
        config.chunk_size,
        vec![(0.0, Waveform::Tone { amplitude: 6000 })],
    ));
    let (emitter, sink, writer) = collect_events();

    let pipeline = Pipeline::start(config, detector, asr, MemorySink::new(), backend, emitter)
        .expect("pipeline starts");

    // `short` reissues every 2s once due; three identical results arrive
    // well before the 60s timeout.
    thread::sleep(Duration::from_secs(12));
    pipeline.shutdown();
    writer.join().unwrap();

    let records = parsed_records(&sink);
    let results = of_type(&records, "transcription_result");
    assert!(
        results.iter().filter(|r| r["data"]["text"] == "turn on the lights").count() >= 3,
        "expected at least three identical results before finalization"
    );
    assert_eq!(of_type(&records, "session_end").len(), 1);

    // Every result shares the same (repeated) text, so every
    // transcription_changed/unchanged event reports that text too.
    let changed = of_type(&records, "transcription_unchanged");
    assert!(!changed.is_empty(), "expected at least one unchanged-result event");
}

#[test]
fn s5_queue_overflow_reports_dropped_requests_but_sessions_still_close() {
    let mut config = Config::default();
    config.num_workers = 1;
    config.queue_capacity = 1;
    config.session_timeout_secs = 3.0;

    let mut detector = ScriptedDetector::new(config.chunk_size);
    // ~20 wake words firing in rapid succession (roughly the first second
    // of audio), each opening its own session.
    for frame in 0..20usize {
        detector = detector.schedule_hit(
            frame,
            DetectorHit {
                index: frame % 4,
                name: format!("wake_{frame}"),
                start: Some(frame as f64 * 0.03),
                end: Some(frame as f64 * 0.03 + 0.02),
                word_type: None,
            },
        );
    }
    let asr = ScriptedAsr::new(|samples: &[i16]| Ok(format!("heard {} samples", samples.len())));
    let backend: Box<dyn AudioCaptureBackend> = Box::new(TimelineBackend::new(
        config.chunk_size,
        vec![(0.0, Waveform::Tone { amplitude: 6000 })],
    ));
    let (emitter, sink, writer) = collect_events();

    let pipeline = Pipeline::start(config, detector, asr, MemorySink::new(), backend, emitter)
        .expect("pipeline starts");

    thread::sleep(Duration::from_secs(10));
    pipeline.shutdown();
    writer.join().unwrap();

    let records = parsed_records(&sink);
    let starts = of_type(&records, "session_start").len();
    let ends = of_type(&records, "session_end").len();
    assert!(starts > 1, "expected multiple overlapping sessions, got {starts}");
    assert_eq!(ends, starts, "every opened session should eventually close");
    assert!(
        !of_type(&records, "error").is_empty(),
        "a single worker against this much concurrent demand should drop something"
    );
}

#[test]
fn s6_final_request_older_than_retained_window_still_closes_the_session() {
    let mut config = Config::default();
    config.buffer_seconds = 4.0;

    let detector = ScriptedDetector::new(config.chunk_size).schedule_hit(
        0,
        DetectorHit {
            index: 0,
            name: "Ok Sebas".to_string(),
            start: Some(0.0),
            end: Some(0.1),
            word_type: None,
        },
    );
    let asr = ScriptedAsr::new(|samples: &[i16]| Ok(format!("heard {} samples", samples.len())));
    // 12s of speech, long past the 4s retained window, before silence
    // starts — by the time silence is confirmed the session's whole range
    // has already been evicted from the ring buffer.
    let backend: Box<dyn AudioCaptureBackend> = Box::new(TimelineBackend::new(
        config.chunk_size,
        vec![(0.0, Waveform::Tone { amplitude: 6000 }), (12.0, Waveform::Silence)],
    ));
    let (emitter, sink, writer) = collect_events();

    let pipeline = Pipeline::start(config, detector, asr, MemorySink::new(), backend, emitter)
        .expect("pipeline starts");

    thread::sleep(Duration::from_secs(20));
    pipeline.shutdown();
    writer.join().unwrap();

    let records = parsed_records(&sink);
    assert!(!of_type(&records, "error").is_empty(), "expected an extraction-miss error event");

    let finals: Vec<_> = of_type(&records, "transcription_result")
        .into_iter()
        .filter(|r| r["data"]["level"] == "final")
        .collect();
    assert!(finals.is_empty(), "the final request's range was entirely evicted");

    assert_eq!(
        of_type(&records, "session_end").len(),
        1,
        "the session must still close even without a final transcript"
    );
}

#[test]
fn wall_time_is_non_decreasing_across_the_event_stream() {
    // invariant: time monotonicity — wall_time is the emitter's own clock,
    // stamped at submission time, so it can never run backwards regardless
    // of which thread produced which record.
    let config = Config::default();
    let detector = ScriptedDetector::new(config.chunk_size).schedule_hit(
        0,
        DetectorHit {
            index: 0,
            name: "Ok Sebas".to_string(),
            start: Some(0.0),
            end: Some(0.1),
            word_type: None,
        },
    );
    let asr = ScriptedAsr::new(|samples: &[i16]| Ok(format!("heard {} samples", samples.len())));
    let backend: Box<dyn AudioCaptureBackend> = Box::new(TimelineBackend::new(
        config.chunk_size,
        vec![(0.0, Waveform::Tone { amplitude: 6000 }), (6.0, Waveform::Silence)],
    ));
    let (emitter, sink, writer) = collect_events();

    let pipeline = Pipeline::start(config, detector, asr, MemorySink::new(), backend, emitter)
        .expect("pipeline starts");
    thread::sleep(Duration::from_secs(13));
    pipeline.shutdown();
    writer.join().unwrap();

    let records = parsed_records(&sink);
    assert!(records.len() > 5, "expected a non-trivial event sequence");
    let times: Vec<chrono::DateTime<chrono::Utc>> = records
        .iter()
        .map(|r| {
            chrono::DateTime::parse_from_rfc3339(r["wall_time"].as_str().unwrap())
                .unwrap()
                .with_timezone(&chrono::Utc)
        })
        .collect();
    for pair in times.windows(2) {
        assert!(pair[1] >= pair[0], "wall_time went backwards: {pair:?}");
    }
}

#[test]
fn each_session_gets_at_most_one_final_result_and_one_session_end() {
    // invariant: at most one final — even a session that hits both the
    // repetition path and (eventually) the silence path must still end up
    // with exactly one `final` transcription_result and one `session_end`,
    // per spec's dedup note (repetition and silence must not double-fire).
    let mut config = Config::default();
    config.session_timeout_secs = 60.0;

    let detector = ScriptedDetector::new(config.chunk_size).schedule_hit(
        0,
        DetectorHit {
            index: 0,
            name: "Ok Sebas".to_string(),
            start: Some(0.0),
            end: Some(0.1),
            word_type: None,
        },
    );
    let asr = ScriptedAsr::new(|_: &[i16]| Ok("turn on the lights".to_string()));
    // repeats long enough to trigger repetition finalization, then silence
    // keeps going — the session must not also try to finalize via silence.
    let backend: Box<dyn AudioCaptureBackend> = Box::new(TimelineBackend::new(
        config.chunk_size,
        vec![(0.0, Waveform::Tone { amplitude: 6000 }), (10.0, Waveform::Silence)],
    ));
    let (emitter, sink, writer) = collect_events();

    let pipeline = Pipeline::start(config, detector, asr, MemorySink::new(), backend, emitter)
        .expect("pipeline starts");
    thread::sleep(Duration::from_secs(18));
    pipeline.shutdown();
    writer.join().unwrap();

    let records = parsed_records(&sink);
    let finals: Vec<_> = of_type(&records, "transcription_result")
        .into_iter()
        .filter(|r| r["data"]["level"] == "final")
        .collect();
    assert!(finals.len() <= 1, "expected at most one final result, got {}", finals.len());
    assert!(of_type(&records, "session_end").len() <= 1);
}

#[test]
fn deterministic_asr_over_the_same_audio_twice_yields_identical_text_sequences() {
    // round-trip/idempotence: a deterministic ASR over the same input
    // timeline must produce the same ordered transcription_result.text
    // sequence, modulo wall times, across independent runs.
    let run_once = || {
        let config = Config::default();
        let detector = ScriptedDetector::new(config.chunk_size).schedule_hit(
            0,
            DetectorHit {
                index: 0,
                name: "Ok Sebas".to_string(),
                start: Some(0.0),
                end: Some(0.1),
                word_type: None,
            },
        );
        let asr = ScriptedAsr::new(|samples: &[i16]| Ok(format!("heard {} samples", samples.len())));
        let backend: Box<dyn AudioCaptureBackend> = Box::new(TimelineBackend::new(
            config.chunk_size,
            vec![(0.0, Waveform::Tone { amplitude: 6000 }), (6.0, Waveform::Silence)],
        ));
        let (emitter, sink, writer) = collect_events();
        let pipeline = Pipeline::start(config, detector, asr, MemorySink::new(), backend, emitter)
            .expect("pipeline starts");
        thread::sleep(Duration::from_secs(13));
        pipeline.shutdown();
        writer.join().unwrap();

        let records = parsed_records(&sink);
        of_type(&records, "transcription_result")
            .into_iter()
            .map(|r| (r["data"]["level"].as_str().unwrap().to_string(), r["data"]["text"].as_str().unwrap().to_string()))
            .collect::<Vec<_>>()
    };

    assert_eq!(run_once(), run_once());
}

#[test]
fn two_wake_words_half_a_second_apart_produce_two_sessions_with_results() {
    // boundary: two wake words within 500ms still open two independent
    // sessions, and both receive results.
    let config = Config::default();
    // chunk duration at the default 512/16kHz rate is 32ms, so frame 0 and
    // frame 15 land roughly 480ms apart in stream time.
    let detector = ScriptedDetector::new(config.chunk_size)
        .schedule_hit(
            0,
            DetectorHit {
                index: 0,
                name: "Ok Sebas".to_string(),
                start: Some(0.0),
                end: Some(0.1),
                word_type: None,
            },
        )
        .schedule_hit(
            15,
            DetectorHit {
                index: 1,
                name: "Alexa".to_string(),
                start: Some(0.45),
                end: Some(0.55),
                word_type: None,
            },
        );
    let asr = ScriptedAsr::new(|samples: &[i16]| Ok(format!("heard {} samples", samples.len())));
    let backend: Box<dyn AudioCaptureBackend> = Box::new(TimelineBackend::new(
        config.chunk_size,
        vec![(0.0, Waveform::Tone { amplitude: 6000 }), (6.0, Waveform::Silence)],
    ));
    let (emitter, sink, writer) = collect_events();

    let pipeline = Pipeline::start(config, detector, asr, MemorySink::new(), backend, emitter)
        .expect("pipeline starts");
    thread::sleep(Duration::from_secs(13));
    pipeline.shutdown();
    writer.join().unwrap();

    let records = parsed_records(&sink);
    assert_eq!(of_type(&records, "session_start").len(), 2);
    assert_eq!(of_type(&records, "session_end").len(), 2);
    let finals: Vec<_> = of_type(&records, "transcription_result")
        .into_iter()
        .filter(|r| r["data"]["level"] == "final")
        .collect();
    assert_eq!(finals.len(), 2, "both overlapping sessions should get a final result");
}
