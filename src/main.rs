//! CLI entry point.
//!
//! The wake-word detector and ASR engine are external collaborators this
//! crate never ships a real implementation of (see the library's module
//! docs); this binary wires up the pipeline against deterministic
//! synthetic/scripted stand-ins so the full listen-detect-transcribe loop
//! can be exercised and demonstrated end to end without a model or a
//! microphone. A real deployment links the library and substitutes its own
//! [`sebas_listen::detector::WakeDetector`] and [`sebas_listen::asr::AsrEngine`].

use std::fs::File;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use sebas_listen::asr::ScriptedAsr;
use sebas_listen::audio::synthetic::Waveform;
use sebas_listen::audio::{AudioCaptureBackend, CpalBackend, SyntheticBackend};
use sebas_listen::config::Config;
use sebas_listen::detector::{DetectorHit, ScriptedDetector};
use sebas_listen::events::EventEmitter;
use sebas_listen::pipeline::Pipeline;
use sebas_listen::sink::MemorySink;

/// Continuous wake-word listening and multi-level transcription demo.
#[derive(Parser, Debug)]
#[command(name = "sebas-listen", version, about)]
struct Args {
    /// Write the event stream to this file instead of stdout.
    #[arg(long)]
    event_log: Option<String>,

    /// Use the real microphone via cpal instead of a synthetic tone source.
    #[arg(long)]
    real_audio: bool,

    /// How long to run before shutting down automatically, in seconds.
    #[arg(long, default_value_t = 15)]
    duration_secs: u64,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let sink_writer: Box<dyn Write + Send> = match &args.event_log {
        Some(path) => match File::create(path) {
            Ok(file) => Box::new(file),
            Err(err) => {
                eprintln!("failed to open event log {path}: {err}");
                std::process::exit(1);
            }
        },
        None => Box::new(io::stdout()),
    };

    let (emitter, receiver) = EventEmitter::channel();
    let writer_handle = sebas_listen::events::spawn_writer(receiver, sink_writer);

    let config = Config::default();

    let audio_backend: Box<dyn AudioCaptureBackend> = if args.real_audio {
        Box::new(CpalBackend::new())
    } else {
        Box::new(SyntheticBackend::new(
            Waveform::Tone { amplitude: 6000 },
            config.chunk_size,
        ))
    };

    // No real wake-word engine is wired up here; a scripted detector fires
    // on the first configured word shortly after startup so the demo
    // produces a full session end to end.
    let detector = ScriptedDetector::new(config.chunk_size).schedule_hit(
        30,
        DetectorHit {
            index: 0,
            name: config.wake_words[0].clone(),
            start: None,
            end: None,
            word_type: None,
        },
    );

    let asr = ScriptedAsr::new(|samples: &[i16]| {
        Ok(format!("transcribed {} samples", samples.len()))
    });

    let sink = MemorySink::new();

    let pipeline = match Pipeline::start(config, detector, asr, sink, audio_backend, emitter) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            eprintln!("failed to start pipeline: {err}");
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })
        .expect("failed to install signal handler");
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(args.duration_secs);
    while running.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(100));
    }

    pipeline.shutdown();
    let _ = writer_handle.join();
}
