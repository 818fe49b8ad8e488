//! Dedicated thread owning the capture backend.
//!
//! `cpal::Stream` (inside [`super::CpalBackend`]) is not `Send`, so it must
//! live and die on one thread. This handle is `Send + Sync` and talks to
//! that thread over a channel, the same isolation the rest of the pipeline
//! uses for other non-`Send` external resources.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use super::{AudioCaptureBackend, AudioCaptureError, SampleSinks};

pub type StartResponse = Result<u32, AudioCaptureError>;

enum AudioCommand {
    Start(SampleSinks, Sender<StartResponse>),
    Stop,
    Shutdown,
}

/// Handle to the audio capture thread. Commands are sent over a channel;
/// the backend itself never crosses a thread boundary.
pub struct AudioThreadHandle {
    sender: Sender<AudioCommand>,
    _thread: JoinHandle<()>,
}

impl AudioThreadHandle {
    /// Spawn the audio thread, running `backend` for its lifetime.
    pub fn spawn(backend: Box<dyn AudioCaptureBackend>) -> Self {
        let (sender, receiver) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("audio_capture".to_string())
            .spawn(move || audio_thread_main(backend, receiver))
            .expect("failed to spawn audio capture thread");

        Self {
            sender,
            _thread: thread,
        }
    }

    /// Start capture, pushing samples into `sinks`. Blocks until the audio
    /// thread responds with the device's actual sample rate.
    pub fn start(&self, sinks: SampleSinks) -> Result<u32, AudioThreadError> {
        let (response_tx, response_rx) = mpsc::channel();
        self.sender
            .send(AudioCommand::Start(sinks, response_tx))
            .map_err(|_| AudioThreadError::ThreadDisconnected)?;

        response_rx
            .recv()
            .map_err(|_| AudioThreadError::ThreadDisconnected)?
            .map_err(AudioThreadError::CaptureError)
    }

    pub fn stop(&self) -> Result<(), AudioThreadError> {
        self.sender
            .send(AudioCommand::Stop)
            .map_err(|_| AudioThreadError::ThreadDisconnected)
    }

    pub fn shutdown(&self) -> Result<(), AudioThreadError> {
        self.sender
            .send(AudioCommand::Shutdown)
            .map_err(|_| AudioThreadError::ThreadDisconnected)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AudioThreadError {
    ThreadDisconnected,
    CaptureError(AudioCaptureError),
}

impl std::fmt::Display for AudioThreadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioThreadError::ThreadDisconnected => write!(f, "audio thread disconnected"),
            AudioThreadError::CaptureError(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for AudioThreadError {}

fn audio_thread_main(mut backend: Box<dyn AudioCaptureBackend>, receiver: Receiver<AudioCommand>) {
    log::info!("audio thread started");

    while let Ok(command) = receiver.recv() {
        match command {
            AudioCommand::Start(sinks, response_tx) => {
                let result = backend.start(sinks);
                match &result {
                    Ok(rate) => log::info!("audio capture started at {rate} Hz"),
                    Err(err) => log::error!("audio capture failed to start: {err}"),
                }
                let _ = response_tx.send(result);
            }
            AudioCommand::Stop => {
                if let Err(err) = backend.stop() {
                    log::error!("audio capture failed to stop: {err}");
                }
            }
            AudioCommand::Shutdown => {
                let _ = backend.stop();
                break;
            }
        }
    }
    log::info!("audio thread exiting");
}
