//! cpal-based audio capture backend.
//!
//! Interacts with hardware, so most of this file is excluded from coverage
//! measurement and exercised only manually against a real microphone.
#![cfg_attr(coverage_nightly, coverage(off))]

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Stream;

use super::{AudioCaptureBackend, AudioCaptureError, SampleSinks};

/// Audio capture backend using cpal for platform-specific microphone access.
pub struct CpalBackend {
    stream: Option<Stream>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self { stream: None }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioCaptureBackend for CpalBackend {
    fn start(&mut self, sinks: SampleSinks) -> Result<u32, AudioCaptureError> {
        log::info!("starting audio capture");

        let host = cpal::default_host();
        let device = host.default_input_device().ok_or_else(|| {
            log::error!("no audio input device available");
            AudioCaptureError::NoDeviceAvailable
        })?;
        log::info!(
            "input device: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );

        let config = device.default_input_config().map_err(|e| {
            log::error!("failed to get input config: {e}");
            AudioCaptureError::DeviceError(e.to_string())
        })?;
        let actual_sample_rate = config.sample_rate().0;
        log::info!(
            "capture config: {} Hz, {:?}, {} channels",
            actual_sample_rate,
            config.sample_format(),
            config.channels()
        );

        let err_fn = |err: cpal::StreamError| {
            log::error!("audio stream error: {err}");
        };

        let stream = match config.sample_format() {
            cpal::SampleFormat::I16 => {
                let sinks = sinks.clone();
                device.build_input_stream(
                    &config.into(),
                    move |data: &[i16], _: &cpal::InputCallbackInfo| sinks.push(data),
                    err_fn,
                    None,
                )
            }
            cpal::SampleFormat::F32 => {
                let sinks = sinks.clone();
                device.build_input_stream(
                    &config.into(),
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let converted: Vec<i16> =
                            data.iter().map(|&s| (s * i16::MAX as f32) as i16).collect();
                        sinks.push(&converted);
                    },
                    err_fn,
                    None,
                )
            }
            cpal::SampleFormat::U16 => {
                let sinks = sinks.clone();
                device.build_input_stream(
                    &config.into(),
                    move |data: &[u16], _: &cpal::InputCallbackInfo| {
                        let converted: Vec<i16> = data
                            .iter()
                            .map(|&s| (s as i32 - i16::MAX as i32 - 1) as i16)
                            .collect();
                        sinks.push(&converted);
                    },
                    err_fn,
                    None,
                )
            }
            other => {
                return Err(AudioCaptureError::DeviceError(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        }
        .map_err(|e| {
            log::error!("failed to build input stream: {e}");
            AudioCaptureError::StreamError(e.to_string())
        })?;

        stream.play().map_err(|e| {
            log::error!("failed to start stream: {e}");
            AudioCaptureError::StreamError(e.to_string())
        })?;

        self.stream = Some(stream);
        log::info!("audio capture started at {actual_sample_rate} Hz");
        Ok(actual_sample_rate)
    }

    fn stop(&mut self) -> Result<(), AudioCaptureError> {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            log::info!("audio capture stopped");
        }
        Ok(())
    }
}
