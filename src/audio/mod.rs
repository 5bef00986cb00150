//! Audio capture via the cpal backend (§6 "platform microphone fallback").
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated (TIME_CRITICAL
//! on Windows) priority. It **must not**:
//! - Allocate heap memory
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! This module satisfies that contract by encoding samples into a small
//! reusable buffer and writing into an SPSC byte ring buffer producer whose
//! `push_slice` is lock-free and allocation-free.
//!
//! # No resampling
//!
//! This capture path never resamples: the VAD model requires exactly 16kHz
//! mono PCM16. If the device cannot be configured for that rate directly,
//! `open_with_preference` fails with `VadError::CaptureFailure` rather than
//! silently converting.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `AudioCapture` therefore must be created and dropped on the same
//! thread — the handler accomplishes this by opening it inside a dedicated
//! `std::thread`.

pub mod device;
pub mod ring;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

use crate::error::{Result, VadError};
use ring::AudioProducer;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{error, info, warn};

/// Required capture sample rate; the VAD model accepts no other (§4.1).
pub const REQUIRED_SAMPLE_RATE: u32 = 16_000;

/// Handle to an active audio capture stream.
///
/// **Not `Send`** — `cpal::Stream` is bound to its creation thread on
/// Windows/macOS. Create and drop this type on the same OS thread.
pub struct AudioCapture {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    running: Arc<AtomicBool>,
}

impl AudioCapture {
    /// Open an input device by preferred name, otherwise fall back to the
    /// default input device and then the first available device.
    ///
    /// Requires the device to support exactly [`REQUIRED_SAMPLE_RATE`], mono.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut devices: Vec<(String, cpal::Device)> = host
            .input_devices()
            .map_err(|e| VadError::CaptureFailure(e.to_string()))?
            .enumerate()
            .map(|(idx, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
                (name, device)
            })
            .collect();
        if devices.is_empty() {
            return Err(VadError::CaptureFailure("no input devices available".into()));
        }

        let default_name = host.default_input_device().and_then(|d| d.name().ok());
        let preferred_idx = preferred_device_name.and_then(|preferred| {
            devices
                .iter()
                .position(|(name, _)| name.as_str() == preferred)
        });
        let default_idx = default_name
            .as_deref()
            .and_then(|name| devices.iter().position(|(n, _)| n.as_str() == name));
        let best_non_loopback_idx = devices
            .iter()
            .enumerate()
            .filter(|(_, (name, _))| !device::is_loopback_like_name(name))
            .max_by_key(|(_, (name, _))| device::mic_preference_score(name))
            .map(|(idx, _)| idx);

        if preferred_device_name.is_some() && preferred_idx.is_none() {
            warn!(
                "preferred input device '{}' not found, falling back",
                preferred_device_name.unwrap_or_default()
            );
        }

        let selected_idx = if let Some(idx) = preferred_idx {
            idx
        } else if let Some(idx) = default_idx {
            idx
        } else if let Some(idx) = best_non_loopback_idx {
            warn!("no default input device, falling back to best available microphone input");
            idx
        } else {
            warn!("no default microphone input device, falling back to first available input");
            0
        };

        let (selected_name, device) = devices.swap_remove(selected_idx);
        info!(device = selected_name.as_str(), "opening input device");

        let sample_format = select_supported_format(&device)
            .ok_or_else(|| {
                VadError::CaptureFailure(format!(
                    "device '{selected_name}' does not support {REQUIRED_SAMPLE_RATE}Hz mono capture"
                ))
            })?;

        let config = StreamConfig {
            channels: 1,
            sample_rate: SampleRate(REQUIRED_SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        info!(sample_rate = REQUIRED_SAMPLE_RATE, ?sample_format, "audio config selected");

        let running_cb = Arc::clone(&running);
        let stream = match sample_format {
            SampleFormat::F32 => {
                let mut encode_buf: Vec<u8> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        if !running_cb.load(Ordering::Relaxed) {
                            return;
                        }
                        encode_buf.clear();
                        encode_buf.reserve(data.len() * 2);
                        for &s in data {
                            let scaled = (s * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
                            encode_buf.extend_from_slice(&scaled.to_le_bytes());
                        }
                        push_or_warn(&mut producer, &encode_buf);
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }
            SampleFormat::I16 => {
                let mut encode_buf: Vec<u8> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        if !running_cb.load(Ordering::Relaxed) {
                            return;
                        }
                        encode_buf.clear();
                        encode_buf.reserve(data.len() * 2);
                        for &s in data {
                            encode_buf.extend_from_slice(&s.to_le_bytes());
                        }
                        push_or_warn(&mut producer, &encode_buf);
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }
            SampleFormat::U8 => {
                let mut encode_buf: Vec<u8> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[u8], _info| {
                        if !running_cb.load(Ordering::Relaxed) {
                            return;
                        }
                        encode_buf.clear();
                        encode_buf.reserve(data.len() * 2);
                        for &s in data {
                            let centered = (s as i16 - 128) * 256;
                            encode_buf.extend_from_slice(&centered.to_le_bytes());
                        }
                        push_or_warn(&mut producer, &encode_buf);
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }
            fmt => {
                return Err(VadError::CaptureFailure(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| VadError::CaptureFailure(e.to_string()))?;

        stream.play().map_err(|e| VadError::CaptureFailure(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
        })
    }

    /// Open the system default microphone and push PCM16-LE bytes into `producer`.
    ///
    /// Must be called from the thread that will also drop this value — in
    /// practice, inside the handler's dedicated capture thread.
    #[cfg(feature = "audio-cpal")]
    pub fn open_default(producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(producer, running, None)
    }

    /// Stop: signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(feature = "audio-cpal")]
fn select_supported_format(device: &cpal::Device) -> Option<SampleFormat> {
    use cpal::traits::DeviceTrait;

    device
        .supported_input_configs()
        .ok()?
        .filter(|c| c.channels() == 1)
        .find(|c| {
            c.min_sample_rate().0 <= REQUIRED_SAMPLE_RATE && REQUIRED_SAMPLE_RATE <= c.max_sample_rate().0
        })
        .map(|c| c.sample_format())
}

#[cfg(feature = "audio-cpal")]
fn push_or_warn(producer: &mut AudioProducer, bytes: &[u8]) {
    use ringbuf::traits::Producer;
    let written = producer.push_slice(bytes);
    if written < bytes.len() {
        warn!("ring buffer full: dropped {} audio bytes", bytes.len() - written);
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open_with_preference(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(VadError::CaptureFailure(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn open_default(producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(producer, running, None)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}
