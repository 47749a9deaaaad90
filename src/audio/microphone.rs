//! Microphone access.
//!
//! The engine only sees the `Microphone` trait; `CpalMicrophone` is the system
//! implementation that streams mono frames onto the engine bus while held.

use super::dispatch::FrameDispatcher;
use crate::engine::{EngineEvent, EventSender, TurnId};
use crate::error::{EngineError, Result};
use crate::log_debug;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleFormat, StreamConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Capture frame length handed to the bus.
const FRAME_MS: u64 = 20;

/// An exclusive audio input. Acquisition happens at the start of a turn and the
/// engine releases it on every exit path.
pub trait Microphone {
    /// Begin streaming frames tagged with `turn_id`. Fails with
    /// `PermissionDenied` or `DeviceLost`.
    fn acquire(&mut self, turn_id: TurnId) -> Result<()>;
    /// Stop streaming. Safe to call when not held.
    fn release(&mut self);
    fn is_held(&self) -> bool;
    fn name(&self) -> String {
        "microphone".to_string()
    }
}

/// List microphone names so the CLI can expose a selector.
pub fn list_input_devices() -> anyhow::Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|err| anyhow::anyhow!("no input devices available: {err}"))?;
    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

struct HeldStream {
    stream: cpal::Stream,
    turn_id: TurnId,
    dropped: Arc<AtomicUsize>,
}

pub struct CpalMicrophone {
    preferred_device: Option<String>,
    events: EventSender,
    held: Option<HeldStream>,
}

impl CpalMicrophone {
    pub fn new(preferred_device: Option<String>, events: EventSender) -> Self {
        Self {
            preferred_device,
            events,
            held: None,
        }
    }

    fn open_device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        match self.preferred_device.as_deref() {
            Some(name) => {
                let mut devices = host.input_devices().map_err(|err| {
                    EngineError::PermissionDenied(format!(
                        "cannot enumerate input devices: {err}. {}",
                        mic_permission_hint()
                    ))
                })?;
                devices
                    .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                    .ok_or_else(|| EngineError::DeviceLost(format!("input device '{name}' not found")))
            }
            None => host.default_input_device().ok_or_else(|| {
                EngineError::DeviceLost("no default input device available".to_string())
            }),
        }
    }

    fn build_stream(&self, device: &cpal::Device, turn_id: TurnId) -> Result<HeldStream> {
        let default_config = device.default_input_config().map_err(|err| {
            EngineError::PermissionDenied(format!(
                "cannot read input config: {err}. {}",
                mic_permission_hint()
            ))
        })?;
        let format = default_config.sample_format();
        let device_config: StreamConfig = default_config.into();
        let device_rate = device_config.sample_rate.0;
        let channels = usize::from(device_config.channels.max(1));
        let frame_samples = ((u64::from(device_rate) * FRAME_MS) / 1000).max(1) as usize;

        log_debug(&format!(
            "microphone config: format={format:?} sample_rate={device_rate}Hz channels={channels}"
        ));

        let dropped = Arc::new(AtomicUsize::new(0));
        let dispatcher = Arc::new(Mutex::new(FrameDispatcher::new(
            turn_id,
            device_rate,
            frame_samples,
            self.events.clone(),
            dropped.clone(),
        )));

        let fault_sender = self.events.clone();
        let err_fn = move |err: cpal::StreamError| {
            log_debug(&format!("audio_stream_error: {err}"));
            let _ = fault_sender.try_send(EngineEvent::CaptureFault {
                turn_id,
                message: err.to_string(),
            });
        };

        let stream = match format {
            SampleFormat::F32 => {
                let dispatcher = dispatcher.clone();
                let dropped = dropped.clone();
                device.build_input_stream(
                    &device_config,
                    move |data: &[f32], _| {
                        if let Ok(mut pump) = dispatcher.try_lock() {
                            pump.push(data, channels, |sample| sample);
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )
            }
            SampleFormat::I16 => {
                let dispatcher = dispatcher.clone();
                let dropped = dropped.clone();
                device.build_input_stream(
                    &device_config,
                    move |data: &[i16], _| {
                        if let Ok(mut pump) = dispatcher.try_lock() {
                            pump.push(data, channels, |sample| sample as f32 / 32_768.0);
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )
            }
            SampleFormat::U16 => {
                let dispatcher = dispatcher.clone();
                let dropped = dropped.clone();
                device.build_input_stream(
                    &device_config,
                    move |data: &[u16], _| {
                        if let Ok(mut pump) = dispatcher.try_lock() {
                            pump.push(data, channels, |sample| {
                                (sample as f32 - 32_768.0) / 32_768.0
                            });
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )
            }
            other => {
                return Err(EngineError::DeviceLost(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        }
        .map_err(map_build_error)?;

        stream
            .play()
            .map_err(|err| EngineError::DeviceLost(format!("failed to start capture: {err}")))?;

        Ok(HeldStream {
            stream,
            turn_id,
            dropped,
        })
    }
}

impl Microphone for CpalMicrophone {
    fn acquire(&mut self, turn_id: TurnId) -> Result<()> {
        self.release();
        let device = self.open_device()?;
        let held = self.build_stream(&device, turn_id)?;
        log_debug(&format!(
            "microphone acquired for turn {turn_id}: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        ));
        self.held = Some(held);
        Ok(())
    }

    fn release(&mut self) {
        if let Some(held) = self.held.take() {
            if let Err(err) = held.stream.pause() {
                log_debug(&format!("failed to pause audio stream: {err}"));
            }
            let dropped = held.dropped.load(Ordering::Relaxed);
            log_debug(&format!(
                "microphone released for turn {} (frames dropped: {dropped})",
                held.turn_id
            ));
        }
    }

    fn is_held(&self) -> bool {
        self.held.is_some()
    }

    fn name(&self) -> String {
        self.preferred_device
            .clone()
            .unwrap_or_else(|| "default input".to_string())
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.release();
    }
}

fn map_build_error(err: BuildStreamError) -> EngineError {
    match err {
        BuildStreamError::DeviceNotAvailable => {
            EngineError::DeviceLost("input device is no longer available".to_string())
        }
        other => EngineError::PermissionDenied(format!(
            "cannot open microphone: {other}. {}",
            mic_permission_hint()
        )),
    }
}

fn mic_permission_hint() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macOS: System Settings > Privacy & Security > Microphone (enable your terminal)."
    }
    #[cfg(target_os = "linux")]
    {
        "Linux: check PipeWire/PulseAudio permissions and ensure the device is not muted."
    }
    #[cfg(target_os = "windows")]
    {
        "Windows: Settings > Privacy & Security > Microphone (allow access for your terminal)."
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        "Check OS microphone permissions."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_not_available_maps_to_device_lost() {
        assert!(matches!(
            map_build_error(BuildStreamError::DeviceNotAvailable),
            EngineError::DeviceLost(_)
        ));
    }

    #[test]
    fn other_build_errors_map_to_permission_denied() {
        let err = map_build_error(BuildStreamError::StreamConfigNotSupported);
        match err {
            EngineError::PermissionDenied(message) => {
                assert!(message.contains(mic_permission_hint()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
