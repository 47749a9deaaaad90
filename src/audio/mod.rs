//! Audio capture, silence detection, and playback output.
//!
//! Captured audio is resampled to mono at the configured wire rate and cut
//! into fixed-duration chunks. Playback goes through the `Renderer` trait so
//! the engine never touches a device directly.

mod capture;
mod dispatch;
mod meter;
mod microphone;
mod output;
mod render;
mod resample;
mod silence;

pub use capture::{encode_samples, CapturePipeline, CaptureStats, OutgoingChunk};
pub use meter::{db_to_level, LiveMeter};
pub use microphone::{list_input_devices, CpalMicrophone, Microphone};
pub use output::{decode_clip, CpalRenderer, DecodedClip};
pub use render::{PlaybackTag, RenderError, RenderEvent, RenderHandle, Renderer};
pub use silence::{SilenceConfig, SilenceDetector, SilenceVerdict};
