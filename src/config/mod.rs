//! Command-line parsing, runtime engine tuning, and user-adjustable settings.

mod defaults;
#[cfg(test)]
mod tests;
mod validation;

use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::app::LogSettings;
use crate::error::{EngineError, Result};

pub use defaults::{
    DEFAULT_AMPLITUDE_TICK_MS, DEFAULT_CAPTURE_SAMPLE_RATE, DEFAULT_CHUNK_ESTIMATE_MS,
    DEFAULT_CHUNK_MS, DEFAULT_LOUDNESS_FLOOR, DEFAULT_MAX_TURN_MS, DEFAULT_METER_INTERVAL_MS,
    DEFAULT_SEND_DELAY_MS, DEFAULT_SERVER_ADDR, DEFAULT_SILENCE_THRESHOLD_MS,
    DEFAULT_WATCHDOG_MARGIN_MS, MAX_MAX_TURN_MS, MAX_SEND_DELAY_MS, MAX_SILENCE_THRESHOLD_MS,
    MIN_MAX_TURN_MS, MIN_SILENCE_THRESHOLD_MS,
};

/// CLI options for the voxstream engine host.
#[derive(Debug, Parser, Clone)]
#[command(about = "VoxStream voice turn engine", author, version)]
pub struct AppConfig {
    /// Assistant backend address (host:port, newline-delimited JSON)
    #[arg(long, env = "VOXSTREAM_SERVER", default_value = DEFAULT_SERVER_ADDR)]
    pub server: String,

    /// Preferred audio input device name
    #[arg(long)]
    pub input_device: Option<String>,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Send automatically after detected silence (default)
    #[arg(long = "auto-send", overrides_with = "auto_send")]
    pub enable_auto_send: bool,

    /// Disable silence-triggered sending (explicit send only)
    #[arg(
        long = "no-auto-send",
        action = ArgAction::SetFalse,
        overrides_with = "enable_auto_send"
    )]
    pub auto_send: bool,

    /// Quiet period that ends an utterance (milliseconds)
    #[arg(long = "silence-threshold-ms", default_value_t = DEFAULT_SILENCE_THRESHOLD_MS)]
    pub silence_threshold_ms: u64,

    /// Grace period between detected silence and sending (milliseconds)
    #[arg(long = "send-delay-ms", default_value_t = DEFAULT_SEND_DELAY_MS)]
    pub send_delay_ms: u64,

    /// Level (0-100) a sample must exceed to count as voice
    #[arg(long = "loudness-floor", default_value_t = DEFAULT_LOUDNESS_FLOOR)]
    pub loudness_floor: u8,

    /// Hard ceiling on recording length before a forced send (milliseconds)
    #[arg(long = "max-turn-ms", default_value_t = DEFAULT_MAX_TURN_MS)]
    pub max_turn_ms: u64,

    /// Captured audio per outgoing chunk (milliseconds)
    #[arg(long = "chunk-ms", default_value_t = DEFAULT_CHUNK_MS)]
    pub chunk_ms: u64,

    /// Interval between amplitude samples fed to the silence detector (milliseconds)
    #[arg(long = "amplitude-tick-ms", default_value_t = DEFAULT_AMPLITUDE_TICK_MS)]
    pub amplitude_tick_ms: u64,

    /// Interval between level updates pushed to the UI (milliseconds)
    #[arg(long = "meter-interval-ms", default_value_t = DEFAULT_METER_INTERVAL_MS)]
    pub meter_interval_ms: u64,

    /// Duration assumed for chunks whose length is unknown (milliseconds)
    #[arg(
        long = "default-chunk-estimate-ms",
        default_value_t = DEFAULT_CHUNK_ESTIMATE_MS
    )]
    pub default_chunk_estimate_ms: u64,

    /// Extra time granted past a chunk's expected end before forcing ahead (milliseconds)
    #[arg(long = "watchdog-margin-ms", default_value_t = DEFAULT_WATCHDOG_MARGIN_MS)]
    pub watchdog_margin_ms: u64,

    /// Sample rate of outgoing audio (Hz)
    #[arg(long = "capture-sample-rate", default_value_t = DEFAULT_CAPTURE_SAMPLE_RATE)]
    pub capture_sample_rate: u32,

    /// Encoding of outgoing audio chunks
    #[arg(long, value_enum, default_value_t = AudioEncoding::Wav)]
    pub encoding: AudioEncoding,

    /// Backend session to resume on the first turn
    #[arg(long = "resume-session")]
    pub resume_session: Option<String>,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "VOXSTREAM_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "VOXSTREAM_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow logging transcript/annotation text (debug log only)
    #[arg(
        long = "log-content",
        env = "VOXSTREAM_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,

    /// Emit turn timing lines
    #[arg(long)]
    pub log_timings: bool,
}

/// Wire encoding for captured audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// Self-contained 16-bit mono WAV per chunk.
    Wav,
    /// Raw little-endian signed 16-bit mono samples.
    Pcm16,
}

impl AudioEncoding {
    pub fn label(self) -> &'static str {
        match self {
            AudioEncoding::Wav => "wav",
            AudioEncoding::Pcm16 => "pcm16",
        }
    }
}

/// Settings the user may change while the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    pub auto_send: bool,
    pub silence_threshold_ms: u64,
    pub send_delay_ms: u64,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            auto_send: true,
            silence_threshold_ms: DEFAULT_SILENCE_THRESHOLD_MS,
            send_delay_ms: DEFAULT_SEND_DELAY_MS,
        }
    }
}

impl UserSettings {
    /// Build validated settings; rejects out-of-range values instead of clamping.
    pub fn new(auto_send: bool, silence_threshold_ms: u64, send_delay_ms: u64) -> Result<Self> {
        let mut settings = Self {
            auto_send,
            ..Self::default()
        };
        settings.set_silence_threshold_ms(silence_threshold_ms)?;
        settings.set_send_delay_ms(send_delay_ms)?;
        Ok(settings)
    }

    pub fn set_silence_threshold_ms(&mut self, value: u64) -> Result<()> {
        if !(MIN_SILENCE_THRESHOLD_MS..=MAX_SILENCE_THRESHOLD_MS).contains(&value) {
            return Err(EngineError::InvalidSetting {
                name: "silence_threshold_ms",
                message: format!(
                    "must be between {MIN_SILENCE_THRESHOLD_MS} and {MAX_SILENCE_THRESHOLD_MS}, got {value}"
                ),
            });
        }
        self.silence_threshold_ms = value;
        Ok(())
    }

    pub fn set_send_delay_ms(&mut self, value: u64) -> Result<()> {
        if value > MAX_SEND_DELAY_MS {
            return Err(EngineError::InvalidSetting {
                name: "send_delay_ms",
                message: format!("must be between 0 and {MAX_SEND_DELAY_MS}, got {value}"),
            });
        }
        self.send_delay_ms = value;
        Ok(())
    }

    pub fn silence_threshold(&self) -> Duration {
        Duration::from_millis(self.silence_threshold_ms)
    }

    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }
}

/// Tunables for the turn engine, derived from validated CLI options.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub settings: UserSettings,
    pub loudness_floor: u8,
    pub max_turn: Duration,
    pub chunk_duration: Duration,
    pub amplitude_tick: Duration,
    pub meter_interval: Duration,
    pub default_chunk_estimate: Duration,
    pub watchdog_margin: Duration,
    pub capture_sample_rate: u32,
    pub encoding: AudioEncoding,
    pub resume_session_id: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settings: UserSettings::default(),
            loudness_floor: DEFAULT_LOUDNESS_FLOOR,
            max_turn: Duration::from_millis(DEFAULT_MAX_TURN_MS),
            chunk_duration: Duration::from_millis(DEFAULT_CHUNK_MS),
            amplitude_tick: Duration::from_millis(DEFAULT_AMPLITUDE_TICK_MS),
            meter_interval: Duration::from_millis(DEFAULT_METER_INTERVAL_MS),
            default_chunk_estimate: Duration::from_millis(DEFAULT_CHUNK_ESTIMATE_MS),
            watchdog_margin: Duration::from_millis(DEFAULT_WATCHDOG_MARGIN_MS),
            capture_sample_rate: DEFAULT_CAPTURE_SAMPLE_RATE,
            encoding: AudioEncoding::Wav,
            resume_session_id: None,
        }
    }
}

impl AppConfig {
    /// Runtime engine tuning. Call after `validate()`.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            settings: UserSettings {
                auto_send: self.auto_send,
                silence_threshold_ms: self.silence_threshold_ms,
                send_delay_ms: self.send_delay_ms,
            },
            loudness_floor: self.loudness_floor,
            max_turn: Duration::from_millis(self.max_turn_ms),
            chunk_duration: Duration::from_millis(self.chunk_ms),
            amplitude_tick: Duration::from_millis(self.amplitude_tick_ms),
            meter_interval: Duration::from_millis(self.meter_interval_ms),
            default_chunk_estimate: Duration::from_millis(self.default_chunk_estimate_ms),
            watchdog_margin: Duration::from_millis(self.watchdog_margin_ms),
            capture_sample_rate: self.capture_sample_rate,
            encoding: self.encoding,
            resume_session_id: self.resume_session.clone(),
        }
    }

    pub fn log_settings(&self) -> LogSettings {
        let enabled = (self.logs || self.log_timings) && !self.no_logs;
        LogSettings {
            enabled,
            content: enabled && self.log_content,
            timings: enabled && self.log_timings,
        }
    }
}
