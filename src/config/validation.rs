use super::defaults::{
    MAX_MAX_TURN_MS, MAX_SEND_DELAY_MS, MAX_SILENCE_THRESHOLD_MS, MIN_MAX_TURN_MS,
    MIN_SILENCE_THRESHOLD_MS,
};
use super::AppConfig;
use anyhow::{bail, Result};

const FORBIDDEN_DEVICE_CHARS: &[char] = &['\n', '\r', '\0'];

impl AppConfig {
    /// Check CLI values and normalize strings.
    pub fn validate(&mut self) -> Result<()> {
        self.server = self.server.trim().to_string();
        validate_server_addr(&self.server)?;

        if !(MIN_SILENCE_THRESHOLD_MS..=MAX_SILENCE_THRESHOLD_MS)
            .contains(&self.silence_threshold_ms)
        {
            bail!(
                "--silence-threshold-ms must be between {MIN_SILENCE_THRESHOLD_MS} and {MAX_SILENCE_THRESHOLD_MS}, got {}",
                self.silence_threshold_ms
            );
        }
        if self.send_delay_ms > MAX_SEND_DELAY_MS {
            bail!(
                "--send-delay-ms must be between 0 and {MAX_SEND_DELAY_MS}, got {}",
                self.send_delay_ms
            );
        }
        if !(1..=99).contains(&self.loudness_floor) {
            bail!(
                "--loudness-floor must be between 1 and 99, got {}",
                self.loudness_floor
            );
        }
        if !(MIN_MAX_TURN_MS..=MAX_MAX_TURN_MS).contains(&self.max_turn_ms) {
            bail!(
                "--max-turn-ms must be between {MIN_MAX_TURN_MS} and {MAX_MAX_TURN_MS}, got {}",
                self.max_turn_ms
            );
        }
        if self.silence_threshold_ms >= self.max_turn_ms {
            bail!(
                "--silence-threshold-ms ({}) must be shorter than --max-turn-ms ({})",
                self.silence_threshold_ms,
                self.max_turn_ms
            );
        }
        if !(100..=5_000).contains(&self.chunk_ms) {
            bail!(
                "--chunk-ms must be between 100 and 5000, got {}",
                self.chunk_ms
            );
        }
        if !(100..=5_000).contains(&self.amplitude_tick_ms) {
            bail!(
                "--amplitude-tick-ms must be between 100 and 5000, got {}",
                self.amplitude_tick_ms
            );
        }
        if self.amplitude_tick_ms > self.silence_threshold_ms {
            bail!(
                "--amplitude-tick-ms ({}) cannot exceed --silence-threshold-ms ({})",
                self.amplitude_tick_ms,
                self.silence_threshold_ms
            );
        }
        if !(20..=1_000).contains(&self.meter_interval_ms) {
            bail!(
                "--meter-interval-ms must be between 20 and 1000, got {}",
                self.meter_interval_ms
            );
        }
        if !(500..=60_000).contains(&self.default_chunk_estimate_ms) {
            bail!(
                "--default-chunk-estimate-ms must be between 500 and 60000, got {}",
                self.default_chunk_estimate_ms
            );
        }
        if !(100..=10_000).contains(&self.watchdog_margin_ms) {
            bail!(
                "--watchdog-margin-ms must be between 100 and 10000, got {}",
                self.watchdog_margin_ms
            );
        }
        if !(8_000..=48_000).contains(&self.capture_sample_rate) {
            bail!(
                "--capture-sample-rate must be between 8000 and 48000 Hz, got {}",
                self.capture_sample_rate
            );
        }

        if let Some(device) = &self.input_device {
            let trimmed = device.trim();
            if trimmed.is_empty() {
                bail!("--input-device must not be empty");
            }
            if trimmed.contains(FORBIDDEN_DEVICE_CHARS) {
                bail!("--input-device contains control characters");
            }
            self.input_device = Some(trimmed.to_string());
        }

        if let Some(session) = &self.resume_session {
            let trimmed = session.trim();
            if trimmed.is_empty() {
                self.resume_session = None;
            } else if !trimmed
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
            {
                bail!("--resume-session must contain only ASCII letters, digits, '-' or '_'");
            } else {
                self.resume_session = Some(trimmed.to_string());
            }
        }

        Ok(())
    }
}

pub(super) fn validate_server_addr(addr: &str) -> Result<()> {
    if addr.is_empty() {
        bail!("--server must not be empty");
    }
    let Some((host, port)) = addr.rsplit_once(':') else {
        bail!("--server must be host:port, got '{addr}'");
    };
    if host.is_empty() {
        bail!("--server host must not be empty");
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => bail!("--server port must be between 1 and 65535, got '{port}'"),
        Ok(_) => Ok(()),
    }
}
