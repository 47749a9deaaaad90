//! Silence detection for auto-send.
//!
//! Consumes one 0-100 level sample per amplitude tick and reports when the
//! user has been quiet long enough to end the utterance, or when the turn hit
//! its hard recording ceiling.

use std::time::{Duration, Instant};

/// Configuration for the silence detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilenceConfig {
    pub threshold: Duration,
    pub loudness_floor: u8,
    pub max_turn: Duration,
    pub auto_send: bool,
}

/// When the last voice activity was heard, and how long a quiet stretch must be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SilenceWindow {
    last_voice_activity_at: Instant,
    threshold: Duration,
}

impl SilenceWindow {
    fn quiet_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_voice_activity_at)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SilenceVerdict {
    /// Quiet for at least the threshold with auto-send enabled.
    Silent { quiet_for: Duration },
    /// Recording reached the hard ceiling; sending is forced regardless of settings.
    Ceiling,
}

#[derive(Debug, Clone)]
pub struct SilenceDetector {
    config: SilenceConfig,
    window: SilenceWindow,
    started_at: Instant,
}

impl SilenceDetector {
    pub fn new(config: SilenceConfig, now: Instant) -> Self {
        Self {
            window: SilenceWindow {
                last_voice_activity_at: now,
                threshold: config.threshold,
            },
            config,
            started_at: now,
        }
    }

    /// Start a fresh window; the silence clock begins at `now` even if nobody
    /// has spoken yet.
    pub fn reset(&mut self, now: Instant) {
        self.window.last_voice_activity_at = now;
        self.started_at = now;
    }

    pub fn set_threshold(&mut self, threshold: Duration) {
        self.config.threshold = threshold;
        self.window.threshold = threshold;
    }

    pub fn set_auto_send(&mut self, enabled: bool) {
        self.config.auto_send = enabled;
    }

    pub fn is_voice(&self, level: u8) -> bool {
        level > self.config.loudness_floor
    }

    pub fn has_been_silent_for(&self, duration: Duration, now: Instant) -> bool {
        self.window.quiet_for(now) >= duration
    }

    /// Feed one amplitude sample taken at `now`.
    pub fn on_sample(&mut self, level: u8, now: Instant) -> Option<SilenceVerdict> {
        if self.is_voice(level.min(100)) {
            self.window.last_voice_activity_at = now;
        }

        if now.saturating_duration_since(self.started_at) >= self.config.max_turn {
            return Some(SilenceVerdict::Ceiling);
        }
        if self.config.auto_send && self.has_been_silent_for(self.window.threshold, now) {
            return Some(SilenceVerdict::Silent {
                quiet_for: self.window.quiet_for(now),
            });
        }
        None
    }
}
