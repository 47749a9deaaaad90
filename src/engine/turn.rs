use crate::error::EngineError;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

pub type TurnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Idle,
    Recording,
    Sending,
    ServerProcessing,
    Playing,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl TurnPhase {
    pub fn label(self) -> &'static str {
        match self {
            TurnPhase::Idle => "idle",
            TurnPhase::Recording => "recording",
            TurnPhase::Sending => "sending",
            TurnPhase::ServerProcessing => "server_processing",
            TurnPhase::Playing => "playing",
            TurnPhase::Paused => "paused",
            TurnPhase::Completed => "completed",
            TurnPhase::Cancelled => "cancelled",
            TurnPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    PermissionDenied(String),
    DeviceLost(String),
    TransportLost(String),
    Server(String),
}

impl FailureReason {
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::PermissionDenied(_) => "permission_denied",
            FailureReason::DeviceLost(_) => "device_lost",
            FailureReason::TransportLost(_) => "transport_lost",
            FailureReason::Server(_) => "server",
        }
    }

    pub fn to_error(&self) -> EngineError {
        match self {
            FailureReason::PermissionDenied(message) => {
                EngineError::PermissionDenied(message.clone())
            }
            FailureReason::DeviceLost(message) => EngineError::DeviceLost(message.clone()),
            FailureReason::TransportLost(message) => EngineError::TransportLost(message.clone()),
            FailureReason::Server(message) => EngineError::Server(message.clone()),
        }
    }
}

impl From<EngineError> for FailureReason {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::PermissionDenied(message) => FailureReason::PermissionDenied(message),
            EngineError::DeviceLost(message) => FailureReason::DeviceLost(message),
            EngineError::TransportLost(message) => FailureReason::TransportLost(message),
            other => FailureReason::Server(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed {
        /// The server reported no speech in the recording.
        no_speech: bool,
        /// The user stopped playback before the stream drained.
        stopped_by_user: bool,
    },
    Cancelled,
    Failed {
        reason: FailureReason,
    },
}

impl TurnOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TurnOutcome::Completed {
                no_speech: true, ..
            } => "no_speech",
            TurnOutcome::Completed {
                stopped_by_user: true,
                ..
            } => "stopped",
            TurnOutcome::Completed { .. } => "completed",
            TurnOutcome::Cancelled => "cancelled",
            TurnOutcome::Failed { .. } => "failed",
        }
    }

    pub fn terminal_phase(&self) -> TurnPhase {
        match self {
            TurnOutcome::Completed { .. } => TurnPhase::Completed,
            TurnOutcome::Cancelled => TurnPhase::Cancelled,
            TurnOutcome::Failed { .. } => TurnPhase::Failed,
        }
    }
}

/// Why recording stopped and the turn moved to sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTrigger {
    Explicit,
    Silence,
    Ceiling,
}

impl SendTrigger {
    pub fn label(self) -> &'static str {
        match self {
            SendTrigger::Explicit => "explicit",
            SendTrigger::Silence => "silence",
            SendTrigger::Ceiling => "ceiling",
        }
    }
}

/// One user-utterance / assistant-response exchange.
#[derive(Debug, Clone)]
pub struct Turn {
    pub turn_id: TurnId,
    pub phase: TurnPhase,
    pub started_at: Instant,
    pub cancelled: bool,
    pub start_sent: bool,
    /// Once `end_turn` is out, the server's context for the turn lives on
    /// that connection and cannot be moved to a new one.
    pub end_sent: bool,
    /// Session id announced with `start_turn`, repeated after a reconnect.
    pub resume_session_id: Option<String>,
    pub processing_complete: bool,
    pub no_speech: bool,
    pub reconnect_attempted: bool,
    pub autoplay_notified: bool,
    /// Pending auto-send after detected silence.
    pub send_at: Option<Instant>,
    pub send_trigger: Option<SendTrigger>,
    pub chunks_sent: u64,
    pub chunks_received: u64,
    pub first_audio_at: Option<Instant>,
}

impl Turn {
    pub fn new(turn_id: TurnId, now: Instant) -> Self {
        Self {
            turn_id,
            phase: TurnPhase::Idle,
            started_at: now,
            cancelled: false,
            start_sent: false,
            end_sent: false,
            resume_session_id: None,
            processing_complete: false,
            no_speech: false,
            reconnect_attempted: false,
            autoplay_notified: false,
            send_at: None,
            send_trigger: None,
            chunks_sent: 0,
            chunks_received: 0,
            first_audio_at: None,
        }
    }
}

/// Counters emitted once per turn at teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnSummary {
    pub turn_id: TurnId,
    pub outcome: &'static str,
    pub send_trigger: Option<&'static str>,
    pub chunks_sent: u64,
    pub chunks_received: u64,
    pub chunks_played: u64,
    pub chunks_skipped: u64,
    pub watchdog_advances: u64,
    pub first_audio_ms: Option<u64>,
    pub duration_ms: u64,
    pub captured_ms: u64,
    pub encode_failures: u64,
    pub bytes_received: u64,
}

impl TurnSummary {
    pub fn log_line(&self) -> String {
        let first_audio = self
            .first_audio_ms
            .map(|ms| ms.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "turn_metrics|turn={}|outcome={}|trigger={}|chunks_sent={}|chunks_received={}|chunks_played={}|chunks_skipped={}|watchdog_advances={}|first_audio_ms={}|duration_ms={}|captured_ms={}|encode_failures={}|bytes_received={}",
            self.turn_id,
            self.outcome,
            self.send_trigger.unwrap_or("-"),
            self.chunks_sent,
            self.chunks_received,
            self.chunks_played,
            self.chunks_skipped,
            self.watchdog_advances,
            first_audio,
            self.duration_ms,
            self.captured_ms,
            self.encode_failures,
            self.bytes_received
        )
    }
}

pub(crate) fn millis_between(start: Instant, end: Instant) -> u64 {
    duration_ms(end.saturating_duration_since(start))
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
