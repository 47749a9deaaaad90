//! Error taxonomy for the voice turn engine.
//!
//! Only capture and transport failures end a turn. Per-chunk decode and
//! playback problems are absorbed by the sequencer and never reach this type.

use thiserror::Error;

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Microphone access refused; the user can grant access and retry.
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Input device vanished or the stream died mid-capture.
    #[error("audio device lost: {0}")]
    DeviceLost(String),

    /// Channel to the backend dropped and the single reconnect failed.
    #[error("connection to the assistant lost: {0}")]
    TransportLost(String),

    /// Backend reported a failure for this turn.
    #[error("assistant error: {0}")]
    Server(String),

    /// A turn is already running; only idle may start a new one.
    #[error("a turn is already in progress ({phase})")]
    Busy { phase: &'static str },

    /// The requested action does not apply to the current phase.
    #[error("{action} is not available while {phase}")]
    InvalidAction {
        action: &'static str,
        phase: &'static str,
    },

    /// Setting outside its accepted range.
    #[error("invalid setting {name}: {message}")]
    InvalidSetting { name: &'static str, message: String },
}

impl EngineError {
    /// Whether the user can retry the same action after dismissing the error.
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::PermissionDenied(_)
            | EngineError::Busy { .. }
            | EngineError::InvalidAction { .. }
            | EngineError::InvalidSetting { .. } => true,
            EngineError::DeviceLost(_) | EngineError::TransportLost(_) | EngineError::Server(_) => {
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_is_retryable() {
        assert!(EngineError::PermissionDenied("denied".into()).is_recoverable());
        assert!(!EngineError::DeviceLost("unplugged".into()).is_recoverable());
        assert!(!EngineError::TransportLost("reset".into()).is_recoverable());
    }

    #[test]
    fn invalid_action_message_names_phase() {
        let err = EngineError::InvalidAction {
            action: "pause_playback",
            phase: "recording",
        };
        assert_eq!(
            err.to_string(),
            "pause_playback is not available while recording"
        );
    }
}
