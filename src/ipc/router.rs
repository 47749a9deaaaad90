use crate::config::UserSettings;
use crate::engine::{EngineNotice, VoiceEngine};
use crate::error::{EngineError, Result};
use crate::log_debug;
use std::time::Instant;

use super::protocol::{Incoming, IpcCommand};

// ============================================================================
// Command Handlers
// ============================================================================

/// Apply one stdin line. Returns a direct reply for the UI, if any; everything
/// else reaches the UI as engine notices.
pub(super) fn handle_incoming(
    engine: &mut VoiceEngine,
    incoming: Incoming,
    now: Instant,
) -> Option<EngineNotice> {
    match incoming {
        Incoming::Command(cmd) => handle_command(engine, cmd, now),
        Incoming::Invalid(message) => Some(EngineNotice::Error {
            message,
            recoverable: true,
        }),
    }
}

pub(super) fn handle_command(
    engine: &mut VoiceEngine,
    cmd: IpcCommand,
    now: Instant,
) -> Option<EngineNotice> {
    let name = cmd.name();
    let result = match cmd {
        IpcCommand::StartTurn => engine.start_turn(now).map(|_| ()),
        IpcCommand::SendNow => engine.send_now(now),
        IpcCommand::Cancel => engine.cancel(now),
        IpcCommand::PausePlayback => engine.pause_playback(now),
        IpcCommand::ResumePlayback => engine.resume_playback(now),
        IpcCommand::StopPlayback => engine.stop_playback(now),
        IpcCommand::ResumeFromStart => engine.resume_from_start(now),
        IpcCommand::DismissError => {
            if !engine.dismiss_error() {
                log_debug("dismiss_error: nothing to dismiss");
            }
            Ok(())
        }
        IpcCommand::SetSettings {
            auto_send,
            silence_threshold_ms,
            send_delay_ms,
        } => {
            return match apply_settings(engine, auto_send, silence_threshold_ms, send_delay_ms) {
                Ok(()) => Some(EngineNotice::State(engine.snapshot())),
                Err(err) => reject(name, &err),
            };
        }
        IpcCommand::GetState => return Some(EngineNotice::State(engine.snapshot())),
    };

    match result {
        Ok(()) => None,
        Err(err) if reported_by_engine(&err) => {
            log_debug(&format!("{name} ended the turn: {err}"));
            None
        }
        Err(err) => reject(name, &err),
    }
}

/// Merge a partial update over the current settings and apply it.
fn apply_settings(
    engine: &mut VoiceEngine,
    auto_send: Option<bool>,
    silence_threshold_ms: Option<u64>,
    send_delay_ms: Option<u64>,
) -> Result<()> {
    let current = engine.settings();
    engine.update_settings(UserSettings {
        auto_send: auto_send.unwrap_or(current.auto_send),
        silence_threshold_ms: silence_threshold_ms.unwrap_or(current.silence_threshold_ms),
        send_delay_ms: send_delay_ms.unwrap_or(current.send_delay_ms),
    })
}

fn reject(name: &str, err: &EngineError) -> Option<EngineNotice> {
    log_debug(&format!("{name} rejected: {err}"));
    Some(EngineNotice::Error {
        message: err.to_string(),
        recoverable: err.is_recoverable(),
    })
}

/// Turn failures already produced an `error` notice during teardown.
fn reported_by_engine(err: &EngineError) -> bool {
    matches!(
        err,
        EngineError::PermissionDenied(_)
            | EngineError::DeviceLost(_)
            | EngineError::TransportLost(_)
            | EngineError::Server(_)
    )
}
