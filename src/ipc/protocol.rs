//! JSON-lines protocol spoken with an external UI shell.
//!
//! Commands arrive on stdin tagged by `cmd`. Everything written to stdout is
//! tagged by `event`: session events defined here plus every `EngineNotice`.

use crate::config::UserSettings;
use serde::{Deserialize, Serialize};

// ============================================================================
// IPC Events (Rust → client)
// ============================================================================

/// Session-level events. Engine notices are written alongside these.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IpcEvent {
    /// Sent once on startup
    Ready {
        version: String,
        server: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        input_device: Option<String>,
        settings: UserSettings,
    },

    /// Sent after stdin closes and the active turn has been torn down
    Shutdown,
}

// ============================================================================
// IPC Commands (client → Rust)
// ============================================================================

/// Commands received from the UI shell.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum IpcCommand {
    StartTurn,
    SendNow,
    Cancel,
    PausePlayback,
    ResumePlayback,
    StopPlayback,
    ResumeFromStart,
    DismissError,
    /// Partial update; omitted fields keep their current value
    SetSettings {
        #[serde(default)]
        auto_send: Option<bool>,
        #[serde(default)]
        silence_threshold_ms: Option<u64>,
        #[serde(default)]
        send_delay_ms: Option<u64>,
    },
    /// Re-emit a full state snapshot
    GetState,
}

impl IpcCommand {
    pub fn name(&self) -> &'static str {
        match self {
            IpcCommand::StartTurn => "start_turn",
            IpcCommand::SendNow => "send_now",
            IpcCommand::Cancel => "cancel",
            IpcCommand::PausePlayback => "pause_playback",
            IpcCommand::ResumePlayback => "resume_playback",
            IpcCommand::StopPlayback => "stop_playback",
            IpcCommand::ResumeFromStart => "resume_from_start",
            IpcCommand::DismissError => "dismiss_error",
            IpcCommand::SetSettings { .. } => "set_settings",
            IpcCommand::GetState => "get_state",
        }
    }
}

/// One line read from stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Incoming {
    Command(IpcCommand),
    /// Line that did not parse; reported back as a recoverable error.
    Invalid(String),
}

/// Parse one stdin line. Blank lines yield `None`.
pub(crate) fn parse_line(line: &str) -> Option<Incoming> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(match serde_json::from_str::<IpcCommand>(trimmed) {
        Ok(cmd) => Incoming::Command(cmd),
        Err(err) => Incoming::Invalid(format!("Invalid command: {err}")),
    })
}
