//! Wire messages exchanged with the assistant backend.
//!
//! Every message is a JSON object tagged by `type`. Audio travels as base64.

use crate::config::AudioEncoding;
use crate::engine::TurnId;
use serde::{Deserialize, Serialize};

/// Messages the client sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    StartTurn {
        turn_id: TurnId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_session_id: Option<String>,
        sample_rate: u32,
        encoding: AudioEncoding,
    },
    AudioChunk {
        turn_id: TurnId,
        seq: u64,
        encoding: AudioEncoding,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    EndTurn {
        turn_id: TurnId,
        chunk_count: u64,
    },
    Cancel {
        turn_id: TurnId,
    },
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::StartTurn { .. } => "start_turn",
            OutboundMessage::AudioChunk { .. } => "audio_chunk",
            OutboundMessage::EndTurn { .. } => "end_turn",
            OutboundMessage::Cancel { .. } => "cancel",
        }
    }

    pub fn turn_id(&self) -> TurnId {
        match self {
            OutboundMessage::StartTurn { turn_id, .. }
            | OutboundMessage::AudioChunk { turn_id, .. }
            | OutboundMessage::EndTurn { turn_id, .. }
            | OutboundMessage::Cancel { turn_id } => *turn_id,
        }
    }
}

/// Messages the backend sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    StreamStarted {
        turn_id: TurnId,
    },
    Transcript {
        turn_id: TurnId,
        text: String,
    },
    /// Interim transcript; later updates replace earlier ones.
    TranscriptUpdate {
        turn_id: TurnId,
        text: String,
    },
    AudioChunk {
        turn_id: TurnId,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    ProcessingComplete {
        turn_id: TurnId,
    },
    NoSpeechDetected {
        turn_id: TurnId,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turn_id: Option<TurnId>,
        message: String,
    },
    Cancelled {
        turn_id: TurnId,
    },
    NavigationHint {
        turn_id: TurnId,
        target: String,
    },
}

/// Control-plane signals, separated from audio and display text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    StreamStarted,
    ProcessingComplete,
    NoSpeechDetected,
    Error(String),
    CancelAcknowledged,
    NavigationHint(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Chunk {
        bytes: Vec<u8>,
        annotation: Option<String>,
    },
    Transcript {
        text: String,
        is_final: bool,
    },
    Control(ControlSignal),
}

impl InboundMessage {
    /// `None` for errors not tied to a specific turn.
    pub fn turn_id(&self) -> Option<TurnId> {
        match self {
            InboundMessage::StreamStarted { turn_id }
            | InboundMessage::Transcript { turn_id, .. }
            | InboundMessage::TranscriptUpdate { turn_id, .. }
            | InboundMessage::AudioChunk { turn_id, .. }
            | InboundMessage::ProcessingComplete { turn_id }
            | InboundMessage::NoSpeechDetected { turn_id }
            | InboundMessage::Cancelled { turn_id }
            | InboundMessage::NavigationHint { turn_id, .. } => Some(*turn_id),
            InboundMessage::Error { turn_id, .. } => *turn_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::StreamStarted { .. } => "stream_started",
            InboundMessage::Transcript { .. } => "transcript",
            InboundMessage::TranscriptUpdate { .. } => "transcript_update",
            InboundMessage::AudioChunk { .. } => "audio_chunk",
            InboundMessage::ProcessingComplete { .. } => "processing_complete",
            InboundMessage::NoSpeechDetected { .. } => "no_speech_detected",
            InboundMessage::Error { .. } => "error",
            InboundMessage::Cancelled { .. } => "cancelled",
            InboundMessage::NavigationHint { .. } => "navigation_hint",
        }
    }

    pub fn classify(self) -> Inbound {
        match self {
            InboundMessage::AudioChunk { data, text, .. } => Inbound::Chunk {
                bytes: data,
                annotation: text,
            },
            InboundMessage::Transcript { text, .. } => Inbound::Transcript {
                text,
                is_final: true,
            },
            InboundMessage::TranscriptUpdate { text, .. } => Inbound::Transcript {
                text,
                is_final: false,
            },
            InboundMessage::StreamStarted { .. } => Inbound::Control(ControlSignal::StreamStarted),
            InboundMessage::ProcessingComplete { .. } => {
                Inbound::Control(ControlSignal::ProcessingComplete)
            }
            InboundMessage::NoSpeechDetected { .. } => {
                Inbound::Control(ControlSignal::NoSpeechDetected)
            }
            InboundMessage::Error { message, .. } => Inbound::Control(ControlSignal::Error(message)),
            InboundMessage::Cancelled { .. } => Inbound::Control(ControlSignal::CancelAcknowledged),
            InboundMessage::NavigationHint { target, .. } => {
                Inbound::Control(ControlSignal::NavigationHint(target))
            }
        }
    }
}

pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.trim())
            .map_err(|err| D::Error::custom(format!("invalid base64 audio: {err}")))
    }
}
