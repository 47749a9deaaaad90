//! Inputs the engine consumes and notices it publishes.

use super::turn::{TurnPhase, TurnSummary};
use super::{ChunkId, EngineSnapshot, TurnId};
use crate::audio::RenderEvent;
use crate::transport::TransportEvent;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;

/// Everything that can happen outside the engine's own calls. Audio threads,
/// the transport reader, and the renderer all post here.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    CaptureFrame {
        turn_id: TurnId,
        sample_rate: u32,
        samples: Vec<f32>,
    },
    CaptureFault {
        turn_id: TurnId,
        message: String,
    },
    Render(RenderEvent),
    Transport(TransportEvent),
}

pub type EventSender = Sender<EngineEvent>;

const DEFAULT_BUS_CAPACITY: usize = 512;

/// The single queue the engine drains, so producer callbacks never touch
/// engine state directly.
pub struct EventBus {
    sender: EventSender,
    receiver: Receiver<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self { sender, receiver }
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn receiver(&self) -> &Receiver<EngineEvent> {
        &self.receiver
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// State changes published for the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineNotice {
    Phase {
        turn_id: Option<TurnId>,
        phase: TurnPhase,
    },
    Levels {
        recording: u8,
        playback: u8,
    },
    Transcript {
        turn_id: TurnId,
        text: String,
        is_final: bool,
    },
    Annotation {
        turn_id: TurnId,
        chunk_id: ChunkId,
        text: String,
    },
    NavigationHint {
        turn_id: TurnId,
        target: String,
    },
    /// Automatic playback was refused; the UI should offer a replay control.
    AutoplayBlocked {
        turn_id: TurnId,
    },
    Error {
        message: String,
        recoverable: bool,
    },
    TurnSummary(TurnSummary),
    State(EngineSnapshot),
}
