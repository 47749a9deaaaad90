//! Platform audio output as seen by the playback sequencer.

use crate::engine::{ChunkId, TurnId};
use std::time::Duration;
use thiserror::Error;

/// Opaque reference to a clip loaded into a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderHandle(pub u64);

/// Identifies one playback attempt. Completion events carry it back so stale
/// events from earlier attempts can be ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackTag {
    pub turn_id: TurnId,
    pub chunk_id: ChunkId,
    pub attempt: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// The platform refused to start audio without a user gesture.
    #[error("automatic playback was blocked")]
    AutoplayBlocked,
    #[error("cannot decode audio chunk: {0}")]
    Decode(String),
    #[error("playback failed: {0}")]
    Playback(String),
}

/// Asynchronous outcome of a `Renderer::play`, delivered through the engine bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEvent {
    Ended(PlaybackTag),
    Errored { tag: PlaybackTag, message: String },
    /// Playback was refused after `play` returned, pending a user gesture.
    Blocked(PlaybackTag),
}

impl RenderEvent {
    pub fn tag(&self) -> PlaybackTag {
        match self {
            RenderEvent::Ended(tag) | RenderEvent::Blocked(tag) => *tag,
            RenderEvent::Errored { tag, .. } => *tag,
        }
    }
}

/// Audio output. Implementations report natural completion and asynchronous
/// errors as `RenderEvent`s on the bus they were built with.
pub trait Renderer {
    fn load(&mut self, bytes: &[u8]) -> Result<RenderHandle, RenderError>;
    /// Start rendering from the beginning. `user_gesture` is true when the
    /// attempt was initiated by the user or follows one.
    fn play(
        &mut self,
        handle: RenderHandle,
        tag: PlaybackTag,
        user_gesture: bool,
    ) -> Result<(), RenderError>;
    fn pause(&mut self, handle: RenderHandle);
    fn resume(&mut self, handle: RenderHandle) -> Result<(), RenderError>;
    /// Hint that `handle` plays next, so output can run straight into it
    /// when the current clip ends. `play` still decides what is playing.
    fn cue(&mut self, _handle: RenderHandle) {}
    fn stop(&mut self, handle: RenderHandle);
    fn release(&mut self, handle: RenderHandle);
    fn estimated_duration(&self, handle: RenderHandle) -> Option<Duration>;
    /// Current output level, 0-100.
    fn level(&self) -> u8 {
        0
    }
}
