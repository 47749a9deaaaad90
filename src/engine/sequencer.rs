//! Plays received chunks one at a time, strictly in arrival order.
//!
//! A chunk is finished when the renderer reports its end, reports an error,
//! or the watchdog expires (expected duration plus margin). Whichever comes
//! first wins; events carrying an older `PlaybackTag` are ignored.

use super::store::{ChunkId, ChunkStore};
use super::turn::TurnId;
use crate::audio::{PlaybackTag, RenderError, RenderEvent, RenderHandle, Renderer};
use crate::log_debug;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Borrowed collaborators for one sequencer operation.
pub struct PlaybackContext<'a> {
    pub renderer: &'a mut dyn Renderer,
    pub store: &'a mut ChunkStore,
    pub turn_id: TurnId,
    pub now: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencerState {
    Idle,
    Playing,
    Paused,
    /// Automatic playback was refused; waiting for `resume_from_start`.
    Blocked,
}

/// What the sequencer did as a result of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Playing(ChunkId),
    Drained,
    Blocked,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackCursor {
    pub queue: VecDeque<ChunkId>,
    pub current_chunk_id: Option<ChunkId>,
    pub watchdog_deadline: Option<Instant>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackStats {
    pub played: u64,
    pub skipped: u64,
    pub watchdog_advances: u64,
}

#[derive(Debug, Clone, Copy)]
struct CurrentPlayback {
    chunk_id: ChunkId,
    handle: RenderHandle,
    tag: PlaybackTag,
}

pub struct PlaybackSequencer {
    cursor: PlaybackCursor,
    current: Option<CurrentPlayback>,
    /// Every playable chunk of the turn in id order.
    replay: Vec<(ChunkId, RenderHandle)>,
    state: SequencerState,
    paused_remaining: Option<Duration>,
    gesture_unlocked: bool,
    next_attempt: u64,
    default_estimate: Duration,
    margin: Duration,
    stats: PlaybackStats,
}

impl PlaybackSequencer {
    pub fn new(default_estimate: Duration, margin: Duration) -> Self {
        Self {
            cursor: PlaybackCursor::default(),
            current: None,
            replay: Vec::new(),
            state: SequencerState::Idle,
            paused_remaining: None,
            gesture_unlocked: false,
            next_attempt: 0,
            default_estimate,
            margin,
            stats: PlaybackStats::default(),
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn cursor(&self) -> &PlaybackCursor {
        &self.cursor
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }

    pub fn replay_ids(&self) -> Vec<ChunkId> {
        self.replay.iter().map(|(id, _)| *id).collect()
    }

    /// Nothing playing, nothing queued, and not waiting on a user gesture.
    pub fn is_drained(&self) -> bool {
        self.current.is_none()
            && self.cursor.queue.is_empty()
            && matches!(self.state, SequencerState::Idle)
    }

    /// Pending watchdog expiry. Suspended while paused.
    pub fn watchdog_deadline(&self) -> Option<Instant> {
        match self.state {
            SequencerState::Playing => self.cursor.watchdog_deadline,
            _ => None,
        }
    }

    /// Register a loaded chunk. Starts playback if nothing else is playing.
    pub fn enqueue(
        &mut self,
        ctx: &mut PlaybackContext<'_>,
        chunk_id: ChunkId,
        handle: RenderHandle,
    ) -> Option<Advance> {
        self.replay.push((chunk_id, handle));
        match self.state {
            SequencerState::Blocked => None,
            SequencerState::Playing | SequencerState::Paused => {
                self.cursor.queue.push_back(chunk_id);
                if self.cursor.queue.len() == 1 {
                    ctx.renderer.cue(handle);
                }
                None
            }
            SequencerState::Idle => {
                self.cursor.queue.push_back(chunk_id);
                Some(self.promote(ctx, false))
            }
        }
    }

    /// A chunk that could not be loaded is counted and never rendered.
    pub fn skip_unplayable(&mut self, chunk_id: ChunkId, err: &RenderError) {
        self.stats.skipped += 1;
        log_debug(&format!("skipping chunk {chunk_id}: {err}"));
    }

    pub fn on_render_event(
        &mut self,
        ctx: &mut PlaybackContext<'_>,
        event: RenderEvent,
    ) -> Option<Advance> {
        let current = self.current?;
        if current.tag != event.tag() {
            log_debug(&format!(
                "ignoring stale render event for chunk {} attempt {}",
                event.tag().chunk_id,
                event.tag().attempt
            ));
            return None;
        }
        match event {
            RenderEvent::Ended(_) => {
                self.stats.played += 1;
                Some(self.finish_current(ctx))
            }
            RenderEvent::Errored { message, .. } => {
                self.stats.skipped += 1;
                log_debug(&format!(
                    "chunk {} failed during playback: {message}",
                    current.chunk_id
                ));
                Some(self.finish_current(ctx))
            }
            RenderEvent::Blocked(_) => {
                ctx.renderer.stop(current.handle);
                self.current = None;
                Some(self.block())
            }
        }
    }

    /// Force past a chunk whose completion never arrived.
    pub fn poll(&mut self, ctx: &mut PlaybackContext<'_>) -> Option<Advance> {
        let deadline = self.watchdog_deadline()?;
        if ctx.now < deadline {
            return None;
        }
        let current = self.current?;
        ctx.renderer.stop(current.handle);
        self.stats.watchdog_advances += 1;
        self.stats.played += 1;
        tracing::warn!(
            target: "voxstream::playback",
            turn_id = ctx.turn_id,
            chunk_id = current.chunk_id,
            "playback watchdog advanced past chunk"
        );
        log_debug(&format!(
            "watchdog advanced past chunk {} of turn {}",
            current.chunk_id, ctx.turn_id
        ));
        Some(self.finish_current(ctx))
    }

    pub fn pause(&mut self, renderer: &mut dyn Renderer, now: Instant) -> bool {
        let (SequencerState::Playing, Some(current)) = (self.state, self.current) else {
            return false;
        };
        renderer.pause(current.handle);
        self.paused_remaining = self
            .cursor
            .watchdog_deadline
            .map(|deadline| deadline.saturating_duration_since(now));
        self.cursor.watchdog_deadline = None;
        self.state = SequencerState::Paused;
        true
    }

    /// Continue the paused chunk with its remaining watchdog budget.
    pub fn resume(&mut self, ctx: &mut PlaybackContext<'_>) -> Option<Advance> {
        if self.state != SequencerState::Paused {
            return None;
        }
        let Some(current) = self.current else {
            return Some(self.promote(ctx, false));
        };
        match ctx.renderer.resume(current.handle) {
            Ok(()) => {
                let remaining = self.paused_remaining.take().unwrap_or(self.margin);
                self.cursor.watchdog_deadline = Some(ctx.now + remaining);
                self.state = SequencerState::Playing;
                Some(Advance::Playing(current.chunk_id))
            }
            Err(err) => {
                self.stats.skipped += 1;
                log_debug(&format!(
                    "cannot resume chunk {}: {err}",
                    current.chunk_id
                ));
                Some(self.finish_current(ctx))
            }
        }
    }

    /// Stop the current chunk and drop everything queued.
    pub fn stop(&mut self, renderer: &mut dyn Renderer) {
        if let Some(current) = self.current.take() {
            renderer.stop(current.handle);
        }
        self.cursor = PlaybackCursor::default();
        self.paused_remaining = None;
        self.state = SequencerState::Idle;
    }

    /// Replay every chunk of the turn from id 0. The first attempt counts as
    /// a user gesture. Returns `None` when there is nothing to replay.
    pub fn resume_from_start(&mut self, ctx: &mut PlaybackContext<'_>) -> Option<Advance> {
        if self.replay.is_empty() {
            return None;
        }
        self.stop(&mut *ctx.renderer);
        self.cursor.queue = self.replay.iter().map(|(id, _)| *id).collect();
        Some(self.promote(ctx, true))
    }

    /// Stop playback and release every loaded clip.
    pub fn clear(&mut self, renderer: &mut dyn Renderer) {
        self.stop(renderer);
        for (_, handle) in self.replay.drain(..) {
            renderer.release(handle);
        }
        self.stats = PlaybackStats::default();
    }

    fn cue_next(&self, renderer: &mut dyn Renderer) {
        if let Some(handle) = self
            .cursor
            .queue
            .front()
            .and_then(|chunk_id| self.handle_for(*chunk_id))
        {
            renderer.cue(handle);
        }
    }

    fn handle_for(&self, chunk_id: ChunkId) -> Option<RenderHandle> {
        self.replay
            .iter()
            .find(|(id, _)| *id == chunk_id)
            .map(|(_, handle)| *handle)
    }

    fn finish_current(&mut self, ctx: &mut PlaybackContext<'_>) -> Advance {
        if let Some(current) = self.current.take() {
            ctx.store.mark_played(current.chunk_id);
        }
        self.cursor.current_chunk_id = None;
        self.cursor.watchdog_deadline = None;
        self.paused_remaining = None;
        if self.state == SequencerState::Paused {
            // Queue stays put until the user resumes.
            return Advance::Drained;
        }
        self.promote(ctx, false)
    }

    fn block(&mut self) -> Advance {
        self.cursor = PlaybackCursor::default();
        self.paused_remaining = None;
        self.state = SequencerState::Blocked;
        Advance::Blocked
    }

    /// Start the next queued chunk, skipping any the renderer rejects.
    fn promote(&mut self, ctx: &mut PlaybackContext<'_>, gesture: bool) -> Advance {
        let mut gesture = gesture;
        while let Some(chunk_id) = self.cursor.queue.pop_front() {
            let Some(handle) = self.handle_for(chunk_id) else {
                continue;
            };
            let tag = PlaybackTag {
                turn_id: ctx.turn_id,
                chunk_id,
                attempt: self.next_attempt,
            };
            self.next_attempt += 1;

            match ctx
                .renderer
                .play(handle, tag, gesture || self.gesture_unlocked)
            {
                Ok(()) => {
                    if gesture {
                        self.gesture_unlocked = true;
                    }
                    ctx.store.mark_started(chunk_id, ctx.now);
                    let expected = ctx
                        .renderer
                        .estimated_duration(handle)
                        .unwrap_or(self.default_estimate);
                    self.current = Some(CurrentPlayback {
                        chunk_id,
                        handle,
                        tag,
                    });
                    self.cursor.current_chunk_id = Some(chunk_id);
                    self.cursor.watchdog_deadline = Some(ctx.now + expected + self.margin);
                    self.state = SequencerState::Playing;
                    self.cue_next(&mut *ctx.renderer);
                    return Advance::Playing(chunk_id);
                }
                Err(RenderError::AutoplayBlocked) => {
                    log_debug(&format!(
                        "automatic playback blocked at chunk {chunk_id}; waiting for user"
                    ));
                    return self.block();
                }
                Err(err) => {
                    self.stats.skipped += 1;
                    ctx.store.mark_played(chunk_id);
                    log_debug(&format!("skipping chunk {chunk_id}: {err}"));
                    gesture = false;
                }
            }
        }
        self.cursor.current_chunk_id = None;
        self.cursor.watchdog_deadline = None;
        self.state = SequencerState::Idle;
        Advance::Drained
    }
}
