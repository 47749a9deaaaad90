//! Voice turn engine.
//!
//! A single-threaded state machine that owns the current turn. Callers drive
//! it with user actions, with `handle_event` for everything arriving on the
//! event bus, and with `poll` once `next_deadline` passes. Time is always
//! passed in so the engine never reads the clock itself.

mod events;
mod sequencer;
mod store;
#[cfg(test)]
pub(crate) mod testing;
mod turn;

pub use events::{EngineEvent, EngineNotice, EventBus, EventSender};
pub use sequencer::{
    Advance, PlaybackContext, PlaybackCursor, PlaybackSequencer, PlaybackStats, SequencerState,
};
pub use store::{Chunk, ChunkId, ChunkStore};
pub use turn::{
    FailureReason, SendTrigger, Turn, TurnId, TurnOutcome, TurnPhase, TurnSummary,
};

use crate::audio::{
    CapturePipeline, Microphone, OutgoingChunk, Renderer, SilenceConfig, SilenceDetector,
    SilenceVerdict,
};
use crate::config::{EngineConfig, UserSettings};
use crate::error::{EngineError, Result};
use crate::transport::{ControlSignal, Inbound, InboundMessage, OutboundMessage, Transport, TransportEvent};
use crate::{log_debug, log_debug_content, timings_enabled};
use crossbeam_channel::Sender;
use serde::Serialize;
use std::time::Instant;
use turn::{duration_ms, millis_between};

/// Platform collaborators the engine drives.
pub struct EngineParts {
    pub microphone: Box<dyn Microphone>,
    pub transport: Box<dyn Transport>,
    pub renderer: Box<dyn Renderer>,
}

/// Point-in-time view for the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub phase: TurnPhase,
    pub turn_id: Option<TurnId>,
    pub playback: SequencerState,
    pub queued_chunks: usize,
    pub received_chunks: usize,
    pub replayable_chunks: usize,
    pub settings: UserSettings,
    pub connected: bool,
    pub recording_level: u8,
    pub playback_level: u8,
    pub last_outcome: Option<TurnOutcome>,
    pub last_error: Option<String>,
}

pub struct VoiceEngine {
    config: EngineConfig,
    microphone: Box<dyn Microphone>,
    transport: Box<dyn Transport>,
    renderer: Box<dyn Renderer>,
    notices: Sender<EngineNotice>,
    turn: Option<Turn>,
    next_turn_id: TurnId,
    store: ChunkStore,
    capture: CapturePipeline,
    silence: SilenceDetector,
    sequencer: PlaybackSequencer,
    resume_session_id: Option<String>,
    last_outcome: Option<TurnOutcome>,
    last_error: Option<EngineError>,
    next_amplitude_tick: Option<Instant>,
    next_meter_update: Option<Instant>,
}

impl VoiceEngine {
    pub fn new(config: EngineConfig, parts: EngineParts, notices: Sender<EngineNotice>) -> Self {
        let silence = SilenceDetector::new(
            SilenceConfig {
                threshold: config.settings.silence_threshold(),
                loudness_floor: config.loudness_floor,
                max_turn: config.max_turn,
                auto_send: config.settings.auto_send,
            },
            Instant::now(),
        );
        Self {
            capture: CapturePipeline::new(&config),
            sequencer: PlaybackSequencer::new(
                config.default_chunk_estimate,
                config.watchdog_margin,
            ),
            resume_session_id: config.resume_session_id.clone(),
            silence,
            config,
            microphone: parts.microphone,
            transport: parts.transport,
            renderer: parts.renderer,
            notices,
            turn: None,
            next_turn_id: 0,
            store: ChunkStore::new(),
            last_outcome: None,
            last_error: None,
            next_amplitude_tick: None,
            next_meter_update: None,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.turn.as_ref().map_or(TurnPhase::Idle, |turn| turn.phase)
    }

    pub fn current_turn_id(&self) -> Option<TurnId> {
        self.turn.as_ref().map(|turn| turn.turn_id)
    }

    pub fn turn(&self) -> Option<&Turn> {
        self.turn.as_ref()
    }

    pub fn last_error(&self) -> Option<&EngineError> {
        self.last_error.as_ref()
    }

    pub fn last_outcome(&self) -> Option<&TurnOutcome> {
        self.last_outcome.as_ref()
    }

    pub fn settings(&self) -> UserSettings {
        self.config.settings
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn sequencer(&self) -> &PlaybackSequencer {
        &self.sequencer
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let phase = self.phase();
        EngineSnapshot {
            phase,
            turn_id: self.current_turn_id(),
            playback: self.sequencer.state(),
            queued_chunks: self.sequencer.cursor().queue.len(),
            received_chunks: self.store.len(),
            replayable_chunks: self.sequencer.replay_ids().len(),
            settings: self.config.settings,
            connected: self.transport.is_open(),
            recording_level: if phase == TurnPhase::Recording {
                self.capture.latest_level()
            } else {
                0
            },
            playback_level: self.renderer.level(),
            last_outcome: self.last_outcome.clone(),
            last_error: self.last_error.as_ref().map(ToString::to_string),
        }
    }

    /// Earliest instant at which `poll` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.sequencer.watchdog_deadline(),
            self.next_amplitude_tick,
            self.turn.as_ref().and_then(|turn| turn.send_at),
            self.next_meter_update,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Begin a new turn: acquire the microphone, open the channel, and start
    /// recording. Only valid while idle.
    pub fn start_turn(&mut self, now: Instant) -> Result<TurnId> {
        if let Some(turn) = &self.turn {
            return Err(EngineError::Busy {
                phase: turn.phase.label(),
            });
        }
        let turn_id = self.next_turn_id;
        self.next_turn_id += 1;
        self.last_error = None;
        self.store.clear();
        self.turn = Some(Turn::new(turn_id, now));
        log_debug(&format!("turn {turn_id}: starting"));

        if let Err(err) = self.capture.start(turn_id, self.microphone.as_mut()) {
            self.fail(FailureReason::from(err.clone()), now);
            return Err(err);
        }
        if let Err(err) = self.transport.connect() {
            let err = EngineError::TransportLost(err.to_string());
            self.fail(FailureReason::from(err.clone()), now);
            return Err(err);
        }

        let start = OutboundMessage::StartTurn {
            turn_id,
            resume_session_id: self.resume_session_id.clone(),
            sample_rate: self.capture.sample_rate(),
            encoding: self.capture.encoding(),
        };
        self.send_outbound(&start, now)?;
        let announced = self.resume_session_id.take();
        if let Some(turn) = self.turn.as_mut() {
            turn.start_sent = true;
            turn.resume_session_id = announced;
        }

        self.silence.reset(now);
        self.next_amplitude_tick = Some(now + self.config.amplitude_tick);
        self.next_meter_update = Some(now + self.config.meter_interval);
        self.set_phase(TurnPhase::Recording);
        Ok(turn_id)
    }

    /// Stop recording immediately and send, ignoring any send delay.
    pub fn send_now(&mut self, now: Instant) -> Result<()> {
        match self.phase() {
            TurnPhase::Recording => {
                self.begin_send(SendTrigger::Explicit, now);
                Ok(())
            }
            phase => Err(EngineError::InvalidAction {
                action: "send_now",
                phase: phase.label(),
            }),
        }
    }

    /// Abort the current turn from any phase. Idempotent; never fails.
    pub fn cancel(&mut self, now: Instant) -> Result<()> {
        let Some(turn) = self.turn.as_mut() else {
            log_debug("cancel ignored: no active turn");
            return Ok(());
        };
        turn.cancelled = true;
        let (turn_id, notify) = (turn.turn_id, turn.start_sent);
        if notify {
            self.notify_server_cancel(turn_id);
        }
        self.end_turn(TurnOutcome::Cancelled, now);
        Ok(())
    }

    pub fn pause_playback(&mut self, now: Instant) -> Result<()> {
        let phase = self.phase();
        if phase != TurnPhase::Playing {
            return Err(EngineError::InvalidAction {
                action: "pause_playback",
                phase: phase.label(),
            });
        }
        if !self.sequencer.pause(self.renderer.as_mut(), now) {
            let waiting = match self.sequencer.state() {
                SequencerState::Blocked => "blocked",
                _ => "waiting_for_audio",
            };
            return Err(EngineError::InvalidAction {
                action: "pause_playback",
                phase: waiting,
            });
        }
        self.set_phase(TurnPhase::Paused);
        Ok(())
    }

    pub fn resume_playback(&mut self, now: Instant) -> Result<()> {
        let phase = self.phase();
        if phase != TurnPhase::Paused {
            return Err(EngineError::InvalidAction {
                action: "resume_playback",
                phase: phase.label(),
            });
        }
        let advance = self
            .with_playback(now, |sequencer, ctx| sequencer.resume(ctx))
            .flatten();
        self.set_phase(TurnPhase::Playing);
        if let Some(advance) = advance {
            self.after_advance(advance, now);
        }
        Ok(())
    }

    /// End playback early. The turn completes; the server is told to stop
    /// streaming if it has not finished.
    pub fn stop_playback(&mut self, now: Instant) -> Result<()> {
        let phase = self.phase();
        if !matches!(phase, TurnPhase::Playing | TurnPhase::Paused) {
            return Err(EngineError::InvalidAction {
                action: "stop_playback",
                phase: phase.label(),
            });
        }
        self.sequencer.stop(self.renderer.as_mut());
        let streaming = self
            .turn
            .as_ref()
            .filter(|turn| !turn.processing_complete)
            .map(|turn| turn.turn_id);
        if let Some(turn_id) = streaming {
            self.notify_server_cancel(turn_id);
        }
        self.end_turn(
            TurnOutcome::Completed {
                no_speech: false,
                stopped_by_user: true,
            },
            now,
        );
        Ok(())
    }

    /// Replay the whole response from its first chunk. This is the recovery
    /// path when automatic playback was blocked.
    pub fn resume_from_start(&mut self, now: Instant) -> Result<()> {
        let phase = self.phase();
        if !matches!(phase, TurnPhase::Playing | TurnPhase::Paused) {
            return Err(EngineError::InvalidAction {
                action: "resume_from_start",
                phase: phase.label(),
            });
        }
        let Some(advance) = self
            .with_playback(now, |sequencer, ctx| sequencer.resume_from_start(ctx))
            .flatten()
        else {
            return Err(EngineError::InvalidAction {
                action: "resume_from_start",
                phase: phase.label(),
            });
        };
        if let Some(turn) = self.turn.as_mut() {
            turn.autoplay_notified = false;
        }
        self.set_phase(TurnPhase::Playing);
        self.after_advance(advance, now);
        Ok(())
    }

    /// Clear the last reported error. Returns whether there was one.
    pub fn dismiss_error(&mut self) -> bool {
        self.last_error.take().is_some()
    }

    /// Apply new user settings. Out-of-range values are rejected, not clamped.
    pub fn update_settings(&mut self, settings: UserSettings) -> Result<()> {
        let settings = UserSettings::new(
            settings.auto_send,
            settings.silence_threshold_ms,
            settings.send_delay_ms,
        )?;
        self.config.settings = settings;
        self.silence.set_threshold(settings.silence_threshold());
        self.silence.set_auto_send(settings.auto_send);
        if !settings.auto_send {
            if let Some(turn) = self.turn.as_mut() {
                turn.send_at = None;
            }
        }
        log_debug(&format!(
            "settings updated: auto_send={} silence_threshold_ms={} send_delay_ms={}",
            settings.auto_send, settings.silence_threshold_ms, settings.send_delay_ms
        ));
        Ok(())
    }

    /// Consume one event from the bus.
    pub fn handle_event(&mut self, event: EngineEvent, now: Instant) {
        match event {
            EngineEvent::CaptureFrame {
                turn_id,
                sample_rate,
                samples,
            } => {
                if !self.is_current(turn_id) || self.phase() != TurnPhase::Recording {
                    return;
                }
                for chunk in self.capture.push_frame(sample_rate, &samples) {
                    if !self.forward_chunk(chunk, now) {
                        return;
                    }
                }
            }
            EngineEvent::CaptureFault { turn_id, message } => {
                if self.is_current(turn_id) && self.capture.is_active() {
                    self.fail(FailureReason::DeviceLost(message), now);
                }
            }
            EngineEvent::Render(event) => {
                if !self.is_current(event.tag().turn_id) {
                    return;
                }
                let advance = self
                    .with_playback(now, |sequencer, ctx| sequencer.on_render_event(ctx, event))
                    .flatten();
                if let Some(advance) = advance {
                    self.after_advance(advance, now);
                }
            }
            EngineEvent::Transport(event) => {
                if event.generation() != self.transport.generation() {
                    log_debug(&format!(
                        "ignoring transport event from stale generation {}",
                        event.generation()
                    ));
                    return;
                }
                match event {
                    TransportEvent::Inbound { message, .. } => self.handle_inbound(message, now),
                    TransportEvent::Closed { code, reason, .. } => {
                        self.handle_closed(code, &reason, now)
                    }
                }
            }
        }
    }

    /// Run timers that are due: playback watchdog, amplitude ticks, pending
    /// auto-send, and level updates.
    pub fn poll(&mut self, now: Instant) {
        let advance = self
            .with_playback(now, |sequencer, ctx| sequencer.poll(ctx))
            .flatten();
        if let Some(advance) = advance {
            self.after_advance(advance, now);
        }
        if self.phase() == TurnPhase::Recording {
            self.poll_recording(now);
        }
        self.poll_meter(now);
    }

    fn is_current(&self, turn_id: TurnId) -> bool {
        self.current_turn_id() == Some(turn_id)
    }

    fn emit(&self, notice: EngineNotice) {
        let _ = self.notices.send(notice);
    }

    fn with_playback<R>(
        &mut self,
        now: Instant,
        op: impl FnOnce(&mut PlaybackSequencer, &mut PlaybackContext<'_>) -> R,
    ) -> Option<R> {
        let turn_id = self.turn.as_ref()?.turn_id;
        let mut ctx = PlaybackContext {
            renderer: self.renderer.as_mut(),
            store: &mut self.store,
            turn_id,
            now,
        };
        Some(op(&mut self.sequencer, &mut ctx))
    }

    fn set_phase(&mut self, phase: TurnPhase) {
        let Some(turn) = self.turn.as_mut() else {
            return;
        };
        if turn.phase == phase {
            return;
        }
        let from = turn.phase;
        turn.phase = phase;
        let turn_id = turn.turn_id;
        log_debug(&format!("turn {turn_id}: {from} -> {phase}"));
        tracing::info!(
            target: "voxstream::turn",
            turn_id,
            from = from.label(),
            to = phase.label(),
            "phase changed"
        );
        self.emit(EngineNotice::Phase {
            turn_id: Some(turn_id),
            phase,
        });
    }

    /// Send, reconnecting once per turn if the channel is gone. A send that
    /// still fails ends the turn with `TransportLost`.
    fn send_outbound(&mut self, message: &OutboundMessage, now: Instant) -> Result<()> {
        let first = match self.transport.send(message) {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        log_debug(&format!("send of {} failed: {first}", message.kind()));
        if self.reconnect(&first.to_string()) && self.transport.send(message).is_ok() {
            return Ok(());
        }
        let err = EngineError::TransportLost(first.to_string());
        self.fail(FailureReason::from(err.clone()), now);
        Err(err)
    }

    /// Reopen the channel once per turn. Only possible before `end_turn` was
    /// sent; an announced turn is re-announced under the same id so the
    /// remaining chunks continue at the next seq.
    fn reconnect(&mut self, reason: &str) -> bool {
        let Some(turn) = self.turn.as_mut() else {
            return false;
        };
        if turn.reconnect_attempted || turn.end_sent {
            return false;
        }
        turn.reconnect_attempted = true;
        let turn_id = turn.turn_id;
        let reannounce = turn.start_sent.then(|| OutboundMessage::StartTurn {
            turn_id,
            resume_session_id: turn.resume_session_id.clone(),
            sample_rate: self.capture.sample_rate(),
            encoding: self.capture.encoding(),
        });
        self.transport.close();
        if let Err(err) = self.transport.connect() {
            log_debug(&format!("turn {turn_id}: reconnect failed: {err}"));
            return false;
        }
        if let Some(start) = reannounce {
            if let Err(err) = self.transport.send(&start) {
                log_debug(&format!("turn {turn_id}: re-announce after reconnect failed: {err}"));
                return false;
            }
        }
        log_debug(&format!("turn {turn_id}: reconnected after: {reason}"));
        tracing::info!(target: "voxstream::transport", turn_id, reason, "reconnected");
        true
    }

    fn notify_server_cancel(&mut self, turn_id: TurnId) {
        if !self.transport.is_open() {
            return;
        }
        if let Err(err) = self.transport.send(&OutboundMessage::Cancel { turn_id }) {
            log_debug(&format!("turn {turn_id}: cancel signal not delivered: {err}"));
        }
    }

    fn forward_chunk(&mut self, chunk: OutgoingChunk, now: Instant) -> bool {
        let message = OutboundMessage::AudioChunk {
            turn_id: chunk.turn_id,
            seq: chunk.seq,
            encoding: chunk.encoding,
            data: chunk.payload,
        };
        if self.send_outbound(&message, now).is_err() {
            return false;
        }
        if let Some(turn) = self.turn.as_mut() {
            turn.chunks_sent += 1;
        }
        true
    }

    fn begin_send(&mut self, trigger: SendTrigger, now: Instant) {
        let Some(turn) = self.turn.as_mut() else {
            return;
        };
        turn.send_at = None;
        turn.send_trigger = Some(trigger);
        let turn_id = turn.turn_id;
        self.next_amplitude_tick = None;
        log_debug(&format!("turn {turn_id}: sending ({})", trigger.label()));
        self.set_phase(TurnPhase::Sending);

        if let Some(tail) = self.capture.stop(true, self.microphone.as_mut()) {
            if !self.forward_chunk(tail, now) {
                return;
            }
        }
        let chunk_count = self.turn.as_ref().map_or(0, |turn| turn.chunks_sent);
        let end = OutboundMessage::EndTurn {
            turn_id,
            chunk_count,
        };
        if self.send_outbound(&end, now).is_err() {
            return;
        }
        if let Some(turn) = self.turn.as_mut() {
            turn.end_sent = true;
        }
        self.set_phase(TurnPhase::ServerProcessing);
        self.check_completion(now);
    }

    fn poll_recording(&mut self, now: Instant) {
        while let Some(tick) = self.next_amplitude_tick {
            if tick > now {
                break;
            }
            self.next_amplitude_tick = Some(tick + self.config.amplitude_tick);
            let level = self.capture.take_peak_level();
            let voice = self.silence.is_voice(level);
            let verdict = self.silence.on_sample(level, now);
            let Some(turn) = self.turn.as_mut() else {
                return;
            };
            if voice && turn.send_at.take().is_some() {
                log_debug(&format!(
                    "turn {}: voice resumed; pending auto-send withdrawn",
                    turn.turn_id
                ));
            }
            match verdict {
                Some(SilenceVerdict::Ceiling) => {
                    self.begin_send(SendTrigger::Ceiling, now);
                    return;
                }
                Some(SilenceVerdict::Silent { quiet_for }) if turn.send_at.is_none() => {
                    let delay = self.config.settings.send_delay();
                    if delay.is_zero() {
                        log_debug(&format!(
                            "turn {}: silent for {}ms",
                            turn.turn_id,
                            duration_ms(quiet_for)
                        ));
                        self.begin_send(SendTrigger::Silence, now);
                        return;
                    }
                    turn.send_at = Some(now + delay);
                }
                _ => {}
            }
        }

        let due = self
            .turn
            .as_ref()
            .and_then(|turn| turn.send_at)
            .is_some_and(|send_at| send_at <= now);
        if due {
            self.begin_send(SendTrigger::Silence, now);
        }
    }

    fn poll_meter(&mut self, now: Instant) {
        let Some(next) = self.next_meter_update else {
            return;
        };
        if next > now {
            return;
        }
        self.next_meter_update = Some(now + self.config.meter_interval);
        let phase = self.phase();
        let recording = if phase == TurnPhase::Recording {
            self.capture.latest_level()
        } else {
            0
        };
        let playback = if matches!(phase, TurnPhase::Playing | TurnPhase::Paused) {
            self.renderer.level()
        } else {
            0
        };
        self.emit(EngineNotice::Levels {
            recording,
            playback,
        });
    }

    fn handle_inbound(&mut self, message: InboundMessage, now: Instant) {
        let Some(turn_id) = self.current_turn_id() else {
            log_debug(&format!("ignoring {} while idle", message.kind()));
            return;
        };
        if let Some(target) = message.turn_id() {
            if target != turn_id {
                log_debug(&format!(
                    "ignoring {} for turn {target} (current {turn_id})",
                    message.kind()
                ));
                return;
            }
        }
        match message.classify() {
            Inbound::Transcript { text, is_final } => {
                log_debug_content(&format!("turn {turn_id} transcript: {text}"));
                self.emit(EngineNotice::Transcript {
                    turn_id,
                    text,
                    is_final,
                });
            }
            Inbound::Chunk { bytes, annotation } => self.accept_chunk(bytes, annotation, now),
            Inbound::Control(signal) => self.handle_control(turn_id, signal, now),
        }
    }

    fn handle_control(&mut self, turn_id: TurnId, signal: ControlSignal, now: Instant) {
        match signal {
            ControlSignal::StreamStarted => {
                log_debug(&format!("turn {turn_id}: server stream started"));
            }
            ControlSignal::ProcessingComplete => {
                if let Some(turn) = self.turn.as_mut() {
                    turn.processing_complete = true;
                }
                self.check_completion(now);
            }
            ControlSignal::NoSpeechDetected => {
                if let Some(turn) = self.turn.as_mut() {
                    turn.no_speech = true;
                    turn.processing_complete = true;
                }
                self.check_completion(now);
            }
            ControlSignal::Error(message) => self.fail(FailureReason::Server(message), now),
            ControlSignal::CancelAcknowledged => {
                log_debug(&format!("turn {turn_id}: server cancelled the turn"));
                self.end_turn(TurnOutcome::Cancelled, now);
            }
            ControlSignal::NavigationHint(target) => {
                self.emit(EngineNotice::NavigationHint { turn_id, target });
            }
        }
    }

    fn handle_closed(&mut self, code: u16, reason: &str, now: Instant) {
        log_debug(&format!("connection closed ({code}): {reason}"));
        let Some(turn) = self.turn.as_ref() else {
            self.transport.close();
            return;
        };
        if turn.processing_complete {
            // Everything has arrived; playback can finish without the channel.
            self.transport.close();
            return;
        }
        tracing::warn!(
            target: "voxstream::transport",
            turn_id = turn.turn_id,
            code,
            reason,
            "connection closed mid-turn"
        );
        if self.reconnect(reason) {
            return;
        }
        self.transport.close();
        self.fail(
            FailureReason::TransportLost(format!("connection closed ({code}): {reason}")),
            now,
        );
    }

    fn accept_chunk(&mut self, bytes: Vec<u8>, annotation: Option<String>, now: Instant) {
        let Some(turn) = self.turn.as_mut() else {
            return;
        };
        if !matches!(
            turn.phase,
            TurnPhase::Sending
                | TurnPhase::ServerProcessing
                | TurnPhase::Playing
                | TurnPhase::Paused
        ) {
            log_debug(&format!(
                "turn {}: discarding audio chunk received while {}",
                turn.turn_id, turn.phase
            ));
            return;
        }
        turn.chunks_received += 1;
        let turn_id = turn.turn_id;

        let chunk_id = self.store.append(bytes, annotation.clone(), now);
        if let Some(text) = annotation {
            log_debug_content(&format!("turn {turn_id} chunk {chunk_id}: {text}"));
            self.emit(EngineNotice::Annotation {
                turn_id,
                chunk_id,
                text,
            });
        }

        let loaded = match self.store.get(chunk_id) {
            Some(chunk) => self.renderer.load(&chunk.payload),
            None => return,
        };
        match loaded {
            Ok(handle) => {
                if self.phase() == TurnPhase::ServerProcessing {
                    self.set_phase(TurnPhase::Playing);
                }
                let advance = self
                    .with_playback(now, |sequencer, ctx| sequencer.enqueue(ctx, chunk_id, handle))
                    .flatten();
                if let Some(advance) = advance {
                    self.after_advance(advance, now);
                }
            }
            Err(err) => {
                self.sequencer.skip_unplayable(chunk_id, &err);
                self.store.mark_played(chunk_id);
                self.check_completion(now);
            }
        }
    }

    fn after_advance(&mut self, advance: Advance, now: Instant) {
        match advance {
            Advance::Playing(chunk_id) => {
                let Some(turn) = self.turn.as_mut() else {
                    return;
                };
                if turn.first_audio_at.is_none() {
                    turn.first_audio_at = Some(now);
                    if timings_enabled() {
                        log_debug(&format!(
                            "timing|turn={}|first_audio_ms={}|chunk={chunk_id}",
                            turn.turn_id,
                            millis_between(turn.started_at, now)
                        ));
                    }
                }
            }
            Advance::Blocked => {
                let Some(turn) = self.turn.as_mut() else {
                    return;
                };
                if !turn.autoplay_notified {
                    turn.autoplay_notified = true;
                    let turn_id = turn.turn_id;
                    tracing::info!(target: "voxstream::playback", turn_id, "autoplay blocked");
                    self.emit(EngineNotice::AutoplayBlocked { turn_id });
                }
            }
            Advance::Drained => self.check_completion(now),
        }
    }

    /// A turn completes once the server is done and playback has drained,
    /// in whichever order those happen.
    fn check_completion(&mut self, now: Instant) {
        let Some(turn) = self.turn.as_ref() else {
            return;
        };
        if !matches!(turn.phase, TurnPhase::ServerProcessing | TurnPhase::Playing)
            || !turn.processing_complete
            || !self.sequencer.is_drained()
        {
            return;
        }
        let no_speech = turn.no_speech;
        self.end_turn(
            TurnOutcome::Completed {
                no_speech,
                stopped_by_user: false,
            },
            now,
        );
    }

    fn fail(&mut self, reason: FailureReason, now: Instant) {
        let Some(turn) = self.turn.as_ref() else {
            return;
        };
        let turn_id = turn.turn_id;
        if turn.start_sent && matches!(reason, FailureReason::DeviceLost(_)) {
            self.notify_server_cancel(turn_id);
        }
        log_debug(&format!("turn {turn_id}: failed ({})", reason.label()));
        self.end_turn(TurnOutcome::Failed { reason }, now);
    }

    /// Tear down everything the turn holds, report, and return to idle.
    fn end_turn(&mut self, outcome: TurnOutcome, now: Instant) {
        if self.turn.is_none() {
            return;
        }
        self.capture.abort(self.microphone.as_mut());
        let stats = self.sequencer.stats();
        let capture_stats = self.capture.stats();
        let captured_ms = self.capture.captured_ms();
        let bytes_received = self.store.total_bytes() as u64;
        self.sequencer.clear(self.renderer.as_mut());
        self.store.clear();
        self.next_amplitude_tick = None;
        self.next_meter_update = None;
        self.set_phase(outcome.terminal_phase());

        let Some(turn) = self.turn.take() else {
            return;
        };
        let summary = TurnSummary {
            turn_id: turn.turn_id,
            outcome: outcome.label(),
            send_trigger: turn.send_trigger.map(SendTrigger::label),
            chunks_sent: turn.chunks_sent,
            chunks_received: turn.chunks_received,
            chunks_played: stats.played,
            chunks_skipped: stats.skipped,
            watchdog_advances: stats.watchdog_advances,
            first_audio_ms: turn
                .first_audio_at
                .map(|at| millis_between(turn.started_at, at)),
            duration_ms: millis_between(turn.started_at, now),
            captured_ms,
            encode_failures: capture_stats.encode_failures,
            bytes_received,
        };
        self.report_summary(&summary);

        if let TurnOutcome::Failed { reason } = &outcome {
            let err = reason.to_error();
            tracing::error!(
                target: "voxstream::turn",
                turn_id = turn.turn_id,
                reason = reason.label(),
                error = %err,
                "turn failed"
            );
            self.emit(EngineNotice::Error {
                message: err.to_string(),
                recoverable: err.is_recoverable(),
            });
            self.last_error = Some(err);
        }
        self.last_outcome = Some(outcome);
        self.emit(EngineNotice::Phase {
            turn_id: None,
            phase: TurnPhase::Idle,
        });
    }

    fn report_summary(&self, summary: &TurnSummary) {
        if timings_enabled() {
            log_debug(&summary.log_line());
        }
        tracing::info!(
            target: "voxstream::turn",
            turn_id = summary.turn_id,
            outcome = summary.outcome,
            chunks_sent = summary.chunks_sent,
            chunks_received = summary.chunks_received,
            chunks_played = summary.chunks_played,
            chunks_skipped = summary.chunks_skipped,
            watchdog_advances = summary.watchdog_advances,
            first_audio_ms = summary.first_audio_ms,
            duration_ms = summary.duration_ms,
            captured_ms = summary.captured_ms,
            bytes_received = summary.bytes_received,
            "turn finished"
        );
        self.emit(EngineNotice::TurnSummary(summary.clone()));
    }
}

impl Drop for VoiceEngine {
    fn drop(&mut self) {
        self.capture.abort(self.microphone.as_mut());
        self.sequencer.clear(self.renderer.as_mut());
    }
}
