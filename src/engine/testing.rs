//! In-memory collaborators for engine tests.

use super::{ChunkId, EngineNotice, EngineParts, TurnId, VoiceEngine};
use crate::audio::{Microphone, PlaybackTag, RenderError, RenderHandle, Renderer};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::transport::{OutboundMessage, Transport, TransportError};
use crossbeam_channel::{unbounded, Receiver};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct MicLog {
    pub acquired: Vec<TurnId>,
    pub released: usize,
    pub held: bool,
    pub deny: Option<EngineError>,
}

pub(crate) struct FakeMicrophone {
    log: Rc<RefCell<MicLog>>,
}

impl FakeMicrophone {
    pub fn new() -> (Self, Rc<RefCell<MicLog>>) {
        let log = Rc::new(RefCell::new(MicLog::default()));
        (
            Self {
                log: Rc::clone(&log),
            },
            log,
        )
    }
}

impl Microphone for FakeMicrophone {
    fn acquire(&mut self, turn_id: TurnId) -> Result<()> {
        let mut log = self.log.borrow_mut();
        if let Some(err) = log.deny.clone() {
            return Err(err);
        }
        log.acquired.push(turn_id);
        log.held = true;
        Ok(())
    }

    fn release(&mut self) {
        let mut log = self.log.borrow_mut();
        if log.held {
            log.held = false;
            log.released += 1;
        }
    }

    fn is_held(&self) -> bool {
        self.log.borrow().held
    }
}

#[derive(Debug, Default)]
pub(crate) struct TransportLog {
    pub sent: Vec<OutboundMessage>,
    pub connects: usize,
    pub closes: usize,
    pub open: bool,
    pub generation: u64,
    pub refuse_connect: bool,
    /// Number of upcoming sends that fail and drop the connection.
    pub fail_sends: usize,
}

impl TransportLog {
    pub fn kinds(&self) -> Vec<&'static str> {
        self.sent.iter().map(OutboundMessage::kind).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.sent.iter().filter(|m| m.kind() == kind).count()
    }
}

pub(crate) struct FakeTransport {
    log: Rc<RefCell<TransportLog>>,
}

impl FakeTransport {
    pub fn new() -> (Self, Rc<RefCell<TransportLog>>) {
        let log = Rc::new(RefCell::new(TransportLog::default()));
        (
            Self {
                log: Rc::clone(&log),
            },
            log,
        )
    }
}

impl Transport for FakeTransport {
    fn connect(&mut self) -> std::result::Result<(), TransportError> {
        let mut log = self.log.borrow_mut();
        if log.open {
            return Ok(());
        }
        log.connects += 1;
        if log.refuse_connect {
            return Err(TransportError::Connect {
                addr: "fake".to_string(),
                message: "refused".to_string(),
            });
        }
        log.generation += 1;
        log.open = true;
        Ok(())
    }

    fn send(&mut self, message: &OutboundMessage) -> std::result::Result<(), TransportError> {
        let mut log = self.log.borrow_mut();
        if !log.open {
            return Err(TransportError::Closed);
        }
        if log.fail_sends > 0 {
            log.fail_sends -= 1;
            log.open = false;
            log.generation += 1;
            return Err(TransportError::Send("broken pipe".to_string()));
        }
        log.sent.push(message.clone());
        Ok(())
    }

    fn close(&mut self) {
        let mut log = self.log.borrow_mut();
        if log.open {
            log.open = false;
            log.closes += 1;
            log.generation += 1;
        }
    }

    fn is_open(&self) -> bool {
        self.log.borrow().open
    }

    fn generation(&self) -> u64 {
        self.log.borrow().generation
    }
}

#[derive(Debug, Default)]
pub(crate) struct RenderLog {
    pub plays: Vec<(PlaybackTag, bool)>,
    pub pauses: usize,
    pub resumes: usize,
    pub stops: Vec<RenderHandle>,
    pub cues: Vec<RenderHandle>,
    pub released: Vec<RenderHandle>,
    /// Refuse automatic (non-gesture) attempts with `AutoplayBlocked`.
    pub block_automatic: bool,
    pub fail_play: HashSet<ChunkId>,
    /// Known duration for every loaded clip; `None` means unknown.
    pub duration: Option<Duration>,
    pub loaded: HashMap<RenderHandle, Vec<u8>>,
}

impl RenderLog {
    pub fn played_chunks(&self) -> Vec<ChunkId> {
        self.plays.iter().map(|(tag, _)| tag.chunk_id).collect()
    }

    pub fn last_tag(&self) -> Option<PlaybackTag> {
        self.plays.last().map(|(tag, _)| *tag)
    }
}

/// Payload the fake renderer refuses to decode.
pub(crate) const CORRUPT: &[u8] = b"corrupt";

pub(crate) struct FakeRenderer {
    log: Rc<RefCell<RenderLog>>,
    next_handle: u64,
}

impl FakeRenderer {
    pub fn new() -> (Self, Rc<RefCell<RenderLog>>) {
        let log = Rc::new(RefCell::new(RenderLog::default()));
        (
            Self {
                log: Rc::clone(&log),
                next_handle: 0,
            },
            log,
        )
    }
}

impl Renderer for FakeRenderer {
    fn load(&mut self, bytes: &[u8]) -> std::result::Result<RenderHandle, RenderError> {
        if bytes == CORRUPT {
            return Err(RenderError::Decode("bad header".to_string()));
        }
        let handle = RenderHandle(self.next_handle);
        self.next_handle += 1;
        self.log.borrow_mut().loaded.insert(handle, bytes.to_vec());
        Ok(handle)
    }

    fn play(
        &mut self,
        _handle: RenderHandle,
        tag: PlaybackTag,
        user_gesture: bool,
    ) -> std::result::Result<(), RenderError> {
        let mut log = self.log.borrow_mut();
        if log.block_automatic && !user_gesture {
            return Err(RenderError::AutoplayBlocked);
        }
        if log.fail_play.contains(&tag.chunk_id) {
            return Err(RenderError::Playback("device busy".to_string()));
        }
        log.plays.push((tag, user_gesture));
        Ok(())
    }

    fn pause(&mut self, _handle: RenderHandle) {
        self.log.borrow_mut().pauses += 1;
    }

    fn resume(&mut self, _handle: RenderHandle) -> std::result::Result<(), RenderError> {
        self.log.borrow_mut().resumes += 1;
        Ok(())
    }

    fn cue(&mut self, handle: RenderHandle) {
        self.log.borrow_mut().cues.push(handle);
    }

    fn stop(&mut self, handle: RenderHandle) {
        self.log.borrow_mut().stops.push(handle);
    }

    fn release(&mut self, handle: RenderHandle) {
        let mut log = self.log.borrow_mut();
        log.loaded.remove(&handle);
        log.released.push(handle);
    }

    fn estimated_duration(&self, _handle: RenderHandle) -> Option<Duration> {
        self.log.borrow().duration
    }

    fn level(&self) -> u8 {
        if self.log.borrow().plays.is_empty() {
            0
        } else {
            40
        }
    }
}

/// An engine wired to fakes, with handles to inspect them.
pub(crate) struct Harness {
    pub engine: VoiceEngine,
    pub mic: Rc<RefCell<MicLog>>,
    pub transport: Rc<RefCell<TransportLog>>,
    pub renderer: Rc<RefCell<RenderLog>>,
    pub notices: Receiver<EngineNotice>,
}

impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        let (mic, mic_log) = FakeMicrophone::new();
        let (transport, transport_log) = FakeTransport::new();
        let (renderer, render_log) = FakeRenderer::new();
        let (tx, rx) = unbounded();
        let engine = VoiceEngine::new(
            config,
            EngineParts {
                microphone: Box::new(mic),
                transport: Box::new(transport),
                renderer: Box::new(renderer),
            },
            tx,
        );
        Self {
            engine,
            mic: mic_log,
            transport: transport_log,
            renderer: render_log,
            notices: rx,
        }
    }

    pub fn drain_notices(&self) -> Vec<EngineNotice> {
        self.notices.try_iter().collect()
    }

    pub fn generation(&self) -> u64 {
        self.transport.borrow().generation
    }
}
