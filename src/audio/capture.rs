//! Turns microphone frames into ordered, encoded outgoing chunks.
//!
//! Frames arrive at the device rate, are resampled to the wire rate, and are
//! cut into fixed-duration segments. Each segment gets the next sequence
//! number for the turn, starting at 0.

use super::meter::level_of;
use super::microphone::Microphone;
use super::resample::resample;
use crate::config::{AudioEncoding, EngineConfig};
use crate::engine::TurnId;
use crate::error::Result;
use crate::log_debug;
use std::io::Cursor;

/// One encoded segment ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingChunk {
    pub turn_id: TurnId,
    pub seq: u64,
    pub encoding: AudioEncoding,
    pub payload: Vec<u8>,
    pub sample_count: usize,
}

/// Per-turn capture counters; they survive `stop` and `abort` until the next
/// `start`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Samples captured at the wire rate.
    pub samples: u64,
    pub encode_failures: u64,
}

pub struct CapturePipeline {
    sample_rate: u32,
    chunk_samples: usize,
    encoding: AudioEncoding,
    turn_id: Option<TurnId>,
    pending: Vec<f32>,
    next_seq: u64,
    peak_level: u8,
    latest_level: u8,
    stats: CaptureStats,
}

impl CapturePipeline {
    pub fn new(config: &EngineConfig) -> Self {
        let chunk_samples = (u128::from(config.capture_sample_rate)
            * config.chunk_duration.as_millis()
            / 1000)
            .max(1) as usize;
        Self {
            sample_rate: config.capture_sample_rate,
            chunk_samples,
            encoding: config.encoding,
            turn_id: None,
            pending: Vec::with_capacity(chunk_samples),
            next_seq: 0,
            peak_level: 0,
            latest_level: 0,
            stats: CaptureStats::default(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn encoding(&self) -> AudioEncoding {
        self.encoding
    }

    pub fn is_active(&self) -> bool {
        self.turn_id.is_some()
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    /// Audio captured this turn, in wire-rate milliseconds.
    pub fn captured_ms(&self) -> u64 {
        self.stats.samples * 1000 / u64::from(self.sample_rate.max(1))
    }

    /// Acquire the microphone and reset per-turn state.
    pub fn start(&mut self, turn_id: TurnId, microphone: &mut dyn Microphone) -> Result<()> {
        self.reset();
        microphone.acquire(turn_id)?;
        self.turn_id = Some(turn_id);
        Ok(())
    }

    /// Feed one frame; returns every chunk completed by it, in order.
    pub fn push_frame(&mut self, device_rate: u32, samples: &[f32]) -> Vec<OutgoingChunk> {
        let Some(turn_id) = self.turn_id else {
            return Vec::new();
        };
        if samples.is_empty() {
            return Vec::new();
        }

        let converted = resample(samples, device_rate, self.sample_rate);
        let level = level_of(&converted);
        self.latest_level = level;
        self.peak_level = self.peak_level.max(level);
        self.stats.samples += converted.len() as u64;
        self.pending.extend_from_slice(&converted);

        let mut ready = Vec::new();
        while self.pending.len() >= self.chunk_samples {
            let segment: Vec<f32> = self.pending.drain(..self.chunk_samples).collect();
            if let Some(chunk) = self.seal(turn_id, &segment) {
                ready.push(chunk);
            }
        }
        ready
    }

    /// Release the microphone. With `flush_final`, any partial segment becomes
    /// the last chunk of the turn.
    pub fn stop(
        &mut self,
        flush_final: bool,
        microphone: &mut dyn Microphone,
    ) -> Option<OutgoingChunk> {
        microphone.release();
        let turn_id = self.turn_id.take()?;
        let tail = std::mem::take(&mut self.pending);
        self.latest_level = 0;
        if flush_final && !tail.is_empty() {
            return self.seal(turn_id, &tail);
        }
        None
    }

    /// Release the microphone and discard anything buffered.
    pub fn abort(&mut self, microphone: &mut dyn Microphone) {
        microphone.release();
        self.turn_id = None;
        self.pending.clear();
        self.latest_level = 0;
        self.peak_level = 0;
    }

    /// Loudest level seen since the previous call.
    pub fn take_peak_level(&mut self) -> u8 {
        std::mem::take(&mut self.peak_level)
    }

    pub fn latest_level(&self) -> u8 {
        self.latest_level
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.next_seq = 0;
        self.peak_level = 0;
        self.latest_level = 0;
        self.stats = CaptureStats::default();
    }

    fn seal(&mut self, turn_id: TurnId, samples: &[f32]) -> Option<OutgoingChunk> {
        let payload = match encode_samples(samples, self.sample_rate, self.encoding) {
            Ok(payload) => payload,
            Err(err) => {
                self.stats.encode_failures += 1;
                log_debug(&format!(
                    "failed to encode capture chunk for turn {turn_id}: {err}"
                ));
                return None;
            }
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        Some(OutgoingChunk {
            turn_id,
            seq,
            encoding: self.encoding,
            payload,
            sample_count: samples.len(),
        })
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Encode mono f32 samples for the wire.
pub fn encode_samples(
    samples: &[f32],
    sample_rate: u32,
    encoding: AudioEncoding,
) -> std::result::Result<Vec<u8>, hound::Error> {
    match encoding {
        AudioEncoding::Pcm16 => Ok(samples
            .iter()
            .flat_map(|sample| to_i16(*sample).to_le_bytes())
            .collect()),
        AudioEncoding::Wav => {
            let spec = hound::WavSpec {
                channels: 1,
                sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
            {
                let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
                for sample in samples {
                    writer.write_sample(to_i16(*sample))?;
                }
                writer.finalize()?;
            }
            Ok(cursor.into_inner())
        }
    }
}
