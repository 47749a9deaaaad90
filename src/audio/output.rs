//! Speaker output via CPAL.
//!
//! Clips are decoded on `load` (WAV through hound, MP3 through minimp3) and
//! kept until released. One output stream is opened lazily and shared by all
//! clips; only one clip renders at a time.

use super::meter::{rms_db, LiveMeter};
use super::render::{PlaybackTag, RenderError, RenderEvent, RenderHandle, Renderer};
use super::resample::resample;
use crate::engine::{EngineEvent, EventSender};
use crate::lock_or_recover;
use crate::log_debug;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Decoded mono audio at its native rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedClip {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Sniff the container and decode to mono f32.
pub fn decode_clip(bytes: &[u8]) -> Result<DecodedClip, RenderError> {
    if bytes.is_empty() {
        return Err(RenderError::Decode("empty audio chunk".to_string()));
    }
    if bytes.starts_with(b"RIFF") {
        decode_wav(bytes)
    } else {
        decode_mp3(bytes)
    }
}

fn decode_wav(bytes: &[u8]) -> Result<DecodedClip, RenderError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|err| RenderError::Decode(format!("wav header: {err}")))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|err| RenderError::Decode(format!("wav samples: {err}")))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|sample| sample.map(|s| s as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|err| RenderError::Decode(format!("wav samples: {err}")))?
        }
    };
    Ok(DecodedClip {
        samples: downmix(&interleaved, channels),
        sample_rate: spec.sample_rate,
    })
}

fn decode_mp3(bytes: &[u8]) -> Result<DecodedClip, RenderError> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                }
                let channels = frame.channels.max(1);
                let as_f32: Vec<f32> = frame
                    .data
                    .iter()
                    .map(|&s| f32::from(s) / 32_768.0)
                    .collect();
                samples.extend(downmix(&as_f32, channels));
            }
            Err(minimp3::Error::Eof) => break,
            Err(err) => return Err(RenderError::Decode(format!("mp3: {err}"))),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(RenderError::Decode("no audio frames found".to_string()));
    }
    Ok(DecodedClip {
        samples,
        sample_rate,
    })
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

struct ActiveClip {
    /// `None` while the clip was rolled into from the cue and `play` has not
    /// claimed it yet.
    tag: Option<PlaybackTag>,
    handle: RenderHandle,
    samples: Arc<Vec<f32>>,
    position: usize,
    paused: bool,
    /// A pre-rolled clip that ran out before `play` claimed it.
    finished: bool,
}

impl ActiveClip {
    fn new(tag: Option<PlaybackTag>, handle: RenderHandle, samples: Arc<Vec<f32>>) -> Self {
        Self {
            tag,
            handle,
            samples,
            position: 0,
            paused: false,
            finished: false,
        }
    }
}

struct OutputState {
    active: Option<ActiveClip>,
    cued: Option<(RenderHandle, Arc<Vec<f32>>)>,
    events: EventSender,
    meter: LiveMeter,
}

impl OutputState {
    fn next_sample(&mut self) -> Option<f32> {
        let clip = self
            .active
            .as_mut()
            .filter(|clip| !clip.paused && !clip.finished)?;
        let Some(&sample) = clip.samples.get(clip.position) else {
            self.finish_active();
            return None;
        };
        clip.position += 1;
        if clip.position >= clip.samples.len() {
            self.finish_active();
        }
        Some(sample)
    }

    /// Report the end of the active clip and roll into the cued one.
    fn finish_active(&mut self) {
        let Some(clip) = self.active.as_mut() else {
            return;
        };
        match clip.tag {
            Some(tag) => {
                let _ = self
                    .events
                    .try_send(EngineEvent::Render(RenderEvent::Ended(tag)));
                self.active = self
                    .cued
                    .take()
                    .map(|(handle, samples)| ActiveClip::new(None, handle, samples));
            }
            None => clip.finished = true,
        }
    }

    fn drop_pre_roll(&mut self) {
        if self.active.as_ref().is_some_and(|clip| clip.tag.is_none()) {
            self.active = None;
        }
    }
}

struct OutputStream {
    _stream: cpal::Stream,
    sample_rate: u32,
}

pub struct CpalRenderer {
    clips: HashMap<RenderHandle, DecodedClip>,
    /// Clips already converted to the output rate.
    prepared: HashMap<RenderHandle, Arc<Vec<f32>>>,
    next_handle: u64,
    state: Arc<Mutex<OutputState>>,
    stream: Option<OutputStream>,
    meter: LiveMeter,
}

impl CpalRenderer {
    pub fn new(events: EventSender) -> Self {
        let meter = LiveMeter::new();
        Self {
            clips: HashMap::new(),
            prepared: HashMap::new(),
            next_handle: 0,
            state: Arc::new(Mutex::new(OutputState {
                active: None,
                cued: None,
                events,
                meter: meter.clone(),
            })),
            stream: None,
            meter,
        }
    }

    fn ensure_stream(&mut self) -> Result<u32, RenderError> {
        if let Some(stream) = &self.stream {
            return Ok(stream.sample_rate);
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| RenderError::Playback("no output device available".to_string()))?;
        let default_config = device
            .default_output_config()
            .map_err(|err| RenderError::Playback(err.to_string()))?;
        let format = default_config.sample_format();
        let config: StreamConfig = default_config.into();
        let sample_rate = config.sample_rate.0;
        let channels = usize::from(config.channels.max(1));

        let err_fn = |err: cpal::StreamError| log_debug(&format!("audio_output_error: {err}"));
        let state = Arc::clone(&self.state);
        let stream = match format {
            SampleFormat::F32 => device.build_output_stream(
                &config,
                output_callback(state, channels, |sample| sample),
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_output_stream(
                &config,
                output_callback(state, channels, to_i16_sample),
                err_fn,
                None,
            ),
            SampleFormat::U16 => device.build_output_stream(
                &config,
                output_callback(state, channels, to_u16_sample),
                err_fn,
                None,
            ),
            other => {
                log_debug(&format!("unsupported output sample format: {other:?}"));
                return Err(RenderError::Playback(format!(
                    "unsupported output sample format: {other:?}"
                )));
            }
        }
        .map_err(|err| RenderError::Playback(err.to_string()))?;
        stream
            .play()
            .map_err(|err| RenderError::Playback(err.to_string()))?;

        log_debug(&format!(
            "audio output ready: {} format={format:?} @ {sample_rate}Hz x{channels}",
            device.name().unwrap_or_default()
        ));
        self.stream = Some(OutputStream {
            _stream: stream,
            sample_rate,
        });
        Ok(sample_rate)
    }

    fn prepared_samples(
        &mut self,
        handle: RenderHandle,
        output_rate: u32,
    ) -> Result<Arc<Vec<f32>>, RenderError> {
        if let Some(samples) = self.prepared.get(&handle) {
            return Ok(Arc::clone(samples));
        }
        let clip = self
            .clips
            .get(&handle)
            .ok_or_else(|| RenderError::Playback(format!("unknown clip {}", handle.0)))?;
        let samples = Arc::new(resample(&clip.samples, clip.sample_rate, output_rate));
        self.prepared.insert(handle, Arc::clone(&samples));
        Ok(samples)
    }
}

fn to_i16_sample(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

fn to_u16_sample(sample: f32) -> u16 {
    ((sample.clamp(-1.0, 1.0) + 1.0) * 32_767.5) as u16
}

/// Device callback rendering through an f32 scratch buffer converted to the
/// device sample type.
fn output_callback<T: Send + 'static>(
    state: Arc<Mutex<OutputState>>,
    channels: usize,
    convert: fn(f32) -> T,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static {
    let mut scratch: Vec<f32> = Vec::new();
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        render_converted(&state, &mut scratch, data, channels, convert);
    }
}

fn render_converted<T>(
    state: &Mutex<OutputState>,
    scratch: &mut Vec<f32>,
    data: &mut [T],
    channels: usize,
    convert: fn(f32) -> T,
) {
    scratch.resize(data.len(), 0.0);
    fill_output(state, scratch, channels);
    for (out, sample) in data.iter_mut().zip(scratch.iter()) {
        *out = convert(*sample);
    }
}

fn fill_output(state: &Mutex<OutputState>, data: &mut [f32], channels: usize) {
    let Ok(mut guard) = state.try_lock() else {
        data.fill(0.0);
        return;
    };
    let state = &mut *guard;
    let mut rendered = Vec::with_capacity(data.len() / channels.max(1));
    for frame in data.chunks_mut(channels.max(1)) {
        let sample = state.next_sample();
        if let Some(sample) = sample {
            rendered.push(sample);
        }
        frame.fill(sample.unwrap_or(0.0));
    }
    state.meter.set_db(rms_db(&rendered));
}

impl Renderer for CpalRenderer {
    fn load(&mut self, bytes: &[u8]) -> Result<RenderHandle, RenderError> {
        let clip = decode_clip(bytes)?;
        let handle = RenderHandle(self.next_handle);
        self.next_handle += 1;
        self.clips.insert(handle, clip);
        Ok(handle)
    }

    fn play(
        &mut self,
        handle: RenderHandle,
        tag: PlaybackTag,
        _user_gesture: bool,
    ) -> Result<(), RenderError> {
        let output_rate = self.ensure_stream()?;
        let samples = self.prepared_samples(handle, output_rate)?;
        let mut guard = lock_or_recover(&self.state, "CpalRenderer::play");
        let state = &mut *guard;
        if let Some(clip) = state
            .active
            .as_mut()
            .filter(|clip| clip.handle == handle && clip.tag.is_none())
        {
            // Already rolling from the cue; claim it under this attempt.
            clip.tag = Some(tag);
            if clip.finished {
                state.active = None;
                let _ = state
                    .events
                    .try_send(EngineEvent::Render(RenderEvent::Ended(tag)));
            }
            return Ok(());
        }
        if state.cued.as_ref().is_some_and(|(cued, _)| *cued == handle) {
            state.cued = None;
        }
        state.active = Some(ActiveClip::new(Some(tag), handle, samples));
        Ok(())
    }

    fn pause(&mut self, handle: RenderHandle) {
        let mut state = lock_or_recover(&self.state, "CpalRenderer::pause");
        state.drop_pre_roll();
        if let Some(clip) = state.active.as_mut().filter(|clip| clip.handle == handle) {
            clip.paused = true;
        }
    }

    fn resume(&mut self, handle: RenderHandle) -> Result<(), RenderError> {
        let mut state = lock_or_recover(&self.state, "CpalRenderer::resume");
        match state.active.as_mut().filter(|clip| clip.handle == handle) {
            Some(clip) => {
                clip.paused = false;
                Ok(())
            }
            None => Err(RenderError::Playback(format!(
                "clip {} is not loaded for playback",
                handle.0
            ))),
        }
    }

    fn cue(&mut self, handle: RenderHandle) {
        let Some(output_rate) = self.stream.as_ref().map(|stream| stream.sample_rate) else {
            return;
        };
        match self.prepared_samples(handle, output_rate) {
            Ok(samples) => {
                lock_or_recover(&self.state, "CpalRenderer::cue").cued = Some((handle, samples));
            }
            Err(err) => log_debug(&format!("cannot cue clip {}: {err}", handle.0)),
        }
    }

    fn stop(&mut self, handle: RenderHandle) {
        let mut state = lock_or_recover(&self.state, "CpalRenderer::stop");
        state.cued = None;
        state.drop_pre_roll();
        if state
            .active
            .as_ref()
            .is_some_and(|clip| clip.handle == handle)
        {
            state.active = None;
        }
        if state.active.is_none() {
            state.meter.reset();
        }
    }

    fn release(&mut self, handle: RenderHandle) {
        {
            let mut state = lock_or_recover(&self.state, "CpalRenderer::release");
            if state.active.as_ref().is_some_and(|clip| clip.handle == handle) {
                state.active = None;
            }
            if state.cued.as_ref().is_some_and(|(cued, _)| *cued == handle) {
                state.cued = None;
            }
        }
        self.clips.remove(&handle);
        self.prepared.remove(&handle);
    }

    fn estimated_duration(&self, handle: RenderHandle) -> Option<Duration> {
        self.clips
            .get(&handle)
            .map(DecodedClip::duration)
            .filter(|duration| !duration.is_zero())
    }

    fn level(&self) -> u8 {
        self.meter.level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::encode_samples;
    use crate::config::AudioEncoding;
    use crossbeam_channel::unbounded;

    fn tag(chunk_id: u64) -> PlaybackTag {
        PlaybackTag {
            turn_id: 1,
            chunk_id,
            attempt: 0,
        }
    }

    #[test]
    fn decodes_wav_chunk_and_reports_duration() {
        let samples = vec![0.25f32; 8_000];
        let bytes = encode_samples(&samples, 16_000, AudioEncoding::Wav).expect("encode");
        let clip = decode_clip(&bytes).expect("decode");
        assert_eq!(clip.sample_rate, 16_000);
        assert_eq!(clip.samples.len(), 8_000);
        assert_eq!(clip.duration(), Duration::from_millis(500));
        assert!((clip.samples[0] - 0.25).abs() < 0.001);
    }

    #[test]
    fn rejects_garbage_and_empty_chunks() {
        assert!(matches!(decode_clip(&[]), Err(RenderError::Decode(_))));
        assert!(matches!(
            decode_clip(b"definitely not audio"),
            Err(RenderError::Decode(_))
        ));
    }

    #[test]
    fn downmix_averages_stereo_frames() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
    }

    #[test]
    fn fill_output_emits_ended_once_clip_finishes() {
        let (tx, rx) = unbounded();
        let state = Mutex::new(OutputState {
            active: Some(ActiveClip::new(
                Some(tag(3)),
                RenderHandle(0),
                Arc::new(vec![0.5; 4]),
            )),
            cued: None,
            events: tx,
            meter: LiveMeter::new(),
        });

        let mut out = [0.0f32; 4];
        fill_output(&state, &mut out, 2);
        assert_eq!(out, [0.5; 4]);
        assert!(rx.try_recv().is_err());

        fill_output(&state, &mut out, 2);
        assert_eq!(out, [0.5; 4]);
        match rx.try_recv().expect("ended event") {
            EngineEvent::Render(RenderEvent::Ended(ended)) => assert_eq!(ended, tag(3)),
            other => panic!("unexpected event {other:?}"),
        }

        fill_output(&state, &mut out, 2);
        assert_eq!(out, [0.0; 4]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn paused_clip_renders_silence_without_advancing() {
        let (tx, _rx) = unbounded();
        let state = Mutex::new(OutputState {
            active: Some(ActiveClip {
                position: 1,
                paused: true,
                ..ActiveClip::new(Some(tag(0)), RenderHandle(0), Arc::new(vec![0.5; 4]))
            }),
            cued: None,
            events: tx,
            meter: LiveMeter::new(),
        });
        let mut out = [1.0f32; 2];
        fill_output(&state, &mut out, 1);
        assert_eq!(out, [0.0; 2]);
        let guard = state.lock().expect("lock");
        assert_eq!(guard.active.as_ref().map(|clip| clip.position), Some(1));
    }

    #[test]
    fn ended_clip_rolls_into_cued_clip_without_a_gap() {
        let (tx, rx) = unbounded();
        let state = Mutex::new(OutputState {
            active: Some(ActiveClip::new(
                Some(tag(0)),
                RenderHandle(0),
                Arc::new(vec![0.5; 2]),
            )),
            cued: Some((RenderHandle(1), Arc::new(vec![0.25; 3]))),
            events: tx,
            meter: LiveMeter::new(),
        });

        let mut out = [0.0f32; 4];
        fill_output(&state, &mut out, 1);
        assert_eq!(out, [0.5, 0.5, 0.25, 0.25]);
        match rx.try_recv().expect("ended event") {
            EngineEvent::Render(RenderEvent::Ended(ended)) => assert_eq!(ended, tag(0)),
            other => panic!("unexpected event {other:?}"),
        }

        // The pre-rolled clip has no attempt yet, so its end is held back.
        fill_output(&state, &mut out, 1);
        assert_eq!(out, [0.25, 0.0, 0.0, 0.0]);
        assert!(rx.try_recv().is_err());
        let guard = state.lock().expect("lock");
        let clip = guard.active.as_ref().expect("pre-rolled clip");
        assert_eq!(clip.handle, RenderHandle(1));
        assert!(clip.tag.is_none());
        assert!(clip.finished);
        assert!(guard.cued.is_none());
    }

    #[test]
    fn integer_devices_get_converted_samples() {
        let (tx, _rx) = unbounded();
        let state = Mutex::new(OutputState {
            active: Some(ActiveClip::new(
                Some(tag(0)),
                RenderHandle(0),
                Arc::new(vec![1.0, -1.0, 0.0, 2.0]),
            )),
            cued: None,
            events: tx,
            meter: LiveMeter::new(),
        });
        let mut scratch = Vec::new();

        let mut pcm = [7i16; 2];
        render_converted(&state, &mut scratch, &mut pcm, 1, to_i16_sample);
        assert_eq!(pcm, [i16::MAX, -i16::MAX]);

        let mut unsigned = [7u16; 2];
        render_converted(&state, &mut scratch, &mut unsigned, 1, to_u16_sample);
        assert_eq!(unsigned, [32_767, u16::MAX]);
    }

    #[test]
    fn stop_drops_cue_and_pre_roll() {
        let (tx, _rx) = unbounded();
        let mut renderer = CpalRenderer::new(tx);
        {
            let mut state = lock_or_recover(&renderer.state, "test");
            state.active = Some(ActiveClip::new(None, RenderHandle(4), Arc::new(vec![0.1; 8])));
            state.cued = Some((RenderHandle(5), Arc::new(vec![0.1; 8])));
        }
        renderer.stop(RenderHandle(3));
        let state = lock_or_recover(&renderer.state, "test");
        assert!(state.active.is_none());
        assert!(state.cued.is_none());
    }

    #[test]
    fn load_assigns_distinct_handles_and_release_forgets_clip() {
        let (tx, _rx) = unbounded();
        let mut renderer = CpalRenderer::new(tx);
        let bytes = encode_samples(&[0.1; 1_600], 16_000, AudioEncoding::Wav).expect("encode");
        let first = renderer.load(&bytes).expect("load");
        let second = renderer.load(&bytes).expect("load");
        assert_ne!(first, second);
        assert_eq!(
            renderer.estimated_duration(first),
            Some(Duration::from_millis(100))
        );
        renderer.release(first);
        assert_eq!(renderer.estimated_duration(first), None);
        assert!(renderer.estimated_duration(second).is_some());
    }
}
