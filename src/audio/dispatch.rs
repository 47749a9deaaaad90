use crate::engine::{EngineEvent, EventSender, TurnId};
use crossbeam_channel::TrySendError;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Downmix interleaved input to mono while converting each sample to f32.
pub(super) fn append_downmixed_samples<T, F>(
    buf: &mut Vec<f32>,
    data: &[T],
    channels: usize,
    mut convert: F,
) where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }

    let mut acc = 0.0f32;
    let mut count = 0usize;
    for sample in data.iter().copied() {
        acc += convert(sample);
        count += 1;
        if count == channels {
            buf.push(acc / channels as f32);
            acc = 0.0;
            count = 0;
        }
    }
    if count > 0 {
        buf.push(acc / count as f32);
    }
}

/// Runs inside the capture callback: buffers mono samples and posts fixed-size
/// frames to the engine bus without ever blocking the audio thread.
pub(super) struct FrameDispatcher {
    turn_id: TurnId,
    sample_rate: u32,
    frame_samples: usize,
    pending: Vec<f32>,
    scratch: Vec<f32>,
    sender: EventSender,
    dropped: Arc<AtomicUsize>,
}

impl FrameDispatcher {
    pub(super) fn new(
        turn_id: TurnId,
        sample_rate: u32,
        frame_samples: usize,
        sender: EventSender,
        dropped: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            turn_id,
            sample_rate,
            frame_samples: frame_samples.max(1),
            pending: Vec::with_capacity(frame_samples),
            scratch: Vec::new(),
            sender,
            dropped,
        }
    }

    pub(super) fn push<T, F>(&mut self, data: &[T], channels: usize, convert: F)
    where
        T: Copy,
        F: FnMut(T) -> f32,
    {
        self.scratch.clear();
        append_downmixed_samples(&mut self.scratch, data, channels, convert);
        self.pending.extend_from_slice(&self.scratch);

        while self.pending.len() >= self.frame_samples {
            let samples: Vec<f32> = self.pending.drain(..self.frame_samples).collect();
            let event = EngineEvent::CaptureFrame {
                turn_id: self.turn_id,
                sample_rate: self.sample_rate,
                samples,
            };
            if let Err(err) = self.sender.try_send(event) {
                match err {
                    TrySendError::Full(_) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    TrySendError::Disconnected(_) => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn downmixes_multi_channel_audio() {
        let mut buf = Vec::new();
        let samples = [1.0f32, -1.0, 0.5, 0.5];
        append_downmixed_samples(&mut buf, &samples, 2, |sample| sample);
        assert_eq!(buf, vec![0.0, 0.5]);
    }

    #[test]
    fn dispatcher_emits_whole_frames_tagged_with_turn() {
        let (tx, rx) = bounded(8);
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = FrameDispatcher::new(7, 48_000, 4, tx, dropped.clone());
        dispatcher.push(&[0.1f32, 0.2, 0.3], 1, |s| s);
        assert!(rx.try_recv().is_err());
        dispatcher.push(&[0.4f32, 0.5], 1, |s| s);
        match rx.try_recv().expect("one frame") {
            EngineEvent::CaptureFrame {
                turn_id,
                sample_rate,
                samples,
            } => {
                assert_eq!(turn_id, 7);
                assert_eq!(sample_rate, 48_000);
                assert_eq!(samples, vec![0.1, 0.2, 0.3, 0.4]);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(dropped.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn dispatcher_counts_frames_dropped_on_full_bus() {
        let (tx, _rx) = bounded(1);
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = FrameDispatcher::new(1, 16_000, 2, tx, dropped.clone());
        dispatcher.push(&[0.0f32; 6], 1, |s| s);
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
    }
}
