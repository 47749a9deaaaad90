use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Level reported when nothing is audible.
pub const FLOOR_DB: f32 = -60.0;

/// Shared 0-100 level written by an audio thread and read by the engine.
#[derive(Clone, Debug)]
pub struct LiveMeter {
    level_bits: Arc<AtomicU32>,
}

impl LiveMeter {
    pub fn new() -> Self {
        Self {
            level_bits: Arc::new(AtomicU32::new(FLOOR_DB.to_bits())),
        }
    }

    pub fn set_db(&self, db: f32) {
        self.level_bits.store(db.to_bits(), Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.set_db(FLOOR_DB);
    }

    pub fn level_db(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }

    /// Level on the 0-100 scale used by the UI and the silence detector.
    pub fn level(&self) -> u8 {
        db_to_level(self.level_db())
    }
}

impl Default for LiveMeter {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn rms_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return FLOOR_DB;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    let rms = energy.sqrt().max(1e-6);
    (20.0 * rms.log10()).max(FLOOR_DB)
}

/// Map dBFS onto 0-100 linearly between `FLOOR_DB` and 0 dB.
pub fn db_to_level(db: f32) -> u8 {
    if !db.is_finite() || db <= FLOOR_DB {
        return 0;
    }
    let scaled = ((db - FLOOR_DB) / -FLOOR_DB * 100.0).round();
    scaled.clamp(0.0, 100.0) as u8
}

pub(crate) fn level_of(samples: &[f32]) -> u8 {
    db_to_level(rms_db(samples))
}
