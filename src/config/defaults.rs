pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:8765";

pub const DEFAULT_SILENCE_THRESHOLD_MS: u64 = 3_000;
pub const MIN_SILENCE_THRESHOLD_MS: u64 = 1_000;
pub const MAX_SILENCE_THRESHOLD_MS: u64 = 10_000;

pub const DEFAULT_SEND_DELAY_MS: u64 = 0;
pub const MAX_SEND_DELAY_MS: u64 = 2_000;

pub const DEFAULT_LOUDNESS_FLOOR: u8 = 12;

pub const DEFAULT_MAX_TURN_MS: u64 = 120_000;
pub const MIN_MAX_TURN_MS: u64 = 5_000;
pub const MAX_MAX_TURN_MS: u64 = 600_000;

pub const DEFAULT_CHUNK_MS: u64 = 500;
pub const DEFAULT_AMPLITUDE_TICK_MS: u64 = 1_000;
pub const DEFAULT_METER_INTERVAL_MS: u64 = 100;

pub const DEFAULT_CHUNK_ESTIMATE_MS: u64 = 6_000;
pub const DEFAULT_WATCHDOG_MARGIN_MS: u64 = 1_000;

pub const DEFAULT_CAPTURE_SAMPLE_RATE: u32 = 16_000;
