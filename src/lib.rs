//! Voice turn engine for a conversational assistant: records an utterance,
//! streams it to the backend, and plays the streamed reply in order.

pub mod app;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod ipc;
mod lock;
mod telemetry;
pub mod transport;

pub use app::{
    crash_log_path, init_logging, log_debug, log_debug_content, log_file_path, log_panic,
    timings_enabled, LogSettings,
};
pub use engine::{EngineNotice, EngineParts, EngineSnapshot, TurnId, TurnPhase, VoiceEngine};
pub use error::{EngineError, Result};
pub(crate) use lock::lock_or_recover;
pub use telemetry::init_tracing;
