use crate::app::LogSettings;
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

pub(crate) fn tracing_log_path() -> PathBuf {
    env::var("VOXSTREAM_TRACE_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("voxstream_trace.jsonl"))
}

/// Which events reach the trace file. Timings alone keep only the turn
/// lifecycle; full logging adds capture, transport, playback and IPC detail.
/// Dependencies only report warnings.
pub(crate) fn trace_filter(settings: LogSettings) -> Targets {
    let engine = if settings.enabled {
        LevelFilter::DEBUG
    } else {
        LevelFilter::OFF
    };
    Targets::new()
        .with_default(LevelFilter::WARN)
        .with_target("voxstream", engine)
        .with_target("voxstream::turn", LevelFilter::INFO.max(engine))
}

/// Install the JSON trace subscriber that records turn lifecycle events.
pub fn init_tracing(settings: LogSettings) {
    if !(settings.enabled || settings.timings) {
        return;
    }

    let _ = TRACING_INIT.get_or_init(|| {
        let path = tracing_log_path();
        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => file,
            Err(_) => return,
        };
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_timer(UtcTime::rfc_3339())
            .with_writer(Mutex::new(file))
            .with_target(true)
            .with_current_span(false)
            .with_span_list(false)
            .with_filter(trace_filter(settings));
        let subscriber = tracing_subscriber::registry().with(layer);
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn timings_only_traces_turn_lifecycle() {
        let filter = trace_filter(LogSettings {
            enabled: false,
            content: false,
            timings: true,
        });
        assert!(filter.would_enable("voxstream::turn", &Level::INFO));
        assert!(!filter.would_enable("voxstream::turn", &Level::DEBUG));
        assert!(!filter.would_enable("voxstream::transport", &Level::WARN));
        assert!(filter.would_enable("cpal", &Level::WARN));
        assert!(!filter.would_enable("cpal", &Level::INFO));
    }

    #[test]
    fn full_logging_traces_every_engine_target() {
        let filter = trace_filter(LogSettings {
            enabled: true,
            content: false,
            timings: false,
        });
        assert!(filter.would_enable("voxstream::turn", &Level::DEBUG));
        assert!(filter.would_enable("voxstream::playback", &Level::WARN));
        assert!(filter.would_enable("voxstream::audio", &Level::DEBUG));
        assert!(!filter.would_enable("voxstream::audio", &Level::TRACE));
    }
}
