use super::validation::validate_server_addr;
use super::{
    AppConfig, AudioEncoding, UserSettings, DEFAULT_SILENCE_THRESHOLD_MS, MAX_SEND_DELAY_MS,
};
use crate::error::EngineError;
use clap::Parser;
use std::time::Duration;

#[test]
fn accepts_valid_defaults() {
    let mut cfg = AppConfig::parse_from(["test-app"]);
    assert!(cfg.validate().is_ok());
    assert!(cfg.auto_send);
    assert_eq!(cfg.silence_threshold_ms, DEFAULT_SILENCE_THRESHOLD_MS);
    assert_eq!(cfg.encoding, AudioEncoding::Wav);
}

#[test]
fn no_auto_send_flag_disables_auto_send() {
    let mut cfg = AppConfig::parse_from(["test-app", "--no-auto-send"]);
    cfg.validate().expect("flag should be valid");
    assert!(!cfg.engine_config().settings.auto_send);
}

#[test]
fn last_auto_send_flag_wins() {
    let cfg = AppConfig::parse_from(["test-app", "--no-auto-send", "--auto-send"]);
    assert!(cfg.engine_config().settings.auto_send);

    let cfg = AppConfig::parse_from(["test-app", "--auto-send", "--no-auto-send"]);
    assert!(!cfg.engine_config().settings.auto_send);

    let cfg = AppConfig::parse_from(["test-app", "--auto-send"]);
    assert!(cfg.auto_send);
}

#[test]
fn rejects_silence_threshold_out_of_bounds() {
    let mut cfg = AppConfig::parse_from(["test-app", "--silence-threshold-ms", "999"]);
    assert!(cfg.validate().is_err());

    let mut cfg = AppConfig::parse_from(["test-app", "--silence-threshold-ms", "10001"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn accepts_silence_threshold_bounds() {
    let mut cfg = AppConfig::parse_from(["test-app", "--silence-threshold-ms", "1000"]);
    assert!(cfg.validate().is_ok());

    let mut cfg = AppConfig::parse_from(["test-app", "--silence-threshold-ms", "10000"]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn rejects_send_delay_above_limit() {
    let mut cfg = AppConfig::parse_from(["test-app", "--send-delay-ms", "2001"]);
    assert!(cfg.validate().is_err());

    let mut cfg = AppConfig::parse_from(["test-app", "--send-delay-ms", "2000"]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn rejects_amplitude_tick_longer_than_threshold() {
    let mut cfg = AppConfig::parse_from([
        "test-app",
        "--silence-threshold-ms",
        "1000",
        "--amplitude-tick-ms",
        "1500",
    ]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_loudness_floor_out_of_bounds() {
    let mut cfg = AppConfig::parse_from(["test-app", "--loudness-floor", "0"]);
    assert!(cfg.validate().is_err());
    let mut cfg = AppConfig::parse_from(["test-app", "--loudness-floor", "100"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_bad_server_addresses() {
    assert!(validate_server_addr("").is_err());
    assert!(validate_server_addr("localhost").is_err());
    assert!(validate_server_addr(":8765").is_err());
    assert!(validate_server_addr("localhost:0").is_err());
    assert!(validate_server_addr("localhost:http").is_err());
    assert!(validate_server_addr("localhost:8765").is_ok());
}

#[test]
fn trims_server_and_device_names() {
    let mut cfg = AppConfig::parse_from([
        "test-app",
        "--server",
        "  10.0.0.2:9000 ",
        "--input-device",
        " USB Mic ",
    ]);
    cfg.validate().expect("trimmed values should validate");
    assert_eq!(cfg.server, "10.0.0.2:9000");
    assert_eq!(cfg.input_device.as_deref(), Some("USB Mic"));
}

#[test]
fn blank_resume_session_is_dropped() {
    let mut cfg = AppConfig::parse_from(["test-app", "--resume-session", "  "]);
    cfg.validate().expect("blank session should be ignored");
    assert!(cfg.resume_session.is_none());

    let mut cfg = AppConfig::parse_from(["test-app", "--resume-session", "abc/../x"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn engine_config_carries_durations() {
    let mut cfg = AppConfig::parse_from([
        "test-app",
        "--chunk-ms",
        "250",
        "--watchdog-margin-ms",
        "1500",
        "--encoding",
        "pcm16",
    ]);
    cfg.validate().expect("values should be valid");
    let engine = cfg.engine_config();
    assert_eq!(engine.chunk_duration, Duration::from_millis(250));
    assert_eq!(engine.watchdog_margin, Duration::from_millis(1500));
    assert_eq!(engine.encoding, AudioEncoding::Pcm16);
}

#[test]
fn no_logs_overrides_logs() {
    let cfg = AppConfig::parse_from(["test-app", "--logs", "--log-content", "--no-logs"]);
    let settings = cfg.log_settings();
    assert!(!settings.enabled);
    assert!(!settings.content);
}

#[test]
fn log_timings_enables_logging() {
    let cfg = AppConfig::parse_from(["test-app", "--log-timings"]);
    let settings = cfg.log_settings();
    assert!(settings.enabled);
    assert!(settings.timings);
    assert!(!settings.content);
}

#[test]
fn user_settings_reject_out_of_range_values() {
    let mut settings = UserSettings::default();
    let err = settings
        .set_silence_threshold_ms(500)
        .expect_err("below minimum");
    assert!(matches!(
        err,
        EngineError::InvalidSetting {
            name: "silence_threshold_ms",
            ..
        }
    ));
    assert_eq!(settings.silence_threshold_ms, DEFAULT_SILENCE_THRESHOLD_MS);

    assert!(settings.set_send_delay_ms(MAX_SEND_DELAY_MS + 1).is_err());
    assert!(settings.set_send_delay_ms(MAX_SEND_DELAY_MS).is_ok());
}

#[test]
fn user_settings_new_validates_every_field() {
    assert!(UserSettings::new(true, 3_000, 250).is_ok());
    assert!(UserSettings::new(true, 20_000, 0).is_err());
    assert!(UserSettings::new(false, 3_000, 5_000).is_err());
}
