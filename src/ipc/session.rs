use crate::audio::{CpalMicrophone, CpalRenderer};
use crate::config::AppConfig;
use crate::engine::{EngineEvent, EngineNotice, EngineParts, EventBus, VoiceEngine};
use crate::transport::TcpTransport;
use crate::{log_debug, log_debug_content};
use anyhow::{Context, Result};
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::thread;
use std::time::{Duration, Instant};

use super::protocol::{parse_line, Incoming, IpcEvent};
use super::router::handle_incoming;

/// Longest the loop sleeps when no engine timer is pending.
const IDLE_WAIT: Duration = Duration::from_millis(250);

// ============================================================================
// Event Sending
// ============================================================================

/// Write one JSON line and flush. Write errors are logged, not fatal; the UI
/// going away shows up as stdin EOF.
pub(super) fn send_line<T: Serialize>(out: &mut dyn Write, value: &T) {
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(err) => {
            log_debug(&format!("cannot serialize IPC event: {err}"));
            return;
        }
    };
    if let Err(err) = writeln!(out, "{json}").and_then(|()| out.flush()) {
        log_debug(&format!("IPC write failed: {err}"));
    }
}

pub(super) fn flush_notices(out: &mut dyn Write, notices: &Receiver<EngineNotice>) {
    for notice in notices.try_iter() {
        send_line(out, &notice);
    }
}

// ============================================================================
// Stdin Reader Thread
// ============================================================================

fn spawn_stdin_reader(tx: Sender<Incoming>) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("voxstream-stdin".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if let Some(incoming) = parse_line(&line) {
                    if tx.send(incoming).is_err() {
                        break; // Main loop has exited
                    }
                }
            }
            log_debug("Stdin reader thread exiting");
        })
        .context("failed to spawn stdin reader")
}

// ============================================================================
// Main Event Loop
// ============================================================================

pub fn run_ipc_mode(config: AppConfig) -> Result<()> {
    log_debug("Starting JSON IPC mode");
    tracing::info!(target: "voxstream::ipc", server = %config.server, "ipc mode starting");

    let bus = EventBus::new();
    let (notice_tx, notice_rx) = unbounded();
    let parts = EngineParts {
        microphone: Box::new(CpalMicrophone::new(
            config.input_device.clone(),
            bus.sender(),
        )),
        transport: Box::new(TcpTransport::new(config.server.clone(), bus.sender())),
        renderer: Box::new(CpalRenderer::new(bus.sender())),
    };
    let mut engine = VoiceEngine::new(config.engine_config(), parts, notice_tx);

    let mut stdout = io::stdout();
    send_line(
        &mut stdout,
        &IpcEvent::Ready {
            version: env!("CARGO_PKG_VERSION").to_string(),
            server: config.server.clone(),
            input_device: config.input_device.clone(),
            settings: engine.settings(),
        },
    );

    let (cmd_tx, cmd_rx) = unbounded();
    let _stdin_handle = spawn_stdin_reader(cmd_tx)?;
    run_ipc_loop(&mut engine, &cmd_rx, bus.receiver(), &notice_rx, &mut stdout);
    Ok(())
}

/// Drive the engine until the command channel closes. Each iteration waits
/// for a command, a bus event, or the next engine deadline, then runs due
/// timers and forwards notices.
pub(super) fn run_ipc_loop(
    engine: &mut VoiceEngine,
    commands: &Receiver<Incoming>,
    events: &Receiver<EngineEvent>,
    notices: &Receiver<EngineNotice>,
    out: &mut dyn Write,
) {
    loop {
        let wait = engine.next_deadline().map_or(IDLE_WAIT, |deadline| {
            deadline
                .saturating_duration_since(Instant::now())
                .min(IDLE_WAIT)
        });

        select! {
            recv(commands) -> incoming => match incoming {
                Ok(incoming) => {
                    log_debug_content(&format!("IPC command received: {incoming:?}"));
                    if let Some(reply) = handle_incoming(engine, incoming, Instant::now()) {
                        flush_notices(out, notices);
                        send_line(out, &reply);
                    }
                }
                Err(_) => {
                    log_debug("Command channel disconnected, exiting");
                    let _ = engine.cancel(Instant::now());
                    flush_notices(out, notices);
                    send_line(out, &IpcEvent::Shutdown);
                    break;
                }
            },
            recv(events) -> event => {
                if let Ok(event) = event {
                    engine.handle_event(event, Instant::now());
                }
            },
            default(wait) => {}
        }

        engine.poll(Instant::now());
        flush_notices(out, notices);
    }

    log_debug("IPC mode exiting");
}
