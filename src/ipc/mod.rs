//! JSON IPC mode for external UI integration.
//!
//! The engine runs behind a newline-delimited JSON protocol on stdin/stdout
//! so a UI shell can drive voice turns without linking against the crate.
//!
//! Architecture:
//! - Stdin reader thread: parses commands, sends them to the main loop
//! - Main loop: waits on commands, the engine event bus, and engine timers
//!
//! Protocol:
//! - Each line is a JSON object
//! - Events (Rust → client): {"event": "...", ...}
//! - Commands (client → Rust): {"cmd": "...", ...}

mod protocol;
mod router;
mod session;


pub use protocol::{IpcCommand, IpcEvent};
pub use session::run_ipc_mode;
