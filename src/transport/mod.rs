//! Bidirectional message channel to the assistant backend.
//!
//! The engine sends `OutboundMessage`s through the `Transport` trait and
//! receives `TransportEvent`s on its event bus. Each successful connect opens
//! a new generation; events from older generations are stale.

mod protocol;
mod tcp;
#[cfg(test)]
mod tests;

pub use protocol::{ControlSignal, Inbound, InboundMessage, OutboundMessage};
pub use tcp::TcpTransport;

use thiserror::Error;

/// Close code used when the peer hangs up cleanly.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code used when the connection drops without a clean shutdown.
pub const CLOSE_ABNORMAL: u16 = 1006;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Inbound {
        generation: u64,
        message: InboundMessage,
    },
    Closed {
        generation: u64,
        code: u16,
        reason: String,
    },
}

impl TransportEvent {
    pub fn generation(&self) -> u64 {
        match self {
            TransportEvent::Inbound { generation, .. } | TransportEvent::Closed { generation, .. } => {
                *generation
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("cannot connect to {addr}: {message}")]
    Connect { addr: String, message: String },
    #[error("send failed: {0}")]
    Send(String),
    #[error("connection is closed")]
    Closed,
    #[error("cannot encode message: {0}")]
    Encode(String),
}

pub trait Transport {
    /// Open the channel if it is not already open.
    fn connect(&mut self) -> Result<(), TransportError>;
    fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError>;
    /// Close the channel. Later events from the closed generation are stale.
    fn close(&mut self);
    fn is_open(&self) -> bool;
    /// Generation of the current (or most recent) connection.
    fn generation(&self) -> u64;
}
