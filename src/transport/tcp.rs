//! Newline-delimited JSON over TCP.

use super::{
    InboundMessage, OutboundMessage, Transport, TransportError, TransportEvent, CLOSE_ABNORMAL,
    CLOSE_NORMAL,
};
use crate::engine::{EngineEvent, EventSender};
use crate::{log_debug, log_debug_content};
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TcpTransport {
    addr: String,
    events: EventSender,
    stream: Option<TcpStream>,
    generation: u64,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>, events: EventSender) -> Self {
        Self {
            addr: addr.into(),
            events,
            stream: None,
            generation: 0,
        }
    }

    fn open_stream(&self) -> Result<TcpStream, TransportError> {
        let connect_err = |message: String| TransportError::Connect {
            addr: self.addr.clone(),
            message,
        };
        let addrs = self
            .addr
            .to_socket_addrs()
            .map_err(|err| connect_err(err.to_string()))?;
        let mut last_err = "address resolved to nothing".to_string();
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        log_debug(&format!("set_nodelay failed: {err}"));
                    }
                    return Ok(stream);
                }
                Err(err) => last_err = err.to_string(),
            }
        }
        Err(connect_err(last_err))
    }
}

fn spawn_reader(stream: TcpStream, generation: u64, events: EventSender) {
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        let mut close = (CLOSE_NORMAL, "peer closed the connection".to_string());
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    close = (CLOSE_ABNORMAL, err.to_string());
                    break;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<InboundMessage>(trimmed) {
                Ok(message) => {
                    let event = EngineEvent::Transport(TransportEvent::Inbound {
                        generation,
                        message,
                    });
                    if events.send(event).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    log_debug(&format!("ignoring malformed server message: {err}"));
                    log_debug_content(&format!("malformed payload: {trimmed}"));
                }
            }
        }
        let (code, reason) = close;
        let _ = events.send(EngineEvent::Transport(TransportEvent::Closed {
            generation,
            code,
            reason,
        }));
    });
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = self.open_stream()?;
        let reader = stream
            .try_clone()
            .map_err(|err| TransportError::Connect {
                addr: self.addr.clone(),
                message: err.to_string(),
            })?;
        self.generation += 1;
        spawn_reader(reader, self.generation, self.events.clone());
        self.stream = Some(stream);
        log_debug(&format!(
            "connected to {} (generation {})",
            self.addr, self.generation
        ));
        tracing::info!(
            target: "voxstream::transport",
            addr = %self.addr,
            generation = self.generation,
            "connected"
        );
        Ok(())
    }

    fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(TransportError::Closed);
        };
        let mut line =
            serde_json::to_vec(message).map_err(|err| TransportError::Encode(err.to_string()))?;
        line.push(b'\n');
        let result = stream.write_all(&line).and_then(|_| stream.flush());
        if let Err(err) = result {
            log_debug(&format!("send of {} failed: {err}", message.kind()));
            self.close();
            return Err(TransportError::Send(err.to_string()));
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            // The reader thread reports closure under the old generation.
            self.generation += 1;
            log_debug(&format!("closed connection to {}", self.addr));
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}
