use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::str::FromStr;

use crate::config::CommandSettings;
use crate::guidance::Decision;

/// How decisions are delimited on the byte stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Bare literal, no delimiter. Matches the existing vehicle-side reader.
    #[default]
    Raw,
    /// Literal followed by `\n`.
    Newline,
}

impl Framing {
    pub fn encode(&self, decision: Decision) -> Vec<u8> {
        let mut payload = decision.as_str().as_bytes().to_vec();
        if *self == Framing::Newline {
            payload.push(b'\n');
        }
        payload
    }
}

impl FromStr for Framing {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(Framing::Raw),
            "newline" => Ok(Framing::Newline),
            other => Err(anyhow!("unknown framing '{}' (expected raw or newline)", other)),
        }
    }
}

/// Failure to deliver a decision. Always fatal to the control loop.
#[derive(Debug)]
pub enum ChannelError {
    /// The write did not complete within the send timeout.
    Timeout,
    /// The peer closed the connection, or it was already closed locally.
    Closed,
    Io(io::Error),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Timeout => write!(f, "command send timed out"),
            ChannelError::Closed => write!(f, "command connection closed"),
            ChannelError::Io(err) => write!(f, "command send failed: {}", err),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChannelError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ChannelError {
    fn from(err: io::Error) -> Self {
        use io::ErrorKind::*;
        match err.kind() {
            WouldBlock | TimedOut => ChannelError::Timeout,
            BrokenPipe | ConnectionReset | ConnectionAborted | NotConnected | UnexpectedEof
            | WriteZero => ChannelError::Closed,
            _ => ChannelError::Io(err),
        }
    }
}

/// Destination for per-frame decisions.
pub trait DecisionSink {
    fn send(&mut self, decision: Decision) -> Result<(), ChannelError>;
}

/// In-memory sink, records decisions in send order.
impl DecisionSink for Vec<Decision> {
    fn send(&mut self, decision: Decision) -> Result<(), ChannelError> {
        self.push(decision);
        Ok(())
    }
}

/// Persistent TCP connection to the vehicle controller.
///
/// Opened once before the control loop and closed exactly once, either by
/// `close()` or on drop.
pub struct CommandChannel {
    stream: Option<TcpStream>,
    peer: SocketAddr,
    framing: Framing,
    sent: u64,
}

impl CommandChannel {
    pub fn connect(peer: SocketAddr, settings: &CommandSettings) -> Result<Self> {
        let stream = TcpStream::connect_timeout(&peer, settings.connect_timeout)
            .with_context(|| format!("failed to connect to controller at {}", peer))?;
        stream
            .set_nodelay(true)
            .context("failed to set TCP_NODELAY on command connection")?;
        stream
            .set_write_timeout(Some(settings.send_timeout))
            .context("failed to set command send timeout")?;
        log::info!(
            "command channel connected to {} (framing={:?}, send_timeout={}ms)",
            peer,
            settings.framing,
            settings.send_timeout.as_millis()
        );
        Ok(Self {
            stream: Some(stream),
            peer,
            framing: settings.framing,
            sent: 0,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Decisions successfully written so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Shut the connection down. Later calls are no-ops.
    pub fn close(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        if let Err(err) = stream.shutdown(Shutdown::Both) {
            if err.kind() != io::ErrorKind::NotConnected {
                log::warn!("command channel shutdown: {}", err);
            }
        }
        log::info!(
            "command channel to {} closed after {} decisions",
            self.peer,
            self.sent
        );
    }
}

impl DecisionSink for CommandChannel {
    fn send(&mut self, decision: Decision) -> Result<(), ChannelError> {
        let stream = self.stream.as_mut().ok_or(ChannelError::Closed)?;
        stream.write_all(&self.framing.encode(decision))?;
        self.sent += 1;
        Ok(())
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        self.close();
    }
}
