//! Publish/subscribe transport seam
//!
//! The bridge owns exactly one transport and is the only code that publishes
//! or subscribes through it.

pub mod udp;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::info;

use crate::error::TransportError;

pub use udp::UdpTransport;

/// Receives inbound messages for one subscribed key
///
/// Called from the transport's own I/O context, never from the cooperative
/// loop, so implementations must not assume they run on the loop thread.
pub trait TopicHandler: Send + Sync {
    fn on_message(&self, topic: &str, payload: &[u8]);
}

pub trait PubSubTransport {
    /// Open a session, replacing any previous one
    fn open(&mut self, config: &SessionConfig) -> Result<(), TransportError>;
    fn subscribe(&mut self, key: &str, handler: Arc<dyn TopicHandler>) -> Result<(), TransportError>;
    fn publish(&mut self, key: &str, payload: &[u8]) -> Result<(), TransportError>;
    /// Whether the session can still deliver in both directions
    fn is_running(&self) -> bool;
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Peer,
    Client,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Peer => "peer",
            SessionMode::Client => "client",
        }
    }
}

impl FromStr for SessionMode {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "peer" => Ok(SessionMode::Peer),
            "client" => Ok(SessionMode::Client),
            other => Err(TransportError::Mode(other.to_string())),
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of one pub/sub session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub locator: String,
    pub mode: SessionMode,
    /// Key the readings are published under
    pub key_expression: String,
}

/// Logs every inbound message; routing into local state is not done yet
#[derive(Debug, Default)]
pub struct LoggingHandler;

impl TopicHandler for LoggingHandler {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        info!(
            " >> [Subscription listener] Received ('{}': '{}')",
            topic,
            String::from_utf8_lossy(payload)
        );
    }
}
