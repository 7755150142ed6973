//! Brokerless pub/sub over UDP
//!
//! Every peer joins the same multicast group and sends each publication as a
//! single datagram. Frames are `b"PS1" | key length (u16, BE) | key | payload`.
//! A receiver thread dispatches inbound frames to handlers subscribed to the
//! exact key.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use super::{PubSubTransport, SessionConfig, SessionMode, TopicHandler};
use crate::error::{LocatorError, TransportError};

const FRAME_MAGIC: &[u8; 3] = b"PS1";
const FRAME_HEADER_LEN: usize = FRAME_MAGIC.len() + 2;
/// Largest frame sent or accepted; one unfragmented datagram on Ethernet
pub const MAX_DATAGRAM: usize = 1472;
const RECEIVE_TIMEOUT: Duration = Duration::from_millis(200);
const RECEIVER_STACK_SIZE: usize = 8 * 1024;

/// Parsed `udp/<ip>:<port>[#iface=<name or address>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub address: SocketAddrV4,
    pub interface: Option<String>,
}

impl Locator {
    /// Interface address for the multicast join
    ///
    /// Named interfaces cannot be resolved portably; they fall back to the
    /// default route.
    pub fn interface_address(&self) -> Ipv4Addr {
        self.interface
            .as_deref()
            .and_then(|iface| iface.parse().ok())
            .unwrap_or(Ipv4Addr::UNSPECIFIED)
    }

    pub fn is_multicast(&self) -> bool {
        self.address.ip().is_multicast()
    }
}

impl FromStr for Locator {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (protocol, rest) = s
            .split_once('/')
            .ok_or_else(|| LocatorError::MissingProtocol(s.to_string()))?;
        if protocol != "udp" {
            return Err(LocatorError::UnsupportedProtocol(protocol.to_string()));
        }

        let (address, params) = rest.split_once('#').unwrap_or((rest, ""));
        let address = address
            .parse::<SocketAddrV4>()
            .map_err(|_| LocatorError::BadAddress(address.to_string()))?;

        let interface = params
            .split(';')
            .filter_map(|p| p.strip_prefix("iface="))
            .find(|v| !v.is_empty())
            .map(str::to_string);

        Ok(Self { address, interface })
    }
}

pub fn encode_frame(key: &str, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    let key_len = u16::try_from(key.len()).map_err(|_| TransportError::KeyTooLong(key.to_string()))?;
    let len = FRAME_HEADER_LEN + key.len() + payload.len();
    if len > MAX_DATAGRAM {
        return Err(TransportError::FrameTooLarge { len, max: MAX_DATAGRAM });
    }
    let mut frame = Vec::with_capacity(len);
    frame.extend_from_slice(FRAME_MAGIC);
    frame.extend_from_slice(&key_len.to_be_bytes());
    frame.extend_from_slice(key.as_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Split a datagram into key and payload; `None` for foreign or truncated data
pub fn decode_frame(frame: &[u8]) -> Option<(&str, &[u8])> {
    let body = frame.strip_prefix(FRAME_MAGIC.as_slice())?;
    let key_len = u16::from_be_bytes([*body.first()?, *body.get(1)?]) as usize;
    let key = body.get(2..2 + key_len)?;
    let payload = &body[2 + key_len..];
    Some((std::str::from_utf8(key).ok()?, payload))
}

type Subscriptions = Arc<Mutex<Vec<(String, Arc<dyn TopicHandler>)>>>;

struct Session {
    socket: UdpSocket,
    destination: SocketAddr,
    stop: Arc<AtomicBool>,
    receiver: JoinHandle<()>,
}

#[derive(Default)]
pub struct UdpTransport {
    session: Option<Session>,
    subscriptions: Subscriptions,
}

impl UdpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address the session socket is bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.session.as_ref()?.socket.local_addr().ok()
    }

    fn bind(locator: &Locator) -> std::io::Result<(UdpSocket, SocketAddr)> {
        if locator.is_multicast() {
            let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, locator.address.port()))?;
            socket.join_multicast_v4(locator.address.ip(), &locator.interface_address())?;
            socket.set_multicast_loop_v4(true)?;
            Ok((socket, SocketAddr::V4(locator.address)))
        } else {
            // Unicast peers talk to themselves: only useful on loopback
            let socket = UdpSocket::bind(locator.address)?;
            let destination = socket.local_addr()?;
            Ok((socket, destination))
        }
    }
}

impl PubSubTransport for UdpTransport {
    fn open(&mut self, config: &SessionConfig) -> Result<(), TransportError> {
        self.close();

        if config.mode != SessionMode::Peer {
            return Err(TransportError::Mode(config.mode.to_string()));
        }
        let locator: Locator = config.locator.parse()?;
        let open_error = |e: std::io::Error| TransportError::Open {
            locator: config.locator.clone(),
            reason: e.to_string(),
        };

        let (socket, destination) = Self::bind(&locator).map_err(open_error)?;
        socket.set_read_timeout(Some(RECEIVE_TIMEOUT)).map_err(open_error)?;
        let rx_socket = socket.try_clone().map_err(open_error)?;

        let stop = Arc::new(AtomicBool::new(false));
        let subscriptions = Arc::clone(&self.subscriptions);
        let rx_stop = Arc::clone(&stop);
        let receiver = thread::Builder::new()
            .name("pubsub-rx".to_string())
            .stack_size(RECEIVER_STACK_SIZE)
            .spawn(move || receive_loop(rx_socket, subscriptions, rx_stop))
            .map_err(open_error)?;

        info!(
            "Pub/sub session open on {} ({}), publishing under '{}'",
            config.locator, config.mode, config.key_expression
        );
        self.session = Some(Session {
            socket,
            destination,
            stop,
            receiver,
        });
        Ok(())
    }

    fn subscribe(&mut self, key: &str, handler: Arc<dyn TopicHandler>) -> Result<(), TransportError> {
        if self.session.is_none() {
            return Err(TransportError::NotRunning);
        }
        if key.is_empty() || key.len() > MAX_DATAGRAM - FRAME_HEADER_LEN {
            return Err(TransportError::Subscribe(key.to_string()));
        }
        lock_subscriptions(&self.subscriptions).push((key.to_string(), handler));
        debug!("Subscribed to '{}'", key);
        Ok(())
    }

    fn publish(&mut self, key: &str, payload: &[u8]) -> Result<(), TransportError> {
        if !self.is_running() {
            return Err(TransportError::NotRunning);
        }
        let session = self.session.as_ref().ok_or(TransportError::NotRunning)?;
        let frame = encode_frame(key, payload)?;
        session
            .socket
            .send_to(&frame, session.destination)
            .map_err(TransportError::Publish)?;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| !s.receiver.is_finished())
    }

    fn close(&mut self) {
        lock_subscriptions(&self.subscriptions).clear();
        if let Some(session) = self.session.take() {
            session.stop.store(true, Ordering::Relaxed);
            if session.receiver.join().is_err() {
                warn!("Pub/sub receiver panicked");
            }
            info!("Pub/sub session closed");
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock_subscriptions(
    subscriptions: &Subscriptions,
) -> std::sync::MutexGuard<'_, Vec<(String, Arc<dyn TopicHandler>)>> {
    subscriptions.lock().unwrap_or_else(|p| p.into_inner())
}

fn receive_loop(socket: UdpSocket, subscriptions: Subscriptions, stop: Arc<AtomicBool>) {
    // One spare byte tells a full frame from a truncated oversized one
    let mut buf = [0u8; MAX_DATAGRAM + 1];
    while !stop.load(Ordering::Relaxed) {
        let len = match socket.recv_from(&mut buf) {
            Ok((len, _)) if len > MAX_DATAGRAM => {
                debug!("Dropping datagram larger than {} bytes", MAX_DATAGRAM);
                continue;
            }
            Ok((len, _)) => len,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => {
                warn!("Pub/sub receive failed, session stopped: {}", e);
                return;
            }
        };

        let Some((topic, payload)) = decode_frame(&buf[..len]) else {
            debug!("Dropping {} byte datagram that is not a pub/sub frame", len);
            continue;
        };

        let handlers: Vec<_> = lock_subscriptions(&subscriptions)
            .iter()
            .filter(|(key, _)| key == topic)
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler.on_message(topic, payload);
        }
    }
}
