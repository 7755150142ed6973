use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::platform::Clock;
use crate::sensors::readings::{self, SharedReadings};
use crate::timer::PeriodicTimer;

/// Reconnect delay suggested to new event-stream clients
pub const CLIENT_RETRY_MS: u64 = 10_000;
/// Data of the unnamed heartbeat message
pub const HEARTBEAT_DATA: &str = "ping";
pub const READINGS_EVENT: &str = "new_readings";
pub const MAX_SSE_CONNECTIONS: usize = 4;
const CLIENT_QUEUE_DEPTH: usize = 8;

/// One server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<u64>,
    pub retry_ms: Option<u64>,
}

impl ServerEvent {
    pub fn new(event: Option<&str>, data: impl Into<String>, id: u64) -> Self {
        Self {
            event: event.map(str::to_string),
            data: data.into(),
            id: Some(id),
            retry_ms: None,
        }
    }

    /// `text/event-stream` wire form, terminated by the blank line
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + 48);
        if let Some(retry) = self.retry_ms {
            out.push_str(&format!("retry: {}\n", retry));
        }
        if let Some(id) = self.id {
            out.push_str(&format!("id: {}\n", id));
        }
        if let Some(event) = &self.event {
            out.push_str(&format!("event: {}\n", event));
        }
        // Every line of a multi-line payload needs its own field
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line.trim_end_matches('\r'));
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// Greeting sent once to every newly connected client
pub fn hello_event(now_ms: u64) -> ServerEvent {
    ServerEvent {
        event: None,
        data: "hello!".to_string(),
        id: Some(now_ms),
        retry_ms: Some(CLIENT_RETRY_MS),
    }
}

/// Fan-out to every connected event-stream client
pub trait EventSink {
    fn broadcast(&mut self, event: &ServerEvent);
    fn client_count(&self) -> usize;
}

/// Periodic dashboard push driven by the cooperative loop
pub struct DashboardPusher {
    timer: PeriodicTimer,
    readings: SharedReadings,
    sink: Box<dyn EventSink>,
}

impl DashboardPusher {
    pub fn new(interval_ms: u64, readings: SharedReadings, sink: Box<dyn EventSink>) -> Self {
        Self {
            timer: PeriodicTimer::new(interval_ms),
            readings,
            sink,
        }
    }

    /// Send the heartbeat and the current readings when the interval is up
    pub fn update(&mut self, now_ms: u64) -> bool {
        if !self.timer.fire(now_ms) {
            return false;
        }
        let payload = readings::snapshot_json(&self.readings);
        self.sink
            .broadcast(&ServerEvent::new(None, HEARTBEAT_DATA, now_ms));
        self.sink
            .broadcast(&ServerEvent::new(Some(READINGS_EVENT), payload, now_ms));
        debug!("Dashboard push to {} client(s)", self.sink.client_count());
        true
    }
}

/// Fan-out of encoded events to the open `/events` connections
///
/// The hello frame is stamped from the clock whose time the node loop passes
/// to [`DashboardPusher::update`].
#[derive(Clone)]
pub struct SseHub {
    clients: Arc<Mutex<Vec<SyncSender<String>>>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl SseHub {
    pub fn new(clock: impl Clock + Send + Sync + 'static) -> Self {
        Self {
            clients: Arc::default(),
            clock: Arc::new(clock),
        }
    }

    fn clients(&self) -> MutexGuard<'_, Vec<SyncSender<String>>> {
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a client; its queue already holds the hello frame
    ///
    /// Returns `None` once [`MAX_SSE_CONNECTIONS`] clients are open.
    pub fn connect(&self) -> Option<Receiver<String>> {
        let mut clients = self.clients();
        if clients.len() >= MAX_SSE_CONNECTIONS {
            return None;
        }
        let (tx, rx) = mpsc::sync_channel(CLIENT_QUEUE_DEPTH);
        tx.try_send(hello_event(self.clock.now_ms()).encode()).ok()?;
        clients.push(tx);
        Some(rx)
    }
}

impl EventSink for SseHub {
    fn broadcast(&mut self, event: &ServerEvent) {
        let frame = event.encode();
        // A slow client misses events; a gone client is dropped
        self.clients()
            .retain(|tx| !matches!(tx.try_send(frame.clone()), Err(TrySendError::Disconnected(_))));
    }

    fn client_count(&self) -> usize {
        self.clients().len()
    }
}
