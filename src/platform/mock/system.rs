use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::lock;
use crate::network::dashboard::{EventSink, ServerEvent};
use crate::platform::SystemControl;

/// Counts restart requests instead of restarting
#[derive(Debug, Clone, Default)]
pub struct RecordingSystem {
    restarts: Arc<AtomicUsize>,
}

impl RecordingSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

impl SystemControl for RecordingSystem {
    fn restart(&mut self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Keeps every broadcast event
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ServerEvent>>>,
    clients: usize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clients(clients: usize) -> Self {
        Self {
            clients,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<ServerEvent> {
        lock(&self.events).clone()
    }
}

impl EventSink for RecordingSink {
    fn broadcast(&mut self, event: &ServerEvent) {
        lock(&self.events).push(event.clone());
    }

    fn client_count(&self) -> usize {
        self.clients
    }
}
