use std::io;
use std::sync::{Arc, Mutex};

use super::lock;
use crate::error::TransportError;
use crate::network::transport::{PubSubTransport, SessionConfig, TopicHandler};

#[derive(Default)]
struct TransportState {
    running: bool,
    open_attempts: usize,
    open_configs: Vec<SessionConfig>,
    failing_opens: usize,
    fail_publishes: bool,
    publish_attempts: usize,
    published: Vec<(String, Vec<u8>)>,
    subscriptions: Vec<(String, Arc<dyn TopicHandler>)>,
    closes: usize,
}

/// Transport that records traffic and fails on command
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the session dying underneath the bridge
    pub fn set_running(&self, running: bool) {
        lock(&self.state).running = running;
    }

    pub fn fail_next_opens(&self, count: usize) {
        lock(&self.state).failing_opens = count;
    }

    /// Make publishes fail while the session still reports running
    pub fn fail_publishes(&self, fail: bool) {
        lock(&self.state).fail_publishes = fail;
    }

    /// Successful opens
    pub fn opens(&self) -> usize {
        lock(&self.state).open_configs.len()
    }

    pub fn open_attempts(&self) -> usize {
        lock(&self.state).open_attempts
    }

    pub fn open_configs(&self) -> Vec<SessionConfig> {
        lock(&self.state).open_configs.clone()
    }

    pub fn closes(&self) -> usize {
        lock(&self.state).closes
    }

    pub fn publish_attempts(&self) -> usize {
        lock(&self.state).publish_attempts
    }

    /// Successful publishes as `(key, payload)`
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.state).published.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.state)
            .subscriptions
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Feed an inbound message to matching handlers; returns how many ran
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> usize {
        let handlers: Vec<_> = lock(&self.state)
            .subscriptions
            .iter()
            .filter(|(key, _)| key == topic)
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in &handlers {
            handler.on_message(topic, payload);
        }
        handlers.len()
    }
}

impl PubSubTransport for MockTransport {
    fn open(&mut self, config: &SessionConfig) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.open_attempts += 1;
        state.subscriptions.clear();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            state.running = false;
            return Err(TransportError::Open {
                locator: config.locator.clone(),
                reason: "injected open failure".to_string(),
            });
        }
        state.running = true;
        state.open_configs.push(config.clone());
        Ok(())
    }

    fn subscribe(&mut self, key: &str, handler: Arc<dyn TopicHandler>) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if !state.running {
            return Err(TransportError::NotRunning);
        }
        state.subscriptions.push((key.to_string(), handler));
        Ok(())
    }

    fn publish(&mut self, key: &str, payload: &[u8]) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.publish_attempts += 1;
        if !state.running {
            return Err(TransportError::NotRunning);
        }
        if state.fail_publishes {
            return Err(TransportError::Publish(io::Error::new(
                io::ErrorKind::Other,
                "injected publish failure",
            )));
        }
        state.published.push((key.to_string(), payload.to_vec()));
        Ok(())
    }

    fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    fn close(&mut self) {
        let mut state = lock(&self.state);
        state.running = false;
        state.subscriptions.clear();
        state.closes += 1;
    }
}
