//! Pub/sub bridge
//!
//! Publishes the readings tree on a fixed period and re-opens the session on
//! its own when the transport reports it is no longer running.

use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::network::transport::{LoggingHandler, PubSubTransport, SessionConfig, TopicHandler};
use crate::sensors::readings::{self, SharedReadings};
use crate::timer::PeriodicTimer;

pub const COURSE_OVER_GROUND_TOPIC: &str = "navigation/courseOverGround";
pub const SPEED_OVER_GROUND_TOPIC: &str = "navigation/speedOverGround";

/// Inbound topics registered with every session
pub const SUBSCRIBED_TOPICS: [&str; 2] = [COURSE_OVER_GROUND_TOPIC, SPEED_OVER_GROUND_TOPIC];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub publishes: u64,
    pub publish_failures: u64,
    pub session_opens: u64,
    pub session_failures: u64,
}

pub struct PubSubBridge {
    transport: Box<dyn PubSubTransport>,
    session: Option<SessionConfig>,
    readings: SharedReadings,
    timer: PeriodicTimer,
    running: bool,
    stats: BridgeStats,
}

impl PubSubBridge {
    pub fn new(transport: Box<dyn PubSubTransport>, readings: SharedReadings, interval_ms: u64) -> Self {
        Self {
            transport,
            session: None,
            readings,
            timer: PeriodicTimer::new(interval_ms),
            running: false,
            stats: BridgeStats::default(),
        }
    }

    /// Open the session and register the fixed subscriptions
    ///
    /// Failure is logged and leaves the bridge not running; no retry happens
    /// here.
    pub fn init_session(&mut self, config: SessionConfig) -> bool {
        if self.running {
            self.transport.close();
            self.running = false;
        }

        info!("Opening pub/sub session...");
        let opened = self.transport.open(&config);
        self.session = Some(config);
        if let Err(e) = opened {
            self.stats.session_failures += 1;
            error!("Pub/sub session setup failed: {}", e);
            return false;
        }

        let handler: Arc<dyn TopicHandler> = Arc::new(LoggingHandler);
        for topic in SUBSCRIBED_TOPICS {
            match self.transport.subscribe(topic, Arc::clone(&handler)) {
                Ok(()) => info!("Declaring subscriber for '{}'", topic),
                Err(e) => error!("Unable to declare subscriber for '{}': {}", topic, e),
            }
        }

        self.running = true;
        self.stats.session_opens += 1;
        true
    }

    /// Publish the readings when the interval has elapsed; never blocks
    pub fn tick(&mut self, now_ms: u64) {
        if !self.timer.is_due(now_ms) {
            return;
        }
        self.timer.reset(now_ms);

        let Some(session) = self.session.as_ref() else {
            return;
        };
        let key = session.key_expression.clone();
        let payload = readings::snapshot_json(&self.readings);

        match self.transport.publish(&key, payload.as_bytes()) {
            Ok(()) => {
                self.stats.publishes += 1;
                debug!("Published {} bytes under '{}'", payload.len(), key);
            }
            Err(e) => {
                self.stats.publish_failures += 1;
                warn!("Publish failed (node not running?): {}", e);
                if !self.transport.is_running() {
                    self.running = false;
                    if let Some(config) = self.session.clone() {
                        info!("Re-initialising pub/sub session");
                        self.init_session(config);
                    }
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    pub fn session(&self) -> Option<&SessionConfig> {
        self.session.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::transport::SessionMode;
    use crate::platform::mock::MockTransport;
    use crate::sensors::readings::{set_sensor_data, shared};

    fn config() -> SessionConfig {
        SessionConfig {
            locator: "udp/224.0.0.123:7447#iface=eth0".to_string(),
            mode: SessionMode::Peer,
            key_expression: "boat/readings".to_string(),
        }
    }

    fn bridge(transport: &MockTransport) -> PubSubBridge {
        let readings = shared();
        set_sensor_data(&readings, "temp", 21.5);
        PubSubBridge::new(Box::new(transport.clone()), readings, 1000)
    }

    #[test]
    fn test_init_session_subscribes_both_topics() {
        let transport = MockTransport::new();
        let mut bridge = bridge(&transport);
        assert!(bridge.init_session(config()));
        assert!(bridge.is_running());
        assert_eq!(transport.subscriptions(), SUBSCRIBED_TOPICS.to_vec());
        assert_eq!(transport.opens(), 1);
    }

    #[test]
    fn test_reinit_closes_running_session_first() {
        let transport = MockTransport::new();
        let mut bridge = bridge(&transport);
        assert!(bridge.init_session(config()));
        assert_eq!(transport.closes(), 0);

        assert!(bridge.init_session(config()));
        assert_eq!(transport.closes(), 1);
        assert_eq!(transport.opens(), 2);
    }

    #[test]
    fn test_open_failure_leaves_bridge_stopped() {
        let transport = MockTransport::new();
        transport.fail_next_opens(1);
        let mut bridge = bridge(&transport);
        assert!(!bridge.init_session(config()));
        assert!(!bridge.is_running());
        assert_eq!(bridge.stats().session_failures, 1);
        // No immediate retry
        assert_eq!(transport.open_attempts(), 1);
    }

    #[test]
    fn test_same_now_publishes_once() {
        let transport = MockTransport::new();
        let mut bridge = bridge(&transport);
        bridge.init_session(config());

        bridge.tick(1000);
        bridge.tick(1000);
        assert_eq!(transport.published().len(), 1);

        bridge.tick(1999);
        assert_eq!(transport.published().len(), 1);
        bridge.tick(2000);
        assert_eq!(transport.published().len(), 2);
    }

    #[test]
    fn test_publishes_readings_json_under_key_expression() {
        let transport = MockTransport::new();
        let mut bridge = bridge(&transport);
        bridge.init_session(config());
        bridge.tick(1000);

        let (key, payload) = &transport.published()[0];
        assert_eq!(key, "boat/readings");
        assert_eq!(payload, br#"{"temp":21.5}"#);
    }

    #[test]
    fn test_failure_with_stopped_session_reinitialises_before_next_publish() {
        let transport = MockTransport::new();
        let mut bridge = bridge(&transport);
        bridge.init_session(config());
        transport.set_running(false);

        bridge.tick(1000);
        assert_eq!(transport.opens(), 2);
        assert!(bridge.is_running());
        assert_eq!(transport.open_configs()[1], config());

        bridge.tick(2000);
        assert_eq!(transport.published().len(), 1);
        assert_eq!(bridge.stats().publish_failures, 1);
    }

    #[test]
    fn test_failure_with_running_session_does_not_reinitialise() {
        let transport = MockTransport::new();
        let mut bridge = bridge(&transport);
        bridge.init_session(config());
        transport.fail_publishes(true);

        bridge.tick(1000);
        bridge.tick(2000);
        assert_eq!(transport.opens(), 1);
        assert_eq!(transport.publish_attempts(), 2);
        assert!(bridge.is_running());
    }

    #[test]
    fn test_timer_resets_on_failure() {
        let transport = MockTransport::new();
        let mut bridge = bridge(&transport);
        bridge.init_session(config());
        transport.fail_publishes(true);

        bridge.tick(1000);
        bridge.tick(1500);
        assert_eq!(transport.publish_attempts(), 1);
    }

    #[test]
    fn test_failed_reinit_retries_on_next_failing_tick() {
        let transport = MockTransport::new();
        let mut bridge = bridge(&transport);
        bridge.init_session(config());
        transport.set_running(false);
        transport.fail_next_opens(1);

        bridge.tick(1000);
        assert!(!bridge.is_running());
        bridge.tick(2000);
        assert!(bridge.is_running());
        assert_eq!(transport.open_attempts(), 3);
    }

    #[test]
    fn test_inbound_messages_do_not_touch_readings() {
        let transport = MockTransport::new();
        let readings = shared();
        let mut bridge = PubSubBridge::new(Box::new(transport.clone()), readings.clone(), 1000);
        bridge.init_session(config());

        assert_eq!(transport.deliver(SPEED_OVER_GROUND_TOPIC, b"6.2"), 1);
        assert_eq!(transport.deliver("other/topic", b"1"), 0);
        assert!(readings.lock().unwrap().is_empty());
    }

    #[test]
    fn test_tick_without_session_is_a_no_op() {
        let transport = MockTransport::new();
        let mut bridge = bridge(&transport);
        bridge.tick(5000);
        assert_eq!(transport.publish_attempts(), 0);
    }
}
