//! Top-level context and cooperative loop
//!
//! `Node` owns every component and the state they share. `tick` drives each
//! periodic component once, in a fixed order, and never blocks.

use log::{info, warn};

use crate::config::NodeConfig;
use crate::network::connectivity::{ConnectivityManager, InitOutcome};
use crate::network::dashboard::{DashboardPusher, EventSink};
use crate::network::pubsub::PubSubBridge;
use crate::network::transport::PubSubTransport;
use crate::ota::{OtaHandler, Updater};
use crate::platform::{Clock, CredentialStore, NetworkStack, ProvisioningPortal, SystemControl};
use crate::sensors::readings::{self, SharedReadings};

/// Platform pieces the node is built from
pub struct Collaborators {
    pub clock: Box<dyn Clock>,
    pub system: Box<dyn SystemControl>,
    pub store: Box<dyn CredentialStore>,
    pub network: Box<dyn NetworkStack>,
    pub portal: Box<dyn ProvisioningPortal>,
    pub transport: Box<dyn PubSubTransport>,
    pub updater: Box<dyn Updater>,
}

pub struct Node {
    config: NodeConfig,
    clock: Box<dyn Clock>,
    system: Box<dyn SystemControl>,
    connectivity: ConnectivityManager,
    bridge: PubSubBridge,
    dashboard: Option<DashboardPusher>,
    ota: OtaHandler,
    readings: SharedReadings,
    connected_at_ms: Option<u64>,
}

impl Node {
    pub fn new(config: NodeConfig, parts: Collaborators) -> Self {
        let readings = readings::shared();
        let connectivity = ConnectivityManager::new(
            config.connectivity(),
            parts.store,
            parts.network,
            parts.portal,
        );
        let bridge = PubSubBridge::new(
            parts.transport,
            readings.clone(),
            config.publish_interval_ms,
        );
        Self {
            config,
            clock: parts.clock,
            system: parts.system,
            connectivity,
            bridge,
            dashboard: None,
            ota: OtaHandler::new(parts.updater),
            readings,
            connected_at_ms: None,
        }
    }

    /// Bring the network up; blocks through provisioning and the join wait
    pub fn boot(&mut self) -> InitOutcome {
        let outcome = self
            .connectivity
            .init(self.clock.as_ref(), self.system.as_mut());
        if let InitOutcome::Connected(_) = outcome {
            self.connected_at_ms = Some(self.clock.now_ms());
            if let Some(time_sync) = &self.config.time_sync {
                match self.connectivity.network_mut().sync_time(&time_sync.timezone) {
                    Ok(()) => info!("Time synchronised ({})", time_sync.timezone),
                    Err(e) => warn!("Time sync failed: {:#}", e),
                }
            }
        }
        outcome
    }

    /// Push readings to dashboard clients through `sink` from now on
    ///
    /// Skipped entirely when the dashboard files could not be mounted.
    pub fn attach_dashboard(&mut self, sink: Box<dyn EventSink>) {
        self.dashboard = Some(DashboardPusher::new(
            self.config.dashboard_push_interval_ms,
            self.readings.clone(),
            sink,
        ));
    }

    /// Start the update channel and the pub/sub session
    pub fn start_services(&mut self) -> bool {
        self.ota.begin(&self.config.hostname);
        match self.config.session() {
            Ok(session) => self.bridge.init_session(session),
            Err(e) => {
                log::error!("Pub/sub session setup failed: {:#}", e);
                false
            }
        }
    }

    /// One loop iteration: dashboard push, bridge tick, OTA poll
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();
        if let Some(dashboard) = self.dashboard.as_mut() {
            dashboard.update(now);
        }
        self.bridge.tick(now);
        self.ota.poll();
    }

    pub fn run_for(&mut self, iterations: usize) {
        for _ in 0..iterations {
            self.tick();
            self.clock.sleep_ms(self.config.loop_yield_ms);
        }
    }

    pub fn run(&mut self) -> ! {
        info!("Entering main loop");
        loop {
            self.tick();
            self.clock.sleep_ms(self.config.loop_yield_ms);
        }
    }

    /// Handle for sensor producers
    pub fn readings(&self) -> SharedReadings {
        self.readings.clone()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn connectivity(&self) -> &ConnectivityManager {
        &self.connectivity
    }

    pub fn bridge(&self) -> &PubSubBridge {
        &self.bridge
    }

    pub fn ota(&self) -> &OtaHandler {
        &self.ota
    }

    pub fn has_dashboard(&self) -> bool {
        self.dashboard.is_some()
    }

    /// When `boot` reached the network, in loop milliseconds
    pub fn connected_at_ms(&self) -> Option<u64> {
        self.connected_at_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeSync;
    use crate::network::credentials::{self, Credentials};
    use crate::ota::{OtaPhase, UpdateEvent, UpdateKind};
    use crate::platform::mock::{
        MemoryStore, MockNetwork, MockPortal, MockTransport, MockUpdater, RecordingSink,
        RecordingSystem, SimClock,
    };

    struct Handles {
        clock: SimClock,
        network: MockNetwork,
        transport: MockTransport,
        updater: MockUpdater,
    }

    fn build_node(config: NodeConfig) -> (Node, Handles) {
        let clock = SimClock::new();
        let mut store = MemoryStore::new();
        credentials::save(&mut store, &Credentials::new("home", "secret"), true).unwrap();
        let network = MockNetwork::new(clock.clone());
        network.connect_after_ms(400);
        let transport = MockTransport::new();
        let updater = MockUpdater::new();

        let node = Node::new(
            config,
            Collaborators {
                clock: Box::new(clock.clone()),
                system: Box::new(RecordingSystem::new()),
                store: Box::new(store),
                network: Box::new(network.clone()),
                portal: Box::new(MockPortal::new()),
                transport: Box::new(transport.clone()),
                updater: Box::new(updater.clone()),
            },
        );
        (
            node,
            Handles {
                clock,
                network,
                transport,
                updater,
            },
        )
    }

    #[test]
    fn test_boot_then_tick_runs_every_component() {
        let (mut node, handles) = build_node(NodeConfig::default());
        assert!(matches!(node.boot(), InitOutcome::Connected(_)));
        assert!(node.start_services());

        let sink = RecordingSink::new();
        node.attach_dashboard(Box::new(sink.clone()));
        handles
            .updater
            .push(UpdateEvent::Start(UpdateKind::Firmware));
        readings::set_sensor_data(&node.readings(), "temp", 21.5);

        handles.clock.advance(1000);
        node.tick();
        assert_eq!(sink.events().len(), 2);
        assert_eq!(handles.transport.published().len(), 1);
        assert_eq!(node.ota().session().phase, OtaPhase::Receiving);
    }

    #[test]
    fn test_run_for_publishes_periodically() {
        let config = NodeConfig {
            loop_yield_ms: 100,
            ..NodeConfig::default()
        };
        let (mut node, handles) = build_node(config);
        node.boot();
        node.start_services();

        // Connected at 400 ms; ticks run from there to 3300 ms
        node.run_for(30);
        assert_eq!(handles.transport.published().len(), 3);
        assert_eq!(handles.clock.now_ms(), 3400);
    }

    #[test]
    fn test_time_sync_only_when_configured() {
        let (mut node, handles) = build_node(NodeConfig::default());
        node.boot();
        assert!(handles.network.time_syncs().is_empty());

        let config = NodeConfig {
            time_sync: Some(TimeSync {
                timezone: "UTC0".to_string(),
            }),
            ..NodeConfig::default()
        };
        let (mut node, handles) = build_node(config);
        node.boot();
        assert_eq!(handles.network.time_syncs(), vec!["UTC0".to_string()]);
    }

    #[test]
    fn test_without_dashboard_loop_still_publishes() {
        let (mut node, handles) = build_node(NodeConfig::default());
        node.boot();
        node.start_services();
        assert!(!node.has_dashboard());
        handles.clock.advance(1000);
        node.tick();
        assert_eq!(handles.transport.published().len(), 1);
    }

    #[test]
    fn test_failed_session_is_reported() {
        let (mut node, handles) = build_node(NodeConfig::default());
        handles.transport.fail_next_opens(1);
        node.boot();
        assert!(!node.start_services());
        assert!(!node.bridge().is_running());
    }
}
