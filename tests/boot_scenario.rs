// End-to-end boot of a node against the in-memory platform: provisioning,
// join, session setup and the first loop iterations.

use std::net::Ipv4Addr;

use sensor_node::network::connectivity::{ConnectivityState, InitOutcome};
use sensor_node::network::credentials;
use sensor_node::network::dashboard::{HEARTBEAT_DATA, READINGS_EVENT};
use sensor_node::ota::{OtaErrorKind, OtaPhase, UpdateEvent, UpdateKind};
use sensor_node::platform::mock::{
    MemoryStore, MockNetwork, MockPortal, MockTransport, MockUpdater, RecordingSink,
    RecordingSystem, SimClock,
};
use sensor_node::platform::Clock;
use sensor_node::sensors::readings;
use sensor_node::{Collaborators, Node, NodeConfig};

struct Bench {
    clock: SimClock,
    store: MemoryStore,
    network: MockNetwork,
    portal: MockPortal,
    transport: MockTransport,
    updater: MockUpdater,
    system: RecordingSystem,
}

impl Bench {
    fn new() -> Self {
        let clock = SimClock::new();
        Self {
            network: MockNetwork::new(clock.clone()),
            clock,
            store: MemoryStore::new(),
            portal: MockPortal::new(),
            transport: MockTransport::new(),
            updater: MockUpdater::new(),
            system: RecordingSystem::new(),
        }
    }

    fn node(&self, config: NodeConfig) -> Node {
        Node::new(
            config,
            Collaborators {
                clock: Box::new(self.clock.clone()),
                system: Box::new(self.system.clone()),
                store: Box::new(self.store.clone()),
                network: Box::new(self.network.clone()),
                portal: Box::new(self.portal.clone()),
                transport: Box::new(self.transport.clone()),
                updater: Box::new(self.updater.clone()),
            },
        )
    }
}

/// Tick until the transport has seen `count` publishes, giving up after `limit` iterations
fn run_until_published(node: &mut Node, transport: &MockTransport, count: usize, limit: usize) -> bool {
    for _ in 0..limit {
        if transport.published().len() >= count {
            return true;
        }
        node.run_for(1);
    }
    transport.published().len() >= count
}

#[test]
fn test_unprovisioned_node_reaches_first_publish() {
    let bench = Bench::new();
    bench.network.connect_after_ms(400);
    bench
        .portal
        .post_after(3, "ssid=home+net&password=hunter22");

    let mut node = bench.node(NodeConfig::default());
    let outcome = node.boot();

    assert_eq!(outcome, InitOutcome::Connected(MockNetwork::STATION_ADDRESS));
    assert_ne!(node.connectivity().local_address(), Some(Ipv4Addr::UNSPECIFIED));
    assert_eq!(
        node.connectivity().history(),
        &[
            ConnectivityState::ProvisioningAP,
            ConnectivityState::ConnectingSTA,
            ConnectivityState::Connected,
        ]
    );
    assert!(bench.portal.is_closed());
    assert!(!bench.network.ap_active());
    assert!(bench
        .portal
        .last_response()
        .is_some_and(|r| r.contains("192.168.4.1")));

    let saved = credentials::load(&bench.store).unwrap();
    assert_eq!(saved.ssid, "home net");
    assert_eq!(saved.password, "hunter22");

    assert!(node.start_services());
    assert_eq!(bench.transport.opens(), 1);
    assert_eq!(bench.updater.hostname().as_deref(), Some("base"));

    let connected_at = node.connected_at_ms().unwrap();
    assert!(run_until_published(&mut node, &bench.transport, 1, 2000));
    assert!(bench.clock.now_ms() - connected_at <= 1000);
    assert_eq!(bench.system.restarts(), 0);
}

#[test]
fn test_published_payload_tracks_readings() {
    let bench = Bench::new();
    credentials::save(
        &mut bench.store.clone(),
        &credentials::Credentials::new("home", "secret"),
        true,
    )
    .unwrap();
    let config = NodeConfig {
        key_expression: "sensors/base".to_string(),
        ..NodeConfig::default()
    };

    let mut node = bench.node(config);
    assert!(matches!(node.boot(), InitOutcome::Connected(_)));
    assert!(node.start_services());

    let shared = node.readings();
    readings::set_sensor_data(&shared, "temp", 21.5);
    readings::set_sensor_data(&shared, "hum", 48.0);
    assert!(run_until_published(&mut node, &bench.transport, 1, 2000));

    let (key, payload) = &bench.transport.published()[0];
    assert_eq!(key, "sensors/base");
    assert_eq!(
        std::str::from_utf8(payload).unwrap(),
        r#"{"hum":48.0,"temp":21.5}"#
    );
}

#[test]
fn test_lost_session_is_reopened_by_the_loop() {
    let bench = Bench::new();
    credentials::save(
        &mut bench.store.clone(),
        &credentials::Credentials::new("home", "secret"),
        true,
    )
    .unwrap();

    let mut node = bench.node(NodeConfig::default());
    node.boot();
    assert!(node.start_services());
    assert!(run_until_published(&mut node, &bench.transport, 1, 2000));

    bench.transport.set_running(false);
    let attempts = bench.transport.publish_attempts();
    node.run_for(1100);

    assert!(bench.transport.publish_attempts() > attempts);
    assert_eq!(bench.transport.opens(), 2);
    assert!(node.bridge().is_running());
    assert!(node.bridge().stats().publish_failures >= 1);
}

#[test]
fn test_dashboard_and_update_channel_share_the_loop() {
    let bench = Bench::new();
    credentials::save(
        &mut bench.store.clone(),
        &credentials::Credentials::new("home", "secret"),
        true,
    )
    .unwrap();

    let mut node = bench.node(NodeConfig::default());
    node.boot();
    let sink = RecordingSink::new();
    node.attach_dashboard(Box::new(sink.clone()));
    assert!(node.start_services());

    bench.updater.push(UpdateEvent::Start(UpdateKind::Filesystem));
    bench.updater.push(UpdateEvent::Progress { done: 10, total: 100 });
    bench.updater.push(UpdateEvent::Error(OtaErrorKind::Receive));
    assert!(run_until_published(&mut node, &bench.transport, 2, 3000));

    let session = node.ota().session();
    assert_eq!(session.phase, OtaPhase::Errored);
    assert_eq!(session.error, Some(OtaErrorKind::Receive));

    let events = sink.events();
    let ping = events
        .iter()
        .position(|e| e.event.is_none() && e.data == HEARTBEAT_DATA)
        .unwrap();
    let readings = &events[ping + 1];
    assert_eq!(readings.event.as_deref(), Some(READINGS_EVENT));
    assert_eq!(readings.id, events[ping].id);
}
