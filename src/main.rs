// Device entry point, plus a host simulator that runs the same loop against
// in-memory platform doubles and a real UDP pub/sub session.

use anyhow::Result;
use log::{info, warn};

use sensor_node::logging::{self, Severity, SyslogForwarder};
use sensor_node::network::connectivity::InitOutcome;
use sensor_node::NodeConfig;

#[cfg(target_os = "espidf")]
#[allow(unexpected_cfgs)]
mod app_desc {
    esp_idf_sys::esp_app_desc!();
}

fn attach_syslog(config: &NodeConfig) {
    if config.syslog_server.is_empty() {
        return;
    }
    let forwarder = config
        .syslog_address()
        .and_then(|server| Ok(SyslogForwarder::new(&config.hostname, server, Severity::Debug)?));
    match forwarder {
        Ok(forwarder) => {
            logging::attach_syslog(forwarder);
        }
        Err(e) => warn!("Syslog forwarding disabled: {:#}", e),
    }
}

fn apply_log_level(config: &NodeConfig) {
    if !logging::set_max_level_from_str(&config.log_level) {
        warn!("Unknown log level '{}', keeping debug", config.log_level);
    }
}

#[cfg(target_os = "espidf")]
fn main() -> Result<()> {
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;

    use sensor_node::network::credentials::CREDENTIALS_NAMESPACE;
    use sensor_node::platform::esp::{
        self, DashboardServer, EspClock, EspNetwork, EspSystem, HttpProvisioningPortal, HttpUpdater,
        NvsCredentialStore,
    };
    use sensor_node::network::dashboard::SseHub;
    use sensor_node::network::transport::udp::UdpTransport;
    use sensor_node::{Collaborators, Node};

    esp_idf_svc::sys::link_patches();
    if let Err(e) = logging::init_logger() {
        println!("Logger already installed: {}", e);
    }
    info!("Free heap: {} bytes", unsafe {
        esp_idf_sys::esp_get_free_heap_size()
    });

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let config = esp::nvs::load_or_default(&nvs);
    apply_log_level(&config);

    let network = EspNetwork::new(peripherals.modem, sys_loop, nvs.clone())?;
    // Needs the netif up; lines sent before the station link is up are dropped
    attach_syslog(&config);
    let parts = Collaborators {
        clock: Box::new(EspClock),
        system: Box::new(EspSystem),
        store: Box::new(NvsCredentialStore::new(nvs, CREDENTIALS_NAMESPACE)),
        network: Box::new(network),
        portal: Box::new(HttpProvisioningPortal::new()),
        transport: Box::new(UdpTransport::new()),
        updater: Box::new(HttpUpdater::new(config.ota_port, config.ota_password.clone())),
    };
    let mut node = Node::new(config.clone(), parts);

    match node.boot() {
        InitOutcome::Connected(ip) => info!("Station address {}", ip),
        InitOutcome::Restarting => {
            // restart() has already been issued; park until it lands
            loop {
                std::thread::sleep(std::time::Duration::from_secs(1));
            }
        }
    }

    // Keep the server alive for the lifetime of the loop
    let _dashboard = match esp::mount_filesystem(&config.fs_base_path) {
        Ok(()) => {
            // Same clock as the node loop, so hello ids and push ids share one base
            let hub = SseHub::new(EspClock);
            match DashboardServer::start(&config.fs_base_path, node.readings(), hub.clone()) {
                Ok(server) => {
                    node.attach_dashboard(Box::new(hub));
                    Some(server)
                }
                Err(e) => {
                    log::error!("Dashboard server failed to start: {:#}", e);
                    None
                }
            }
        }
        Err(e) => {
            log::error!("An error has occurred while mounting the filesystem: {:#}", e);
            None
        }
    };

    node.start_services();
    node.run()
}

#[cfg(not(target_os = "espidf"))]
fn main() -> Result<()> {
    use std::path::Path;
    use std::thread;
    use std::time::Duration;

    use sensor_node::network::credentials::Credentials;
    use sensor_node::network::dashboard::{EventSink, ServerEvent};
    use sensor_node::network::transport::udp::UdpTransport;
    use sensor_node::platform::mock::{MemoryStore, MockNetwork, MockPortal, MockUpdater, RecordingSystem};
    use sensor_node::platform::StdClock;
    use sensor_node::sensors::readings;
    use sensor_node::{Collaborators, Node};

    /// Dashboard stand-in that logs what would go out to browsers
    struct LogSink;

    impl EventSink for LogSink {
        fn broadcast(&mut self, event: &ServerEvent) {
            log::debug!("SSE {}: {}", event.event.as_deref().unwrap_or("message"), event.data);
        }

        fn client_count(&self) -> usize {
            1
        }
    }

    if let Err(e) = logging::init_logger() {
        eprintln!("Logger already installed: {}", e);
    }

    let config = match std::env::args().nth(1) {
        Some(path) => sensor_node::config::load_or_default(Path::new(&path)),
        None => NodeConfig::default(),
    };
    apply_log_level(&config);
    attach_syslog(&config);

    let clock = StdClock::new();
    let network = MockNetwork::new(clock);
    network.connect_after_ms(500);
    let portal = MockPortal::new();
    portal.submit_after(10, Credentials::new("simulated", "simulated-pass"));

    let parts = Collaborators {
        clock: Box::new(clock),
        system: Box::new(RecordingSystem::new()),
        store: Box::new(MemoryStore::new()),
        network: Box::new(network),
        portal: Box::new(portal),
        transport: Box::new(UdpTransport::new()),
        updater: Box::new(MockUpdater::new()),
    };
    let mut node = Node::new(config, parts);

    if let InitOutcome::Restarting = node.boot() {
        warn!("Simulated restart requested, exiting");
        return Ok(());
    }
    node.attach_dashboard(Box::new(LogSink));

    let shared = node.readings();
    thread::Builder::new()
        .name("sim-sensors".into())
        .spawn(move || {
            let mut step = 0u32;
            loop {
                let phase = f64::from(step) / 10.0;
                readings::set_sensor_data(&shared, "temp", 21.0 + phase.sin());
                readings::set_sensor_data(&shared, "hum", 55.0 + 5.0 * phase.cos());
                step = step.wrapping_add(1);
                thread::sleep(Duration::from_millis(500));
            }
        })?;

    node.start_services();
    node.run()
}
