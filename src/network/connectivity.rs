//! Provisioning and connectivity state machine
//!
//! Boot decides between the provisioning access point and joining the stored
//! network. Joining is a bounded, polled wait; running out of budget falls
//! back to provisioning and, once new credentials are saved, a full restart.

use std::net::Ipv4Addr;

use log::{error, info, warn};

use crate::error::ProvisioningError;
use crate::network::credentials::{self, Credentials};
use crate::platform::{Clock, CredentialStore, NetworkStack, ProvisioningPortal, SystemControl};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Unconfigured,
    ProvisioningAP,
    ConnectingSTA,
    Connected,
    Failed,
}

impl ConnectivityState {
    pub fn can_transition_to(self, next: ConnectivityState) -> bool {
        use ConnectivityState::*;
        matches!(
            (self, next),
            (Unconfigured, ProvisioningAP)
                | (Unconfigured, ConnectingSTA)
                | (ProvisioningAP, ConnectingSTA)
                | (ConnectingSTA, Connected)
                | (ConnectingSTA, Failed)
                | (Failed, ProvisioningAP)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectivityState::Unconfigured => "unconfigured",
            ConnectivityState::ProvisioningAP => "provisioning-ap",
            ConnectivityState::ConnectingSTA => "connecting-sta",
            ConnectivityState::Connected => "connected",
            ConnectivityState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityConfig {
    /// Name of the open access point used for provisioning
    pub ap_ssid: String,
    /// `None` waits for the link forever
    pub connect_timeout_ms: Option<u64>,
    pub connect_poll_ms: u64,
    pub provision_poll_ms: u64,
    pub clear_credentials_on_save: bool,
    /// Restart instead of retrying in-process after re-provisioning
    pub restart_after_reprovision: bool,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            ap_ssid: "node-setup".to_string(),
            connect_timeout_ms: Some(30_000),
            connect_poll_ms: 100,
            provision_poll_ms: 100,
            clear_credentials_on_save: true,
            restart_after_reprovision: true,
        }
    }
}

/// How `init` finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Connected(Ipv4Addr),
    /// A restart was requested; on the device control never gets here
    Restarting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConnectTimeout {
    waited_ms: u64,
}

const PROGRESS_LOG_EVERY_MS: u64 = 5_000;

pub struct ConnectivityManager {
    config: ConnectivityConfig,
    state: ConnectivityState,
    store: Box<dyn CredentialStore>,
    network: Box<dyn NetworkStack>,
    portal: Box<dyn ProvisioningPortal>,
    address: Option<Ipv4Addr>,
    history: Vec<ConnectivityState>,
}

impl ConnectivityManager {
    pub fn new(
        config: ConnectivityConfig,
        store: Box<dyn CredentialStore>,
        network: Box<dyn NetworkStack>,
        portal: Box<dyn ProvisioningPortal>,
    ) -> Self {
        Self {
            config,
            state: ConnectivityState::Unconfigured,
            store,
            network,
            portal,
            address: None,
            history: Vec::new(),
        }
    }

    /// Block until the node is on the network or a restart has been requested
    pub fn init(&mut self, clock: &dyn Clock, system: &mut dyn SystemControl) -> InitOutcome {
        let stored = match credentials::load(self.store.as_ref()) {
            Ok(creds) => creds,
            Err(e) => {
                error!("Failed to read stored credentials: {}", e);
                Credentials::default()
            }
        };

        let mut creds = if stored.is_configured() {
            info!("Stored credentials found for SSID '{}'", stored.ssid);
            stored
        } else {
            info!("No stored credentials, starting provisioning");
            self.transition(ConnectivityState::ProvisioningAP);
            match self.provision(clock) {
                Ok(creds) => creds,
                Err(e) => return self.give_up(system, e),
            }
        };

        loop {
            self.transition(ConnectivityState::ConnectingSTA);
            match self.connect(&creds, clock) {
                Ok(address) => {
                    self.address = Some(address);
                    self.transition(ConnectivityState::Connected);
                    crate::node_print!("Wifi connected : {}", address);
                    return InitOutcome::Connected(address);
                }
                Err(timeout) => {
                    warn!(
                        "No connection to '{}' after {} ms, falling back to provisioning",
                        creds.ssid, timeout.waited_ms
                    );
                    self.transition(ConnectivityState::Failed);
                    self.transition(ConnectivityState::ProvisioningAP);
                    let fresh = match self.provision(clock) {
                        Ok(fresh) => fresh,
                        Err(e) => return self.give_up(system, e),
                    };
                    if self.config.restart_after_reprovision {
                        info!("New credentials saved, restarting");
                        system.restart();
                        return InitOutcome::Restarting;
                    }
                    creds = fresh;
                }
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectivityState::Connected
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn local_address(&self) -> Option<Ipv4Addr> {
        self.address
    }

    /// Every state entered since construction, in order
    pub fn history(&self) -> &[ConnectivityState] {
        &self.history
    }

    pub fn network_mut(&mut self) -> &mut dyn NetworkStack {
        self.network.as_mut()
    }

    fn transition(&mut self, next: ConnectivityState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        if !self.state.can_transition_to(next) {
            error!(
                "Illegal connectivity transition {} -> {}",
                self.state.as_str(),
                next.as_str()
            );
        }
        info!("Connectivity: {} -> {}", self.state.as_str(), next.as_str());
        self.state = next;
        self.history.push(next);
    }

    /// Serve the setup form on the access point until credentials arrive
    fn provision(&mut self, clock: &dyn Clock) -> Result<Credentials, ProvisioningError> {
        let ap_address = self
            .network
            .start_access_point(&self.config.ap_ssid)
            .map_err(|e| ProvisioningError::AccessPoint(format!("{:#}", e)))?;

        if let Err(e) = self.portal.open(ap_address) {
            self.stop_access_point();
            return Err(ProvisioningError::Portal(format!("{:#}", e)));
        }
        info!(
            "Provisioning access point '{}' up, open http://{}/",
            self.config.ap_ssid, ap_address
        );

        let creds = loop {
            match self.portal.take_submission() {
                Some(creds) if creds.is_configured() => break creds,
                Some(_) => warn!("Ignoring provisioning submission with empty SSID"),
                None => {}
            }
            clock.sleep_ms(self.config.provision_poll_ms);
        };

        let saved = credentials::save(
            self.store.as_mut(),
            &creds,
            self.config.clear_credentials_on_save,
        );
        self.portal.close();
        self.stop_access_point();
        saved?;

        info!("Credentials for SSID '{}' stored", creds.ssid);
        Ok(creds)
    }

    fn stop_access_point(&mut self) {
        if let Err(e) = self.network.stop_access_point() {
            warn!("Failed to stop access point: {:#}", e);
        }
    }

    /// Polled wait for link and address within the configured budget
    fn connect(&mut self, creds: &Credentials, clock: &dyn Clock) -> Result<Ipv4Addr, ConnectTimeout> {
        info!("Connecting to {}...", creds.ssid);
        if let Err(e) = self.network.join(creds) {
            // The stack may still come up; the budget decides
            error!("Failed to start joining '{}': {:#}", creds.ssid, e);
        }

        let started = clock.now_ms();
        let mut next_progress_log = PROGRESS_LOG_EVERY_MS;
        loop {
            if self.network.is_link_up() {
                if let Some(address) = self.network.local_address() {
                    return Ok(address);
                }
            }

            let waited_ms = clock.now_ms().saturating_sub(started);
            if let Some(budget) = self.config.connect_timeout_ms {
                if waited_ms >= budget {
                    return Err(ConnectTimeout { waited_ms });
                }
            }
            if waited_ms >= next_progress_log {
                info!("Still waiting for network... ({} ms)", waited_ms);
                next_progress_log += PROGRESS_LOG_EVERY_MS;
            }

            clock.sleep_ms(self.config.connect_poll_ms);
        }
    }

    fn give_up(&mut self, system: &mut dyn SystemControl, e: ProvisioningError) -> InitOutcome {
        error!("Provisioning failed: {}, restarting", e);
        system.restart();
        InitOutcome::Restarting
    }
}
