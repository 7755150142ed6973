use std::net::SocketAddr;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::network::connectivity::ConnectivityConfig;
use crate::network::credentials;
use crate::network::transport::udp::Locator;
use crate::network::transport::{SessionConfig, SessionMode};

pub const CONFIG_NAMESPACE: &str = "node";
pub const CONFIG_KEY: &str = "config";
/// Largest JSON blob accepted from storage
pub const MAX_CONFIG_LEN: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    // Identity, also used as the syslog app name and mDNS host
    pub hostname: String,
    pub ap_ssid: String,

    // Logging
    /// `host:port` of the remote syslog collector; empty disables forwarding
    pub syslog_server: String,
    pub log_level: String,

    // Pub/sub session
    pub locator: String,
    pub mode: String,
    pub key_expression: String,
    pub publish_interval_ms: u64,

    // Dashboard
    pub dashboard_push_interval_ms: u64,
    pub fs_base_path: String,

    // Connectivity
    pub connect_timeout_ms: Option<u64>,
    pub connect_poll_ms: u64,
    pub provision_poll_ms: u64,
    pub clear_credentials_on_save: bool,
    pub restart_after_reprovision: bool,
    pub time_sync: Option<TimeSync>,

    // OTA
    pub ota_port: u16,
    pub ota_password: Option<String>,

    pub loop_yield_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSync {
    /// POSIX TZ string, e.g. `CET-1CEST,M3.5.0,M10.5.0/3`
    pub timezone: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            hostname: "base".to_string(),
            ap_ssid: "node-setup".to_string(),
            syslog_server: "192.168.1.125:514".to_string(),
            log_level: "debug".to_string(),
            locator: "udp/224.0.0.123:7447#iface=eth0".to_string(),
            mode: "peer".to_string(),
            // Set per build, see build.rs
            key_expression: env!("NODE_KEYEXPR").to_string(),
            publish_interval_ms: 1000,
            dashboard_push_interval_ms: 1000,
            fs_base_path: "/spiffs".to_string(),
            connect_timeout_ms: Some(30_000),
            connect_poll_ms: 100,
            provision_poll_ms: 100,
            clear_credentials_on_save: true,
            restart_after_reprovision: true,
            time_sync: None,
            ota_port: 8080,
            ota_password: None,
            loop_yield_ms: 1,
        }
    }
}

impl NodeConfig {
    pub fn from_json(json: &[u8]) -> Result<Self> {
        let config: NodeConfig = serde_json::from_slice(json).context("Invalid config JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hostname.is_empty() {
            bail!("hostname cannot be empty");
        }
        credentials::validate_ssid(&self.ap_ssid).context("ap_ssid")?;
        if !self.syslog_server.is_empty() {
            self.syslog_address()?;
        }
        if self.key_expression.is_empty() {
            bail!("key_expression cannot be empty");
        }
        self.locator
            .parse::<Locator>()
            .map_err(|e| anyhow!("locator: {}", e))?;
        self.session_mode()?;

        for (name, value) in [
            ("publish_interval_ms", self.publish_interval_ms),
            ("dashboard_push_interval_ms", self.dashboard_push_interval_ms),
            ("connect_poll_ms", self.connect_poll_ms),
            ("provision_poll_ms", self.provision_poll_ms),
        ] {
            if value == 0 {
                bail!("{} must be greater than zero", name);
            }
        }
        if self.connect_timeout_ms == Some(0) {
            bail!("connect_timeout_ms must be greater than zero, or null to wait forever");
        }
        Ok(())
    }

    pub fn session_mode(&self) -> Result<SessionMode> {
        self.mode.parse().map_err(|e| anyhow!("mode: {}", e))
    }

    pub fn syslog_address(&self) -> Result<SocketAddr> {
        self.syslog_server
            .parse()
            .with_context(|| format!("syslog_server '{}' is not host:port", self.syslog_server))
    }

    pub fn session(&self) -> Result<SessionConfig> {
        Ok(SessionConfig {
            locator: self.locator.clone(),
            mode: self.session_mode()?,
            key_expression: self.key_expression.clone(),
        })
    }

    pub fn connectivity(&self) -> ConnectivityConfig {
        ConnectivityConfig {
            ap_ssid: self.ap_ssid.clone(),
            connect_timeout_ms: self.connect_timeout_ms,
            connect_poll_ms: self.connect_poll_ms,
            provision_poll_ms: self.provision_poll_ms,
            clear_credentials_on_save: self.clear_credentials_on_save,
            restart_after_reprovision: self.restart_after_reprovision,
        }
    }
}

/// Read a JSON config file, falling back to defaults when it is missing or bad
pub fn load_or_default(path: &Path) -> NodeConfig {
    let loaded = std::fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))
        .and_then(|bytes| NodeConfig::from_json(&bytes));
    match loaded {
        Ok(config) => {
            log::info!("Loaded configuration from {}", path.display());
            config
        }
        Err(e) => {
            log::warn!("{:#}, using defaults", e);
            NodeConfig::default()
        }
    }
}
