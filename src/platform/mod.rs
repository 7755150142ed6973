//! Platform collaborators
//!
//! The core logic only talks to the device through these traits. The ESP-IDF
//! implementations live in [`esp`]; [`mock`] provides in-memory doubles for
//! host tests and the simulator binary.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::error::StoreError;
use crate::network::credentials::Credentials;

#[cfg(target_os = "espidf")]
pub mod esp;

#[cfg(not(target_os = "espidf"))]
pub mod mock;

/// Monotonic milliseconds plus the one blocking primitive the boot path needs
pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep_ms(&self, ms: u64);
}

/// Named string values that survive power loss
///
/// Every call is a scoped acquisition: implementations open the backing
/// storage, perform the operation and release it before returning.
pub trait CredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    /// Remove every key in the store's namespace
    fn clear(&mut self) -> Result<(), StoreError>;
}

/// Radio and IP stack
pub trait NetworkStack {
    /// Bring up an open access point and return the device's address on it
    fn start_access_point(&mut self, ssid: &str) -> anyhow::Result<Ipv4Addr>;
    fn stop_access_point(&mut self) -> anyhow::Result<()>;
    /// Start joining a network; must not wait for the association to finish
    fn join(&mut self, credentials: &Credentials) -> anyhow::Result<()>;
    fn is_link_up(&self) -> bool;
    fn local_address(&self) -> Option<Ipv4Addr>;
    /// Wall-clock synchronisation once a network is available
    fn sync_time(&mut self, _timezone: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The HTTP form served on the provisioning access point
pub trait ProvisioningPortal {
    fn open(&mut self, device_address: Ipv4Addr) -> anyhow::Result<()>;
    /// Credentials from a completed `POST /connect`, if one arrived
    fn take_submission(&mut self) -> Option<Credentials>;
    fn close(&mut self);
}

pub trait SystemControl {
    /// Full process restart; on the device this never returns
    fn restart(&mut self);
}

/// Wall-clock backed [`Clock`] for std targets (ESP-IDF included)
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    start: Instant,
}

impl StdClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn sleep_ms(&self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}
