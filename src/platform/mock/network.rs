use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};

use super::lock;
use crate::network::credentials::Credentials;
use crate::platform::{Clock, NetworkStack};

#[derive(Debug, Clone, PartialEq, Eq)]
enum LinkBehavior {
    /// Link comes up this many ms after `join`
    After(u64),
    Never,
    /// Link comes up immediately, but only for this SSID
    OnlyWith(String),
}

#[derive(Debug)]
struct NetworkState {
    behavior: LinkBehavior,
    ap_fails: bool,
    ap_active: bool,
    ap_starts: usize,
    joins: Vec<Credentials>,
    first_join_at_ms: Option<u64>,
    joined: Option<(String, u64)>,
    link_checks: usize,
    time_syncs: Vec<String>,
}

/// Radio stack whose link comes up according to a scripted behaviour
#[derive(Clone)]
pub struct MockNetwork {
    clock: Arc<dyn Clock + Send + Sync>,
    state: Arc<Mutex<NetworkState>>,
}

impl MockNetwork {
    pub const AP_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);
    pub const STATION_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);

    pub fn new(clock: impl Clock + Send + Sync + 'static) -> Self {
        Self {
            clock: Arc::new(clock),
            state: Arc::new(Mutex::new(NetworkState {
                behavior: LinkBehavior::After(0),
                ap_fails: false,
                ap_active: false,
                ap_starts: 0,
                joins: Vec::new(),
                first_join_at_ms: None,
                joined: None,
                link_checks: 0,
                time_syncs: Vec::new(),
            })),
        }
    }

    pub fn connect_after_ms(&self, delay_ms: u64) {
        lock(&self.state).behavior = LinkBehavior::After(delay_ms);
    }

    pub fn never_connects(&self) {
        lock(&self.state).behavior = LinkBehavior::Never;
    }

    pub fn connect_only_with(&self, ssid: &str) {
        lock(&self.state).behavior = LinkBehavior::OnlyWith(ssid.to_string());
    }

    pub fn fail_access_point(&self) {
        lock(&self.state).ap_fails = true;
    }

    pub fn ap_starts(&self) -> usize {
        lock(&self.state).ap_starts
    }

    pub fn ap_active(&self) -> bool {
        lock(&self.state).ap_active
    }

    pub fn joins(&self) -> Vec<Credentials> {
        lock(&self.state).joins.clone()
    }

    pub fn first_join_at_ms(&self) -> Option<u64> {
        lock(&self.state).first_join_at_ms
    }

    pub fn link_checks(&self) -> usize {
        lock(&self.state).link_checks
    }

    pub fn time_syncs(&self) -> Vec<String> {
        lock(&self.state).time_syncs.clone()
    }

    fn link_up(&self, state: &NetworkState) -> bool {
        let Some((ssid, joined_at)) = &state.joined else {
            return false;
        };
        match &state.behavior {
            LinkBehavior::After(delay) => self.clock.now_ms() >= joined_at + delay,
            LinkBehavior::Never => false,
            LinkBehavior::OnlyWith(wanted) => wanted == ssid,
        }
    }
}

impl NetworkStack for MockNetwork {
    fn start_access_point(&mut self, ssid: &str) -> Result<Ipv4Addr> {
        let mut state = lock(&self.state);
        if state.ap_fails {
            bail!("access point '{}' could not be started", ssid);
        }
        state.ap_active = true;
        state.ap_starts += 1;
        Ok(Self::AP_ADDRESS)
    }

    fn stop_access_point(&mut self) -> Result<()> {
        lock(&self.state).ap_active = false;
        Ok(())
    }

    fn join(&mut self, credentials: &Credentials) -> Result<()> {
        let now = self.clock.now_ms();
        let mut state = lock(&self.state);
        state.joins.push(credentials.clone());
        state.first_join_at_ms.get_or_insert(now);
        state.joined = Some((credentials.ssid.clone(), now));
        Ok(())
    }

    fn is_link_up(&self) -> bool {
        let mut state = lock(&self.state);
        state.link_checks += 1;
        self.link_up(&state)
    }

    fn local_address(&self) -> Option<Ipv4Addr> {
        let state = lock(&self.state);
        self.link_up(&state).then_some(Self::STATION_ADDRESS)
    }

    fn sync_time(&mut self, timezone: &str) -> Result<()> {
        lock(&self.state).time_syncs.push(timezone.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::SimClock;

    #[test]
    fn test_link_follows_delay() {
        let clock = SimClock::new();
        let mut network = MockNetwork::new(clock.clone());
        network.connect_after_ms(250);
        assert!(!network.is_link_up());

        network.join(&Credentials::new("home", "secret")).unwrap();
        clock.advance(200);
        assert!(!network.is_link_up());
        assert_eq!(network.local_address(), None);

        clock.advance(50);
        assert!(network.is_link_up());
        assert_eq!(network.local_address(), Some(MockNetwork::STATION_ADDRESS));
        assert_eq!(network.link_checks(), 3);
    }

    #[test]
    fn test_only_with_matching_ssid() {
        let mut network = MockNetwork::new(SimClock::new());
        network.connect_only_with("good");
        network.join(&Credentials::new("bad", "")).unwrap();
        assert!(!network.is_link_up());
        network.join(&Credentials::new("good", "")).unwrap();
        assert!(network.is_link_up());
    }
}
