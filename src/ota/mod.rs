// OTA (Over-The-Air) update handling
//
// The platform updater owns the transfer; this module only observes it.
// Update flow as seen from the loop:
// 1. Updater accepts a push from the network
// 2. Start / progress / end or error events are queued
// 3. `OtaHandler::poll` drains them into the lifecycle log

pub mod lifecycle;

use anyhow::Result;
use log::error;

pub use lifecycle::{
    progress_percent, ImageDigest, OtaErrorKind, OtaLifecycle, OtaPhase, OtaSession,
    UpdateEvent, UpdateKind, UpdateObserver,
};

/// Platform side of the update channel
pub trait Updater {
    /// Start accepting updates, advertised under `hostname`
    fn begin(&mut self, hostname: &str) -> Result<()>;
    /// Hand any pending lifecycle events to `observer`; never blocks
    fn poll(&mut self, observer: &mut dyn UpdateObserver);
}

pub struct OtaHandler {
    lifecycle: OtaLifecycle,
    updater: Box<dyn Updater>,
    started: bool,
}

impl OtaHandler {
    pub fn new(updater: Box<dyn Updater>) -> Self {
        Self {
            lifecycle: OtaLifecycle::new(),
            updater,
            started: false,
        }
    }

    /// A failed start leaves the node running without an update channel
    pub fn begin(&mut self, hostname: &str) -> bool {
        match self.updater.begin(hostname) {
            Ok(()) => {
                self.started = true;
                true
            }
            Err(e) => {
                error!("OTA updater failed to start: {:#}", e);
                false
            }
        }
    }

    pub fn poll(&mut self) {
        if self.started {
            self.updater.poll(&mut self.lifecycle);
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn session(&self) -> &OtaSession {
        self.lifecycle.session()
    }
}
