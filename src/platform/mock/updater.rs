use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};

use super::lock;
use crate::ota::{UpdateEvent, UpdateObserver, Updater};

#[derive(Debug, Default)]
struct UpdaterState {
    hostname: Option<String>,
    fail_begin: bool,
    queue: VecDeque<UpdateEvent>,
    polls: usize,
}

/// Updater whose lifecycle events are pushed by the test
#[derive(Debug, Clone, Default)]
pub struct MockUpdater {
    state: Arc<Mutex<UpdaterState>>,
}

impl MockUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_begin(&self) {
        lock(&self.state).fail_begin = true;
    }

    pub fn push(&self, event: UpdateEvent) {
        lock(&self.state).queue.push_back(event);
    }

    pub fn hostname(&self) -> Option<String> {
        lock(&self.state).hostname.clone()
    }

    pub fn polls(&self) -> usize {
        lock(&self.state).polls
    }
}

impl Updater for MockUpdater {
    fn begin(&mut self, hostname: &str) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_begin {
            bail!("update service refused to start");
        }
        state.hostname = Some(hostname.to_string());
        Ok(())
    }

    fn poll(&mut self, observer: &mut dyn UpdateObserver) {
        let events: Vec<UpdateEvent> = {
            let mut state = lock(&self.state);
            state.polls += 1;
            state.queue.drain(..).collect()
        };
        for event in &events {
            event.dispatch(observer);
        }
    }
}
