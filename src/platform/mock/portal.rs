use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use log::warn;

use super::lock;
use crate::network::credentials::{self, Credentials};
use crate::platform::ProvisioningPortal;

#[derive(Debug, Clone)]
enum Submission {
    Credentials(Credentials),
    /// Raw `POST /connect` body, parsed like the real handler does
    Form(String),
}

#[derive(Debug, Default)]
struct PortalState {
    open: bool,
    address: Option<Ipv4Addr>,
    opens: usize,
    closes: usize,
    polls: usize,
    pending: Option<(usize, Submission)>,
    last_response: Option<String>,
}

/// Provisioning form that "receives" a submission after a number of polls
#[derive(Debug, Clone, Default)]
pub struct MockPortal {
    state: Arc<Mutex<PortalState>>,
}

impl MockPortal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out `credentials` on the poll after `polls` empty ones
    pub fn submit_after(&self, polls: usize, credentials: Credentials) {
        lock(&self.state).pending = Some((polls, Submission::Credentials(credentials)));
    }

    /// Like [`submit_after`](Self::submit_after) with a form-encoded body
    pub fn post_after(&self, polls: usize, body: &str) {
        lock(&self.state).pending = Some((polls, Submission::Form(body.to_string())));
    }

    pub fn open_count(&self) -> usize {
        lock(&self.state).opens
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    pub fn is_closed(&self) -> bool {
        let state = lock(&self.state);
        !state.open && state.closes > 0
    }

    /// Text the HTTP handler would have replied with
    pub fn last_response(&self) -> Option<String> {
        lock(&self.state).last_response.clone()
    }
}

impl ProvisioningPortal for MockPortal {
    fn open(&mut self, device_address: Ipv4Addr) -> Result<()> {
        let mut state = lock(&self.state);
        state.open = true;
        state.address = Some(device_address);
        state.opens += 1;
        state.polls = 0;
        Ok(())
    }

    fn take_submission(&mut self) -> Option<Credentials> {
        let mut state = lock(&self.state);
        if !state.open {
            return None;
        }
        let polls = state.polls;
        state.polls += 1;

        match &state.pending {
            Some((after, _)) if polls >= *after => {}
            _ => return None,
        }
        let (_, submission) = state.pending.take()?;
        let address = state.address.unwrap_or(Ipv4Addr::UNSPECIFIED);

        match submission {
            Submission::Credentials(creds) => {
                state.last_response = Some(credentials::connect_response(address));
                Some(creds)
            }
            Submission::Form(body) => match credentials::parse_connect_form(&body) {
                Ok(creds) => {
                    state.last_response = Some(credentials::connect_response(address));
                    Some(creds)
                }
                Err(e) => {
                    warn!("Rejected provisioning form: {}", e);
                    state.last_response = Some(format!("Error: {}", e));
                    None
                }
            },
        }
    }

    fn close(&mut self) {
        let mut state = lock(&self.state);
        state.open = false;
        state.closes += 1;
    }
}
