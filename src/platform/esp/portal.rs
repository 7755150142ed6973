use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use embedded_svc::http::Headers;
use esp_idf_svc::http::server::{Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer, Request};
use esp_idf_svc::http::server::Method;
use esp_idf_svc::io::{Read, Write};

use crate::network::credentials::{self, Credentials, PROVISIONING_FORM_HTML};
use crate::platform::ProvisioningPortal;

const MAX_FORM_BODY: usize = 512;

/// `GET /` form and `POST /connect` on the provisioning access point
#[derive(Default)]
pub struct HttpProvisioningPortal {
    server: Option<EspHttpServer<'static>>,
    submission: Arc<Mutex<Option<Credentials>>>,
}

impl HttpProvisioningPortal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProvisioningPortal for HttpProvisioningPortal {
    fn open(&mut self, device_address: Ipv4Addr) -> Result<()> {
        let conf = HttpConfiguration {
            stack_size: 10 * 1024,
            ..Default::default()
        };
        let mut server = EspHttpServer::new(&conf)?;

        server.fn_handler::<anyhow::Error, _>("/", Method::Get, |req| {
            req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
                .write_all(PROVISIONING_FORM_HTML.as_bytes())?;
            Ok(())
        })?;

        let submission = self.submission.clone();
        server.fn_handler::<anyhow::Error, _>("/connect", Method::Post, move |mut req| {
            let body = read_request_body(&mut req)?;
            let parsed = std::str::from_utf8(&body)
                .map_err(|_| anyhow!("Form body is not valid UTF-8"))
                .and_then(credentials::parse_connect_form);

            match parsed {
                Ok(creds) => {
                    log::info!("Provisioning form submitted for SSID '{}'", creds.ssid);
                    let reply = credentials::connect_response(device_address);
                    req.into_response(200, Some("OK"), &[("Content-Type", "text/plain")])?
                        .write_all(reply.as_bytes())?;
                    if let Ok(mut slot) = submission.lock() {
                        *slot = Some(creds);
                    }
                }
                Err(e) => {
                    log::warn!("Rejected provisioning form: {}", e);
                    req.into_response(400, Some("Bad Request"), &[("Content-Type", "text/plain")])?
                        .write_all(format!("Error: {}", e).as_bytes())?;
                }
            }
            Ok(())
        })?;

        self.server = Some(server);
        Ok(())
    }

    fn take_submission(&mut self) -> Option<Credentials> {
        self.submission.lock().ok()?.take()
    }

    fn close(&mut self) {
        // Dropping the server stops it
        self.server = None;
    }
}

fn read_request_body(req: &mut Request<&mut EspHttpConnection<'_>>) -> Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_FORM_BODY {
        return Err(anyhow!("request body too large"));
    }
    let mut body = vec![0u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}
