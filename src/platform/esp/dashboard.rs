use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use anyhow::Result;
use esp_idf_svc::http::server::{Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer, Request};
use esp_idf_svc::http::server::Method;
use esp_idf_svc::io::Write;

use crate::network::compression::{content_type_for, gzip_compress, should_compress};
use crate::network::dashboard::{SseHub, MAX_SSE_CONNECTIONS};
use crate::sensors::readings::{self, SharedReadings};

const MAX_STREAM_DURATION: Duration = Duration::from_secs(300);

/// Static files, `/readings` and the `/events` stream
pub struct DashboardServer {
    _server: EspHttpServer<'static>,
}

impl DashboardServer {
    pub fn start(base_path: &str, readings: SharedReadings, hub: SseHub) -> Result<Self> {
        let conf = HttpConfiguration {
            stack_size: 10 * 1024,
            uri_match_wildcard: true,
            ..Default::default()
        };
        let mut server = EspHttpServer::new(&conf)?;
        let root = PathBuf::from(base_path);

        {
            let root = root.clone();
            server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
                serve_file(req, &root.join("index.html"))
            })?;
        }

        server.fn_handler::<anyhow::Error, _>("/readings", Method::Get, move |req| {
            let json = readings::snapshot_json(&readings);
            req.into_response(200, Some("OK"), &[("Content-Type", "application/json")])?
                .write_all(json.as_bytes())?;
            Ok(())
        })?;

        server.fn_handler::<anyhow::Error, _>("/events", Method::Get, move |req| {
            if let Some(last_id) = req.header("Last-Event-ID") {
                log::debug!("Client reconnected! Last message ID that it got is: {}", last_id);
            }
            let Some(rx) = hub.connect() else {
                log::warn!("SSE connection limit reached ({} connections)", MAX_SSE_CONNECTIONS);
                req.into_status_response(503)?
                    .write_all(b"Too many connections")?;
                return Ok(());
            };

            let headers = [
                ("Content-Type", "text/event-stream"),
                ("Cache-Control", "no-cache"),
                ("Connection", "keep-alive"),
            ];
            let mut response = req.into_response(200, Some("OK"), &headers)?;

            let started = Instant::now();
            while started.elapsed() < MAX_STREAM_DURATION {
                match rx.recv_timeout(Duration::from_secs(5)) {
                    Ok(frame) => {
                        if response.write_all(frame.as_bytes()).is_err() || response.flush().is_err() {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            log::info!("SSE client disconnected");
            Ok(())
        })?;

        server.fn_handler::<anyhow::Error, _>("/*", Method::Get, move |req| {
            let uri = req.uri().split('?').next().unwrap_or("/").to_string();
            if uri.contains("..") {
                req.into_status_response(400)?.write_all(b"Bad path")?;
                return Ok(());
            }
            serve_file(req, &root.join(uri.trim_start_matches('/')))
        })?;

        log::info!("Dashboard server started, serving {}", base_path);
        Ok(Self { _server: server })
    }
}

fn serve_file(req: Request<&mut EspHttpConnection<'_>>, path: &Path) -> Result<()> {
    let content = match std::fs::read(path) {
        Ok(content) => content,
        Err(_) => {
            req.into_status_response(404)?.write_all(b"Not found")?;
            return Ok(());
        }
    };
    let content_type = content_type_for(&path.to_string_lossy());

    if should_compress(req.header("Accept-Encoding"), content.len()) {
        match gzip_compress(&content) {
            Ok(compressed) => {
                log::debug!("Compressed {} bytes to {} bytes", content.len(), compressed.len());
                req.into_response(
                    200,
                    Some("OK"),
                    &[
                        ("Content-Type", content_type),
                        ("Content-Encoding", "gzip"),
                        ("Vary", "Accept-Encoding"),
                    ],
                )?
                .write_all(&compressed)?;
                return Ok(());
            }
            Err(e) => log::warn!("Compression failed: {}", e),
        }
    }

    req.into_response(200, Some("OK"), &[("Content-Type", content_type)])?
        .write_all(&content)?;
    Ok(())
}
