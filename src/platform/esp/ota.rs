// Push updates over HTTP: `POST /update` with the raw image as the body

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use embedded_svc::http::Headers;
use esp_idf_svc::http::server::{Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer, Request};
use esp_idf_svc::http::server::Method;
use esp_idf_svc::io::{Read, Write};
use esp_idf_svc::mdns::EspMdns;
use esp_idf_svc::ota::EspOta;

use crate::ota::{progress_percent, ImageDigest, OtaErrorKind, UpdateEvent, UpdateKind, UpdateObserver, Updater};

const CTRL_PORT: u16 = 32769;
const CHUNK_SIZE: usize = 4096;
const RESTART_DELAY: Duration = Duration::from_millis(1000);

pub struct HttpUpdater {
    port: u16,
    password: Option<String>,
    server: Option<EspHttpServer<'static>>,
    mdns: Option<EspMdns>,
    events_tx: Sender<UpdateEvent>,
    events_rx: Receiver<UpdateEvent>,
}

impl HttpUpdater {
    pub fn new(port: u16, password: Option<String>) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            port,
            password,
            server: None,
            mdns: None,
            events_tx,
            events_rx,
        }
    }

    fn start_mdns(&mut self, hostname: &str) -> Result<()> {
        let mut mdns = EspMdns::take()?;
        mdns.set_hostname(hostname)?;
        mdns.add_service(None, "_http", "_tcp", 80, &[("path", "/")])?;
        mdns.add_service(None, "_node-ota", "_tcp", self.port, &[("path", "/update")])?;
        self.mdns = Some(mdns);
        Ok(())
    }
}

impl Updater for HttpUpdater {
    fn begin(&mut self, hostname: &str) -> Result<()> {
        let conf = HttpConfiguration {
            http_port: self.port,
            ctrl_port: CTRL_PORT,
            stack_size: 8 * 1024,
            ..Default::default()
        };
        let mut server = EspHttpServer::new(&conf)?;

        let events = self.events_tx.clone();
        let password = self.password.clone();
        server.fn_handler::<anyhow::Error, _>("/update", Method::Post, move |mut req| {
            let kind = UpdateKind::from_header(req.header("X-Update-Kind"));

            if let Some(expected) = password.as_deref() {
                if req.header("X-Update-Password") != Some(expected) {
                    let _ = events.send(UpdateEvent::Error(OtaErrorKind::Auth));
                    req.into_status_response(401)?.write_all(b"Auth Failed")?;
                    return Ok(());
                }
            }

            let total = req.content_len().unwrap_or(0);
            if total == 0 {
                let _ = events.send(UpdateEvent::Error(OtaErrorKind::Connect));
                req.into_status_response(400)?.write_all(b"Connect Failed")?;
                return Ok(());
            }

            let _ = events.send(UpdateEvent::Start(kind));
            let outcome = match kind {
                UpdateKind::Firmware => receive_firmware(&mut req, total, &events),
                UpdateKind::Filesystem => receive_filesystem(&mut req, total, &events),
            };

            match outcome {
                Ok(sha256) => {
                    let _ = events.send(UpdateEvent::End { sha256: Some(sha256) });
                    req.into_ok_response()?.write_all(b"OK")?;
                    thread::Builder::new()
                        .name("ota-restart".into())
                        .stack_size(4096)
                        .spawn(|| {
                            thread::sleep(RESTART_DELAY);
                            unsafe { esp_idf_sys::esp_restart() };
                        })?;
                }
                Err(kind) => {
                    let _ = events.send(UpdateEvent::Error(kind));
                    req.into_status_response(500)?.write_all(kind.to_string().as_bytes())?;
                }
            }
            Ok(())
        })?;
        self.server = Some(server);
        log::info!("OTA server listening on port {}", self.port);

        if let Err(e) = self.start_mdns(hostname) {
            log::warn!("Failed to start mDNS: {:?}", e);
        } else {
            log::info!("mDNS service started: {}.local", hostname);
        }
        Ok(())
    }

    fn poll(&mut self, observer: &mut dyn UpdateObserver) {
        while let Ok(event) = self.events_rx.try_recv() {
            event.dispatch(observer);
        }
    }
}

type Connection<'r, 'c> = Request<&'r mut EspHttpConnection<'c>>;

fn receive_firmware(
    req: &mut Connection<'_, '_>,
    total: u64,
    events: &Sender<UpdateEvent>,
) -> Result<String, OtaErrorKind> {
    let mut ota = EspOta::new().map_err(|_| OtaErrorKind::Begin)?;
    let mut update = ota.initiate_update().map_err(|_| OtaErrorKind::Begin)?;

    let streamed = stream_body(req, total, events, |chunk| {
        update
            .write(chunk)
            .map(|_| ())
            .map_err(|e| anyhow!("failed writing OTA data: {:?}", e))
    });
    let sha256 = match streamed {
        Ok(sha256) => sha256,
        Err(kind) => {
            let _ = update.abort();
            return Err(kind);
        }
    };
    update.complete().map_err(|_| OtaErrorKind::End)?;
    Ok(sha256)
}

fn receive_filesystem(
    req: &mut Connection<'_, '_>,
    total: u64,
    events: &Sender<UpdateEvent>,
) -> Result<String, OtaErrorKind> {
    use esp_idf_sys::*;

    let partition = unsafe {
        esp_partition_find_first(
            esp_partition_type_t_ESP_PARTITION_TYPE_DATA,
            esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_DATA_SPIFFS,
            std::ptr::null(),
        )
    };
    if partition.is_null() {
        return Err(OtaErrorKind::Begin);
    }
    let size = unsafe { (*partition).size };
    if total > size as u64 {
        return Err(OtaErrorKind::Begin);
    }
    esp!(unsafe { esp_partition_erase_range(partition, 0, size as _) }).map_err(|_| OtaErrorKind::Begin)?;

    let mut offset = 0usize;
    stream_body(req, total, events, |chunk| {
        esp!(unsafe { esp_partition_write(partition, offset, chunk.as_ptr().cast(), chunk.len()) })
            .map_err(|e| anyhow!("partition write at {} failed: {}", offset, e))?;
        offset += chunk.len();
        Ok(())
    })
}

/// Copy the request body into `write`, reporting progress once per percent
fn stream_body<R: Read>(
    body: &mut R,
    total: u64,
    events: &Sender<UpdateEvent>,
    mut write: impl FnMut(&[u8]) -> Result<()>,
) -> Result<String, OtaErrorKind> {
    let mut digest = ImageDigest::new();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut last_percent = None;

    loop {
        let read = body.read(&mut chunk).map_err(|_| OtaErrorKind::Receive)?;
        if read == 0 {
            break;
        }
        if let Err(e) = write(&chunk[..read]) {
            log::error!("{:#}", e);
            return Err(OtaErrorKind::Receive);
        }
        digest.update(&chunk[..read]);

        let percent = progress_percent(digest.len(), total);
        if percent != last_percent {
            last_percent = percent;
            let _ = events.send(UpdateEvent::Progress {
                done: digest.len(),
                total,
            });
        }
    }

    if digest.len() != total {
        return Err(OtaErrorKind::Receive);
    }
    Ok(digest.finalize_hex())
}
