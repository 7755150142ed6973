use std::net::Ipv4Addr;

use anyhow::{anyhow, Result};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    nvs::EspDefaultNvsPartition,
    sntp::EspSntp,
    wifi::{AccessPointConfiguration, AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi},
};

use crate::network::credentials::Credentials;
use crate::platform::NetworkStack;

pub struct EspNetwork {
    wifi: BlockingWifi<EspWifi<'static>>,
    sntp: Option<EspSntp<'static>>,
}

impl EspNetwork {
    pub fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
    ) -> Result<Self> {
        let esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs))?;
        let wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;
        Ok(Self { wifi, sntp: None })
    }

    fn stop_if_started(&mut self) -> Result<()> {
        if self.wifi.is_started()? {
            self.wifi.stop()?;
        }
        Ok(())
    }
}

impl NetworkStack for EspNetwork {
    fn start_access_point(&mut self, ssid: &str) -> Result<Ipv4Addr> {
        self.stop_if_started()?;
        self.wifi
            .set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
                ssid: ssid
                    .try_into()
                    .map_err(|_| anyhow!("Access point SSID '{}' too long", ssid))?,
                // Open network, the form is the only protection
                auth_method: AuthMethod::None,
                channel: 1,
                ..Default::default()
            }))?;
        self.wifi.start()?;
        self.wifi.wait_netif_up()?;
        let ip = self.wifi.wifi().ap_netif().get_ip_info()?.ip;
        Ok(ip)
    }

    fn stop_access_point(&mut self) -> Result<()> {
        self.stop_if_started()
    }

    fn join(&mut self, credentials: &Credentials) -> Result<()> {
        self.stop_if_started()?;
        let auth_method = if credentials.password.is_empty() {
            log::warn!("WiFi password is empty, using open network");
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: credentials
                    .ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow!("Invalid SSID format: {}", credentials.ssid))?,
                password: credentials
                    .password
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow!("Invalid password format"))?,
                auth_method,
                ..Default::default()
            }))?;
        self.wifi.start()?;
        // Non-blocking: the connection manager polls for the link
        self.wifi.wifi_mut().connect()?;

        // Power save drops the link under web server load
        unsafe {
            use esp_idf_sys::*;
            let result = esp_wifi_set_ps(wifi_ps_type_t_WIFI_PS_NONE);
            if result != ESP_OK {
                log::warn!("Failed to set WiFi power save mode: {:?}", result);
            }
        }
        Ok(())
    }

    fn is_link_up(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
            && self.wifi.wifi().sta_netif().is_up().unwrap_or(false)
    }

    fn local_address(&self) -> Option<Ipv4Addr> {
        self.wifi
            .wifi()
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip)
            .filter(|ip| !ip.is_unspecified())
    }

    fn sync_time(&mut self, timezone: &str) -> Result<()> {
        std::env::set_var("TZ", timezone);
        unsafe {
            esp_idf_sys::tzset();
        }
        if self.sntp.is_none() {
            self.sntp = Some(EspSntp::new_default()?);
            log::info!("SNTP started");
        }
        Ok(())
    }
}
