// ESP-IDF implementations of the platform traits

pub mod dashboard;
pub mod nvs;
pub mod ota;
pub mod portal;
pub mod wifi;

use std::ffi::CString;

use anyhow::{anyhow, Result};
use log::info;

use crate::platform::{Clock, SystemControl};

pub use dashboard::DashboardServer;
pub use nvs::NvsCredentialStore;
pub use ota::HttpUpdater;
pub use portal::HttpProvisioningPortal;
pub use wifi::EspNetwork;

pub struct EspSystem;

/// Milliseconds since boot
#[derive(Debug, Clone, Copy, Default)]
pub struct EspClock;

impl Clock for EspClock {
    fn now_ms(&self) -> u64 {
        uptime_ms()
    }

    fn sleep_ms(&self, ms: u64) {
        esp_idf_hal::delay::FreeRtos::delay_ms(ms.min(u32::MAX as u64) as u32);
    }
}

impl SystemControl for EspSystem {
    fn restart(&mut self) {
        info!("Restarting...");
        unsafe {
            esp_idf_sys::esp_restart();
        }
    }
}

/// Mount the SPIFFS data partition holding the dashboard files
pub fn mount_filesystem(base_path: &str) -> Result<()> {
    let path = CString::new(base_path).map_err(|_| anyhow!("Invalid base path {}", base_path))?;
    let conf = esp_idf_sys::esp_vfs_spiffs_conf_t {
        base_path: path.as_ptr(),
        partition_label: std::ptr::null(),
        max_files: 5,
        format_if_mount_failed: false,
    };
    // The VFS copies the path, `path` only has to outlive the call
    esp_idf_sys::esp!(unsafe { esp_idf_sys::esp_vfs_spiffs_register(&conf) })
        .map_err(|e| anyhow!("SPIFFS mount at {} failed: {}", base_path, e))?;
    info!("Filesystem mounted at {}", base_path);
    Ok(())
}

/// Milliseconds since boot from the high resolution timer
pub fn uptime_ms() -> u64 {
    (unsafe { esp_idf_sys::esp_timer_get_time() } / 1000) as u64
}
