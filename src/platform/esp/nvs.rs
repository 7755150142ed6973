use std::ffi::CString;

use anyhow::{anyhow, Result};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs};

use crate::config::{NodeConfig, CONFIG_KEY, CONFIG_NAMESPACE, MAX_CONFIG_LEN};
use crate::error::StoreError;
use crate::platform::CredentialStore;

const MAX_VALUE_LEN: usize = 128;

/// Credential store on one NVS namespace
///
/// The namespace handle is opened and dropped inside every call.
pub struct NvsCredentialStore {
    partition: EspDefaultNvsPartition,
    namespace: String,
}

impl NvsCredentialStore {
    pub fn new(partition: EspDefaultNvsPartition, namespace: &str) -> Self {
        Self {
            partition,
            namespace: namespace.to_string(),
        }
    }

    fn open(&self) -> Result<EspNvs<esp_idf_svc::nvs::NvsDefault>, StoreError> {
        EspNvs::new(self.partition.clone(), &self.namespace, true)
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", self.namespace, e)))
    }
}

impl CredentialStore for NvsCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let nvs = self.open()?;
        let mut buf = [0u8; MAX_VALUE_LEN];
        let value = nvs.get_str(key, &mut buf).map_err(|e| StoreError::Read {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(value.map(str::to_string))
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut nvs = self.open()?;
        nvs.set_str(key, value).map_err(|e| StoreError::Write {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        // EspNvs has no erase-all, go through the C API
        let namespace =
            CString::new(self.namespace.as_str()).map_err(|_| StoreError::Clear(self.namespace.clone()))?;
        let mut handle: esp_idf_sys::nvs_handle_t = 0;
        unsafe {
            esp_idf_sys::esp!(esp_idf_sys::nvs_open(
                namespace.as_ptr(),
                esp_idf_sys::nvs_open_mode_t_NVS_READWRITE,
                &mut handle,
            ))
            .map_err(|e| StoreError::Clear(format!("{}: {}", self.namespace, e)))?;

            let erased = esp_idf_sys::esp!(esp_idf_sys::nvs_erase_all(handle))
                .and_then(|_| esp_idf_sys::esp!(esp_idf_sys::nvs_commit(handle)));
            esp_idf_sys::nvs_close(handle);
            erased.map_err(|e| StoreError::Clear(format!("{}: {}", self.namespace, e)))
        }
    }
}

/// Load the node configuration blob, writing the defaults back when absent or invalid
pub fn load_or_default(partition: &EspDefaultNvsPartition) -> NodeConfig {
    match load_config(partition) {
        Ok(config) => {
            log::info!("Loaded configuration from NVS");
            config
        }
        Err(e) => {
            log::warn!("Failed to load config from NVS: {:#}, using defaults", e);
            let config = NodeConfig::default();
            if let Err(save_err) = save_config(partition, &config) {
                log::warn!("Failed to save default config to NVS: {:#}", save_err);
            }
            config
        }
    }
}

fn load_config(partition: &EspDefaultNvsPartition) -> Result<NodeConfig> {
    let nvs = EspNvs::new(partition.clone(), CONFIG_NAMESPACE, true)?;
    let mut buf = vec![0u8; MAX_CONFIG_LEN];
    let data = nvs
        .get_blob(CONFIG_KEY, &mut buf)?
        .ok_or_else(|| anyhow!("Config not found in NVS"))?;
    NodeConfig::from_json(data)
}

pub fn save_config(partition: &EspDefaultNvsPartition, config: &NodeConfig) -> Result<()> {
    let mut nvs = EspNvs::new(partition.clone(), CONFIG_NAMESPACE, true)?;
    nvs.set_blob(CONFIG_KEY, &config.to_json()?)?;
    log::info!("Configuration saved to NVS");
    Ok(())
}
