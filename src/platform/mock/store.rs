use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::lock;
use crate::error::StoreError;
use crate::platform::CredentialStore;

#[derive(Debug, Default)]
struct StoreState {
    values: BTreeMap<String, String>,
    fail_reads: bool,
    fail_writes: bool,
    clears: usize,
}

/// Key-value store held in memory, with injectable failures
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        lock(&self.state).fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }

    pub fn clear_count(&self) -> usize {
        lock(&self.state).clears
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.state).values.keys().cloned().collect()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let state = lock(&self.state);
        if state.fail_reads {
            return Err(StoreError::Read {
                key: key.to_string(),
                reason: "injected read failure".to_string(),
            });
        }
        Ok(state.values.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        if state.fail_writes {
            return Err(StoreError::Write {
                key: key.to_string(),
                reason: "injected write failure".to_string(),
            });
        }
        state.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        if state.fail_writes {
            return Err(StoreError::Clear("injected clear failure".to_string()));
        }
        state.values.clear();
        state.clears += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_values() {
        let mut store = MemoryStore::new();
        let view = store.clone();
        store.put("ssid", "home").unwrap();
        assert_eq!(view.get("ssid").unwrap().as_deref(), Some("home"));

        store.clear().unwrap();
        assert!(view.keys().is_empty());
        assert_eq!(view.clear_count(), 1);
    }

    #[test]
    fn test_injected_failures() {
        let mut store = MemoryStore::new();
        store.fail_reads(true);
        assert!(matches!(store.get("ssid"), Err(StoreError::Read { .. })));

        store.fail_writes(true);
        assert!(store.put("ssid", "x").is_err());
        assert!(store.clear().is_err());
    }
}
