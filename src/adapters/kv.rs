//! Settings-store adapters.
//!
//! ESP-IDF backend keeps the settings blob in NVS (one namespace, one
//! entry per [`SettingsKey`]); writes become durable on `commit`. The
//! simulation backend is a `HashMap` with a commit counter so tests can
//! assert persistence behavior.

use crate::ports::{SettingsKey, SettingsStore, StoreError};

fn key_name(key: SettingsKey) -> &'static str {
    match key {
        SettingsKey::Uart => "uart",
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation backend
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
pub struct MemStore {
    entries: std::collections::HashMap<&'static str, Vec<u8>>,
    commits: u32,
}

#[cfg(not(target_os = "espidf"))]
impl MemStore {
    pub fn new() -> Self {
        Self {
            entries: std::collections::HashMap::new(),
            commits: 0,
        }
    }

    pub fn commits(&self) -> u32 {
        self.commits
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_os = "espidf"))]
impl SettingsStore for MemStore {
    fn get(&self, key: SettingsKey, buf: &mut [u8]) -> Result<usize, StoreError> {
        let data = self.entries.get(key_name(key)).ok_or(StoreError::NotFound)?;
        if data.len() > buf.len() {
            return Err(StoreError::IoError);
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn put(&mut self, key: SettingsKey, data: &[u8]) -> Result<(), StoreError> {
        self.entries.insert(key_name(key), data.to_vec());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.commits += 1;
        Ok(())
    }

    fn remove_all(&mut self) -> Result<(), StoreError> {
        self.entries.clear();
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF backend (NVS)
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub struct NvsStore {
    nvs: esp_idf_svc::nvs::EspNvs<esp_idf_svc::nvs::NvsDefault>,
}

#[cfg(target_os = "espidf")]
impl NvsStore {
    const NAMESPACE: &'static str = "blebridge";

    pub fn new() -> Result<Self, StoreError> {
        let partition = esp_idf_svc::nvs::EspDefaultNvsPartition::take()
            .map_err(|_| StoreError::IoError)?;
        let nvs = esp_idf_svc::nvs::EspNvs::new(partition, Self::NAMESPACE, true)
            .map_err(|_| StoreError::IoError)?;
        Ok(Self { nvs })
    }
}

#[cfg(target_os = "espidf")]
impl SettingsStore for NvsStore {
    fn get(&self, key: SettingsKey, buf: &mut [u8]) -> Result<usize, StoreError> {
        match self.nvs.get_blob(key_name(key), buf) {
            Ok(Some(data)) => Ok(data.len()),
            Ok(None) => Err(StoreError::NotFound),
            Err(_) => Err(StoreError::IoError),
        }
    }

    fn put(&mut self, key: SettingsKey, data: &[u8]) -> Result<(), StoreError> {
        self.nvs
            .set_blob(key_name(key), data)
            .map_err(|_| StoreError::IoError)
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        // EspNvs commits on every set; nothing further to flush.
        Ok(())
    }

    fn remove_all(&mut self) -> Result<(), StoreError> {
        self.nvs
            .remove(key_name(SettingsKey::Uart))
            .map(|_| ())
            .map_err(|_| StoreError::IoError)
    }
}
