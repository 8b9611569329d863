//! Persisted line settings.
//!
//! The UART baud rate survives reboots in the settings store as a compact
//! postcard blob; `AT+RESET` wipes it back to defaults.

use serde::{Deserialize, Serialize};

use crate::ports::{SettingsKey, SettingsStore, StoreError};

/// Serialized ceiling for the settings blob.
const BLOB_MAX: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UartSettings {
    pub baud: u32,
}

impl Default for UartSettings {
    fn default() -> Self {
        Self { baud: 115_200 }
    }
}

impl UartSettings {
    /// Load from the store; a missing or corrupt blob yields the defaults
    /// (and first boot persists them so later reads succeed).
    pub fn load(store: &mut dyn SettingsStore) -> Self {
        let mut buf = [0u8; BLOB_MAX];
        match store.get(SettingsKey::Uart, &mut buf) {
            Ok(n) => match postcard::from_bytes(&buf[..n]) {
                Ok(settings) => settings,
                Err(_) => {
                    log::warn!("config: stored UART settings corrupt, using defaults");
                    Self::default()
                }
            },
            Err(StoreError::NotFound) => {
                let defaults = Self::default();
                if defaults.save(store).is_ok() {
                    let _ = store.commit();
                }
                defaults
            }
            Err(e) => {
                log::warn!("config: settings read failed ({e}), using defaults");
                Self::default()
            }
        }
    }

    /// Stage this value in the store; the caller commits.
    pub fn save(&self, store: &mut dyn SettingsStore) -> Result<(), StoreError> {
        let mut buf = [0u8; BLOB_MAX];
        let used = postcard::to_slice(self, &mut buf).map_err(|_| StoreError::IoError)?;
        store.put(SettingsKey::Uart, used)
    }
}
