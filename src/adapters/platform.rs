//! Platform-port adapters (reset / shutdown / power saving).

use crate::ports::PlatformPort;

// ───────────────────────────────────────────────────────────────
// Simulation backend
// ───────────────────────────────────────────────────────────────

/// Records platform requests so tests can observe them.
#[cfg(not(target_os = "espidf"))]
pub struct SimPlatform {
    pub resets: core::cell::Cell<u32>,
    pub shutdowns: core::cell::Cell<u32>,
    pub power_saving: core::cell::Cell<Option<bool>>,
}

#[cfg(not(target_os = "espidf"))]
impl SimPlatform {
    pub fn new() -> Self {
        Self {
            resets: core::cell::Cell::new(0),
            shutdowns: core::cell::Cell::new(0),
            power_saving: core::cell::Cell::new(None),
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_os = "espidf"))]
impl PlatformPort for SimPlatform {
    fn reset(&self) {
        self.resets.set(self.resets.get() + 1);
    }

    fn shutdown(&self) {
        self.shutdowns.set(self.shutdowns.get() + 1);
    }

    fn set_power_saving(&self, enable: bool) {
        self.power_saving.set(Some(enable));
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF backend
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub struct EspPlatform;

#[cfg(target_os = "espidf")]
impl PlatformPort for EspPlatform {
    fn reset(&self) {
        unsafe { esp_idf_sys::esp_restart() }
    }

    fn shutdown(&self) {
        // Deep sleep with no wake timer — woken only by the external pin
        // configured at board bring-up.
        unsafe { esp_idf_sys::esp_deep_sleep_start() }
    }

    fn set_power_saving(&self, enable: bool) {
        let mode = if enable {
            esp_idf_sys::esp_sleep_pd_option_t_ESP_PD_OPTION_AUTO
        } else {
            esp_idf_sys::esp_sleep_pd_option_t_ESP_PD_OPTION_ON
        };
        unsafe {
            esp_idf_sys::esp_sleep_pd_config(
                esp_idf_sys::esp_sleep_pd_domain_t_ESP_PD_DOMAIN_XTAL,
                mode,
            );
        }
    }
}
