//! Connection-initiation timer adapters.
//!
//! On expiry the timer posts `StackOp::CancelInitiate` through the
//! bridge; it never touches the stack directly.

use crate::ports::ConnTimer;

// ───────────────────────────────────────────────────────────────
// Simulation backend
// ───────────────────────────────────────────────────────────────

/// Records the armed state; tests fire it by posting the cancel op
/// themselves.
#[cfg(not(target_os = "espidf"))]
pub struct SimTimer {
    pub armed: Option<u16>,
}

#[cfg(not(target_os = "espidf"))]
impl SimTimer {
    pub fn new() -> Self {
        Self { armed: None }
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for SimTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_os = "espidf"))]
impl ConnTimer for SimTimer {
    fn arm(&mut self, timeout_secs: u16) {
        self.armed = Some(timeout_secs);
    }

    fn disarm(&mut self) {
        self.armed = None;
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF backend
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub struct EspConnTimer {
    timer: esp_idf_svc::timer::EspTimer<'static>,
}

#[cfg(target_os = "espidf")]
impl EspConnTimer {
    /// The bridge must be `'static` because the expiry callback outlives
    /// any caller frame.
    pub fn new(bridge: &'static crate::bridge::StackBridge) -> anyhow::Result<Self> {
        let service = esp_idf_svc::timer::EspTaskTimerService::new()?;
        let timer = service.timer(move || {
            bridge.post(crate::bridge::StackOp::CancelInitiate);
        })?;
        Ok(Self { timer })
    }
}

#[cfg(target_os = "espidf")]
impl ConnTimer for EspConnTimer {
    fn arm(&mut self, timeout_secs: u16) {
        let _ = self
            .timer
            .after(core::time::Duration::from_secs(timeout_secs as u64));
    }

    fn disarm(&mut self) {
        let _ = self.timer.cancel();
    }
}
