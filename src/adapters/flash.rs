//! Flash port adapters.
//!
//! On ESP-IDF the OTA staging area lives on the SPI flash and is written
//! through the raw `esp_flash` API. The simulation backend is a plain
//! byte array that reports `0xFF` for never-programmed cells, which is
//! what erased NOR flash reads as.

use crate::ports::{FlashError, FlashPort};

// ───────────────────────────────────────────────────────────────
// Simulation backend
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
pub struct SimFlash {
    base: u32,
    mem: Vec<u8>,
}

#[cfg(not(target_os = "espidf"))]
impl SimFlash {
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            mem: vec![0xFF; size],
        }
    }

    fn span(&self, address: u32, len: usize) -> Result<usize, FlashError> {
        let offset = address
            .checked_sub(self.base)
            .ok_or(FlashError::OutOfRange)? as usize;
        if offset + len > self.mem.len() {
            return Err(FlashError::OutOfRange);
        }
        Ok(offset)
    }

    /// Test convenience: read without going through the port trait.
    pub fn read_bytes(&self, address: u32, buf: &mut [u8]) {
        self.read(address, buf).expect("read within simulated flash");
    }
}

#[cfg(not(target_os = "espidf"))]
impl FlashPort for SimFlash {
    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        let offset = self.span(address, data.len())?;
        self.mem[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let offset = self.span(address, buf.len())?;
        buf.copy_from_slice(&self.mem[offset..offset + buf.len()]);
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF backend
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub struct EspFlash;

#[cfg(target_os = "espidf")]
impl EspFlash {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "espidf")]
impl FlashPort for EspFlash {
    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        // SAFETY: the OTA staging region is outside the running image and
        // only this adapter writes it; esp_flash_* are safe to call from
        // any task.
        let ret = unsafe {
            esp_idf_sys::esp_flash_erase_region(
                core::ptr::null_mut(),
                address,
                data.len().next_multiple_of(4096) as u32,
            )
        };
        if ret != esp_idf_sys::ESP_OK {
            return Err(FlashError::IoError);
        }
        let ret = unsafe {
            esp_idf_sys::esp_flash_write(
                core::ptr::null_mut(),
                data.as_ptr().cast(),
                address,
                data.len() as u32,
            )
        };
        if ret == esp_idf_sys::ESP_OK {
            Ok(())
        } else {
            Err(FlashError::IoError)
        }
    }

    fn read(&self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let ret = unsafe {
            esp_idf_sys::esp_flash_read(
                core::ptr::null_mut(),
                buf.as_mut_ptr().cast(),
                address,
                buf.len() as u32,
            )
        };
        if ret == esp_idf_sys::ESP_OK {
            Ok(())
        } else {
            Err(FlashError::IoError)
        }
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    #[test]
    fn erased_flash_reads_ff() {
        let flash = SimFlash::new(0x1000, 64);
        let mut buf = [0u8; 8];
        flash.read(0x1000, &mut buf).unwrap();
        assert_eq!(buf, [0xFF; 8]);
    }

    #[test]
    fn program_then_read() {
        let mut flash = SimFlash::new(0, 64);
        flash.program(8, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        flash.read(8, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn out_of_range_is_rejected() {
        let mut flash = SimFlash::new(0x1000, 16);
        assert_eq!(
            flash.program(0x0FFF, &[0]),
            Err(FlashError::OutOfRange)
        );
        assert_eq!(flash.program(0x100F, &[0, 0]), Err(FlashError::OutOfRange));
        let mut buf = [0u8; 32];
        assert_eq!(flash.read(0x1000, &mut buf), Err(FlashError::OutOfRange));
    }
}
