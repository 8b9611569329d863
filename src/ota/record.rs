//! Persisted OTA boot record.
//!
//! A flat little-endian blob at a fixed flash offset, read on every boot
//! and rewritten after every committed metadata change. The boot ROM
//! consumes it to redirect the next boot into the staged image, so the
//! layout is positional — no serde framing.
//!
//! ```text
//! magic u32 | entry u32 | app version 4B | block count u32 |
//! count × { src u32 | dest u32 | size u32 } | crc16 u16
//! ```

use crate::ota::crc::crc16;
use crate::ota::Version;
use crate::ports::{FlashError, FlashPort};

/// Fixed flash offset of the record.
pub const BOOT_RECORD_ADDR: u32 = 0x0007_F000;

pub const MAX_UPDATE_BLOCKS: usize = 8;

const MAGIC: u32 = 0x4F54_4252; // "RBTO"

/// Serialized size ceiling: header (16) + blocks + crc.
pub const RECORD_MAX: usize = 16 + MAX_UPDATE_BLOCKS * 12 + 2;

/// One flash-block remapping descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateBlock {
    pub src: u32,
    pub dest: u32,
    pub size: u32,
}

/// The record directing the next boot into freshly staged firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootRecord {
    pub entry: u32,
    pub app_version: Version,
    pub blocks: heapless::Vec<UpdateBlock, MAX_UPDATE_BLOCKS>,
}

impl BootRecord {
    pub fn to_bytes(&self) -> heapless::Vec<u8, RECORD_MAX> {
        let mut out = heapless::Vec::new();
        let _ = out.extend_from_slice(&MAGIC.to_le_bytes());
        let _ = out.extend_from_slice(&self.entry.to_le_bytes());
        let _ = out.extend_from_slice(&self.app_version.to_bytes());
        let _ = out.extend_from_slice(&(self.blocks.len() as u32).to_le_bytes());
        for b in &self.blocks {
            let _ = out.extend_from_slice(&b.src.to_le_bytes());
            let _ = out.extend_from_slice(&b.dest.to_le_bytes());
            let _ = out.extend_from_slice(&b.size.to_le_bytes());
        }
        let crc = crc16(&out);
        let _ = out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() < 18 {
            return None;
        }
        if u32::from_le_bytes(raw[0..4].try_into().ok()?) != MAGIC {
            return None;
        }
        let entry = u32::from_le_bytes(raw[4..8].try_into().ok()?);
        let app_version = Version::from_bytes(raw[8..12].try_into().ok()?);
        let count = u32::from_le_bytes(raw[12..16].try_into().ok()?) as usize;
        if count > MAX_UPDATE_BLOCKS {
            return None;
        }
        let body_len = 16 + count * 12;
        if raw.len() < body_len + 2 {
            return None;
        }
        let stored = u16::from_le_bytes(raw[body_len..body_len + 2].try_into().ok()?);
        if crc16(&raw[..body_len]) != stored {
            return None;
        }

        let mut blocks = heapless::Vec::new();
        for i in 0..count {
            let off = 16 + i * 12;
            blocks
                .push(UpdateBlock {
                    src: u32::from_le_bytes(raw[off..off + 4].try_into().ok()?),
                    dest: u32::from_le_bytes(raw[off + 4..off + 8].try_into().ok()?),
                    size: u32::from_le_bytes(raw[off + 8..off + 12].try_into().ok()?),
                })
                .ok()?;
        }
        Some(Self {
            entry,
            app_version,
            blocks,
        })
    }

    /// Read and validate the record from its fixed offset. `None` means
    /// no (or corrupt) record — first boot.
    pub fn load(flash: &dyn FlashPort) -> Option<Self> {
        let mut raw = [0u8; RECORD_MAX];
        flash.read(BOOT_RECORD_ADDR, &mut raw).ok()?;
        Self::from_bytes(&raw)
    }

    pub fn store(&self, flash: &mut dyn FlashPort) -> Result<(), FlashError> {
        flash.program(BOOT_RECORD_ADDR, &self.to_bytes())
    }
}
