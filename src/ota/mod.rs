//! OTA firmware-update state machine.
//!
//! Image bytes arrive through a GATT data attribute and accumulate in a
//! page-sized staging buffer; a control attribute drives the state
//! machine; a read-only version attribute reports platform + application
//! versions. The peer polls the control attribute's status byte after
//! every step — integrity failures park the machine in `Error` and never
//! fault the system.
//!
//! ```text
//! DISABLED ──start──▶ OK ──page-begin──▶ OK(downloading)
//!                      ▲                   │ data-append*
//!                      │                   ▼
//!                      └──── page-end ──▶ OK | WAIT_DATA | ERROR
//! ```
//!
//! Unlike the classic write-then-check flow, `page-end` here validates the
//! staged checksum first and only then programs flash (and re-verifies the
//! programmed bytes by read-back). A short page programs nothing.

pub mod crc;
pub mod record;

pub use crc::{crc16, crc16_update};
pub use record::{BOOT_RECORD_ADDR, BootRecord, MAX_UPDATE_BLOCKS, UpdateBlock};

use log::{info, warn};

use crate::ports::FlashPort;

/// Staging unit: the flash erase granularity.
pub const PAGE_SIZE: usize = 4096;

// Control attribute opcodes.
pub const CTRL_START: u8 = 0xAA;
pub const CTRL_PAGE_BEGIN: u8 = 0xB0;
pub const CTRL_PAGE_END: u8 = 0xB1;
pub const CTRL_READ_PAGE: u8 = 0xC0;
pub const CTRL_METADATA: u8 = 0xE0;
pub const CTRL_REBOOT: u8 = 0xFF;

/// Status byte polled by the peer through the control attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OtaStatus {
    Disabled = 0,
    Ok = 1,
    Error = 2,
    /// `page-end` saw fewer bytes than declared; the peer must resend.
    WaitData = 3,
}

/// The three OTA attribute roles within the GATT profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaAttr {
    Control,
    Data,
    Version,
}

/// Side effect requested by a control write, executed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    None,
    /// Status was `Ok` with no page in flight: hard-reset into the new
    /// firmware.
    Reboot,
}

/// Semantic firmware version, serialized `major u16 LE | minor | patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Version {
    pub major: u16,
    pub minor: u8,
    pub patch: u8,
}

impl Version {
    pub const fn new(major: u16, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a `major.minor.patch` string (e.g. `CARGO_PKG_VERSION`).
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        Some(Self {
            major,
            minor,
            patch,
        })
    }

    pub fn to_bytes(self) -> [u8; 4] {
        let m = self.major.to_le_bytes();
        [m[0], m[1], self.minor, self.patch]
    }

    pub fn from_bytes(raw: [u8; 4]) -> Self {
        Self {
            major: u16::from_le_bytes([raw[0], raw[1]]),
            minor: raw[2],
            patch: raw[3],
        }
    }
}

impl core::fmt::Display for Version {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Wire size of the version attribute (platform + application).
const VERSION_ATTR_SIZE: usize = 8;

const READBACK_CHUNK: usize = 64;

pub struct OtaService<'a> {
    flash: &'a mut dyn FlashPort,
    status: OtaStatus,
    downloading: bool,
    start_addr: u32,
    read_addr: u32,
    page_offset: usize,
    page: [u8; PAGE_SIZE],
    platform_version: Version,
    app_version: Version,
}

impl<'a> OtaService<'a> {
    pub fn new(flash: &'a mut dyn FlashPort, platform_version: Version) -> Self {
        let app_version = Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or_default();
        Self {
            flash,
            status: OtaStatus::Disabled,
            downloading: false,
            start_addr: 0,
            read_addr: 0,
            page_offset: 0,
            page: [0; PAGE_SIZE],
            platform_version,
            app_version,
        }
    }

    pub fn status(&self) -> OtaStatus {
        self.status
    }

    pub fn downloading(&self) -> bool {
        self.downloading
    }

    #[cfg(test)]
    pub(crate) fn page_offset(&self) -> usize {
        self.page_offset
    }

    /// Handle a write to the control attribute: one opcode byte plus an
    /// opcode-specific payload.
    pub fn control(&mut self, payload: &[u8]) -> ControlAction {
        let Some((&op, body)) = payload.split_first() else {
            self.status = OtaStatus::Error;
            return ControlAction::None;
        };

        match op {
            CTRL_START => {
                // Unconditional restart; abandons any in-flight page.
                self.status = OtaStatus::Ok;
                self.downloading = false;
                self.start_addr = 0;
                self.page_offset = 0;
                info!("OTA: session started");
            }
            CTRL_PAGE_BEGIN => self.page_begin(body),
            CTRL_PAGE_END => self.page_end(body),
            CTRL_READ_PAGE => self.read_page(body),
            CTRL_METADATA => self.metadata(body),
            CTRL_REBOOT => {
                if self.status == OtaStatus::Ok {
                    if self.downloading {
                        // Never reboot with an incomplete page.
                        self.status = OtaStatus::Error;
                    } else {
                        info!("OTA: reboot into staged firmware");
                        return ControlAction::Reboot;
                    }
                }
            }
            _ => {
                warn!("OTA: unknown control opcode {op:#04x}");
                self.status = OtaStatus::Error;
            }
        }
        ControlAction::None
    }

    /// Handle a write to the data attribute: append a chunk to the staged
    /// page. Accepted only while `Ok` and downloading, 4-byte-granular and
    /// within the remaining page capacity; anything else is `Error` and
    /// leaves the buffer untouched.
    pub fn data(&mut self, chunk: &[u8]) {
        let acceptable = self.status == OtaStatus::Ok
            && self.downloading
            && chunk.len() % 4 == 0
            && self.page_offset + chunk.len() <= PAGE_SIZE;
        if !acceptable {
            self.status = OtaStatus::Error;
            return;
        }
        self.page[self.page_offset..self.page_offset + chunk.len()].copy_from_slice(chunk);
        self.page_offset += chunk.len();
    }

    /// Read one of the OTA attributes. `buf = None` is the zero-length
    /// probe: it returns the size a real read will produce. Always
    /// allowed, regardless of state.
    pub fn read(&self, attr: OtaAttr, buf: Option<&mut [u8]>) -> usize {
        match (attr, buf) {
            (OtaAttr::Control, None) => 1,
            (OtaAttr::Control, Some(buf)) => {
                if buf.is_empty() {
                    return 0;
                }
                buf[0] = self.status as u8;
                1
            }
            (OtaAttr::Version, None) => VERSION_ATTR_SIZE,
            (OtaAttr::Version, Some(buf)) => {
                if buf.len() < VERSION_ATTR_SIZE {
                    return 0;
                }
                buf[0..4].copy_from_slice(&self.platform_version.to_bytes());
                buf[4..8].copy_from_slice(&self.app_version.to_bytes());
                VERSION_ATTR_SIZE
            }
            (OtaAttr::Data, None) => 0,
            (OtaAttr::Data, Some(buf)) => {
                // Out-of-band read of the region named by read-page.
                match self.flash.read(self.read_addr, buf) {
                    Ok(()) => buf.len(),
                    Err(_) => 0,
                }
            }
        }
    }

    // ── Control opcodes ───────────────────────────────────────

    fn page_begin(&mut self, body: &[u8]) {
        let Some(addr) = le_u32(body) else {
            self.status = OtaStatus::Error;
            return;
        };
        if addr % 4 != 0 {
            self.status = OtaStatus::Error;
            return;
        }
        self.start_addr = addr;
        self.page_offset = 0;
        self.downloading = true;
        self.status = OtaStatus::Ok;
    }

    fn page_end(&mut self, body: &[u8]) {
        if body.len() < 4 {
            self.status = OtaStatus::Error;
            return;
        }
        let length = u16::from_le_bytes([body[0], body[1]]) as usize;
        let checksum = u16::from_le_bytes([body[2], body[3]]);

        if !self.downloading {
            // No page in flight. A second page-end must assert an error —
            // except the degenerate zero-length form, which verifies
            // trivially.
            self.status = if length == 0 && crc16(&[]) == checksum {
                OtaStatus::Ok
            } else {
                OtaStatus::Error
            };
            return;
        }
        self.downloading = false;

        if self.page_offset < length {
            self.status = OtaStatus::WaitData;
            return;
        }
        if length > PAGE_SIZE || crc16(&self.page[..length]) != checksum {
            warn!("OTA: page checksum mismatch at {:#010x}", self.start_addr);
            self.status = OtaStatus::Error;
            return;
        }
        if self
            .flash
            .program(self.start_addr, &self.page[..self.page_offset])
            .is_err()
        {
            warn!("OTA: program failed at {:#010x}", self.start_addr);
            self.status = OtaStatus::Error;
            return;
        }
        if !self.verify_programmed(length, checksum) {
            warn!("OTA: read-back mismatch at {:#010x}", self.start_addr);
            self.status = OtaStatus::Error;
            return;
        }
        self.page_offset = 0;
        self.status = OtaStatus::Ok;
    }

    fn read_page(&mut self, body: &[u8]) {
        if self.downloading {
            self.status = OtaStatus::Error;
            return;
        }
        let Some(addr) = le_u32(body) else {
            self.status = OtaStatus::Error;
            return;
        };
        self.read_addr = addr;
        self.status = OtaStatus::Ok;
    }

    /// Metadata payload: `crc16 u16 LE | entry u32 LE | N × block(12B)`.
    /// The checksum covers everything after itself. On match the boot
    /// record is rewritten to direct the next boot into the staged image.
    fn metadata(&mut self, body: &[u8]) {
        if self.status != OtaStatus::Ok || self.downloading {
            self.status = OtaStatus::Error;
            return;
        }
        const HEADER: usize = 6;
        const BLOCK: usize = 12;
        if body.len() < HEADER + BLOCK || (body.len() - HEADER) % BLOCK != 0 {
            self.status = OtaStatus::Error;
            return;
        }
        let count = (body.len() - HEADER) / BLOCK;
        if count > MAX_UPDATE_BLOCKS {
            self.status = OtaStatus::Error;
            return;
        }
        let stored = u16::from_le_bytes([body[0], body[1]]);
        if crc16(&body[2..]) != stored {
            warn!("OTA: metadata checksum mismatch");
            self.status = OtaStatus::Error;
            return;
        }
        let entry = u32::from_le_bytes([body[2], body[3], body[4], body[5]]);

        let mut blocks = heapless::Vec::new();
        for i in 0..count {
            let off = HEADER + i * BLOCK;
            let block = UpdateBlock {
                src: u32::from_le_bytes(body[off..off + 4].try_into().unwrap_or_default()),
                dest: u32::from_le_bytes(body[off + 4..off + 8].try_into().unwrap_or_default()),
                size: u32::from_le_bytes(body[off + 8..off + 12].try_into().unwrap_or_default()),
            };
            if blocks.push(block).is_err() {
                self.status = OtaStatus::Error;
                return;
            }
        }

        let record = BootRecord {
            entry,
            app_version: self.app_version,
            blocks,
        };
        if record.store(self.flash).is_err() {
            warn!("OTA: boot record write failed");
            self.status = OtaStatus::Error;
            return;
        }
        info!("OTA: boot record committed (entry {entry:#010x}, {count} blocks)");
        self.status = OtaStatus::Ok;
    }

    /// Re-read `length` programmed bytes in chunks and compare checksums.
    fn verify_programmed(&self, length: usize, checksum: u16) -> bool {
        let mut crc = crc16(&[]);
        let mut buf = [0u8; READBACK_CHUNK];
        let mut off = 0usize;
        while off < length {
            let n = READBACK_CHUNK.min(length - off);
            if self
                .flash
                .read(self.start_addr + off as u32, &mut buf[..n])
                .is_err()
            {
                return false;
            }
            crc = crc16_update(crc, &buf[..n]);
            off += n;
        }
        crc == checksum
    }
}

fn le_u32(body: &[u8]) -> Option<u32> {
    Some(u32::from_le_bytes(body.get(0..4)?.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::flash::SimFlash;

    fn page_begin(addr: u32) -> Vec<u8> {
        let mut p = vec![CTRL_PAGE_BEGIN];
        p.extend_from_slice(&addr.to_le_bytes());
        p
    }

    fn page_end(length: u16, checksum: u16) -> Vec<u8> {
        let mut p = vec![CTRL_PAGE_END];
        p.extend_from_slice(&length.to_le_bytes());
        p.extend_from_slice(&checksum.to_le_bytes());
        p
    }

    #[test]
    fn boots_disabled_until_start() {
        let mut flash = SimFlash::new(0, 0x8_0000);
        let mut ota = OtaService::new(&mut flash, Version::new(2, 1, 0));
        assert_eq!(ota.status(), OtaStatus::Disabled);
        ota.control(&[CTRL_START]);
        assert_eq!(ota.status(), OtaStatus::Ok);
    }

    #[test]
    fn misaligned_page_begin_poisons_session() {
        // Page addresses must be word-aligned for the flash driver.
        let mut flash = SimFlash::new(0, 0x8_0000);
        let mut ota = OtaService::new(&mut flash, Version::default());
        ota.control(&[CTRL_START]);
        ota.control(&page_begin(0x1003));
        assert_eq!(ota.status(), OtaStatus::Error);

        // A data chunk while in Error stays Error and must not touch the
        // staging buffer.
        ota.data(&[1, 2, 3, 4]);
        assert_eq!(ota.status(), OtaStatus::Error);
        assert_eq!(ota.page_offset(), 0);
    }

    #[test]
    fn full_page_cycle_programs_flash() {
        let mut flash = SimFlash::new(0, 0x8_0000);
        let image: Vec<u8> = (0..64u8).collect();
        let crc = crc16(&image);
        {
            let mut ota = OtaService::new(&mut flash, Version::default());
            ota.control(&[CTRL_START]);
            ota.control(&page_begin(0x1000));
            ota.data(&image);
            ota.control(&page_end(64, crc));
            assert_eq!(ota.status(), OtaStatus::Ok);
        }
        let mut back = [0u8; 64];
        flash.read_bytes(0x1000, &mut back);
        assert_eq!(&back[..], &image[..]);
    }

    #[test]
    fn short_page_waits_for_data_and_programs_nothing() {
        let mut flash = SimFlash::new(0, 0x8_0000);
        {
            let mut ota = OtaService::new(&mut flash, Version::default());
            ota.control(&[CTRL_START]);
            ota.control(&page_begin(0x1000));
            ota.data(&[0xAB; 8]);
            ota.control(&page_end(64, 0x1234));
            assert_eq!(ota.status(), OtaStatus::WaitData);
        }
        let mut back = [0u8; 8];
        flash.read_bytes(0x1000, &mut back);
        assert_eq!(back, [0xFF; 8], "validate-then-write: nothing programmed");
    }

    #[test]
    fn checksum_mismatch_is_error_without_programming() {
        let mut flash = SimFlash::new(0, 0x8_0000);
        {
            let mut ota = OtaService::new(&mut flash, Version::default());
            ota.control(&[CTRL_START]);
            ota.control(&page_begin(0x1000));
            ota.data(&[0x55; 16]);
            ota.control(&page_end(16, 0xBEEF));
            assert_eq!(ota.status(), OtaStatus::Error);
        }
        let mut back = [0u8; 16];
        flash.read_bytes(0x1000, &mut back);
        assert_eq!(back, [0xFF; 16]);
    }

    #[test]
    fn double_page_end_is_error_unless_zero_length() {
        // A second page-end without a page-begin must assert an error,
        // not silently succeed.
        let mut flash = SimFlash::new(0, 0x8_0000);
        let image = [0x11u8; 32];
        let crc = crc16(&image);
        let mut ota = OtaService::new(&mut flash, Version::default());
        ota.control(&[CTRL_START]);
        ota.control(&page_begin(0x2000));
        ota.data(&image);
        ota.control(&page_end(32, crc));
        assert_eq!(ota.status(), OtaStatus::Ok);

        ota.control(&page_end(32, crc));
        assert_eq!(ota.status(), OtaStatus::Error);

        // Zero-length form with the empty checksum is the only exception.
        ota.control(&[CTRL_START]);
        ota.control(&page_end(0, crc16(&[])));
        assert_eq!(ota.status(), OtaStatus::Ok);
    }

    #[test]
    fn data_rejects_unaligned_and_oversized_chunks() {
        let mut flash = SimFlash::new(0, 0x8_0000);
        let mut ota = OtaService::new(&mut flash, Version::default());
        ota.control(&[CTRL_START]);
        ota.control(&page_begin(0x1000));
        ota.data(&[1, 2, 3]); // not a multiple of 4
        assert_eq!(ota.status(), OtaStatus::Error);

        ota.control(&[CTRL_START]);
        ota.control(&page_begin(0x1000));
        ota.data(&[0u8; PAGE_SIZE]);
        assert_eq!(ota.status(), OtaStatus::Ok);
        ota.data(&[0u8; 4]); // beyond page capacity
        assert_eq!(ota.status(), OtaStatus::Error);
    }

    #[test]
    fn reboot_requires_ok_and_no_page_in_flight() {
        let mut flash = SimFlash::new(0, 0x8_0000);
        let mut ota = OtaService::new(&mut flash, Version::default());

        // Disabled: reboot ignored.
        assert_eq!(ota.control(&[CTRL_REBOOT]), ControlAction::None);

        ota.control(&[CTRL_START]);
        ota.control(&page_begin(0x1000));
        assert_eq!(ota.control(&[CTRL_REBOOT]), ControlAction::None);
        assert_eq!(ota.status(), OtaStatus::Error);

        ota.control(&[CTRL_START]);
        assert_eq!(ota.control(&[CTRL_REBOOT]), ControlAction::Reboot);
    }

    #[test]
    fn read_page_refuses_mid_download() {
        let mut flash = SimFlash::new(0, 0x8_0000);
        let mut ota = OtaService::new(&mut flash, Version::default());
        ota.control(&[CTRL_START]);
        ota.control(&page_begin(0x1000));

        let mut req = vec![CTRL_READ_PAGE];
        req.extend_from_slice(&0x2000u32.to_le_bytes());
        ota.control(&req);
        assert_eq!(ota.status(), OtaStatus::Error);
    }

    #[test]
    fn metadata_commits_boot_record() {
        let mut flash = SimFlash::new(0, 0x8_0000);
        {
            let mut ota = OtaService::new(&mut flash, Version::default());
            ota.control(&[CTRL_START]);

            let entry: u32 = 0x4000;
            let block = (0x2_0000u32, 0x4000u32, 0x1000u32);
            let mut table = Vec::new();
            table.extend_from_slice(&entry.to_le_bytes());
            table.extend_from_slice(&block.0.to_le_bytes());
            table.extend_from_slice(&block.1.to_le_bytes());
            table.extend_from_slice(&block.2.to_le_bytes());
            let crc = crc16(&table);

            let mut payload = vec![CTRL_METADATA];
            payload.extend_from_slice(&crc.to_le_bytes());
            payload.extend_from_slice(&table);
            ota.control(&payload);
            assert_eq!(ota.status(), OtaStatus::Ok);
        }

        let record = BootRecord::load(&flash).expect("record committed");
        assert_eq!(record.entry, 0x4000);
        assert_eq!(record.blocks.len(), 1);
        assert_eq!(record.blocks[0].src, 0x2_0000);
    }

    #[test]
    fn metadata_with_bad_checksum_is_error() {
        let mut flash = SimFlash::new(0, 0x8_0000);
        let mut ota = OtaService::new(&mut flash, Version::default());
        ota.control(&[CTRL_START]);

        let mut payload = vec![CTRL_METADATA];
        payload.extend_from_slice(&0xDEADu16.to_le_bytes());
        payload.extend_from_slice(&[0u8; 16]);
        ota.control(&payload);
        assert_eq!(ota.status(), OtaStatus::Error);
    }

    #[test]
    fn status_and_version_reads_always_allowed() {
        let mut flash = SimFlash::new(0, 0x8_0000);
        let mut ota = OtaService::new(&mut flash, Version::new(2, 1, 0));

        // Zero-length probe convention.
        assert_eq!(ota.read(OtaAttr::Control, None), 1);
        assert_eq!(ota.read(OtaAttr::Version, None), 8);

        let mut b = [0u8; 1];
        ota.read(OtaAttr::Control, Some(&mut b));
        assert_eq!(b[0], OtaStatus::Disabled as u8);

        ota.control(&page_begin(0x1003));
        ota.read(OtaAttr::Control, Some(&mut b));
        assert_eq!(b[0], OtaStatus::Error as u8);

        let mut v = [0u8; 8];
        ota.read(OtaAttr::Version, Some(&mut v));
        assert_eq!(Version::from_bytes(v[0..4].try_into().unwrap()), Version::new(2, 1, 0));
        let app = Version::from_bytes(v[4..8].try_into().unwrap());
        assert_eq!(app, Version::parse(env!("CARGO_PKG_VERSION")).unwrap());
    }

    #[test]
    fn version_parse_and_bytes() {
        let v = Version::parse("1.12.7").unwrap();
        assert_eq!(v, Version::new(1, 12, 7));
        assert_eq!(Version::from_bytes(v.to_bytes()), v);
        assert!(Version::parse("1.2").is_none());
        assert_eq!(v.to_string(), "1.12.7");
    }
}
