//! Port traits — the boundary between the protocol core and the platform.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ core (engine / worker / OTA)
//! ```
//!
//! Driven adapters (the vendor BLE stack, flash, NVS, the SoC power/reset
//! block, the connection timer) implement these traits. The core consumes
//! them via `dyn` references, so it never touches hardware directly and
//! every test can substitute an in-memory double.
//!
//! The `BleStack` trait may only be called from the stack's own execution
//! context. Command handlers never hold a `BleStack` reference; they go
//! through the [`StackBridge`](crate::bridge::StackBridge).

use crate::link::{AdvConfig, BdAddr, ConnTimings, LinkHandle, ScanConfig};

// ───────────────────────────────────────────────────────────────
// BLE stack port (driven adapter: core → vendor stack)
// ───────────────────────────────────────────────────────────────

/// Operations of the underlying radio/link-layer stack.
///
/// Not reentrant: the implementation assumes it is entered from exactly one
/// execution context (the stack worker loop).
pub trait BleStack {
    /// Install the identity (random) device address.
    fn set_random_address(&mut self, addr: BdAddr);

    /// Configure and enable advertising with the given parameters and
    /// advertising / scan-response payloads.
    fn start_advertising(&mut self, cfg: &AdvConfig) -> Result<(), StackError>;

    fn stop_advertising(&mut self);

    /// Enable scanning with the given parameters.
    fn start_scan(&mut self, cfg: &ScanConfig) -> Result<(), StackError>;

    fn stop_scan(&mut self);

    /// Begin a connection attempt to the given peer.
    fn create_connection(
        &mut self,
        peer_addr_type: u8,
        peer_addr: BdAddr,
        timing: ConnTimings,
    ) -> Result<(), StackError>;

    /// Abort an in-flight connection attempt.
    fn cancel_connection(&mut self);

    fn disconnect(&mut self, handle: LinkHandle);

    fn update_connection(
        &mut self,
        handle: LinkHandle,
        timing: ConnTimings,
    ) -> Result<(), StackError>;

    /// Start a full service/characteristic/descriptor discovery. Results
    /// arrive later through the worker's discovery event entry points.
    fn discover_all(&mut self, handle: LinkHandle) -> Result<(), StackError>;

    fn read_characteristic(
        &mut self,
        handle: LinkHandle,
        value_handle: u16,
    ) -> Result<(), StackError>;

    fn write_characteristic(
        &mut self,
        handle: LinkHandle,
        value_handle: u16,
        data: &[u8],
    ) -> Result<(), StackError>;

    /// Register for value updates (notifications/indications) on a
    /// characteristic. Idempotent per (handle, value_handle).
    fn listen_value_updates(&mut self, handle: LinkHandle, value_handle: u16);

    /// Write a client characteristic configuration descriptor.
    fn write_descriptor(
        &mut self,
        handle: LinkHandle,
        desc_handle: u16,
        config: u16,
    ) -> Result<(), StackError>;

    /// Answer a previously deferred ATT server read.
    fn deferred_read_reply(
        &mut self,
        handle: LinkHandle,
        value_handle: u16,
        data: &[u8],
    ) -> Result<(), StackError>;

    fn notify(
        &mut self,
        handle: LinkHandle,
        value_handle: u16,
        data: &[u8],
    ) -> Result<(), StackError>;

    fn indicate(
        &mut self,
        handle: LinkHandle,
        value_handle: u16,
        data: &[u8],
    ) -> Result<(), StackError>;

    /// Apply pairing/security configuration.
    fn configure_security(&mut self, enable: bool, io_capability: u8, auth_req: u8);

    fn request_pairing(&mut self, handle: LinkHandle);
}

// ───────────────────────────────────────────────────────────────
// Flash port (driven adapter: OTA → flash driver)
// ───────────────────────────────────────────────────────────────

/// Raw flash access for the OTA page stager and the boot record.
///
/// `program` is page-granular in the original driver; the port keeps the
/// byte-slice signature so simulation backends stay trivial.
pub trait FlashPort {
    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError>;

    fn read(&self, address: u32, buf: &mut [u8]) -> Result<(), FlashError>;
}

// ───────────────────────────────────────────────────────────────
// Settings store (driven adapter: core ↔ persisted key-value)
// ───────────────────────────────────────────────────────────────

/// Keys of the persisted settings database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SettingsKey {
    /// UART line settings (baud rate).
    Uart = 0x10,
}

/// Persisted key-value storage. Writes become durable only after `commit`.
pub trait SettingsStore {
    /// Read a value. Returns the number of bytes written to `buf`.
    fn get(&self, key: SettingsKey, buf: &mut [u8]) -> Result<usize, StoreError>;

    /// Stage a value for the given key.
    fn put(&mut self, key: SettingsKey, data: &[u8]) -> Result<(), StoreError>;

    /// Flush staged values to the backing medium.
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Wipe the whole database (factory reset).
    fn remove_all(&mut self) -> Result<(), StoreError>;
}

// ───────────────────────────────────────────────────────────────
// Platform port (reset / shutdown / power saving)
// ───────────────────────────────────────────────────────────────

/// SoC-level controls. All methods are fire-and-forget; `reset` and
/// `shutdown` diverge on hardware but return in simulation so tests can
/// observe them.
pub trait PlatformPort {
    fn reset(&self);

    /// Enter the deep power-down state (woken by an external pin).
    fn shutdown(&self);

    fn set_power_saving(&self, enable: bool);
}

// ───────────────────────────────────────────────────────────────
// Connection timer (single-shot initiation timeout)
// ───────────────────────────────────────────────────────────────

/// One-shot timer guarding a connection attempt. On expiry the adapter
/// posts a cancel-initiate request through the bridge; arming while armed
/// restarts the countdown.
pub trait ConnTimer {
    fn arm(&mut self, timeout_secs: u16);

    fn disarm(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors surfaced by [`BleStack`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    /// The controller rejected the request (busy, wrong state).
    Rejected,
    /// The link handle is unknown to the stack.
    BadHandle,
}

/// Errors from [`FlashPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// Address or length outside the programmable region.
    OutOfRange,
    /// The driver reported a program/read failure.
    IoError,
}

/// Errors from [`SettingsStore`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Requested key does not exist.
    NotFound,
    /// Storage is full.
    Full,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for StackError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Rejected => write!(f, "request rejected by controller"),
            Self::BadHandle => write!(f, "unknown link handle"),
        }
    }
}

impl core::fmt::Display for FlashError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfRange => write!(f, "address out of range"),
            Self::IoError => write!(f, "flash I/O error"),
        }
    }
}

impl core::fmt::Display for StoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
