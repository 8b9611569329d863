//! Stack marshaling bridge.
//!
//! The vendor stack API is not reentrant and may only be entered from its
//! own task context. Command handlers therefore never call it directly:
//! they post a [`StackOp`] here and return immediately, and the
//! [`StackWorker`](crate::worker::StackWorker) drains the queue inside the
//! stack context. Ops execute in post order, one at a time.
//!
//! ```text
//! ┌──────────────┐   StackOp    ┌──────────────┐
//! │ command task │─────────────▶│ stack worker │──▶ BleStack port
//! └──────────────┘  (bounded)   └──────────────┘
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

use crate::link::LinkHandle;

/// Depth of the deferred-op queue.
const OP_DEPTH: usize = 8;

/// Bounded payload for characteristic/attribute values carried across the
/// context boundary (a 256-byte command line can encode at most 128 octets
/// of hex).
pub type ValueBuf = heapless::Vec<u8, 128>;

/// Push kind for `AT+BLEGATTSWR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushKind {
    Notify,
    Indicate,
}

/// A deferred stack invocation. Parameter blocks that both contexts share
/// (advertising/scan config, connection timing) are read from the shared
/// state by the worker at execution time; only per-call payloads travel in
/// the op itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackOp {
    /// Re-install the identity address after `AT+BLEADDR=`.
    RefreshAddress,
    AdvStart,
    AdvStop,
    ScanEnable(bool),
    /// Begin the connection attempt staged on registry entry `index`.
    Initiate { index: usize },
    /// Abort the in-flight connection attempt (timer expiry path).
    CancelInitiate,
    Disconnect { handle: LinkHandle },
    /// Push the entry's current timing to the controller.
    UpdateConnParams { handle: LinkHandle },
    DiscoverAll { index: usize },
    ReadChar { handle: LinkHandle, value_handle: u16 },
    WriteChar {
        handle: LinkHandle,
        value_handle: u16,
        data: ValueBuf,
    },
    /// Install/refresh the value-update listener and write the CCCD for
    /// the subscription staged on the registry entry.
    Subscribe { index: usize, value_handle: u16 },
    /// Answer a deferred ATT server read.
    ServerReadReply {
        index: usize,
        value_handle: u16,
        data: ValueBuf,
    },
    /// Send a server-initiated notification or indication.
    ServerPush {
        index: usize,
        value_handle: u16,
        kind: PushKind,
        data: ValueBuf,
    },
    ConfigureSecurity { enable: bool, io_capability: u8 },
}

/// Single-consumer handoff into the stack context.
///
/// Owns its channel so tests can instantiate isolated bridges; firmware
/// places one in a `static` alongside the other top-level cells.
pub struct StackBridge {
    ops: Channel<CriticalSectionRawMutex, StackOp, OP_DEPTH>,
}

impl StackBridge {
    pub const fn new() -> Self {
        Self {
            ops: Channel::new(),
        }
    }

    /// Enqueue an op; returns immediately. `false` means the queue was
    /// full and the op was dropped — callers surface that as a command
    /// error rather than blocking the command context.
    pub fn post(&self, op: StackOp) -> bool {
        if self.ops.try_send(op).is_ok() {
            true
        } else {
            warn!("bridge: op queue full, request dropped");
            false
        }
    }

    /// Non-blocking drain step for the worker loop (and for tests).
    pub fn try_next(&self) -> Option<StackOp> {
        self.ops.try_receive().ok()
    }

    /// Await the next op inside the stack context.
    pub async fn next(&self) -> StackOp {
        self.ops.receive().await
    }
}

impl Default for StackBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_drain_in_post_order() {
        let bridge = StackBridge::new();
        assert!(bridge.post(StackOp::AdvStart));
        assert!(bridge.post(StackOp::AdvStop));
        assert_eq!(bridge.try_next(), Some(StackOp::AdvStart));
        assert_eq!(bridge.try_next(), Some(StackOp::AdvStop));
        assert_eq!(bridge.try_next(), None);
    }

    #[test]
    fn full_queue_rejects_instead_of_blocking() {
        let bridge = StackBridge::new();
        for _ in 0..8 {
            assert!(bridge.post(StackOp::AdvStart));
        }
        assert!(!bridge.post(StackOp::AdvStop));
    }
}
