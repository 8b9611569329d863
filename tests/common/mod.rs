//! Shared test doubles for the integration suite.

use blebridge::link::{AdvConfig, BdAddr, ConnTimings, LinkHandle, ScanConfig};
use blebridge::ports::{BleStack, StackError};
use blebridge::worker::OtaHandles;

pub const OTA_HANDLES: OtaHandles = OtaHandles {
    version: 0x10,
    data: 0x12,
    control: 0x14,
};

/// Every stack entry the worker performed, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum StackCall {
    SetRandomAddress(BdAddr),
    StartAdvertising { adv_data: Vec<u8> },
    StopAdvertising,
    StartScan { interval: u16, window: u16 },
    StopScan,
    CreateConnection {
        peer_addr_type: u8,
        peer_addr: BdAddr,
        timing: ConnTimings,
    },
    CancelConnection,
    Disconnect(LinkHandle),
    UpdateConnection(LinkHandle, ConnTimings),
    DiscoverAll(LinkHandle),
    ReadChar(LinkHandle, u16),
    WriteChar(LinkHandle, u16, Vec<u8>),
    ListenValueUpdates(LinkHandle, u16),
    WriteDescriptor(LinkHandle, u16, u16),
    DeferredReadReply(LinkHandle, u16, Vec<u8>),
    Notify(LinkHandle, u16, Vec<u8>),
    Indicate(LinkHandle, u16, Vec<u8>),
    ConfigureSecurity {
        enable: bool,
        io_capability: u8,
        auth_req: u8,
    },
    RequestPairing(LinkHandle),
}

/// Records calls; optionally rejects every fallible operation.
pub struct MockStack {
    pub calls: Vec<StackCall>,
    pub reject_all: bool,
}

impl MockStack {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            reject_all: false,
        }
    }

    fn outcome(&self) -> Result<(), StackError> {
        if self.reject_all {
            Err(StackError::Rejected)
        } else {
            Ok(())
        }
    }
}

impl BleStack for MockStack {
    fn set_random_address(&mut self, addr: BdAddr) {
        self.calls.push(StackCall::SetRandomAddress(addr));
    }

    fn start_advertising(&mut self, cfg: &AdvConfig) -> Result<(), StackError> {
        self.calls.push(StackCall::StartAdvertising {
            adv_data: cfg.adv_data.to_vec(),
        });
        self.outcome()
    }

    fn stop_advertising(&mut self) {
        self.calls.push(StackCall::StopAdvertising);
    }

    fn start_scan(&mut self, cfg: &ScanConfig) -> Result<(), StackError> {
        self.calls.push(StackCall::StartScan {
            interval: cfg.interval,
            window: cfg.window,
        });
        self.outcome()
    }

    fn stop_scan(&mut self) {
        self.calls.push(StackCall::StopScan);
    }

    fn create_connection(
        &mut self,
        peer_addr_type: u8,
        peer_addr: BdAddr,
        timing: ConnTimings,
    ) -> Result<(), StackError> {
        self.calls.push(StackCall::CreateConnection {
            peer_addr_type,
            peer_addr,
            timing,
        });
        self.outcome()
    }

    fn cancel_connection(&mut self) {
        self.calls.push(StackCall::CancelConnection);
    }

    fn disconnect(&mut self, handle: LinkHandle) {
        self.calls.push(StackCall::Disconnect(handle));
    }

    fn update_connection(
        &mut self,
        handle: LinkHandle,
        timing: ConnTimings,
    ) -> Result<(), StackError> {
        self.calls.push(StackCall::UpdateConnection(handle, timing));
        self.outcome()
    }

    fn discover_all(&mut self, handle: LinkHandle) -> Result<(), StackError> {
        self.calls.push(StackCall::DiscoverAll(handle));
        self.outcome()
    }

    fn read_characteristic(
        &mut self,
        handle: LinkHandle,
        value_handle: u16,
    ) -> Result<(), StackError> {
        self.calls.push(StackCall::ReadChar(handle, value_handle));
        self.outcome()
    }

    fn write_characteristic(
        &mut self,
        handle: LinkHandle,
        value_handle: u16,
        data: &[u8],
    ) -> Result<(), StackError> {
        self.calls
            .push(StackCall::WriteChar(handle, value_handle, data.to_vec()));
        self.outcome()
    }

    fn listen_value_updates(&mut self, handle: LinkHandle, value_handle: u16) {
        self.calls
            .push(StackCall::ListenValueUpdates(handle, value_handle));
    }

    fn write_descriptor(
        &mut self,
        handle: LinkHandle,
        desc_handle: u16,
        config: u16,
    ) -> Result<(), StackError> {
        self.calls
            .push(StackCall::WriteDescriptor(handle, desc_handle, config));
        self.outcome()
    }

    fn deferred_read_reply(
        &mut self,
        handle: LinkHandle,
        value_handle: u16,
        data: &[u8],
    ) -> Result<(), StackError> {
        self.calls.push(StackCall::DeferredReadReply(
            handle,
            value_handle,
            data.to_vec(),
        ));
        self.outcome()
    }

    fn notify(
        &mut self,
        handle: LinkHandle,
        value_handle: u16,
        data: &[u8],
    ) -> Result<(), StackError> {
        self.calls
            .push(StackCall::Notify(handle, value_handle, data.to_vec()));
        self.outcome()
    }

    fn indicate(
        &mut self,
        handle: LinkHandle,
        value_handle: u16,
        data: &[u8],
    ) -> Result<(), StackError> {
        self.calls
            .push(StackCall::Indicate(handle, value_handle, data.to_vec()));
        self.outcome()
    }

    fn configure_security(&mut self, enable: bool, io_capability: u8, auth_req: u8) {
        self.calls.push(StackCall::ConfigureSecurity {
            enable,
            io_capability,
            auth_req,
        });
    }

    fn request_pairing(&mut self, handle: LinkHandle) {
        self.calls.push(StackCall::RequestPairing(handle));
    }
}
