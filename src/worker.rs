//! Stack-context worker.
//!
//! Runs inside the protocol stack's own (single-threaded) execution
//! context — the only place [`BleStack`] may be entered. Two duties:
//!
//! 1. Drain the [`StackBridge`] and execute deferred ops posted by
//!    command handlers, in post order, one at a time.
//! 2. Receive stack events (connection complete, disconnect, reports,
//!    GATT results, ATT server access) from the vendor-stack adapter,
//!    mutate the registry, and emit unsolicited response lines.
//!
//! ATT accesses addressed at the three OTA attributes are routed into the
//! OTA state machine instead of the AT surface.

use log::{info, warn};

use crate::Shared;
use crate::at::response::{ResponseLine, Transmitter};
use crate::bridge::{PushKind, StackBridge, StackOp};
use crate::link::events::{
    AdvReport, ConnectionComplete, GattValue, Role, ServiceInfo, SmState,
};
use crate::link::{
    AUTH_REQ_BONDING, ConnTimings, LinkHandle, ModemState, PendingConnect,
};
use crate::ota::{ControlAction, OtaAttr, OtaService, Version};
use crate::ports::{BleStack, ConnTimer, FlashPort, PlatformPort, StackError};

/// GATT handles of the three OTA attributes (profile layout is external).
#[derive(Debug, Clone, Copy)]
pub struct OtaHandles {
    pub control: u16,
    pub data: u16,
    pub version: u16,
}

/// Result of an ATT server read routed through the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Zero-length probe: the size a real read will produce.
    Size(usize),
    /// Bytes written into the caller's buffer.
    Filled(usize),
    /// The value is produced later via `AT+BLEGATTSRD`.
    Deferred,
}

pub struct StackWorker<'a> {
    state: &'a Shared<ModemState>,
    bridge: &'a StackBridge,
    tx: &'a Transmitter,
    stack: &'a mut dyn BleStack,
    timer: &'a mut dyn ConnTimer,
    platform: &'a dyn PlatformPort,
    ota: OtaService<'a>,
    ota_handles: OtaHandles,
}

impl<'a> StackWorker<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: &'a Shared<ModemState>,
        bridge: &'a StackBridge,
        tx: &'a Transmitter,
        stack: &'a mut dyn BleStack,
        timer: &'a mut dyn ConnTimer,
        platform: &'a dyn PlatformPort,
        flash: &'a mut dyn FlashPort,
        platform_version: Version,
        ota_handles: OtaHandles,
    ) -> Self {
        Self {
            state,
            bridge,
            tx,
            stack,
            timer,
            platform,
            ota: OtaService::new(flash, platform_version),
            ota_handles,
        }
    }

    pub fn ota(&self) -> &OtaService<'a> {
        &self.ota
    }

    /// Drain and execute every queued op (polling form, used by tests and
    /// by adapters that multiplex the stack context).
    pub fn poll(&mut self) {
        while let Some(op) = self.bridge.try_next() {
            self.process(op);
        }
    }

    /// Worker loop for a dedicated stack-context task.
    pub async fn run(&mut self) -> ! {
        loop {
            let op = self.bridge.next().await;
            self.process(op);
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ModemState) -> R) -> R {
        self.state.lock(|cell| f(&mut cell.borrow_mut()))
    }

    fn index_of(&self, handle: LinkHandle) -> Option<usize> {
        self.with_state(|s| s.registry.index_of_handle(handle))
    }

    fn ack(&self, result: Result<(), StackError>) {
        match result {
            Ok(()) => self.tx.ok(),
            Err(_) => self.tx.error(),
        }
    }

    // ── Deferred ops ──────────────────────────────────────────

    /// Execute one deferred op (stack context only).
    pub fn process(&mut self, op: StackOp) {
        match op {
            StackOp::RefreshAddress => {
                let addr = self.with_state(|s| s.security.identity_addr);
                self.stack.set_random_address(addr);
            }
            StackOp::AdvStart => {
                let cfg = self.with_state(|s| s.adv.clone());
                if let Err(e) = self.stack.start_advertising(&cfg) {
                    warn!("worker: adv start failed: {e}");
                }
            }
            StackOp::AdvStop => self.stack.stop_advertising(),
            StackOp::ScanEnable(enable) => {
                if enable {
                    let cfg = self.with_state(|s| s.scan.clone());
                    if let Err(e) = self.stack.start_scan(&cfg) {
                        warn!("worker: scan start failed: {e}");
                    }
                } else {
                    self.stack.stop_scan();
                }
            }
            StackOp::Initiate { index } => self.initiate(index),
            StackOp::CancelInitiate => self.stack.cancel_connection(),
            StackOp::Disconnect { handle } => self.stack.disconnect(handle),
            StackOp::UpdateConnParams { handle } => {
                let timing = self.with_state(|s| {
                    let idx = s.registry.index_of_handle(handle)?;
                    let e = s.registry.entry(idx)?;
                    Some(ConnTimings {
                        min_interval: e.min_interval,
                        max_interval: e.max_interval,
                        latency: e.latency,
                        timeout: e.timeout,
                    })
                });
                if let Some(timing) = timing {
                    if let Err(e) = self.stack.update_connection(handle, timing) {
                        warn!("worker: conn param update failed: {e}");
                    }
                }
            }
            StackOp::DiscoverAll { index } => {
                let handle = self.with_state(|s| s.registry.handle_of(index));
                match handle {
                    Some(handle) => {
                        if let Err(e) = self.stack.discover_all(handle) {
                            warn!("worker: discovery failed to start: {e}");
                            self.with_state(|s| {
                                if let Some(entry) = s.registry.entry_mut(index) {
                                    entry.discovering = false;
                                }
                            });
                        }
                    }
                    None => self.with_state(|s| {
                        if let Some(entry) = s.registry.entry_mut(index) {
                            entry.discovering = false;
                        }
                    }),
                }
            }
            StackOp::ReadChar {
                handle,
                value_handle,
            } => {
                let r = self.stack.read_characteristic(handle, value_handle);
                self.ack(r);
            }
            StackOp::WriteChar {
                handle,
                value_handle,
                data,
            } => {
                let r = self.stack.write_characteristic(handle, value_handle, &data);
                self.ack(r);
            }
            StackOp::Subscribe {
                index,
                value_handle,
            } => self.subscribe(index, value_handle),
            StackOp::ServerReadReply {
                index,
                value_handle,
                data,
            } => {
                let handle = self.with_state(|s| s.registry.handle_of(index));
                match handle {
                    Some(handle) => {
                        let r = self.stack.deferred_read_reply(handle, value_handle, &data);
                        self.ack(r);
                    }
                    None => self.tx.error(),
                }
            }
            StackOp::ServerPush {
                index,
                value_handle,
                kind,
                data,
            } => {
                let handle = self.with_state(|s| s.registry.handle_of(index));
                match handle {
                    Some(handle) => {
                        let r = match kind {
                            PushKind::Notify => self.stack.notify(handle, value_handle, &data),
                            PushKind::Indicate => {
                                self.stack.indicate(handle, value_handle, &data)
                            }
                        };
                        self.ack(r);
                    }
                    None => self.tx.error(),
                }
            }
            StackOp::ConfigureSecurity {
                enable,
                io_capability,
            } => {
                let auth_req = self.with_state(|s| s.security.auth_req);
                self.stack.configure_security(enable, io_capability, auth_req);
            }
        }
    }

    fn initiate(&mut self, index: usize) {
        let staged = self.with_state(|s| {
            let e = s.registry.entry(index)?;
            Some((
                e.peer_addr_type,
                e.peer_addr,
                ConnTimings {
                    min_interval: e.min_interval,
                    max_interval: e.max_interval,
                    latency: e.latency,
                    timeout: e.timeout,
                },
                s.conn_timeout_secs,
            ))
        });
        let Some((peer_type, peer, timing, timeout_secs)) = staged else {
            return;
        };
        match self.stack.create_connection(peer_type, peer, timing) {
            Ok(()) => {
                self.with_state(|s| s.initiating = Some(PendingConnect { index }));
                self.timer.arm(timeout_secs);
            }
            Err(e) => warn!("worker: create connection failed: {e}"),
        }
    }

    fn subscribe(&mut self, index: usize, value_handle: u16) {
        let staged = self.with_state(|s| {
            let handle = s.registry.handle_of(index)?;
            let sub = s.registry.subscription(index, value_handle)?;
            Some((handle, sub.desc_handle, sub.config, sub.registered))
        });
        let Some((handle, desc_handle, config, registered)) = staged else {
            return;
        };
        if !registered {
            self.stack.listen_value_updates(handle, value_handle);
            self.with_state(|s| {
                if let Some(sub) = s.registry.subscription_mut(index, value_handle) {
                    sub.registered = true;
                }
            });
        }
        if let Err(e) = self.stack.write_descriptor(handle, desc_handle, config) {
            warn!("worker: descriptor write failed: {e}");
        }
    }

    // ── Stack events ──────────────────────────────────────────

    pub fn on_connection_complete(&mut self, evt: &ConnectionComplete) {
        match evt.role {
            Role::Slave => self.on_slave_connected(evt),
            Role::Master => self.on_master_connected(evt),
        }
    }

    fn on_slave_connected(&mut self, evt: &ConnectionComplete) {
        if evt.status != 0 {
            return;
        }
        let reserved = self.with_state(|s| {
            s.registry
                .reserve_slave(evt.handle, evt.peer_addr_type, evt.peer_addr)
                .ok()
        });
        match reserved {
            Some(index) => self.finish_connect(index, evt),
            None => {
                // Acceptor region full: tear the new link down, no report.
                info!("worker: no free slave slot, dropping handle {}", evt.handle);
                self.stack.disconnect(evt.handle);
            }
        }
    }

    fn on_master_connected(&mut self, evt: &ConnectionComplete) {
        self.timer.disarm();
        let pending = self.with_state(|s| s.initiating.take());

        if evt.status != 0 {
            if let Some(p) = pending {
                self.tx
                    .line(ResponseLine::new("BLECONN").field(p.index).field(-1));
            }
            return;
        }

        let bound = self.with_state(|s| {
            s.registry
                .bind_master(evt.handle, evt.peer_addr_type, evt.peer_addr)
                .ok()
        });
        match bound {
            Some(index) => {
                let auth_req = self.with_state(|s| s.security.auth_req);
                if auth_req & AUTH_REQ_BONDING != 0 {
                    self.stack.request_pairing(evt.handle);
                }
                self.finish_connect(index, evt);
            }
            None => {
                // Completion for a peer we never asked for.
                warn!("worker: peer identity mismatch, dropping handle {}", evt.handle);
                self.stack.disconnect(evt.handle);
            }
        }
    }

    fn finish_connect(&mut self, index: usize, evt: &ConnectionComplete) {
        let addr = self.with_state(|s| {
            if let Some(entry) = s.registry.entry_mut(index) {
                entry.cur_interval = evt.interval;
                entry.latency = evt.latency;
                entry.timeout = evt.sup_timeout;
                entry.peer_addr
            } else {
                evt.peer_addr
            }
        });
        self.tx
            .line(ResponseLine::new("BLECONN").field(index).field(addr));
    }

    pub fn on_disconnect(&mut self, handle: LinkHandle, status: u8) {
        let index = self.index_of(handle).unwrap_or(0);
        self.tx.line(
            ResponseLine::new("BLEDISCONN")
                .field(index)
                .field(status),
        );
        self.with_state(|s| s.registry.release(handle));
    }

    pub fn on_adv_report(&mut self, report: &AdvReport) {
        let pass = self.with_state(|s| {
            s.scan.filter_type != 1 || s.scan.filter_addr == report.addr
        });
        if !pass {
            return;
        }
        let line = ResponseLine::new("BLESCAN")
            .field(report.addr)
            .field(report.rssi);
        let line = if report.scan_response {
            line.field("").hex(&report.data)
        } else {
            line.hex(&report.data).field("")
        };
        self.tx.line(line.field(report.addr_type));
    }

    /// Advertising-set-terminated: restart while the advertising flag is
    /// still on (e.g. terminated by an incoming connection).
    pub fn on_adv_set_terminated(&mut self) {
        let cfg = self.with_state(|s| s.adv.advertising.then(|| s.adv.clone()));
        if let Some(cfg) = cfg {
            if let Err(e) = self.stack.start_advertising(&cfg) {
                warn!("worker: adv restart failed: {e}");
            }
        }
    }

    /// Full discovery finished: dump the profile, then the completion
    /// line, and allow the next discovery on this connection.
    pub fn on_discovery_complete(
        &mut self,
        handle: LinkHandle,
        services: &[ServiceInfo],
        status: u8,
    ) {
        let index = self.index_of(handle).unwrap_or(0);
        for service in services {
            self.tx.line(
                ResponseLine::new("BLEGATTCPRIMSRV")
                    .field(index)
                    .field(service.start_handle)
                    .field(service.end_handle)
                    .field(service.uuid),
            );
            for chara in &service.characteristics {
                self.tx.line(
                    ResponseLine::new("BLEGATTCCHAR")
                        .field(index)
                        .field(chara.start_handle)
                        .field(chara.end_handle)
                        .field(chara.value_handle)
                        .field(chara.properties)
                        .field(chara.uuid),
                );
                for desc in &chara.descriptors {
                    self.tx.line(
                        ResponseLine::new("BLEGATTCDESC")
                            .field(index)
                            .field(desc.handle)
                            .field(desc.uuid),
                    );
                }
            }
        }
        self.tx
            .line(ResponseLine::new("BLEGATTCC").field(index).field(status));
        self.with_state(|s| {
            if let Some(idx) = s.registry.index_of_handle(handle) {
                if let Some(entry) = s.registry.entry_mut(idx) {
                    entry.discovering = false;
                }
            }
        });
    }

    /// A characteristic value arrived for an `AT+BLEGATTCRD`.
    pub fn on_char_value(&mut self, handle: LinkHandle, value: &GattValue) {
        let index = self.index_of(handle).unwrap_or(0);
        self.tx.line(
            ResponseLine::new("BLEGATTCRD")
                .field(index)
                .field(value.value_handle)
                .field(0)
                .hex(&value.data),
        );
    }

    /// Read query completed; only failures are reported (success already
    /// produced the value line).
    pub fn on_read_complete(&mut self, handle: LinkHandle, value_handle: u16, status: u8) {
        if status == 0 {
            return;
        }
        let index = self.index_of(handle).unwrap_or(0);
        self.tx.line(
            ResponseLine::new("BLEGATTCRD")
                .field(index)
                .field(value_handle)
                .field(status),
        );
    }

    pub fn on_write_complete(&mut self, handle: LinkHandle, value_handle: u16, status: u8) {
        let index = self.index_of(handle).unwrap_or(0);
        self.tx.line(
            ResponseLine::new("BLEGATTCWR")
                .field(index)
                .field(value_handle)
                .field(status),
        );
    }

    pub fn on_subscribe_complete(&mut self, handle: LinkHandle, desc_handle: u16, status: u8) {
        let index = self.index_of(handle).unwrap_or(0);
        self.tx.line(
            ResponseLine::new("BLEGATTCSUB")
                .field(index)
                .field(desc_handle)
                .field(status),
        );
    }

    /// Unsolicited notification or indication from a peer.
    pub fn on_value_update(&mut self, handle: LinkHandle, kind: PushKind, value: &GattValue) {
        if value.data.is_empty() {
            return;
        }
        let index = self.index_of(handle).unwrap_or(0);
        let name = match kind {
            PushKind::Notify => "BLEGATTCNOTI",
            PushKind::Indicate => "BLEGATTCIND",
        };
        self.tx.line(
            ResponseLine::new(name)
                .field(index)
                .field(value.value_handle)
                .hex(&value.data),
        );
    }

    pub fn on_sm_state(&mut self, state: SmState) {
        match state {
            SmState::Started => {}
            SmState::Paired => self.tx.line(ResponseLine::new("SEC").field("PAIRED")),
            SmState::Resumed => self.tx.line(ResponseLine::new("SEC").field("RESUMED")),
            SmState::Failed => self.tx.line(ResponseLine::new("SEC").field("FAILED")),
        }
    }

    // ── ATT server access (OTA routing + AT surface) ──────────

    /// A peer wrote one of our attributes.
    pub fn on_server_write(&mut self, handle: LinkHandle, att_handle: u16, data: &[u8]) {
        if att_handle == self.ota_handles.control {
            if self.ota.control(data) == ControlAction::Reboot {
                self.platform.reset();
            }
            return;
        }
        if att_handle == self.ota_handles.data {
            self.ota.data(data);
            return;
        }
        let index = self.index_of(handle).unwrap_or(0);
        self.tx.line(
            ResponseLine::new("BLEGATTSWR")
                .field(index)
                .field(att_handle)
                .quoted_hex(data),
        );
    }

    /// A peer read one of our attributes. Non-OTA attributes are deferred
    /// to the AT host (`+BLEGATTSRD` request, answered by
    /// `AT+BLEGATTSRD=`).
    pub fn on_server_read(
        &mut self,
        handle: LinkHandle,
        att_handle: u16,
        buf: Option<&mut [u8]>,
    ) -> ReadOutcome {
        if let Some(attr) = self.ota_attr(att_handle) {
            return match buf {
                None => ReadOutcome::Size(self.ota.read(attr, None)),
                Some(buf) => ReadOutcome::Filled(self.ota.read(attr, Some(buf))),
            };
        }
        if buf.is_none() {
            let index = self.index_of(handle).unwrap_or(0);
            self.tx.line(
                ResponseLine::new("BLEGATTSRD")
                    .field(index)
                    .field(att_handle),
            );
        }
        ReadOutcome::Deferred
    }

    fn ota_attr(&self, att_handle: u16) -> Option<OtaAttr> {
        if att_handle == self.ota_handles.control {
            Some(OtaAttr::Control)
        } else if att_handle == self.ota_handles.data {
            Some(OtaAttr::Data)
        } else if att_handle == self.ota_handles.version {
            Some(OtaAttr::Version)
        } else {
            None
        }
    }
}
