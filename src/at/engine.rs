//! Command engine: dispatch plus one handler per AT command.
//!
//! Handlers run in the command-processing context. They read/write the
//! shared modem state under short critical sections and hand every actual
//! radio operation to the stack context through the bridge, replying `OK`
//! optimistically ("accepted for processing"). Operations whose outcome is
//! only known asynchronously reply later from the stack worker.
//!
//! Every handler enforces its own argument contract and emits its own
//! response; the dispatcher adds nothing.

use log::warn;

use crate::Shared;
use crate::at::framer::LineFramer;
use crate::at::parser::{self, ParseError, Request};
use crate::at::response::{ResponseLine, Transmitter};
use crate::at::{hex, table};
use crate::bridge::{PushKind, StackBridge, StackOp, ValueBuf};
use crate::config::UartSettings;
use crate::link::{ADV_DATA_MAX, BdAddr, LinkHandle, MAX_CONN_AS_MASTER, ModemState};
use crate::ports::{PlatformPort, SettingsStore};

pub struct AtEngine<'a> {
    state: &'a Shared<ModemState>,
    bridge: &'a StackBridge,
    tx: &'a Transmitter,
    store: &'a mut dyn SettingsStore,
    platform: &'a dyn PlatformPort,
    settings: UartSettings,
}

impl<'a> AtEngine<'a> {
    pub fn new(
        state: &'a Shared<ModemState>,
        bridge: &'a StackBridge,
        tx: &'a Transmitter,
        store: &'a mut dyn SettingsStore,
        platform: &'a dyn PlatformPort,
        settings: UartSettings,
    ) -> Self {
        Self {
            state,
            bridge,
            tx,
            store,
            platform,
            settings,
        }
    }

    /// Dispatch one complete command line.
    pub fn run_line(&mut self, raw: &[u8]) {
        let Ok(line) = core::str::from_utf8(raw) else {
            self.tx.unknown();
            return;
        };
        match parser::parse(line) {
            Err(ParseError::BadPrefix) => self.tx.unknown(),
            Err(ParseError::TooManyArgs) => self.tx.error(),
            Ok(Request::Empty) => self.tx.ok(),
            Ok(Request::Query { name }) => match table::find(name) {
                Some(cmd) => match cmd.get {
                    Some(handler) => handler(self),
                    None => self.tx.unknown(),
                },
                None => self.tx.unknown(),
            },
            Ok(Request::Set { name, args }) => match table::find(name) {
                Some(cmd) => match cmd.set {
                    Some(handler) => handler(self, &args),
                    None => self.tx.unknown(),
                },
                None => self.tx.unknown(),
            },
        }
    }

    /// Command-task loop: wait for a latched line, run it, release the
    /// framer so reception resumes.
    pub async fn run(&mut self, framer: &LineFramer) -> ! {
        loop {
            framer.wait_line().await;
            if let Some(line) = framer.take_line() {
                self.run_line(&line);
            }
            framer.release();
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ModemState) -> R) -> R {
        self.state.lock(|cell| f(&mut cell.borrow_mut()))
    }

    /// Link handle of a connected registry entry, if any.
    fn handle_for(&self, index: usize) -> Option<LinkHandle> {
        self.with_state(|s| s.registry.handle_of(index))
    }

    /// Post an op and acknowledge, or report the dropped request.
    fn post_acked(&mut self, op: StackOp) {
        if self.bridge.post(op) {
            self.tx.ok();
        } else {
            self.tx.error();
        }
    }

    /// Post an op whose response comes later from the stack context; a
    /// full queue is still a synchronous error.
    fn post_deferred(&mut self, op: StackOp) {
        if !self.bridge.post(op) {
            self.tx.error();
        }
    }
}

fn num<T: core::str::FromStr>(s: &str) -> Option<T> {
    s.parse().ok()
}

fn hex_value(s: &str) -> Option<ValueBuf> {
    let mut buf = [0u8; 128];
    let n = hex::decode(s, &mut buf)?;
    let mut out = ValueBuf::new();
    out.extend_from_slice(&buf[..n]).ok()?;
    Some(out)
}

// ───────────────────────────────────────────────────────────────
// System commands
// ───────────────────────────────────────────────────────────────

/// `AT+RESET` — wipe persisted settings and reboot.
pub(crate) fn get_reset(e: &mut AtEngine<'_>) {
    if e.store.remove_all().is_err() || e.store.commit().is_err() {
        warn!("reset: settings wipe failed, rebooting anyway");
    }
    e.platform.reset();
}

/// `AT+SHUTDOWN` — enter the low-power shutdown state.
pub(crate) fn get_shutdown(e: &mut AtEngine<'_>) {
    e.platform.shutdown();
}

/// `AT+POWERSAVING=<enable>`
pub(crate) fn set_power_saving(e: &mut AtEngine<'_>, args: &[&str]) {
    let Some(enable) = args.first().and_then(|a| num::<u8>(a)) else {
        e.tx.error();
        return;
    };
    e.platform.set_power_saving(enable != 0);
    e.tx.ok();
}

/// `AT+UART=<baud>` — persists and reboots if the baud actually changed.
pub(crate) fn set_uart(e: &mut AtEngine<'_>, args: &[&str]) {
    let Some(baud) = args.first().and_then(|a| num::<u32>(a)) else {
        e.tx.error();
        return;
    };
    if baud == e.settings.baud {
        e.tx.ok();
        return;
    }
    e.settings.baud = baud;
    let saved = e.settings.save(e.store).is_ok() && e.store.commit().is_ok();
    if !saved {
        e.tx.error();
        return;
    }
    e.platform.reset();
}

// ───────────────────────────────────────────────────────────────
// Identity / advertising
// ───────────────────────────────────────────────────────────────

pub(crate) fn get_ble_init(e: &mut AtEngine<'_>) {
    e.tx.line(ResponseLine::new("BLEINIT").field(3));
    e.tx.ok();
}

pub(crate) fn get_ble_addr(e: &mut AtEngine<'_>) {
    let sec = e.with_state(|s| s.security);
    e.tx.line(
        ResponseLine::new("BLEADDR")
            .field(sec.identity_addr_type)
            .field(sec.identity_addr),
    );
    e.tx.ok();
}

/// `AT+BLEADDR=<addr_type>,<random_addr>` — only the random type (1) is
/// settable.
pub(crate) fn set_ble_addr(e: &mut AtEngine<'_>, args: &[&str]) {
    if args.len() != 2 || args[0] != "1" {
        e.tx.error();
        return;
    }
    let Some(addr) = num::<BdAddr>(args[1]) else {
        e.tx.error();
        return;
    };
    e.with_state(|s| s.security.identity_addr = addr);
    e.post_acked(StackOp::RefreshAddress);
}

pub(crate) fn get_ble_adv_param(e: &mut AtEngine<'_>) {
    let adv = e.with_state(|s| s.adv.clone());
    e.tx.line(
        ResponseLine::new("BLEADVPARAM")
            .field(adv.int_min)
            .field(adv.int_max)
            .field(adv.adv_type)
            .field(adv.own_addr_type)
            .field(adv.channel_map)
            .field(adv.filter_policy)
            .field(adv.peer_addr_type)
            .field(adv.peer_addr)
            .field(adv.tx_power),
    );
    e.tx.ok();
}

pub(crate) fn set_ble_adv_param(e: &mut AtEngine<'_>, args: &[&str]) {
    if args.len() < 9 {
        e.tx.error();
        return;
    }
    let parsed = (
        num::<u32>(args[0]),
        num::<u32>(args[1]),
        num::<u8>(args[2]),
        num::<u8>(args[3]),
        num::<u8>(args[4]),
        num::<u8>(args[5]),
        num::<u8>(args[6]),
        num::<BdAddr>(args[7]),
        num::<i8>(args[8]),
    );
    let (
        Some(int_min),
        Some(int_max),
        Some(adv_type),
        Some(own_addr_type),
        Some(channel_map),
        Some(filter_policy),
        Some(peer_addr_type),
        Some(peer_addr),
        Some(tx_power),
    ) = parsed
    else {
        e.tx.error();
        return;
    };
    e.with_state(|s| {
        let adv = &mut s.adv;
        adv.int_min = int_min;
        adv.int_max = int_max;
        adv.adv_type = adv_type;
        adv.own_addr_type = own_addr_type;
        adv.channel_map = channel_map;
        adv.filter_policy = filter_policy;
        adv.peer_addr_type = peer_addr_type;
        adv.peer_addr = peer_addr;
        adv.tx_power = tx_power;
    });
    e.tx.ok();
}

pub(crate) fn get_ble_adv_data(e: &mut AtEngine<'_>) {
    let data = e.with_state(|s| s.adv.adv_data.clone());
    e.tx.line(ResponseLine::new("BLEADVDATA").quoted_hex(&data));
}

pub(crate) fn set_ble_adv_data(e: &mut AtEngine<'_>, args: &[&str]) {
    set_adv_payload(e, args, |s, payload| s.adv.adv_data = payload);
}

pub(crate) fn get_ble_scan_rsp_data(e: &mut AtEngine<'_>) {
    let data = e.with_state(|s| s.adv.scan_rsp_data.clone());
    e.tx.line(ResponseLine::new("BLESCANRSPDATA").quoted_hex(&data));
}

pub(crate) fn set_ble_scan_rsp_data(e: &mut AtEngine<'_>, args: &[&str]) {
    set_adv_payload(e, args, |s, payload| s.adv.scan_rsp_data = payload);
}

fn set_adv_payload(
    e: &mut AtEngine<'_>,
    args: &[&str],
    apply: impl FnOnce(&mut ModemState, heapless::Vec<u8, ADV_DATA_MAX>),
) {
    let Some(arg) = args.first() else {
        e.tx.error();
        return;
    };
    let mut buf = [0u8; ADV_DATA_MAX];
    let Some(n) = hex::decode(arg, &mut buf) else {
        e.tx.error();
        return;
    };
    let mut payload = heapless::Vec::new();
    let _ = payload.extend_from_slice(&buf[..n]);
    e.with_state(|s| apply(s, payload));
    e.tx.ok();
}

pub(crate) fn get_ble_adv_start(e: &mut AtEngine<'_>) {
    e.with_state(|s| s.adv.advertising = true);
    e.post_acked(StackOp::AdvStart);
}

pub(crate) fn get_ble_adv_stop(e: &mut AtEngine<'_>) {
    e.with_state(|s| s.adv.advertising = false);
    e.post_acked(StackOp::AdvStop);
}

// ───────────────────────────────────────────────────────────────
// Scanning
// ───────────────────────────────────────────────────────────────

pub(crate) fn get_ble_scan_param(e: &mut AtEngine<'_>) {
    let scan = e.with_state(|s| s.scan.clone());
    e.tx.line(
        ResponseLine::new("BLESCANPARAM")
            .field(scan.scan_type)
            .field(scan.own_addr_type)
            .field(scan.filter_policy)
            .field(scan.interval)
            .field(scan.window),
    );
    e.tx.ok();
}

pub(crate) fn set_ble_scan_param(e: &mut AtEngine<'_>, args: &[&str]) {
    if args.len() < 5 {
        e.tx.error();
        return;
    }
    let (Some(scan_type), Some(own), Some(policy), Some(interval), Some(window)) = (
        num::<u8>(args[0]),
        num::<u8>(args[1]),
        num::<u8>(args[2]),
        num::<u16>(args[3]),
        num::<u16>(args[4]),
    ) else {
        e.tx.error();
        return;
    };
    e.with_state(|s| {
        s.scan.scan_type = scan_type;
        s.scan.own_addr_type = own;
        s.scan.filter_policy = policy;
        s.scan.interval = interval;
        s.scan.window = window;
    });
    e.tx.ok();
}

/// `AT+BLESCAN=<enable>[,<interval>[,<filter_type>[,<filter_addr>]]]`
pub(crate) fn set_ble_scan(e: &mut AtEngine<'_>, args: &[&str]) {
    let Some(enable) = args.first().and_then(|a| num::<u8>(a)) else {
        e.tx.error();
        return;
    };
    let duration = match args.get(1) {
        Some(a) => match num::<u16>(a) {
            Some(v) => Some(v),
            None => {
                e.tx.error();
                return;
            }
        },
        None => None,
    };
    let filter_type = match args.get(2) {
        Some(a) => match num::<u8>(a) {
            Some(v) if v <= 1 => Some(v),
            _ => {
                e.tx.error();
                return;
            }
        },
        None => None,
    };
    let filter_addr = match args.get(3) {
        Some(a) => match num::<BdAddr>(a) {
            Some(v) => Some(v),
            None => {
                e.tx.error();
                return;
            }
        },
        None => None,
    };

    e.with_state(|s| {
        s.scan.scanning = enable != 0;
        if let Some(d) = duration {
            s.scan.duration = d;
        }
        if let Some(t) = filter_type {
            s.scan.filter_type = t;
        }
        if let Some(a) = filter_addr {
            s.scan.filter_addr = a;
        }
    });
    e.post_acked(StackOp::ScanEnable(enable != 0));
}

// ───────────────────────────────────────────────────────────────
// Connections
// ───────────────────────────────────────────────────────────────

pub(crate) fn get_ble_conn(e: &mut AtEngine<'_>) {
    e.with_state(|s| {
        for (idx, entry) in s.registry.iter_connected() {
            e.tx.line(
                ResponseLine::new("BLECONN")
                    .field(idx)
                    .field(entry.peer_addr),
            );
        }
    });
    e.tx.ok();
}

/// `AT+BLECONN=<conn_index>,<remote_address>[,<addr_type>[,<timeout>]]`
pub(crate) fn set_ble_conn(e: &mut AtEngine<'_>, args: &[&str]) {
    if e.with_state(|s| s.initiating.is_some()) {
        // Only one connection attempt at a time.
        e.tx.error();
        return;
    }
    if args.len() < 2 {
        e.tx.error();
        return;
    }
    let Some(index) = num::<usize>(args[0]) else {
        e.tx.error();
        return;
    };
    if index >= MAX_CONN_AS_MASTER {
        e.tx.error();
        return;
    }
    let Some(addr) = num::<BdAddr>(args[1]) else {
        e.tx.error();
        return;
    };
    let addr_type = match args.get(2) {
        Some(a) => match num::<u8>(a) {
            Some(v) => Some(v),
            None => {
                e.tx.error();
                return;
            }
        },
        None => None,
    };
    let timeout = match args.get(3) {
        Some(a) => match num::<u16>(a) {
            Some(v) => Some(v),
            None => {
                e.tx.error();
                return;
            }
        },
        None => None,
    };

    e.with_state(|s| {
        if let Some(entry) = s.registry.entry_mut(index) {
            entry.peer_addr = addr;
            if let Some(t) = addr_type {
                entry.peer_addr_type = t;
            }
        }
        if let Some(t) = timeout {
            s.conn_timeout_secs = t;
        }
    });
    e.post_acked(StackOp::Initiate { index });
}

pub(crate) fn get_ble_conn_param(e: &mut AtEngine<'_>) {
    e.with_state(|s| {
        for (idx, entry) in s.registry.iter_connected() {
            e.tx.line(
                ResponseLine::new("BLECONNPARAM")
                    .field(idx)
                    .field(entry.min_interval)
                    .field(entry.max_interval)
                    .field(entry.cur_interval)
                    .field(entry.latency)
                    .field(entry.timeout),
            );
        }
    });
}

pub(crate) fn set_ble_conn_param(e: &mut AtEngine<'_>, args: &[&str]) {
    if args.len() < 5 {
        e.tx.error();
        return;
    }
    let (Some(index), Some(min), Some(max), Some(latency), Some(timeout)) = (
        num::<usize>(args[0]),
        num::<u16>(args[1]),
        num::<u16>(args[2]),
        num::<u16>(args[3]),
        num::<u16>(args[4]),
    ) else {
        e.tx.error();
        return;
    };
    let handle = e.with_state(|s| {
        let handle = s.registry.handle_of(index)?;
        let entry = s.registry.entry_mut(index)?;
        entry.min_interval = min;
        entry.max_interval = max;
        entry.latency = latency;
        entry.timeout = timeout;
        Some(handle)
    });
    match handle {
        Some(handle) => e.post_acked(StackOp::UpdateConnParams { handle }),
        None => e.tx.error(),
    }
}

pub(crate) fn set_ble_disconn(e: &mut AtEngine<'_>, args: &[&str]) {
    let Some(index) = args.first().and_then(|a| num::<usize>(a)) else {
        e.tx.error();
        return;
    };
    match e.handle_for(index) {
        Some(handle) => e.post_acked(StackOp::Disconnect { handle }),
        None => e.tx.error(),
    }
}

// ───────────────────────────────────────────────────────────────
// GATT client
// ───────────────────────────────────────────────────────────────

/// `AT+BLEGATTC=<conn_index>` — full service discovery.
pub(crate) fn set_ble_gattc(e: &mut AtEngine<'_>, args: &[&str]) {
    let Some(index) = args.first().and_then(|a| num::<usize>(a)) else {
        e.tx.error();
        return;
    };
    let started = e.with_state(|s| {
        let Some(entry) = s.registry.entry_mut(index) else {
            return false;
        };
        if entry.handle.is_none() || entry.discovering {
            return false;
        }
        entry.discovering = true;
        true
    });
    if !started {
        e.tx.error();
        return;
    }
    if e.bridge.post(StackOp::DiscoverAll { index }) {
        e.tx.ok();
    } else {
        e.with_state(|s| {
            if let Some(entry) = s.registry.entry_mut(index) {
                entry.discovering = false;
            }
        });
        e.tx.error();
    }
}

/// `AT+BLEGATTCRD=<conn_index>,<handle>` — result arrives asynchronously.
pub(crate) fn set_ble_gattc_read(e: &mut AtEngine<'_>, args: &[&str]) {
    if args.len() < 2 {
        e.tx.error();
        return;
    }
    let (Some(index), Some(value_handle)) = (num::<usize>(args[0]), num::<u16>(args[1])) else {
        e.tx.error();
        return;
    };
    match e.handle_for(index) {
        Some(handle) => e.post_deferred(StackOp::ReadChar {
            handle,
            value_handle,
        }),
        None => e.tx.error(),
    }
}

/// `AT+BLEGATTCWR=<conn_index>,<handle>,<value>`
pub(crate) fn set_ble_gattc_write(e: &mut AtEngine<'_>, args: &[&str]) {
    if args.len() < 3 {
        e.tx.error();
        return;
    }
    let (Some(index), Some(value_handle), Some(data)) = (
        num::<usize>(args[0]),
        num::<u16>(args[1]),
        hex_value(args[2]),
    ) else {
        e.tx.error();
        return;
    };
    match e.handle_for(index) {
        Some(handle) => e.post_deferred(StackOp::WriteChar {
            handle,
            value_handle,
            data,
        }),
        None => e.tx.error(),
    }
}

/// `AT+BLEGATTCSUB=<conn_index>,<handle>,<config>[,<desc_handle>]`
pub(crate) fn set_ble_gattc_sub(e: &mut AtEngine<'_>, args: &[&str]) {
    if args.len() < 3 {
        e.tx.error();
        return;
    }
    let (Some(index), Some(value_handle), Some(config)) = (
        num::<usize>(args[0]),
        num::<u16>(args[1]),
        num::<u16>(args[2]),
    ) else {
        e.tx.error();
        return;
    };
    let desc_handle = match args.get(3) {
        Some(a) => match num::<u16>(a) {
            Some(v) => Some(v),
            None => {
                e.tx.error();
                return;
            }
        },
        None => None,
    };

    let staged = e.with_state(|s| {
        if s.registry.handle_of(index).is_none() {
            return false;
        }
        let Some(sub) = s.registry.upsert_subscription(index, value_handle) else {
            return false;
        };
        if let Some(d) = desc_handle {
            sub.desc_handle = d;
        }
        sub.config = config;
        true
    });
    if !staged {
        e.tx.error();
        return;
    }
    e.post_acked(StackOp::Subscribe {
        index,
        value_handle,
    });
}

// ───────────────────────────────────────────────────────────────
// GATT server
// ───────────────────────────────────────────────────────────────

/// `AT+BLEGATTSRD=<conn_index>,<att_handle>,<hex_data>` — answer a
/// deferred server read; the outcome line comes from the stack context.
pub(crate) fn set_ble_gatts_read(e: &mut AtEngine<'_>, args: &[&str]) {
    if args.len() != 3 {
        e.tx.error();
        return;
    }
    let (Some(index), Some(value_handle), Some(data)) = (
        num::<usize>(args[0]),
        num::<u16>(args[1]),
        hex_value(args[2]),
    ) else {
        e.tx.error();
        return;
    };
    if e.handle_for(index).is_none() {
        e.tx.error();
        return;
    }
    e.post_deferred(StackOp::ServerReadReply {
        index,
        value_handle,
        data,
    });
}

/// `AT+BLEGATTSWR=<conn_index>,<att_handle>,<mode>,<hex_data>` — push a
/// notification (mode 0) or indication (mode 1) to the peer.
pub(crate) fn set_ble_gatts_write(e: &mut AtEngine<'_>, args: &[&str]) {
    if args.len() != 4 {
        e.tx.error();
        return;
    }
    let (Some(index), Some(value_handle), Some(mode), Some(data)) = (
        num::<usize>(args[0]),
        num::<u16>(args[1]),
        num::<u8>(args[2]),
        hex_value(args[3]),
    ) else {
        e.tx.error();
        return;
    };
    if e.handle_for(index).is_none() {
        e.tx.error();
        return;
    }
    let kind = if mode == 0 {
        PushKind::Notify
    } else {
        PushKind::Indicate
    };
    e.post_deferred(StackOp::ServerPush {
        index,
        value_handle,
        kind,
        data,
    });
}

// ───────────────────────────────────────────────────────────────
// Security
// ───────────────────────────────────────────────────────────────

/// `AT+BLESECPARAM=<enable>,<auth_req>,<io_cap>`
pub(crate) fn set_ble_sec_param(e: &mut AtEngine<'_>, args: &[&str]) {
    if args.len() < 3 {
        e.tx.error();
        return;
    }
    let (Some(enable), Some(auth_req), Some(io_capability)) = (
        num::<u8>(args[0]),
        num::<u8>(args[1]),
        num::<u8>(args[2]),
    ) else {
        e.tx.error();
        return;
    };
    e.with_state(|s| s.security.auth_req = auth_req);
    e.post_acked(StackOp::ConfigureSecurity {
        enable: enable != 0,
        io_capability,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::kv::MemStore;
    use crate::adapters::platform::SimPlatform;
    use crate::at::response::drain_lines;
    use crate::link::PendingConnect;

    struct Fixture {
        state: Shared<ModemState>,
        bridge: StackBridge,
        tx: Transmitter,
        store: MemStore,
        platform: SimPlatform,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                state: Shared::new(core::cell::RefCell::new(ModemState::new())),
                bridge: StackBridge::new(),
                tx: Transmitter::new(),
                store: MemStore::new(),
                platform: SimPlatform::new(),
            }
        }

        fn run(&mut self, line: &str) -> Vec<String> {
            let mut engine = AtEngine::new(
                &self.state,
                &self.bridge,
                &self.tx,
                &mut self.store,
                &self.platform,
                UartSettings::default(),
            );
            engine.run_line(line.as_bytes());
            drain_lines(&self.tx)
        }
    }

    #[test]
    fn bare_at_is_ok() {
        let mut f = Fixture::new();
        assert_eq!(f.run("AT"), vec!["OK\n"]);
    }

    #[test]
    fn unknown_command() {
        let mut f = Fixture::new();
        assert_eq!(f.run("AT+NOPE?"), vec!["ERROR: UNKNOWN\n"]);
    }

    #[test]
    fn query_on_set_only_command_is_unknown() {
        let mut f = Fixture::new();
        assert_eq!(f.run("AT+BLESCAN?"), vec!["ERROR: UNKNOWN\n"]);
    }

    #[test]
    fn ble_init_query() {
        let mut f = Fixture::new();
        assert_eq!(f.run("AT+BLEINIT?"), vec!["+BLEINIT:3\n", "OK\n"]);
    }

    #[test]
    fn ble_addr_query_reports_identity() {
        let mut f = Fixture::new();
        f.state.lock(|c| {
            c.borrow_mut().security.identity_addr =
                BdAddr([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        });
        assert_eq!(
            f.run("AT+BLEADDR?"),
            vec!["+BLEADDR:1,AA:BB:CC:DD:EE:FF\n", "OK\n"]
        );
    }

    #[test]
    fn ble_addr_set_posts_refresh() {
        let mut f = Fixture::new();
        assert_eq!(f.run("AT+BLEADDR=1,11:22:33:44:55:66"), vec!["OK\n"]);
        assert_eq!(f.bridge.try_next(), Some(StackOp::RefreshAddress));
        let addr = f.state.lock(|c| c.borrow().security.identity_addr);
        assert_eq!(addr.to_string(), "11:22:33:44:55:66");
    }

    #[test]
    fn ble_addr_set_rejects_public_type() {
        let mut f = Fixture::new();
        assert_eq!(f.run("AT+BLEADDR=0,11:22:33:44:55:66"), vec!["ERROR\n"]);
    }

    #[test]
    fn adv_data_round_trip() {
        let mut f = Fixture::new();
        assert_eq!(f.run("AT+BLEADVDATA=\"0201060302030405\""), vec!["OK\n"]);
        assert_eq!(
            f.run("AT+BLEADVDATA?"),
            vec!["+BLEADVDATA:\"0201060302030405\"\n"]
        );
    }

    #[test]
    fn adv_data_rejects_bad_hex_and_oversize() {
        let mut f = Fixture::new();
        assert_eq!(f.run("AT+BLEADVDATA=\"01020Z\""), vec!["ERROR\n"]);
        // 32 bytes exceeds the 31-byte legacy payload.
        let long = "00".repeat(32);
        assert_eq!(f.run(&format!("AT+BLEADVDATA=\"{long}\"")), vec!["ERROR\n"]);
    }

    #[test]
    fn adv_start_sets_flag_and_posts() {
        let mut f = Fixture::new();
        assert_eq!(f.run("AT+BLEADVSTART"), vec!["OK\n"]);
        assert!(f.state.lock(|c| c.borrow().adv.advertising));
        assert_eq!(f.bridge.try_next(), Some(StackOp::AdvStart));
    }

    #[test]
    fn uart_same_baud_is_plain_ok() {
        let mut f = Fixture::new();
        assert_eq!(f.run("AT+UART=115200"), vec!["OK\n"]);
        assert_eq!(f.platform.resets.get(), 0);
    }

    #[test]
    fn uart_new_baud_persists_and_reboots() {
        let mut f = Fixture::new();
        assert_eq!(f.run("AT+UART=921600"), Vec::<String>::new());
        assert_eq!(f.platform.resets.get(), 1);
        assert_eq!(f.store.commits(), 1);
    }

    #[test]
    fn reset_wipes_and_reboots() {
        let mut f = Fixture::new();
        f.run("AT+UART=115200"); // no-op write
        assert_eq!(f.run("AT+RESET"), Vec::<String>::new());
        assert_eq!(f.platform.resets.get(), 1);
        assert!(f.store.is_empty());
    }

    #[test]
    fn conn_index_bound_enforced() {
        let mut f = Fixture::new();
        let line = format!("AT+BLECONN={MAX_CONN_AS_MASTER},11:22:33:44:55:66");
        assert_eq!(f.run(&line), vec!["ERROR\n"]);
        assert_eq!(f.bridge.try_next(), None);
    }

    #[test]
    fn conn_set_stages_peer_and_posts_initiate() {
        let mut f = Fixture::new();
        assert_eq!(f.run("AT+BLECONN=2,11:22:33:44:55:66,1,10"), vec!["OK\n"]);
        assert_eq!(f.bridge.try_next(), Some(StackOp::Initiate { index: 2 }));
        f.state.lock(|c| {
            let s = c.borrow();
            assert_eq!(s.conn_timeout_secs, 10);
            assert_eq!(
                s.registry.entry(2).unwrap().peer_addr.to_string(),
                "11:22:33:44:55:66"
            );
        });
    }

    #[test]
    fn second_conn_while_initiating_is_error() {
        let mut f = Fixture::new();
        f.state
            .lock(|c| c.borrow_mut().initiating = Some(PendingConnect { index: 0 }));
        assert_eq!(f.run("AT+BLECONN=1,11:22:33:44:55:66"), vec!["ERROR\n"]);
    }

    #[test]
    fn disconn_requires_connected_entry() {
        let mut f = Fixture::new();
        assert_eq!(f.run("AT+BLEDISCONN=0"), vec!["ERROR\n"]);

        f.state.lock(|c| {
            c.borrow_mut()
                .registry
                .reserve_slave(0x40, 1, BdAddr([1, 2, 3, 4, 5, 6]))
                .unwrap();
        });
        let idx = MAX_CONN_AS_MASTER;
        assert_eq!(f.run(&format!("AT+BLEDISCONN={idx}")), vec!["OK\n"]);
        assert_eq!(
            f.bridge.try_next(),
            Some(StackOp::Disconnect { handle: 0x40 })
        );
    }

    #[test]
    fn gattc_discovery_is_single_flight() {
        let mut f = Fixture::new();
        f.state.lock(|c| {
            c.borrow_mut()
                .registry
                .reserve_slave(0x40, 1, BdAddr([1, 2, 3, 4, 5, 6]))
                .unwrap();
        });
        let idx = MAX_CONN_AS_MASTER;
        assert_eq!(f.run(&format!("AT+BLEGATTC={idx}")), vec!["OK\n"]);
        assert_eq!(f.run(&format!("AT+BLEGATTC={idx}")), vec!["ERROR\n"]);
    }

    #[test]
    fn gattc_write_carries_decoded_payload() {
        let mut f = Fixture::new();
        f.state.lock(|c| {
            c.borrow_mut()
                .registry
                .reserve_slave(0x40, 1, BdAddr([1, 2, 3, 4, 5, 6]))
                .unwrap();
        });
        let idx = MAX_CONN_AS_MASTER;
        // Deferred: no synchronous response line.
        assert_eq!(
            f.run(&format!("AT+BLEGATTCWR={idx},33,DEADBEEF")),
            Vec::<String>::new()
        );
        match f.bridge.try_next() {
            Some(StackOp::WriteChar {
                handle,
                value_handle,
                data,
            }) => {
                assert_eq!(handle, 0x40);
                assert_eq!(value_handle, 33);
                assert_eq!(data.as_slice(), &[0xDE, 0xAD, 0xBE, 0xEF]);
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn gattc_sub_defaults_descriptor_handle() {
        let mut f = Fixture::new();
        f.state.lock(|c| {
            c.borrow_mut()
                .registry
                .reserve_slave(0x40, 1, BdAddr([1, 2, 3, 4, 5, 6]))
                .unwrap();
        });
        let idx = MAX_CONN_AS_MASTER;
        assert_eq!(f.run(&format!("AT+BLEGATTCSUB={idx},48,1")), vec!["OK\n"]);
        f.state.lock(|c| {
            let s = c.borrow();
            let sub = s.registry.subscription(idx, 48).unwrap();
            assert_eq!(sub.desc_handle, 49);
            assert_eq!(sub.config, 1);
        });
    }

    #[test]
    fn insufficient_args_is_error_not_crash() {
        let mut f = Fixture::new();
        assert_eq!(f.run("AT+BLECONNPARAM=1,2"), vec!["ERROR\n"]);
        assert_eq!(f.run("AT+BLESECPARAM=1"), vec!["ERROR\n"]);
        assert_eq!(f.run("AT+UART="), vec!["ERROR\n"]);
    }

    #[test]
    fn sec_param_updates_auth_req() {
        let mut f = Fixture::new();
        assert_eq!(f.run("AT+BLESECPARAM=1,5,3"), vec!["OK\n"]);
        assert_eq!(f.state.lock(|c| c.borrow().security.auth_req), 5);
        assert_eq!(
            f.bridge.try_next(),
            Some(StackOp::ConfigureSecurity {
                enable: true,
                io_capability: 3
            })
        );
    }
}
