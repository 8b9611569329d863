//! BleBridge firmware — main entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ UART I/O task      command task          stack task        │
//! │ (read/write)  ──▶  framer → engine  ──▶  bridge → worker   │
//! │                        ▲                    │    ▲         │
//! │                        └── transmitter ◀────┘    │         │
//! │                                     Bluedroid events       │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Three execution contexts: the UART I/O thread, the command task and
//! the stack task. All shared state lives in leaked top-level cells with
//! explicit initialization; the stack task is the only place the vendor
//! stack is entered.

use anyhow::Result;
use esp_idf_hal::prelude::*;
use esp_idf_hal::uart::UartDriver;
use log::info;

use blebridge::adapters::ble::{self, StackEvent, VendorStack};
use blebridge::adapters::flash::EspFlash;
use blebridge::adapters::kv::NvsStore;
use blebridge::adapters::platform::EspPlatform;
use blebridge::adapters::timer::EspConnTimer;
use blebridge::adapters::uart;
use blebridge::at::{AtEngine, LineFramer, Transmitter};
use blebridge::bridge::StackBridge;
use blebridge::config::UartSettings;
use blebridge::link::ModemState;
use blebridge::ota::Version;
use blebridge::worker::{OtaHandles, StackWorker};
use blebridge::Shared;

/// GATT handles of the OTA attributes (fixed by the profile database).
const OTA_HANDLES: OtaHandles = OtaHandles {
    version: 0x0010,
    data: 0x0012,
    control: 0x0014,
};

/// Platform (SDK) version reported through the OTA version attribute.
const PLATFORM_VERSION: Version = Version::new(5, 3, 0);

fn main() -> Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("BleBridge v{}", env!("CARGO_PKG_VERSION"));

    // ── Top-level shared cells ────────────────────────────────
    let state: &'static Shared<ModemState> = Box::leak(Box::new(Shared::new(
        core::cell::RefCell::new(ModemState::new()),
    )));
    let bridge: &'static StackBridge = Box::leak(Box::new(StackBridge::new()));
    let tx: &'static Transmitter = Box::leak(Box::new(Transmitter::new()));
    let framer: &'static LineFramer = Box::leak(Box::new(LineFramer::new()));

    // ── Persisted settings ────────────────────────────────────
    let mut store = NvsStore::new().map_err(|e| anyhow::anyhow!("nvs: {e}"))?;
    let settings = UartSettings::load(&mut store);
    info!("uart baud: {}", settings.baud);

    // ── UART I/O task ─────────────────────────────────────────
    let peripherals = Peripherals::take()?;
    let uart_config = esp_idf_hal::uart::config::Config::new().baudrate(settings.baud.Hz());
    let uart_driver = UartDriver::new(
        peripherals.uart0,
        peripherals.pins.gpio43,
        peripherals.pins.gpio44,
        Option::<esp_idf_hal::gpio::AnyIOPin>::None,
        Option::<esp_idf_hal::gpio::AnyIOPin>::None,
        &uart_config,
    )?;
    uart::spawn(uart_driver, framer, tx);

    // ── Command task ──────────────────────────────────────────
    std::thread::Builder::new()
        .name("at-cmd".into())
        .stack_size(8 * 1024)
        .spawn(move || {
            let platform = EspPlatform;
            let mut engine = AtEngine::new(state, bridge, tx, &mut store, &platform, settings);
            futures_lite::future::block_on(engine.run(framer));
        })?;

    // ── BLE bring-up ──────────────────────────────────────────
    // Controller + Bluedroid host are enabled by the board support glue
    // (sdkconfig); here we only hook our callbacks and GATT interfaces.
    ble::register_callbacks().map_err(|e| anyhow::anyhow!("ble callbacks: {e}"))?;
    let mut stack = VendorStack::new(0, 0);
    let mut timer = EspConnTimer::new(bridge)?;
    let mut flash = EspFlash::new();
    let platform = EspPlatform;

    match blebridge::ota::BootRecord::load(&flash) {
        Some(record) => info!(
            "boot record: entry {:#010x}, app v{}",
            record.entry, record.app_version
        ),
        None => info!("boot record: none (first boot)"),
    }

    let mut worker = StackWorker::new(
        state,
        bridge,
        tx,
        &mut stack,
        &mut timer,
        &platform,
        &mut flash,
        PLATFORM_VERSION,
        OTA_HANDLES,
    );

    // Boot is complete; greet the host like a modem.
    tx.ok();

    // ── Stack task (this thread) ──────────────────────────────
    futures_lite::future::block_on(async {
        loop {
            let step = futures_lite::future::or(
                async { Step::Op(bridge.next().await) },
                async { Step::Event(ble::next_event().await) },
            )
            .await;
            match step {
                Step::Op(op) => {
                    worker.process(op);
                    worker.poll();
                }
                Step::Event(event) => dispatch_event(&mut worker, event),
            }
        }
    })
}

enum Step {
    Op(blebridge::bridge::StackOp),
    Event(StackEvent),
}

fn dispatch_event(worker: &mut StackWorker<'_>, event: StackEvent) {
    match event {
        StackEvent::Connected(evt) => worker.on_connection_complete(&evt),
        StackEvent::Disconnected { handle, status } => worker.on_disconnect(handle, status),
        StackEvent::AdvReport(report) => worker.on_adv_report(&report),
        StackEvent::DiscoveryComplete {
            handle,
            services,
            status,
        } => worker.on_discovery_complete(handle, &services, status),
        StackEvent::CharValue { handle, value } => worker.on_char_value(handle, &value),
        StackEvent::ReadComplete {
            handle,
            value_handle,
            status,
        } => worker.on_read_complete(handle, value_handle, status),
        StackEvent::WriteComplete {
            handle,
            value_handle,
            status,
        } => worker.on_write_complete(handle, value_handle, status),
        StackEvent::SubscribeComplete {
            handle,
            desc_handle,
            status,
        } => worker.on_subscribe_complete(handle, desc_handle, status),
        StackEvent::ValueUpdate {
            handle,
            kind,
            value,
        } => worker.on_value_update(handle, kind, &value),
        StackEvent::SmState(state) => worker.on_sm_state(state),
        StackEvent::ServerWrite {
            handle,
            att_handle,
            data,
        } => worker.on_server_write(handle, att_handle, &data),
        StackEvent::ServerReadProbe { handle, att_handle } => {
            let _ = worker.on_server_read(handle, att_handle, None);
        }
        StackEvent::AdvSetTerminated => worker.on_adv_set_terminated(),
    }
}
