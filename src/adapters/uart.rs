//! UART I/O task (ESP-IDF only).
//!
//! A dedicated thread runs a small async executor with two futures:
//!
//! 1. **Read** — polls the UART driver every 1 ms via a reactor timer and
//!    feeds received bytes straight into the line framer.
//! 2. **Write** — truly async: wakes when the transmitter flushes a
//!    complete frame, strips the NUL terminator and writes the line out.
//!
//! The reactor timers are wake-based (no busy spinning), so the write
//! future is serviced between read polls.

use core::time::Duration;

use esp_idf_hal::uart::UartDriver;
use log::{info, warn};

use crate::at::framer::LineFramer;
use crate::at::response::Transmitter;

const READ_BUF_SIZE: usize = 64;

async fn read_loop(uart: &UartDriver<'static>, framer: &'static LineFramer) {
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        match uart.read(&mut buf, 0) {
            Ok(0) => {}
            Ok(n) => framer.feed(&buf[..n]),
            Err(e) => warn!("uart: read error: {e}"),
        }
        async_io_mini::Timer::after(Duration::from_millis(1)).await;
    }
}

async fn write_loop(uart: &UartDriver<'static>, tx: &'static Transmitter) {
    loop {
        let frame = tx.next_frame().await;
        // The NUL pairing is consumed here; the wire carries the line and
        // its newline only.
        let line = match frame.split_last() {
            Some((0, line)) => line,
            _ => &frame[..],
        };
        if let Err(e) = uart.write(line) {
            warn!("uart: write error: {e}");
        }
    }
}

fn run_io_loop(
    uart: UartDriver<'static>,
    framer: &'static LineFramer,
    tx: &'static Transmitter,
) {
    let executor: edge_executor::LocalExecutor<'_, 4> = edge_executor::LocalExecutor::new();
    let uart = &uart;

    executor.spawn(read_loop(uart, framer)).detach();
    executor.spawn(write_loop(uart, tx)).detach();

    info!("uart: I/O task started");
    futures_lite::future::block_on(executor.run(core::future::pending::<()>()));
}

/// Spawn the UART I/O task in its own thread.
pub fn spawn(
    uart: UartDriver<'static>,
    framer: &'static LineFramer,
    tx: &'static Transmitter,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("at-uart".into())
        .stack_size(8 * 1024)
        .spawn(move || run_io_loop(uart, framer, tx))
        .expect("spawn uart io thread")
}
