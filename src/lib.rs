//! BleBridge firmware library.
//!
//! Exposes the pure-logic modules (AT framer/parser/engine, connection
//! registry, stack bridge, OTA state machine) for integration testing and
//! external inspection. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod at;
pub mod bridge;
pub mod config;
pub mod link;
pub mod ota;
pub mod ports;
pub mod worker;

// Hardware glue; the actual implementations are guarded by cfg attributes
// inside, with in-memory simulation backends for host builds.
pub mod adapters;

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

/// State shared between the command-processing context and the stack
/// context. Every lock is a short critical section; neither context ever
/// holds it across a blocking call.
pub type Shared<T> = Mutex<CriticalSectionRawMutex, RefCell<T>>;
