//! AT command subsystem.
//!
//! ```text
//! UART bytes ─▶ framer ─▶ parser ─▶ table ─▶ engine handler
//!                                              │
//!                      transmitter ◀── response lines
//! ```
//!
//! The framer runs in the receive context, the engine in the command task;
//! exactly one command is in flight at a time (the framer's busy latch is
//! the backpressure policy).

pub mod engine;
pub mod framer;
pub mod hex;
pub mod parser;
pub mod response;
pub mod table;

pub use engine::AtEngine;
pub use framer::LineFramer;
pub use response::Transmitter;
