//! Response formatting and the shared transmit accumulator.
//!
//! Responses are assembled by a typed [`ResponseLine`] builder with an
//! explicit maximum-length contract, then pushed through the
//! [`Transmitter`]: an output accumulator with append/overflow-reset
//! semantics that flushes complete NUL-terminated lines into a bounded
//! frame channel. The UART write task drains that channel; tests drain it
//! directly.
//!
//! The accumulator is guarded by a short critical section because both
//! the command context and the stack context emit lines.

use core::fmt::Write;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

use crate::Shared;
use crate::at::hex;

/// Output accumulator capacity.
pub const OUT_CAP: usize = 256;

/// Formatted payload capacity of one response line (newline and NUL
/// terminator are added on top, still within [`OUT_CAP`]).
pub const LINE_MAX: usize = 254;

/// Depth of the outbound frame queue.
const FRAME_DEPTH: usize = 16;

pub type TxFrame = heapless::Vec<u8, OUT_CAP>;

// ───────────────────────────────────────────────────────────────
// Response line builder
// ───────────────────────────────────────────────────────────────

/// Builder for one `+NAME:field,field,...` response line.
///
/// Fields are comma-separated automatically. Overflow poisons the line; a
/// poisoned line is dropped (and logged) instead of being sent truncated.
pub struct ResponseLine {
    buf: heapless::String<LINE_MAX>,
    first: bool,
    overflow: bool,
}

impl ResponseLine {
    pub fn new(name: &str) -> Self {
        let mut line = Self {
            buf: heapless::String::new(),
            first: true,
            overflow: false,
        };
        if write!(line.buf, "+{name}:").is_err() {
            line.overflow = true;
        }
        line
    }

    fn sep(&mut self) {
        if self.first {
            self.first = false;
        } else if self.buf.push(',').is_err() {
            self.overflow = true;
        }
    }

    /// Append one display-formatted field.
    pub fn field(mut self, value: impl core::fmt::Display) -> Self {
        self.sep();
        if write!(self.buf, "{value}").is_err() {
            self.overflow = true;
        }
        self
    }

    /// Append a field of bare uppercase hex pairs.
    pub fn hex(mut self, data: &[u8]) -> Self {
        self.sep();
        if hex::encode(&mut self.buf, data).is_err() {
            self.overflow = true;
        }
        self
    }

    /// Append a `"HEX"` field.
    pub fn quoted_hex(mut self, data: &[u8]) -> Self {
        self.sep();
        let ok = self.buf.push('"').is_ok()
            && hex::encode(&mut self.buf, data).is_ok()
            && self.buf.push('"').is_ok();
        if !ok {
            self.overflow = true;
        }
        self
    }

    pub fn as_str(&self) -> &str {
        self.buf.as_str()
    }

    fn is_poisoned(&self) -> bool {
        self.overflow
    }
}

// ───────────────────────────────────────────────────────────────
// Transmitter
// ───────────────────────────────────────────────────────────────

struct OutBuf {
    buf: heapless::Vec<u8, OUT_CAP>,
}

/// Shared transmit path. Every response line ends with `\n` and is paired
/// with a NUL terminator consumed by the sink.
pub struct Transmitter {
    out: Shared<OutBuf>,
    frames: Channel<CriticalSectionRawMutex, TxFrame, FRAME_DEPTH>,
}

impl Transmitter {
    pub const fn new() -> Self {
        Self {
            out: Shared::new(core::cell::RefCell::new(OutBuf {
                buf: heapless::Vec::new(),
            })),
            frames: Channel::new(),
        }
    }

    /// Append raw bytes to the accumulator; a chunk whose last byte is the
    /// NUL terminator completes a line and flushes it. An append that
    /// would overflow discards the accumulator and restarts with this
    /// chunk.
    pub fn send_raw(&self, bytes: &[u8]) {
        let mut flush: Option<TxFrame> = None;
        self.out.lock(|cell| {
            let out = &mut cell.borrow_mut().buf;
            if out.is_empty() && bytes.last() == Some(&0) {
                let mut frame = TxFrame::new();
                if frame.extend_from_slice(bytes).is_ok() {
                    flush = Some(frame);
                }
                return;
            }

            if out.len() + bytes.len() > OUT_CAP {
                out.clear();
            }
            if out.extend_from_slice(bytes).is_err() {
                out.clear();
                return;
            }
            if out.last() == Some(&0) {
                let mut frame = TxFrame::new();
                if frame.extend_from_slice(out).is_ok() {
                    flush = Some(frame);
                }
                out.clear();
            }
        });
        if let Some(frame) = flush {
            self.emit(frame);
        }
    }

    /// Send a completed response line (adds `\n` + NUL).
    pub fn line(&self, line: ResponseLine) {
        if line.is_poisoned() {
            warn!("tx: response line overflowed, dropped");
            return;
        }
        let mut frame = TxFrame::new();
        if frame.extend_from_slice(line.buf.as_bytes()).is_err()
            || frame.push(b'\n').is_err()
            || frame.push(0).is_err()
        {
            warn!("tx: response line overflowed, dropped");
            return;
        }
        self.send_raw(&frame);
    }

    pub fn ok(&self) {
        self.send_raw(b"OK\n\0");
    }

    pub fn error(&self) {
        self.send_raw(b"ERROR\n\0");
    }

    pub fn unknown(&self) {
        self.send_raw(b"ERROR: UNKNOWN\n\0");
    }

    /// Next complete frame for the write task; awaits.
    pub async fn next_frame(&self) -> TxFrame {
        self.frames.receive().await
    }

    /// Non-blocking frame fetch (tests, polling sinks).
    pub fn try_next_frame(&self) -> Option<TxFrame> {
        self.frames.try_receive().ok()
    }

    fn emit(&self, frame: TxFrame) {
        if self.frames.try_send(frame).is_err() {
            warn!("tx: frame queue full, line dropped");
        }
    }
}

impl Default for Transmitter {
    fn default() -> Self {
        Self::new()
    }
}

// ───────────────────────────────────────────────────────────────
// Test support
// ───────────────────────────────────────────────────────────────

/// Drain every pending frame into a printable transcript (one entry per
/// line, NUL terminators stripped). Test-side convenience.
pub fn drain_lines(tx: &Transmitter) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(frame) = tx.try_next_frame() {
        let text: Vec<u8> = frame
            .iter()
            .copied()
            .filter(|&b| b != 0)
            .collect();
        lines.push(String::from_utf8_lossy(&text).into_owned());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_separates_fields() {
        let line = ResponseLine::new("BLEADDR")
            .field(1)
            .field(crate::link::BdAddr([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]));
        assert_eq!(line.as_str(), "+BLEADDR:1,AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn quoted_hex_field() {
        let line = ResponseLine::new("BLEADVDATA").quoted_hex(&[0x02, 0x01, 0x06]);
        assert_eq!(line.as_str(), "+BLEADVDATA:\"020106\"");
    }

    #[test]
    fn empty_field_leaves_adjacent_commas() {
        let line = ResponseLine::new("BLESCAN").field(7).field("").field(3);
        assert_eq!(line.as_str(), "+BLESCAN:7,,3");
    }

    #[test]
    fn ok_line_is_framed_with_nul() {
        let tx = Transmitter::new();
        tx.ok();
        let frame = tx.try_next_frame().unwrap();
        assert_eq!(frame.as_slice(), b"OK\n\0");
    }

    #[test]
    fn line_gets_newline_and_nul() {
        let tx = Transmitter::new();
        tx.line(ResponseLine::new("BLEINIT").field(3));
        let frame = tx.try_next_frame().unwrap();
        assert_eq!(frame.as_slice(), b"+BLEINIT:3\n\0");
    }

    #[test]
    fn partial_raw_chunks_accumulate_until_nul() {
        let tx = Transmitter::new();
        tx.send_raw(b"+SEC:");
        assert!(tx.try_next_frame().is_none());
        tx.send_raw(b"PAIRED\n\0");
        let frame = tx.try_next_frame().unwrap();
        assert_eq!(frame.as_slice(), b"+SEC:PAIRED\n\0");
    }

    #[test]
    fn accumulator_overflow_restarts() {
        let tx = Transmitter::new();
        tx.send_raw(&[b'x'; OUT_CAP]);
        // The next append would overflow: the stale partial line is
        // discarded and the accumulator restarts with this chunk.
        tx.send_raw(b"OK\n\0");
        let frame = tx.try_next_frame().unwrap();
        assert_eq!(frame.as_slice(), b"OK\n\0");
        assert!(tx.try_next_frame().is_none());
    }

    #[test]
    fn oversized_line_is_dropped_not_truncated() {
        let tx = Transmitter::new();
        let mut line = ResponseLine::new("BIG");
        for _ in 0..LINE_MAX {
            line = line.field(123456);
        }
        tx.line(line);
        assert!(tx.try_next_frame().is_none());
    }
}
