//! Line framer.
//!
//! Accumulates raw receive bytes into a single command line, delimiting on
//! CR/LF. This is an explicit single-outstanding-command design, not a
//! queue: once a line is latched the accumulator is busy and every further
//! byte is dropped until the dispatcher releases it.
//!
//! Producer is the receive interrupt context, consumer is the command
//! task; the only coupling is the busy latch plus a wake signal.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::Shared;

/// Input accumulator capacity.
pub const LINE_CAP: usize = 256;

pub type LineBuf = heapless::Vec<u8, LINE_CAP>;

struct Inner {
    buf: LineBuf,
    busy: bool,
}

pub struct LineFramer {
    inner: Shared<Inner>,
    ready: Signal<CriticalSectionRawMutex, ()>,
}

impl LineFramer {
    pub const fn new() -> Self {
        Self {
            inner: Shared::new(core::cell::RefCell::new(Inner {
                buf: LineBuf::new(),
                busy: false,
            })),
            ready: Signal::new(),
        }
    }

    /// Feed raw bytes from the receive path.
    ///
    /// Leading CR/LF bytes are skipped while the accumulator is empty
    /// (terminal line-ending noise between commands). The first CR/LF
    /// after any content latches the line; an append that would overflow
    /// the accumulator discards it entirely instead.
    pub fn feed(&self, data: &[u8]) {
        let mut complete = false;
        self.inner.lock(|cell| {
            let mut inner = cell.borrow_mut();
            for &b in data {
                if inner.busy {
                    return;
                }
                let is_eol = b == b'\r' || b == b'\n';
                if inner.buf.is_empty() {
                    if is_eol {
                        continue;
                    }
                } else if is_eol {
                    inner.busy = true;
                    complete = true;
                    return;
                }
                if inner.buf.push(b).is_err() {
                    inner.buf.clear();
                }
            }
        });
        if complete {
            self.ready.signal(());
        }
    }

    /// Await the next latched line (command-task side).
    pub async fn wait_line(&self) {
        self.ready.wait().await;
    }

    /// Copy out the latched line, if one is pending.
    pub fn take_line(&self) -> Option<LineBuf> {
        self.inner.lock(|cell| {
            let inner = cell.borrow();
            inner.busy.then(|| inner.buf.clone())
        })
    }

    /// Release the accumulator after the command finished; reception
    /// resumes with an empty buffer.
    pub fn release(&self) {
        self.inner.lock(|cell| {
            let mut inner = cell.borrow_mut();
            inner.buf.clear();
            inner.busy = false;
        });
    }

    /// Bytes currently accumulated (not yet latched).
    pub fn pending_len(&self) -> usize {
        self.inner.lock(|cell| cell.borrow().buf.len())
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take_str(f: &LineFramer) -> String {
        String::from_utf8(f.take_line().unwrap().to_vec()).unwrap()
    }

    #[test]
    fn latches_on_cr() {
        let f = LineFramer::new();
        f.feed(b"AT+BLEINIT?\r");
        assert_eq!(take_str(&f), "AT+BLEINIT?");
    }

    #[test]
    fn skips_leading_line_noise() {
        let f = LineFramer::new();
        f.feed(b"\r\n\r\nAT\r\n");
        assert_eq!(take_str(&f), "AT");
    }

    #[test]
    fn drops_bytes_while_busy() {
        let f = LineFramer::new();
        f.feed(b"AT+FIRST\r");
        f.feed(b"AT+SECOND\r");
        assert_eq!(take_str(&f), "AT+FIRST");

        f.release();
        assert_eq!(f.take_line(), None);
        f.feed(b"AT+THIRD\r");
        assert_eq!(take_str(&f), "AT+THIRD");
    }

    #[test]
    fn interior_cr_splits_the_line() {
        let f = LineFramer::new();
        f.feed(b"AT\rREST");
        assert_eq!(take_str(&f), "AT");
    }

    #[test]
    fn overflow_resets_accumulator() {
        let f = LineFramer::new();
        f.feed(&[b'A'; LINE_CAP]);
        assert_eq!(f.pending_len(), LINE_CAP);

        // One more byte would overflow: the whole line is discarded.
        f.feed(b"B");
        assert_eq!(f.pending_len(), 0);
        assert_eq!(f.take_line(), None);

        // Reception recovers on the next clean line.
        f.feed(b"AT\r");
        assert_eq!(take_str(&f), "AT");
    }

    #[test]
    fn partial_feeds_accumulate() {
        let f = LineFramer::new();
        f.feed(b"AT+BLE");
        assert_eq!(f.take_line(), None);
        f.feed(b"ADDR?");
        f.feed(b"\n");
        assert_eq!(take_str(&f), "AT+BLEADDR?");
    }
}
