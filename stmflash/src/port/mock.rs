//! Scripted in-memory port for driving the protocol in tests.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;

/// Modem-control line identifier for the transition log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    /// Data Terminal Ready.
    Dtr,
    /// Request To Send.
    Rts,
}

type ReplyRule = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

/// In-memory [`Port`] with queued responses and write-triggered replies.
///
/// Reads pop from an internal byte queue; an empty queue behaves like a
/// real serial port read timing out (`ErrorKind::TimedOut` after a short
/// pause). `delay_reads` makes the first N reads time out even while data
/// is queued, emulating device response latency.
pub struct MockPort {
    rx: VecDeque<u8>,
    delay_reads: usize,
    on_write: Option<ReplyRule>,
    /// Every write, flattened in order.
    pub written: Vec<u8>,
    /// DTR/RTS transitions in the order they were driven.
    pub modem_log: Vec<(Line, bool)>,
    timeout: Duration,
    baud_rate: u32,
}

impl MockPort {
    /// Port with an empty receive queue; every read times out.
    pub fn new() -> Self {
        Self {
            rx: VecDeque::new(),
            delay_reads: 0,
            on_write: None,
            written: Vec::new(),
            modem_log: Vec::new(),
            timeout: Duration::from_millis(50),
            baud_rate: 115_200,
        }
    }

    /// Port that already holds `bytes` in its receive queue.
    pub fn with_response(bytes: &[u8]) -> Self {
        let mut port = Self::new();
        port.rx.extend(bytes);
        port
    }

    /// Port that serves `bytes` only after `delay_reads` timed-out reads.
    pub fn delayed(bytes: &[u8], delay_reads: usize) -> Self {
        let mut port = Self::with_response(bytes);
        port.delay_reads = delay_reads;
        port
    }

    /// Port whose receive queue is fed by `rule` on every write.
    pub fn with_reply_rule<F>(rule: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        let mut port = Self::new();
        port.on_write = Some(Box::new(rule));
        port
    }

    /// Queue more response bytes.
    pub fn queue(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.rx.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.modem_log.push((Line::Dtr, level));
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.modem_log.push((Line::Rts, level));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.delay_reads > 0 || self.rx.is_empty() {
            self.delay_reads = self.delay_reads.saturating_sub(1);
            // Pace the caller's poll loop the way a blocking read would.
            thread::sleep(Duration::from_millis(2));
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "mock read timed out",
            ));
        }

        let n = buf.len().min(self.rx.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.rx.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.written.extend_from_slice(buf);
        if let Some(ref mut rule) = self.on_write {
            let reply = rule(buf);
            self.rx.extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
