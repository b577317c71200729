//! Transport layer for NBR 14522 readers
//!
//! Provides the byte link and deadline capabilities consumed by the
//! reader state machine, a serial port implementation, and deterministic
//! simulated doubles for driving the protocol without hardware.

pub mod error;
pub mod serial;
pub mod sim;
pub mod timer;

pub use error::{Error, Result};
pub use serial::SerialTransport;
pub use sim::{ManualTimer, SimulatedTransport};
pub use timer::MonotonicTimer;

use std::time::Duration;

/// Byte link to a meter
///
/// Both `read` and `write` must return immediately: `read` hands back
/// whatever is pending right now (possibly nothing), `write` reports how
/// many bytes were actually queued.
pub trait Transport: Send {
    /// Open the link
    fn open(&mut self, address: &str, baud_rate: u32) -> Result<()>;

    /// Close the link
    fn close(&mut self) -> Result<()>;

    /// Check if open
    fn is_open(&self) -> bool;

    /// Send raw bytes, returning the count written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Receive up to `buf.len()` pending bytes, returning the count read
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Get link address
    fn address(&self) -> String;
}

/// One-shot deadline measured against a monotonic clock
pub trait Timer: Send {
    /// Start counting `duration` from now
    fn arm(&mut self, duration: Duration);

    /// Check if the armed duration has elapsed
    fn expired(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self, address: &str, baud_rate: u32) -> Result<()> {
        (**self).open(address, baud_rate)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn address(&self) -> String {
        (**self).address()
    }
}

impl<T: Timer + ?Sized> Timer for Box<T> {
    fn arm(&mut self, duration: Duration) {
        (**self).arm(duration)
    }

    fn expired(&self) -> bool {
        (**self).expired()
    }
}
