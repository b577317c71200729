//! Serial transport

use std::io::{self, Read, Write};
use std::time::Duration;

use nbr14522_core::DEFAULT_BAUD_RATE;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, trace, warn};

use crate::{error::*, Transport};

/// Serial port transport for NBR 14522 meters
///
/// Frames as 8N1 without flow control. Reads never block: the number of
/// pending bytes is queried first and only those are read.
pub struct SerialTransport {
    address: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
    io_timeout: Duration,
}

impl SerialTransport {
    /// Create new serial transport (not yet open)
    pub fn new() -> Self {
        Self {
            address: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            port: None,
            io_timeout: Duration::from_millis(100),
        }
    }

    /// Set the driver-level I/O timeout
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Bit rate of the last `open`
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Discard everything pending in the driver's input buffer
    pub fn clear_input(&mut self) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotOpen)?;
        port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SerialTransport {
    fn open(&mut self, address: &str, baud_rate: u32) -> Result<()> {
        if self.is_open() {
            return Err(Error::AlreadyOpen);
        }

        debug!("Opening {} at {} bit/s...", address, baud_rate);

        let port = serialport::new(address, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.io_timeout)
            .open()
            .map_err(|e| Error::Open {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Opened {}", address);

        self.address = address.to_string();
        self.baud_rate = baud_rate;
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!("Closed {}", self.address);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NotOpen)?;

        trace!("Sending {} bytes: {:02X?}", data.len(), &data[..data.len().min(16)]);

        match Write::write(port, data) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NotOpen)?;

        let pending = port.bytes_to_read()? as usize;
        if pending == 0 || buf.is_empty() {
            return Ok(0);
        }

        let want = pending.min(buf.len());
        let n = match Read::read(port, &mut buf[..want]) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => 0,
            Err(e) => return Err(Error::Io(e)),
        };

        trace!("Received {} bytes: {:02X?}", n, &buf[..n.min(16)]);

        Ok(n)
    }

    fn address(&self) -> String {
        self.address.clone()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if self.is_open() {
            warn!("Serial transport {} dropped while still open", self.address);
        }
    }
}
