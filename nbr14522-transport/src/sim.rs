//! Simulated transport and timer
//!
//! Deterministic doubles used to drive every branch of the reader without
//! hardware. Both types are cheap cloneable handles over shared state, so a
//! test keeps one clone while the state machine owns the other.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use nbr14522_core::Signal;
use parking_lot::Mutex;
use tracing::trace;

use crate::{error::*, Timer, Transport};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

/// In-memory link to a scripted meter
#[derive(Clone)]
pub struct SimulatedTransport {
    inner: Arc<Mutex<SimInner>>,
}

struct SimInner {
    address: String,
    open: bool,
    /// Bytes the meter has sent and the reader has not read yet
    rx: BytesMut,
    /// Everything the reader wrote, in order
    tx: Vec<u8>,
    /// Maximum bytes handed out per read (0 = unlimited)
    fragment: usize,
    /// Remaining writes that report zero bytes sent
    failed_writes: usize,
    /// Empty reads after which the meter polls with ENQ (0 = never)
    idle_enq: usize,
    idle_reads: usize,
    responder: Option<Responder>,
}

impl SimulatedTransport {
    /// Create an open simulated link with nothing pending
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimInner {
                address: "sim".to_string(),
                open: true,
                rx: BytesMut::new(),
                tx: Vec::new(),
                fragment: 0,
                failed_writes: 0,
                idle_enq: 0,
                idle_reads: 0,
                responder: None,
            })),
        }
    }

    /// Install a meter model called with every write; its return value is
    /// queued as meter output
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        self.inner.lock().responder = Some(Box::new(responder));
        self
    }

    /// Queue bytes as if sent by the meter
    pub fn feed(&self, data: &[u8]) {
        self.inner.lock().rx.extend_from_slice(data);
    }

    /// Bytes queued but not yet read
    pub fn pending(&self) -> usize {
        self.inner.lock().rx.len()
    }

    /// Drain everything written so far
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.inner.lock().tx)
    }

    /// Copy of everything written so far
    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().tx.clone()
    }

    /// Limit every read to at most `size` bytes (0 = unlimited)
    pub fn set_fragment_size(&self, size: usize) {
        self.inner.lock().fragment = size;
    }

    /// Make the meter poll with ENQ once every `reads` empty reads
    ///
    /// The ENQ is queued by the empty read and delivered by the next one,
    /// so draining loops that stop at the first empty read still terminate.
    pub fn set_idle_enq(&self, reads: usize) {
        let mut inner = self.inner.lock();
        inner.idle_enq = reads;
        inner.idle_reads = 0;
    }

    /// Make the next `count` writes report zero bytes sent
    pub fn fail_next_writes(&self, count: usize) {
        self.inner.lock().failed_writes = count;
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulatedTransport {
    fn open(&mut self, address: &str, _baud_rate: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.open {
            return Err(Error::AlreadyOpen);
        }
        inner.address = address.to_string();
        inner.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.inner.lock().open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if !inner.open {
            return Err(Error::NotOpen);
        }

        if inner.failed_writes > 0 {
            inner.failed_writes -= 1;
            return Ok(0);
        }

        inner.tx.extend_from_slice(data);

        if let Some(responder) = inner.responder.as_mut() {
            let reply = responder(data);
            trace!("Simulated meter replies with {} bytes", reply.len());
            inner.rx.extend_from_slice(&reply);
        }

        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(Error::NotOpen);
        }

        if inner.rx.is_empty() {
            if inner.idle_enq > 0 {
                inner.idle_reads += 1;
                if inner.idle_reads >= inner.idle_enq {
                    inner.idle_reads = 0;
                    inner.rx.extend_from_slice(&[u8::from(Signal::Enq)]);
                }
            }
            return Ok(0);
        }

        let mut n = inner.rx.len().min(buf.len());
        if inner.fragment > 0 {
            n = n.min(inner.fragment);
        }

        buf[..n].copy_from_slice(&inner.rx[..n]);
        inner.rx.advance(n);

        Ok(n)
    }

    fn address(&self) -> String {
        self.inner.lock().address.clone()
    }
}

/// Timer whose expiry is controlled by the test
///
/// Arming clears any forced expiry. The timer can also be told to expire on
/// its own after a number of `expired()` checks, which lets a blocking
/// drive loop hit a deadline deterministically.
#[derive(Debug, Clone, Default)]
pub struct ManualTimer {
    inner: Arc<Mutex<ManualInner>>,
}

#[derive(Debug, Default)]
struct ManualInner {
    expired: bool,
    armed: Vec<Duration>,
    checks_left: Option<usize>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the armed deadline to elapse
    pub fn expire(&self) {
        self.inner.lock().expired = true;
    }

    /// Expire after `checks` more calls to `expired()`, surviving re-arms
    pub fn expire_after(&self, checks: usize) {
        self.inner.lock().checks_left = Some(checks);
    }

    /// Last duration passed to `arm`
    pub fn last_armed(&self) -> Option<Duration> {
        self.inner.lock().armed.last().copied()
    }

    /// Number of times the timer was armed
    pub fn arm_count(&self) -> usize {
        self.inner.lock().armed.len()
    }

    /// Every duration armed so far, oldest first
    pub fn armed(&self) -> Vec<Duration> {
        self.inner.lock().armed.clone()
    }
}

impl Timer for ManualTimer {
    fn arm(&mut self, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.expired = false;
        inner.armed.push(duration);
    }

    fn expired(&self) -> bool {
        let mut inner = self.inner.lock();
        if let Some(left) = inner.checks_left.as_mut() {
            if *left == 0 {
                return true;
            }
            *left -= 1;
        }
        inner.expired
    }
}
