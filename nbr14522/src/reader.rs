//! High-level reader interface

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use nbr14522_core::{CommandBlock, ResponseBlock, TimingTable};
use nbr14522_protocol::{ReaderFsm, Status};
use nbr14522_transport::{MonotonicTimer, SerialTransport, Timer, Transport};

use crate::error::{Error, Result};

/// How a read ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The state machine reached a final status
    Completed(Status),

    /// The caller's deadline elapsed first
    CallerTimeout { last_status: Status },
}

impl ReadOutcome {
    /// Check if every block was received
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(Status::Success))
    }

    /// Status reported by the state machine
    pub fn status(&self) -> Status {
        match *self {
            Self::Completed(status) => status,
            Self::CallerTimeout { last_status } => last_status,
        }
    }

    /// Get a human readable description
    pub fn message(&self) -> &'static str {
        match self {
            Self::Completed(status) => status.message(),
            Self::CallerTimeout { .. } => "caller deadline elapsed before the exchange finished",
        }
    }
}

impl fmt::Display for ReadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// NBR 14522 meter reader
///
/// Drives a [`ReaderFsm`] to completion for each command. An optional
/// caller deadline bounds the time between response blocks; it is measured
/// with a separate timer that is re-armed every time a block is delivered.
///
/// # Examples
///
/// ```no_run
/// use nbr14522::{CommandBlock, Reader};
///
/// fn main() -> nbr14522::Result<()> {
///     let mut reader = Reader::serial();
///     reader.open("/dev/ttyUSB0", 9600)?;
///
///     let outcome = reader.read(
///         CommandBlock::from_hex("14")?,
///         |block| println!("{}", block.to_hex()),
///         None,
///     )?;
///     println!("{}", outcome);
///
///     reader.close()?;
///     Ok(())
/// }
/// ```
pub struct Reader<T, M> {
    fsm: ReaderFsm<T, M>,
    deadline: Box<dyn Timer>,
}

impl Reader<SerialTransport, MonotonicTimer> {
    /// Create a reader over a serial port (not yet open)
    pub fn serial() -> Self {
        Self::new(SerialTransport::new(), MonotonicTimer::new())
    }
}

impl<T: Transport, M: Timer> Reader<T, M> {
    /// Create a reader using the 9600 bit/s timing table
    pub fn new(transport: T, timer: M) -> Self {
        Self::with_timing(transport, timer, TimingTable::default())
    }

    /// Create a reader with a custom timing table
    pub fn with_timing(transport: T, timer: M, timing: TimingTable) -> Self {
        Self {
            fsm: ReaderFsm::with_timing(transport, timer, timing),
            deadline: Box::new(MonotonicTimer::new()),
        }
    }

    /// Replace the timer measuring the caller deadline
    pub fn with_deadline_timer(mut self, timer: impl Timer + 'static) -> Self {
        self.deadline = Box::new(timer);
        self
    }

    /// Open the link
    pub fn open(&mut self, address: &str, baud_rate: u32) -> Result<()> {
        info!("Opening {} at {} bit/s...", address, baud_rate);
        self.fsm.transport_mut().open(address, baud_rate)?;
        Ok(())
    }

    /// Close the link
    pub fn close(&mut self) -> Result<()> {
        if self.is_open() {
            info!("Closing {}", self.fsm.transport().address());
        }
        self.fsm.transport_mut().close()?;
        Ok(())
    }

    /// Check if the link is open
    pub fn is_open(&self) -> bool {
        self.fsm.transport().is_open()
    }

    /// Underlying state machine
    pub fn fsm(&self) -> &ReaderFsm<T, M> {
        &self.fsm
    }

    /// Run one command to completion
    ///
    /// `on_block` sees every validated response block, in order. Blocks
    /// delivered before a failure stay delivered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOpen`] if the link is closed. Protocol faults are
    /// reported through the outcome, never as errors.
    pub fn read<F>(
        &mut self,
        command: CommandBlock,
        mut on_block: F,
        deadline: Option<Duration>,
    ) -> Result<ReadOutcome>
    where
        F: FnMut(&ResponseBlock),
    {
        self.begin(command, deadline)?;

        loop {
            if let Some(outcome) = self.step(&mut on_block, deadline) {
                return Ok(outcome);
            }
        }
    }

    /// Run several commands in order, stopping at the first one that does
    /// not succeed
    pub fn read_all<I, F>(
        &mut self,
        commands: I,
        mut on_block: F,
        deadline: Option<Duration>,
    ) -> Result<Vec<ReadOutcome>>
    where
        I: IntoIterator<Item = CommandBlock>,
        F: FnMut(&ResponseBlock),
    {
        let mut outcomes = Vec::new();

        for command in commands {
            let outcome = self.read(command, &mut on_block, deadline)?;
            outcomes.push(outcome);

            if !outcome.is_success() {
                warn!("Stopping after {} command(s): {}", outcomes.len(), outcome);
                break;
            }
        }

        if outcomes.is_empty() {
            return Err(Error::NoCommand);
        }

        Ok(outcomes)
    }

    /// Like [`read`](Self::read), yielding to the runtime for `interval`
    /// between polls
    pub async fn read_paced<F>(
        &mut self,
        command: CommandBlock,
        mut on_block: F,
        deadline: Option<Duration>,
        interval: Duration,
    ) -> Result<ReadOutcome>
    where
        F: FnMut(&ResponseBlock),
    {
        self.begin(command, deadline)?;

        loop {
            if let Some(outcome) = self.step(&mut on_block, deadline) {
                return Ok(outcome);
            }
            tokio::time::sleep(interval).await;
        }
    }

    fn begin(&mut self, command: CommandBlock, deadline: Option<Duration>) -> Result<()> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }

        info!(
            "Reading command 0x{:02X} from {}",
            command.code(),
            self.fsm.transport().address()
        );

        self.fsm.set_command(command);
        if let Some(deadline) = deadline {
            self.deadline.arm(deadline);
        }

        Ok(())
    }

    fn step(
        &mut self,
        on_block: &mut dyn FnMut(&ResponseBlock),
        deadline: Option<Duration>,
    ) -> Option<ReadOutcome> {
        let mut delivered = false;
        let state = self.fsm.poll_with(|block| {
            delivered = true;
            on_block(block);
        });

        if delivered {
            if let Some(deadline) = deadline {
                debug!("Block delivered, deadline re-armed");
                self.deadline.arm(deadline);
            }
        }

        // a sequence break ends the session even though the machine has
        // already gone back to hunting for ENQ
        let status = self.fsm.status();
        if state.is_terminal() || status == Status::SequenceBreak {
            return Some(ReadOutcome::Completed(status));
        }

        if deadline.is_some() && self.deadline.expired() {
            let last_status = self.fsm.status();
            warn!(state = %state, "Caller deadline elapsed ({})", last_status);
            return Some(ReadOutcome::CallerTimeout { last_status });
        }

        None
    }
}
