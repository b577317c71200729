//! # nbr14522
//!
//! Reader side of the ABNT NBR 14522 utility-meter readout protocol.
//!
//! ## Features
//!
//! - Checksummed command and response blocks
//! - Non-blocking, poll-driven reader state machine
//! - Composed (multi-block) answers and every retry ceiling
//! - Serial transport plus simulated doubles for tests
//! - Blocking and tokio-paced drive loops
//!
//! ## Quick Start
//!
//! ```no_run
//! use nbr14522::{CommandBlock, Reader};
//!
//! fn main() -> nbr14522::Result<()> {
//!     let mut reader = Reader::serial();
//!     reader.open("/dev/ttyUSB0", 9600)?;
//!
//!     // Current registers
//!     let outcome = reader.read(
//!         CommandBlock::from_hex("14")?,
//!         |block| println!("{}", block.to_hex()),
//!         None,
//!     )?;
//!     println!("{}", outcome);
//!
//!     reader.close()?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod reader;

// Re-exports
pub use error::{Error, Result};
pub use reader::{ReadOutcome, Reader};

pub use nbr14522_core::{CommandBlock, ResponseBlock, Signal, TimingTable};
pub use nbr14522_protocol::{Counters, ReaderFsm, State, Status};
pub use nbr14522_transport::{
    ManualTimer, MonotonicTimer, SerialTransport, SimulatedTransport, Timer, Transport,
};
