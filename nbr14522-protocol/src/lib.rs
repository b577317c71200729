//! # nbr14522-protocol
//!
//! Poll-driven reader state machine for ABNT NBR 14522.
//!
//! The machine synchronizes on the meter's ENQ polling, transmits the
//! command, accumulates and validates response blocks, chains composed
//! answers, and enforces the retry ceilings. It never blocks; a driver
//! calls [`ReaderFsm::poll`] repeatedly until the state becomes
//! [`State::AwaitingNewCommand`] and then inspects [`ReaderFsm::status`].

pub mod fsm;
pub mod state;

pub use fsm::{BlockCallback, ReaderFsm};
pub use state::{Counters, State, Status};
