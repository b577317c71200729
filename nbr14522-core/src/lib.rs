//! # nbr14522-core
//!
//! Core protocol primitives for ABNT NBR 14522 meter readout.
//!
//! This crate provides the low-level building blocks:
//! - Command and response block layout
//! - CRC-16 checksum calculation and trailer handling
//! - Code catalogue (valid, composed and exception codes)
//! - Protocol signals, ceilings and timing table

pub mod checksum;
pub mod code;
pub mod constants;
pub mod error;
pub mod frame;
pub mod timing;

pub use code::Signal;
pub use error::{Error, Result};
pub use frame::{CommandBlock, ResponseBlock};
pub use timing::TimingTable;

/// Default link bit rate
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Command block size
pub const COMMAND_SIZE: usize = 66;

/// Response block size
pub const RESPONSE_SIZE: usize = 258;

/// Checksum trailer size
pub const TRAILER_SIZE: usize = 2;
