//! NBR 14522 code catalogue and line signals

use std::fmt;

use crate::error::{Error, Result};

/// Meter answered with "command not implemented"
pub const CODE_NOT_IMPLEMENTED: u8 = 0x39;

/// Meter answered with "occurrence in meter"
pub const CODE_METER_OCCURRENCE: u8 = 0x40;

/// Command codes accepted by the reader
pub const VALID_CODES: [u8; 19] = [
    0x14, 0x20, 0x21, 0x22, 0x51, 0x23, 0x24, 0x41, 0x44, 0x42, 0x43, 0x45, 0x46, 0x25, 0x26,
    0x27, 0x52, 0x28, 0x80,
];

/// Commands whose answer spans several response blocks
pub const COMPOSED_CODES: [u8; 3] = [0x26, 0x27, 0x52];

const FLAG_VALID: u8 = 1 << 0;
const FLAG_COMPOSED: u8 = 1 << 1;

static CODE_TABLE: [u8; 256] = build_code_table();

const fn build_code_table() -> [u8; 256] {
    let mut table = [0u8; 256];

    let mut i = 0;
    while i < VALID_CODES.len() {
        table[VALID_CODES[i] as usize] |= FLAG_VALID;
        i += 1;
    }

    let mut i = 0;
    while i < COMPOSED_CODES.len() {
        table[COMPOSED_CODES[i] as usize] |= FLAG_COMPOSED;
        i += 1;
    }

    table
}

/// Check if `code` is a known command code
pub fn is_valid_code(code: u8) -> bool {
    CODE_TABLE[code as usize] & FLAG_VALID != 0
}

/// Check if `code` denotes a multi-block (composed) exchange
pub fn is_composed_code(code: u8) -> bool {
    CODE_TABLE[code as usize] & FLAG_COMPOSED != 0
}

/// Check if `code` is one of the two meter exception codes
pub fn is_exception_code(code: u8) -> bool {
    code == CODE_NOT_IMPLEMENTED || code == CODE_METER_OCCURRENCE
}

/// Single-byte line signals exchanged outside block boundaries
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Signal {
    /// Meter offers a transmission window
    Enq = 0x05,

    /// Block received and validated
    Ack = 0x06,

    /// Wait, meter needs more time
    Wait = 0x10,

    /// Block corrupted, send again
    Nak = 0x15,
}

impl Signal {
    /// Get signal name
    pub fn name(self) -> &'static str {
        match self {
            Self::Enq => "ENQ",
            Self::Ack => "ACK",
            Self::Wait => "WAIT",
            Self::Nak => "NAK",
        }
    }
}

impl From<Signal> for u8 {
    fn from(signal: Signal) -> u8 {
        signal as u8
    }
}

impl TryFrom<u8> for Signal {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x05 => Ok(Self::Enq),
            0x06 => Ok(Self::Ack),
            0x10 => Ok(Self::Wait),
            0x15 => Ok(Self::Nak),
            _ => Err(Error::UnknownSignal(value)),
        }
    }
}

impl PartialEq<u8> for Signal {
    fn eq(&self, other: &u8) -> bool {
        *self as u8 == *other
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), *self as u8)
    }
}
