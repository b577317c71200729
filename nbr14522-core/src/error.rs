//! Error types for nbr14522-core

/// Result type alias for nbr14522-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core protocol errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Block has the wrong length
    #[error("Invalid block length: expected {expected} bytes, got {actual} bytes")]
    InvalidLength {
        expected: usize,
        actual: usize,
    },

    /// Byte is not a line signal
    #[error("Unknown signal: 0x{0:02X}")]
    UnknownSignal(u8),

    /// Hex string could not be decoded
    #[error("Invalid hex command: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}
