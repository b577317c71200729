//! Transport errors

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not open")]
    NotOpen,

    #[error("Already open")]
    AlreadyOpen,

    #[error("Failed to open {address}: {reason}")]
    Open { address: String, reason: String },

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
