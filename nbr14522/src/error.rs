//! High-level error types

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Core protocol error: {0}")]
    Core(#[from] nbr14522_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] nbr14522_transport::Error),

    #[error("Link not open")]
    NotOpen,

    #[error("No command given")]
    NoCommand,
}
