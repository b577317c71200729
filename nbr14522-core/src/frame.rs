//! NBR 14522 command and response blocks

use std::fmt;

use crate::{
    checksum,
    code,
    constants::{COMPOSED_FINAL_FLAG, COMPOSED_STATUS_OFFSET},
    error::{Error, Result},
    COMMAND_SIZE, RESPONSE_SIZE,
};

/// Command block sent by the reader
///
/// # Block Structure
///
/// ```text
/// ┌──────────┬─────────────────────┬──────────┬──────────┐
/// │   Code   │       Payload       │  CRC lo  │  CRC hi  │
/// │  1 byte  │      63 bytes       │  1 byte  │  1 byte  │
/// └──────────┴─────────────────────┴──────────┴──────────┘
/// ```
///
/// The trailer is recomputed before every transmission, so callers only
/// fill in the code and payload.
///
/// # Examples
///
/// ```
/// use nbr14522_core::CommandBlock;
///
/// let mut command = CommandBlock::from_slice(&[0x14, 0x12, 0x34, 0x56]);
/// assert_eq!(command.code(), 0x14);
///
/// command.stamp();
/// assert!(command.verify());
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct CommandBlock {
    bytes: [u8; COMMAND_SIZE],
}

impl CommandBlock {
    /// Block size in bytes
    pub const SIZE: usize = COMMAND_SIZE;

    /// Create a block from a complete byte array
    pub fn new(bytes: [u8; COMMAND_SIZE]) -> Self {
        Self { bytes }
    }

    /// Create a block from a prefix, zero-padding or truncating to 66 bytes
    pub fn from_slice(prefix: &[u8]) -> Self {
        let mut bytes = [0u8; COMMAND_SIZE];
        let n = prefix.len().min(COMMAND_SIZE);
        bytes[..n].copy_from_slice(&prefix[..n]);
        Self { bytes }
    }

    /// Decode a hex string into a block (zero-padded / truncated)
    ///
    /// # Errors
    ///
    /// Returns an error if the string has odd length or a non-hex digit.
    ///
    /// # Examples
    ///
    /// ```
    /// use nbr14522_core::CommandBlock;
    ///
    /// let command = CommandBlock::from_hex("14123456").unwrap();
    /// assert_eq!(&command.as_bytes()[..4], &[0x14, 0x12, 0x34, 0x56]);
    /// assert!(CommandBlock::from_hex("141").is_err());
    /// ```
    pub fn from_hex(hex_command: &str) -> Result<Self> {
        let bytes = hex::decode(hex_command.trim())?;
        Ok(Self::from_slice(&bytes))
    }

    /// Command code (first byte)
    pub fn code(&self) -> u8 {
        self.bytes[0]
    }

    /// Check if the code is in the catalogue
    pub fn has_valid_code(&self) -> bool {
        code::is_valid_code(self.code())
    }

    /// Check if the command expects a multi-block answer
    pub fn is_composed(&self) -> bool {
        code::is_composed_code(self.code())
    }

    /// Raw bytes, trailer included
    pub fn as_bytes(&self) -> &[u8; COMMAND_SIZE] {
        &self.bytes
    }

    /// Mutable raw bytes
    pub fn as_bytes_mut(&mut self) -> &mut [u8; COMMAND_SIZE] {
        &mut self.bytes
    }

    /// Trailer value currently stored
    pub fn checksum(&self) -> u16 {
        checksum::extract(&self.bytes)
    }

    /// Recompute and store the trailer
    pub fn stamp(&mut self) -> u16 {
        checksum::stamp(&mut self.bytes)
    }

    /// Check the stored trailer
    pub fn verify(&self) -> bool {
        checksum::verify(&self.bytes)
    }

    /// Lowercase hex rendering of the whole block
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl Default for CommandBlock {
    fn default() -> Self {
        Self {
            bytes: [0u8; COMMAND_SIZE],
        }
    }
}

impl From<[u8; COMMAND_SIZE]> for CommandBlock {
    fn from(bytes: [u8; COMMAND_SIZE]) -> Self {
        Self::new(bytes)
    }
}

impl TryFrom<&[u8]> for CommandBlock {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self> {
        let bytes: [u8; COMMAND_SIZE] = value.try_into().map_err(|_| Error::InvalidLength {
            expected: COMMAND_SIZE,
            actual: value.len(),
        })?;
        Ok(Self { bytes })
    }
}

impl fmt::Debug for CommandBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBlock")
            .field("code", &format!("0x{:02X}", self.code()))
            .field("checksum", &format!("0x{:04X}", self.checksum()))
            .finish()
    }
}

impl fmt::Display for CommandBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command[0x{:02X}]", self.code())
    }
}

/// Response block sent by the meter
///
/// Same trailer layout as [`CommandBlock`]. The first byte echoes the
/// command code or carries one of the exception codes. For composed
/// commands, bit `0x10` of byte 5 marks the final block.
#[derive(Clone, PartialEq, Eq)]
pub struct ResponseBlock {
    bytes: [u8; RESPONSE_SIZE],
}

impl ResponseBlock {
    /// Block size in bytes
    pub const SIZE: usize = RESPONSE_SIZE;

    /// Create a block from a complete byte array
    pub fn new(bytes: [u8; RESPONSE_SIZE]) -> Self {
        Self { bytes }
    }

    /// Create a block from a prefix, zero-padding or truncating to 258 bytes
    pub fn from_slice(prefix: &[u8]) -> Self {
        let mut bytes = [0u8; RESPONSE_SIZE];
        let n = prefix.len().min(RESPONSE_SIZE);
        bytes[..n].copy_from_slice(&prefix[..n]);
        Self { bytes }
    }

    /// Response code (first byte)
    pub fn code(&self) -> u8 {
        self.bytes[0]
    }

    /// Check if this is the last block of a composed answer
    pub fn is_final_block(&self) -> bool {
        is_final_block(&self.bytes)
    }

    /// Raw bytes, trailer included
    pub fn as_bytes(&self) -> &[u8; RESPONSE_SIZE] {
        &self.bytes
    }

    /// Mutable raw bytes
    pub fn as_bytes_mut(&mut self) -> &mut [u8; RESPONSE_SIZE] {
        &mut self.bytes
    }

    /// Trailer value currently stored
    pub fn checksum(&self) -> u16 {
        checksum::extract(&self.bytes)
    }

    /// Recompute and store the trailer
    pub fn stamp(&mut self) -> u16 {
        checksum::stamp(&mut self.bytes)
    }

    /// Check the stored trailer
    pub fn verify(&self) -> bool {
        checksum::verify(&self.bytes)
    }

    /// Uppercase hex rendering of the whole block
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.bytes)
    }
}

impl Default for ResponseBlock {
    fn default() -> Self {
        Self {
            bytes: [0u8; RESPONSE_SIZE],
        }
    }
}

impl From<[u8; RESPONSE_SIZE]> for ResponseBlock {
    fn from(bytes: [u8; RESPONSE_SIZE]) -> Self {
        Self::new(bytes)
    }
}

impl TryFrom<&[u8]> for ResponseBlock {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self> {
        let bytes: [u8; RESPONSE_SIZE] =
            value.try_into().map_err(|_| Error::InvalidLength {
                expected: RESPONSE_SIZE,
                actual: value.len(),
            })?;
        Ok(Self { bytes })
    }
}

impl AsRef<[u8]> for ResponseBlock {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for ResponseBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBlock")
            .field("code", &format!("0x{:02X}", self.code()))
            .field("checksum", &format!("0x{:04X}", self.checksum()))
            .field("final", &self.is_final_block())
            .finish()
    }
}

impl fmt::Display for ResponseBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Response[0x{:02X}]", self.code())
    }
}

/// Check bit `0x10` of byte 5 of a response
///
/// # Panics
///
/// Panics if `response` is shorter than 6 bytes.
pub fn is_final_block(response: &[u8]) -> bool {
    response[COMPOSED_STATUS_OFFSET] & COMPOSED_FINAL_FLAG != 0
}
