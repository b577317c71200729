//! Protocol constants

/// Maximum NAKs for the same block (received or transmitted)
pub const MAX_BLOCK_NAK: u32 = 7;

/// Maximum WAITs for the same block
pub const MAX_BLOCK_WAIT: u32 = 12;

/// Maximum transmissions of a command that get no answer
pub const MAX_COMMAND_NO_REPLY: u32 = 7;

/// Byte offset of the block-status octet in composed responses
pub const COMPOSED_STATUS_OFFSET: usize = 5;

/// Bit of the block-status octet flagging the final block
pub const COMPOSED_FINAL_FLAG: u8 = 0x10;

/// Bytes discarded per read while flushing the input
pub const FLUSH_CHUNK: usize = 32;
