//! NBR 14522 block checksum
//!
//! Blocks are protected by CRC-16/ARC:
//! 1. Polynomial 0x8005, reflected input and output
//! 2. Initial value 0x0000, no final XOR
//! 3. Computed over every byte except the two-byte trailer
//! 4. Trailer stores the low byte first, then the high byte

use byteorder::{ByteOrder, LittleEndian};
use crc::{Crc, CRC_16_ARC};
use tracing::trace;

use crate::TRAILER_SIZE;

const CRC_ARC: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

/// Calculate the CRC-16/ARC of `bytes`
///
/// # Examples
///
/// ```
/// use nbr14522_core::checksum;
///
/// assert_eq!(checksum::compute(&[0x11, 0x22, 0x33, 0x44]), 0xF5B1);
/// ```
pub fn compute(bytes: &[u8]) -> u16 {
    let crc = CRC_ARC.checksum(bytes);

    trace!(
        len = bytes.len(),
        crc = format!("0x{:04X}", crc),
        "Calculated checksum"
    );

    crc
}

/// Read the checksum trailer of a block
///
/// The value is `(frame[N-1] << 8) + frame[N-2]`.
///
/// # Panics
///
/// Panics if `frame` is shorter than the trailer.
pub fn extract(frame: &[u8]) -> u16 {
    let at = frame.len() - TRAILER_SIZE;
    LittleEndian::read_u16(&frame[at..])
}

/// Write `value` into the checksum trailer of a block
///
/// High byte goes to the last index, low byte to the one before it.
///
/// # Panics
///
/// Panics if `frame` is shorter than the trailer.
pub fn embed(frame: &mut [u8], value: u16) {
    let at = frame.len() - TRAILER_SIZE;
    LittleEndian::write_u16(&mut frame[at..], value);
}

/// Checksum of the block payload (everything but the trailer)
pub fn payload_checksum(frame: &[u8]) -> u16 {
    compute(&frame[..frame.len() - TRAILER_SIZE])
}

/// Check the trailer against the payload
pub fn verify(frame: &[u8]) -> bool {
    payload_checksum(frame) == extract(frame)
}

/// Recompute and store the trailer, returning the stored value
pub fn stamp(frame: &mut [u8]) -> u16 {
    let crc = payload_checksum(frame);
    embed(frame, crc);
    crc
}

#[cfg(test)]
pub(crate) const REFERENCE_VECTOR: [u8; 256] = [
    32, 50, 96, 7, 96, 34, 21, 0, 7, 16, 33, 5, 34, 21, 0, 7, //
    16, 33, 34, 21, 0, 7, 16, 33, 0, 0, 0, 1, 16, 33, 0, 0, //
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
    0, 0, 24, 0, 24, 0, 24, 0, 24, 0, 33, 0, 33, 0, 33, 0, //
    33, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 89, 133, //
    1, 21, 21, 18, 16, 33, 18, 16, 33, 2, 17, 33, 21, 17, 33, 2, //
    17, 33, 21, 17, 33, 37, 18, 33, 37, 18, 33, 1, 1, 34, 1, 1, //
    34, 1, 3, 34, 21, 4, 34, 33, 4, 34, 33, 4, 34, 1, 5, 34, //
    0, 0, 1, 0, 0, 1, 0, 0, 1, 0, 0, 1, 0, 0, 1, 0, //
    0, 1, 1, 113, 49, 0, 0, 0, 22, 129, 0, 1, 1, 0, 0, 0, //
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
    0, 0, 0, 1, 16, 17, 82, 1, 0, 0, 0, 5, 0, 0, 0, 0, //
    2, 0, 0, 0, 0, 0, 96, 0, 96, 146, 146, 6, 0, 6, 0, 0, //
    0, 0, 0, 6, 0, 6, 0, 0, 0, 0, 0, 51, 51, 3, 0, 1, //
    1, 0, 0, 0, 0, 1, 7, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
];
