//! NBR 14522 timing table
//!
//! Every deadline derives from TCAR, the time needed to transmit one
//! character (start bit, 8 data bits, stop bit). The standard values are
//! defined for 9600 bit/s, where TCAR is taken as 10 ms.

use std::time::Duration;

use crate::DEFAULT_BAUD_RATE;

/// TCAR at the reference bit rate
pub const REFERENCE_TCAR: Duration = Duration::from_millis(10);

/// Maximum time without a WAIT once a wait sequence started
pub const TSEMWAIT: Duration = Duration::from_secs(305);

/// Deadlines used by the reader state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingTable {
    /// Character transmission time (TCAR)
    pub character: Duration,

    /// Maximum gap between characters of one block (TMAXCAR)
    pub max_character_gap: Duration,

    /// Minimum line reversal time (TMINREV)
    pub min_reversal: Duration,

    /// Maximum time between consecutive ENQs (TMAXENQ)
    pub max_enq_interval: Duration,

    /// Minimum time between consecutive ENQs (TMINENQ)
    pub min_enq_interval: Duration,

    /// Maximum time from ENQ to the first reader character (TMAXSINC)
    pub max_sync: Duration,

    /// Maximum time to answer a block or signal (TMAXRSP)
    pub max_response: Duration,

    /// Maximum time without receiving WAIT (TSEMWAIT)
    pub max_without_wait: Duration,
}

impl TimingTable {
    /// Build the table from a character time
    pub fn from_character_time(character: Duration) -> Self {
        let min_reversal = character + Duration::from_millis(1);

        Self {
            character,
            max_character_gap: character + Duration::from_millis(5),
            min_reversal,
            max_enq_interval: min_reversal + Duration::from_millis(500),
            min_enq_interval: min_reversal + Duration::from_millis(20),
            max_sync: min_reversal + Duration::from_millis(10),
            max_response: min_reversal + Duration::from_millis(500),
            max_without_wait: TSEMWAIT,
        }
    }

    /// Build the table for a link bit rate
    ///
    /// TCAR scales linearly from the 9600 bit/s reference and is rounded
    /// up to whole milliseconds.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use nbr14522_core::TimingTable;
    ///
    /// let table = TimingTable::for_baud_rate(9600);
    /// assert_eq!(table.max_response, Duration::from_millis(511));
    ///
    /// let slow = TimingTable::for_baud_rate(4800);
    /// assert_eq!(slow.character, Duration::from_millis(20));
    /// ```
    pub fn for_baud_rate(baud_rate: u32) -> Self {
        let baud_rate = u64::from(baud_rate.max(1));
        let reference_ms = REFERENCE_TCAR.as_millis() as u64 * u64::from(DEFAULT_BAUD_RATE);
        let character_ms = reference_ms.div_ceil(baud_rate).max(1);

        Self::from_character_time(Duration::from_millis(character_ms))
    }

    /// Average of the ENQ interval bounds
    pub fn avg_enq_interval(&self) -> Duration {
        (self.max_enq_interval + self.min_enq_interval) / 2
    }
}

impl Default for TimingTable {
    fn default() -> Self {
        Self::from_character_time(REFERENCE_TCAR)
    }
}
