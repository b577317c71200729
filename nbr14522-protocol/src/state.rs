//! Reader states, outcome statuses and session counters

use std::fmt;

/// Reader state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// No recent ENQ seen; input flushed
    Unsynchronized,

    /// ENQ seen; the command goes out on the next one
    Synchronized,

    /// Command (re)sent; waiting for a signal or the first response byte
    CommandTransmitted,

    /// WAIT received; waiting for more WAITs or an ENQ
    SequenceDelayReceived,

    /// First response byte matched; accumulating the rest of the block
    CodeReceived,

    /// Exchange finished; holds the final status until a new command
    AwaitingNewCommand,
}

impl State {
    /// Check if the exchange has finished
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::AwaitingNewCommand)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Exchange still running
    InProgress,

    /// Every expected block received and acknowledged
    Success,

    /// Meter rejected the command too many times
    NakReceivedCeiling,

    /// Reader rejected the same block too many times
    NakTransmittedCeiling,

    /// Command sent too many times without any answer
    NoReplyCeiling,

    /// No WAIT arrived within the allowed time after a WAIT
    WaitTimeout,

    /// Meter asked to wait too many times
    WaitReceivedCeiling,

    /// Unexpected byte; the reader resynchronizes
    SequenceBreak,

    /// Meter sent NAK after already accepting the command
    NakAfterResponseAccepted,

    /// Next block of a composed answer never arrived
    NoReplyAwaitingNextBlock,

    /// Meter answered with the occurrence code
    MeterOccurrence,

    /// Meter answered with the not-implemented code
    CommandNotImplemented,
}

impl Status {
    /// Check if the exchange completed normally
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Check if the meter answered with an exception code
    pub fn is_exception(self) -> bool {
        matches!(self, Self::MeterOccurrence | Self::CommandNotImplemented)
    }

    /// Check if the exchange failed at the link level
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::InProgress | Self::Success) && !self.is_exception()
    }

    /// Get a human readable description
    pub fn message(self) -> &'static str {
        match self {
            Self::InProgress => "exchange in progress",
            Self::Success => "response received successfully",
            Self::NakReceivedCeiling => "too many NAKs received from meter",
            Self::NakTransmittedCeiling => "too many NAKs transmitted to meter",
            Self::NoReplyCeiling => "too many command transmissions without reply",
            Self::WaitTimeout => "time without WAIT from meter exceeded",
            Self::WaitReceivedCeiling => "too many WAITs received from meter",
            Self::SequenceBreak => "sequence break: unexpected byte received",
            Self::NakAfterResponseAccepted => "NAK received after a response was accepted",
            Self::NoReplyAwaitingNextBlock => "no reply while awaiting the next response block",
            Self::MeterOccurrence => "meter reported an occurrence",
            Self::CommandNotImplemented => "command not implemented by meter",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Per-exchange event counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// NAKs received from the meter
    pub nak_received: u32,

    /// NAKs sent to the meter
    pub nak_transmitted: u32,

    /// Consecutive command transmissions with no reply
    pub no_reply: u32,

    /// WAITs received from the meter
    pub wait_received: u32,
}
