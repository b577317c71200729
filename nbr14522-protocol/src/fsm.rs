//! Reader state machine
//!
//! Drives one command through synchronization, transmission, reception and
//! validation. The machine never blocks and never sleeps: each call to
//! [`ReaderFsm::poll`] performs at most one read attempt and one deadline
//! check, applies exactly one transition and returns the resulting state.
//!
//! ```text
//!                  ENQ                     ENQ / send command
//! Unsynchronized ──────▶ Synchronized ─────────────────────────▶ CommandTransmitted
//!       ▲                    │ TMAXENQ                              │   ▲   │
//!       └────────────────────┘                           WAIT       │   │   │ code
//!                                                                   ▼   │   ▼
//!                                        SequenceDelayReceived ─────┘   CodeReceived
//!                                                           ENQ / resend      │ block ok
//!                                                                             ▼
//!                                                                 AwaitingNewCommand
//! ```

use nbr14522_core::{
    checksum,
    code::{self, Signal, CODE_METER_OCCURRENCE, CODE_NOT_IMPLEMENTED},
    constants::{FLUSH_CHUNK, MAX_BLOCK_NAK, MAX_BLOCK_WAIT, MAX_COMMAND_NO_REPLY},
    CommandBlock, ResponseBlock, TimingTable, RESPONSE_SIZE,
};
use nbr14522_transport::{Timer, Transport};
use tracing::{debug, info, trace, warn};

use crate::state::{Counters, State, Status};

const ENQ: u8 = Signal::Enq as u8;
const NAK: u8 = Signal::Nak as u8;
const WAIT: u8 = Signal::Wait as u8;

/// Callback invoked once per validated response block
pub type BlockCallback = Box<dyn FnMut(&ResponseBlock) + Send>;

/// Reader side of the NBR 14522 handshake
///
/// Owns exactly one transport and one timer. Independent links are driven
/// by independent instances.
///
/// # Examples
///
/// ```
/// use nbr14522_core::CommandBlock;
/// use nbr14522_protocol::{ReaderFsm, State};
/// use nbr14522_transport::{ManualTimer, SimulatedTransport};
///
/// let link = SimulatedTransport::new();
/// let mut fsm = ReaderFsm::new(link.clone(), ManualTimer::new());
///
/// fsm.set_command(CommandBlock::from_slice(&[0x14]));
/// link.feed(&[0x05, 0x05]);
///
/// assert_eq!(fsm.poll(), State::Synchronized);
/// assert_eq!(fsm.poll(), State::CommandTransmitted);
/// assert_eq!(link.written().len(), CommandBlock::SIZE);
/// ```
pub struct ReaderFsm<T, M> {
    transport: T,
    timer: M,
    timing: TimingTable,
    state: State,
    status: Status,
    command: CommandBlock,
    response: ResponseBlock,
    /// Bytes of `response` filled so far
    received: usize,
    counters: Counters,
    /// Set once a block of a composed answer has been accepted
    composed: bool,
    callback: Option<BlockCallback>,
}

impl<T: Transport, M: Timer> ReaderFsm<T, M> {
    /// Create an idle machine using the 9600 bit/s timing table
    pub fn new(transport: T, timer: M) -> Self {
        Self::with_timing(transport, timer, TimingTable::default())
    }

    /// Create an idle machine with a custom timing table
    pub fn with_timing(transport: T, timer: M, timing: TimingTable) -> Self {
        Self {
            transport,
            timer,
            timing,
            state: State::AwaitingNewCommand,
            status: Status::InProgress,
            command: CommandBlock::default(),
            response: ResponseBlock::default(),
            received: 0,
            counters: Counters::default(),
            composed: false,
            callback: None,
        }
    }

    /// Start a new exchange
    ///
    /// Fully resets state, status, counters and the response buffer, and
    /// discards any pending input.
    pub fn set_command(&mut self, command: CommandBlock) {
        debug!("New command 0x{:02X}", command.code());

        if !command.has_valid_code() {
            warn!("Command code 0x{:02X} is not in the catalogue", command.code());
        }

        self.command = command;
        self.state = State::Unsynchronized;
        self.status = Status::InProgress;
        self.counters = Counters::default();
        self.composed = false;
        self.response = ResponseBlock::default();
        self.received = 0;
        self.flush_input();
    }

    /// Install the callback used by [`poll`](Self::poll)
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&ResponseBlock) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    /// Remove the installed callback
    pub fn clear_callback(&mut self) {
        self.callback = None;
    }

    /// Advance one step, reporting blocks to the installed callback
    pub fn poll(&mut self) -> State {
        let mut callback = self.callback.take();
        let state = match callback.as_mut() {
            Some(cb) => self.poll_with(|block| cb(block)),
            None => self.poll_with(|_| {}),
        };
        self.callback = callback;
        state
    }

    /// Advance one step, reporting blocks to `on_block`
    pub fn poll_with<F>(&mut self, mut on_block: F) -> State
    where
        F: FnMut(&ResponseBlock),
    {
        match self.state {
            State::AwaitingNewCommand => {}
            State::Unsynchronized => self.on_unsynchronized(),
            State::Synchronized => self.on_synchronized(),
            State::CommandTransmitted => self.on_command_transmitted(),
            State::SequenceDelayReceived => self.on_sequence_delay(),
            State::CodeReceived => self.on_code_received(&mut on_block),
        }

        self.state
    }

    /// Current state
    pub fn state(&self) -> State {
        self.state
    }

    /// Current status
    pub fn status(&self) -> Status {
        self.status
    }

    /// Snapshot of the session counters
    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Check if a composed answer is being chained
    pub fn is_composed_exchange(&self) -> bool {
        self.composed
    }

    /// Command of the current exchange
    pub fn command(&self) -> &CommandBlock {
        &self.command
    }

    /// Response buffer (complete only after a block was delivered)
    pub fn response(&self) -> &ResponseBlock {
        &self.response
    }

    /// Bytes accumulated in the response buffer
    pub fn received(&self) -> usize {
        self.received
    }

    /// Timing table in use
    pub fn timing(&self) -> &TimingTable {
        &self.timing
    }

    /// Borrow the transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give back the transport and timer
    pub fn into_parts(self) -> (T, M) {
        (self.transport, self.timer)
    }

    // State handlers

    fn on_unsynchronized(&mut self) {
        if self.read_byte() == Some(ENQ) {
            self.timer.arm(self.timing.max_enq_interval);
            self.transition(State::Synchronized);
        }
    }

    fn on_synchronized(&mut self) {
        if self.timer.expired() {
            debug!("No ENQ within {:?}, resynchronizing", self.timing.max_enq_interval);
            self.flush_input();
            self.transition(State::Unsynchronized);
        } else if self.read_byte() == Some(ENQ) {
            self.status = Status::InProgress;
            self.counters = Counters::default();
            self.composed = false;
            self.transmit_command();
            self.timer.arm(self.timing.max_response);
            self.transition(State::CommandTransmitted);
        }
    }

    fn on_command_transmitted(&mut self) {
        if self.timer.expired() {
            self.flush_input();
            self.counters.no_reply += 1;

            if self.counters.no_reply >= MAX_COMMAND_NO_REPLY {
                self.finish(Status::NoReplyCeiling);
            } else if self.composed {
                self.finish(Status::NoReplyAwaitingNextBlock);
            } else {
                warn!(
                    attempt = self.counters.no_reply,
                    "No reply within {:?}, retransmitting", self.timing.max_response
                );
                self.retransmit();
            }
            return;
        }

        let Some(byte) = self.read_byte() else {
            return;
        };

        match byte {
            NAK => {
                self.counters.nak_received += 1;

                if self.counters.nak_received >= MAX_BLOCK_NAK {
                    self.finish(Status::NakReceivedCeiling);
                } else if self.composed {
                    self.finish(Status::NakAfterResponseAccepted);
                } else {
                    warn!(count = self.counters.nak_received, "NAK received, retransmitting");
                    self.retransmit();
                }
            }
            WAIT => {
                debug!("WAIT received");
                self.timer.arm(self.timing.max_without_wait);
                self.transition(State::SequenceDelayReceived);
            }
            b if b == self.command.code() || code::is_exception_code(b) => {
                self.response = ResponseBlock::default();
                self.response.as_bytes_mut()[0] = b;
                self.received = 1;
                self.timer.arm(self.timing.max_character_gap);
                self.transition(State::CodeReceived);
            }
            ENQ if self.composed => {
                // meter missed our ACK and polls for it again
                debug!("ENQ while chaining blocks, resending ACK");
                self.send_signal(Signal::Ack);
            }
            other => self.sequence_break(other),
        }
    }

    fn on_sequence_delay(&mut self) {
        if self.timer.expired() {
            self.finish(Status::WaitTimeout);
            return;
        }

        match self.read_byte() {
            Some(ENQ) => {
                self.transmit_command();
                self.timer.arm(self.timing.max_response);
                self.transition(State::CommandTransmitted);
            }
            Some(WAIT) => {
                self.counters.wait_received += 1;

                if self.counters.wait_received >= MAX_BLOCK_WAIT {
                    self.finish(Status::WaitReceivedCeiling);
                } else {
                    debug!(count = self.counters.wait_received, "WAIT received");
                    self.timer.arm(self.timing.max_without_wait);
                }
            }
            Some(other) => self.sequence_break(other),
            None => {}
        }
    }

    fn on_code_received(&mut self, on_block: &mut dyn FnMut(&ResponseBlock)) {
        let start = self.received;
        let n = match self.transport.read(&mut self.response.as_bytes_mut()[start..]) {
            Ok(n) => n,
            Err(e) => {
                warn!("Read failed on {}: {}", self.transport.address(), e);
                0
            }
        };

        if n > 0 {
            trace!("Received {} response bytes ({}/{})", n, start + n, RESPONSE_SIZE);
            self.received += n;
            self.timer.arm(self.timing.max_character_gap);
        }

        if self.timer.expired() {
            self.flush_input();
            self.counters.no_reply += 1;

            if self.counters.no_reply >= MAX_COMMAND_NO_REPLY {
                self.finish(Status::NoReplyCeiling);
            } else {
                warn!(
                    received = self.received,
                    "Response interrupted, retransmitting command"
                );
                self.retransmit();
                self.transition(State::CommandTransmitted);
            }
        } else if self.received >= RESPONSE_SIZE {
            self.accept_or_reject(on_block);
        }
    }

    fn accept_or_reject(&mut self, on_block: &mut dyn FnMut(&ResponseBlock)) {
        if !self.response.verify() {
            warn!(
                "Response checksum mismatch (trailer 0x{:04X}, calculated 0x{:04X}), sending NAK",
                self.response.checksum(),
                checksum::payload_checksum(self.response.as_bytes())
            );
            self.send_signal(Signal::Nak);
            self.counters.nak_transmitted += 1;

            if self.counters.nak_transmitted >= MAX_BLOCK_NAK {
                self.finish(Status::NakTransmittedCeiling);
            } else {
                self.timer.arm(self.timing.max_response);
                self.transition(State::CommandTransmitted);
            }
            return;
        }

        self.send_signal(Signal::Ack);
        on_block(&self.response);

        let code = self.response.code();

        if code::is_composed_code(code) {
            self.composed = true;

            if self.response.is_final_block() {
                self.finish(Status::Success);
            } else {
                debug!("Intermediate block accepted, awaiting next");
                // NAKs received stay counted: the meter already accepted the command
                self.counters.nak_transmitted = 0;
                self.counters.no_reply = 0;
                self.counters.wait_received = 0;
                self.timer.arm(self.timing.max_response);
                self.transition(State::CommandTransmitted);
            }
        } else {
            let status = match code {
                CODE_METER_OCCURRENCE => Status::MeterOccurrence,
                CODE_NOT_IMPLEMENTED => Status::CommandNotImplemented,
                _ => Status::Success,
            };
            self.finish(status);
        }
    }

    // Helpers

    fn transition(&mut self, next: State) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "State transition");
        }
        self.state = next;
    }

    fn finish(&mut self, status: Status) {
        self.status = status;
        self.transition(State::AwaitingNewCommand);

        if status.is_failure() {
            warn!(counters = ?self.counters, "Exchange failed: {}", status);
        } else {
            info!("Exchange finished: {}", status);
        }
    }

    fn sequence_break(&mut self, byte: u8) {
        warn!("Unexpected byte 0x{:02X} in {}, resynchronizing", byte, self.state);
        self.flush_input();
        self.status = Status::SequenceBreak;
        self.transition(State::Unsynchronized);
    }

    fn retransmit(&mut self) {
        self.transmit_command();
        self.timer.arm(self.timing.max_response);
    }

    fn transmit_command(&mut self) {
        let crc = self.command.stamp();
        trace!(
            "Transmitting command 0x{:02X} (crc 0x{:04X})",
            self.command.code(),
            crc
        );
        Self::send(&mut self.transport, self.command.as_bytes());
    }

    fn send_signal(&mut self, signal: Signal) {
        trace!("Transmitting {}", signal);
        Self::send(&mut self.transport, &[u8::from(signal)]);
    }

    fn send(transport: &mut T, data: &[u8]) {
        match transport.write(data) {
            Ok(n) if n == data.len() => {}
            Ok(n) => warn!("Short write on {}: {} of {} bytes", transport.address(), n, data.len()),
            Err(e) => warn!("Write failed on {}: {}", transport.address(), e),
        }
    }

    fn read_byte(&mut self) -> Option<u8> {
        let mut byte = [0u8; 1];
        match self.transport.read(&mut byte) {
            Ok(1) => {
                trace!("Received 0x{:02X}", byte[0]);
                Some(byte[0])
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Read failed on {}: {}", self.transport.address(), e);
                None
            }
        }
    }

    fn flush_input(&mut self) {
        let mut buf = [0u8; FLUSH_CHUNK];
        let mut discarded = 0;

        while let Ok(n) = self.transport.read(&mut buf) {
            if n == 0 {
                break;
            }
            discarded += n;
        }

        if discarded > 0 {
            trace!("Discarded {} pending bytes", discarded);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use nbr14522_transport::{ManualTimer, SimulatedTransport};
    use pretty_assertions::assert_eq;

    const ACK: u8 = Signal::Ack as u8;

    struct Harness {
        fsm: ReaderFsm<SimulatedTransport, ManualTimer>,
        link: SimulatedTransport,
        timer: ManualTimer,
        blocks: Vec<ResponseBlock>,
    }

    impl Harness {
        fn new(code: u8) -> Self {
            let link = SimulatedTransport::new();
            let timer = ManualTimer::new();
            let mut fsm = ReaderFsm::new(link.clone(), timer.clone());
            fsm.set_command(CommandBlock::from_slice(&[code, 0x12, 0x34, 0x56]));

            Self {
                fsm,
                link,
                timer,
                blocks: Vec::new(),
            }
        }

        fn poll(&mut self) -> State {
            let blocks = &mut self.blocks;
            self.fsm.poll_with(|block| blocks.push(block.clone()))
        }

        fn poll_until_idle(&mut self, limit: usize) -> State {
            for _ in 0..limit {
                let state = self.poll();
                if self.link.pending() == 0 && state != State::CodeReceived {
                    return state;
                }
            }
            self.fsm.state()
        }

        fn command_bytes(&self) -> Vec<u8> {
            let mut command = self.fsm.command().clone();
            command.stamp();
            command.as_bytes().to_vec()
        }

        /// ENQ, ENQ: command goes out
        fn synchronize(&mut self) {
            self.link.feed(&[ENQ]);
            assert_eq!(self.poll(), State::Synchronized);
            self.link.feed(&[ENQ]);
            assert_eq!(self.poll(), State::CommandTransmitted);
            assert_eq!(self.link.take_written(), self.command_bytes());
        }

        /// Feed a complete block and poll until it is consumed
        fn deliver(&mut self, block: &[u8]) -> State {
            self.link.feed(block);
            assert_eq!(self.poll(), State::CodeReceived);
            self.poll()
        }
    }

    fn response(code: u8, status_octet: u8) -> Vec<u8> {
        let mut block = ResponseBlock::from_slice(&[code, 0x12, 0x34, 0x56, 0x78, status_octet, 0xAA]);
        block.stamp();
        block.as_bytes().to_vec()
    }

    fn corrupted(code: u8) -> Vec<u8> {
        let mut block = response(code, 0x00);
        block[100] ^= 0xFF;
        block
    }

    #[test]
    fn test_fresh_machine_is_idle() {
        let link = SimulatedTransport::new();
        link.feed(&[ENQ]);
        let mut fsm = ReaderFsm::new(link.clone(), ManualTimer::new());

        assert_eq!(fsm.poll(), State::AwaitingNewCommand);
        assert_eq!(link.pending(), 1);
    }

    #[test]
    fn test_set_command_flushes_input() {
        let link = SimulatedTransport::new();
        link.feed(&[0x01; 100]);
        let mut fsm = ReaderFsm::new(link.clone(), ManualTimer::new());

        fsm.set_command(CommandBlock::from_slice(&[0x14]));

        assert_eq!(fsm.state(), State::Unsynchronized);
        assert_eq!(fsm.status(), Status::InProgress);
        assert_eq!(link.pending(), 0);
    }

    #[test]
    fn test_unsynchronized_ignores_other_bytes() {
        let mut h = Harness::new(0x14);
        h.link.feed(&[0x06, 0x15, 0x99]);

        for _ in 0..3 {
            assert_eq!(h.poll(), State::Unsynchronized);
        }
        assert!(h.link.written().is_empty());
        assert_eq!(h.fsm.status(), Status::InProgress);
    }

    #[test]
    fn test_simple_exchange() {
        let mut h = Harness::new(0x14);
        h.synchronize();
        assert_eq!(h.timer.last_armed(), Some(h.fsm.timing().max_response));

        let block = response(0x14, 0x00);
        h.link.feed(&block);

        assert_eq!(h.poll(), State::CodeReceived);
        assert_eq!(h.timer.last_armed(), Some(Duration::from_millis(15)));

        assert_eq!(h.poll(), State::AwaitingNewCommand);
        assert_eq!(h.fsm.status(), Status::Success);
        assert_eq!(h.link.take_written(), vec![ACK]);

        assert_eq!(h.blocks.len(), 1);
        assert_eq!(h.blocks[0].as_bytes().to_vec(), block);
        assert_eq!(h.blocks[0].as_bytes().len(), 258);
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let mut h = Harness::new(0x14);
        h.synchronize();
        h.deliver(&response(0x14, 0x00));

        h.link.feed(&[ENQ, ENQ]);
        assert_eq!(h.poll(), State::AwaitingNewCommand);
        assert_eq!(h.poll(), State::AwaitingNewCommand);
        assert_eq!(h.blocks.len(), 1);
        assert_eq!(h.link.pending(), 2);
    }

    #[test]
    fn test_fragmented_response() {
        let mut h = Harness::new(0x20);
        h.synchronize();

        h.link.set_fragment_size(7);
        h.link.feed(&response(0x20, 0x00));

        let state = h.poll_until_idle(100);

        assert_eq!(state, State::AwaitingNewCommand);
        assert_eq!(h.fsm.status(), Status::Success);
        assert_eq!(h.blocks.len(), 1);
        assert_eq!(h.fsm.received(), 258);
    }

    #[test]
    fn test_excess_bytes_stay_pending() {
        let mut h = Harness::new(0x14);
        h.synchronize();

        let mut block = response(0x14, 0x00);
        block.extend_from_slice(&[0x77, 0x88]);

        assert_eq!(h.deliver(&block), State::AwaitingNewCommand);
        assert_eq!(h.fsm.status(), Status::Success);
        assert_eq!(h.link.pending(), 2);
    }

    #[test]
    fn test_nak_storm() {
        let mut h = Harness::new(0x14);
        h.synchronize();

        for i in 1..MAX_BLOCK_NAK {
            h.link.feed(&[NAK]);
            assert_eq!(h.poll(), State::CommandTransmitted);
            assert_eq!(h.fsm.status(), Status::InProgress);
            assert_eq!(h.fsm.counters().nak_received, i);
            assert_eq!(h.link.take_written(), h.command_bytes());
        }

        h.link.feed(&[NAK]);
        assert_eq!(h.poll(), State::AwaitingNewCommand);
        assert_eq!(h.fsm.status(), Status::NakReceivedCeiling);
        assert!(h.link.take_written().is_empty());
    }

    #[test]
    fn test_composed_exchange() {
        let mut h = Harness::new(0x26);
        h.synchronize();

        // one of each retry before the first block
        h.link.feed(&[NAK]);
        h.poll();
        h.timer.expire();
        assert_eq!(h.poll(), State::CommandTransmitted);
        h.link.feed(&[WAIT]);
        assert_eq!(h.poll(), State::SequenceDelayReceived);
        h.link.feed(&[WAIT]);
        h.poll();
        h.link.feed(&[ENQ]);
        assert_eq!(h.poll(), State::CommandTransmitted);

        assert_eq!(
            h.fsm.counters(),
            Counters {
                nak_received: 1,
                nak_transmitted: 0,
                no_reply: 1,
                wait_received: 1,
            }
        );
        h.link.take_written();

        assert_eq!(h.deliver(&response(0x26, 0x00)), State::CommandTransmitted);
        assert!(h.fsm.is_composed_exchange());
        assert_eq!(h.fsm.status(), Status::InProgress);
        assert_eq!(h.fsm.counters().nak_received, 1);
        assert_eq!(h.fsm.counters().no_reply, 0);
        assert_eq!(h.fsm.counters().wait_received, 0);
        assert_eq!(h.link.take_written(), vec![ACK]);

        assert_eq!(h.deliver(&response(0x26, 0x10)), State::AwaitingNewCommand);
        assert_eq!(h.fsm.status(), Status::Success);
        assert_eq!(h.link.take_written(), vec![ACK]);

        assert_eq!(h.blocks.len(), 2);
        assert!(!h.blocks[0].is_final_block());
        assert!(h.blocks[1].is_final_block());
    }

    #[test]
    fn test_composed_enq_resends_ack() {
        let mut h = Harness::new(0x52);
        h.synchronize();
        h.deliver(&response(0x52, 0x00));
        h.link.take_written();

        h.link.feed(&[ENQ]);
        assert_eq!(h.poll(), State::CommandTransmitted);
        assert_eq!(h.link.take_written(), vec![ACK]);
        assert_eq!(h.fsm.status(), Status::InProgress);
    }

    #[test]
    fn test_enq_outside_composed_breaks_sequence() {
        let mut h = Harness::new(0x14);
        h.synchronize();

        h.link.feed(&[ENQ]);
        assert_eq!(h.poll(), State::Unsynchronized);
        assert_eq!(h.fsm.status(), Status::SequenceBreak);
    }

    #[test]
    fn test_composed_nak_after_accept() {
        let mut h = Harness::new(0x27);
        h.synchronize();
        h.deliver(&response(0x27, 0x00));

        h.link.feed(&[NAK]);
        assert_eq!(h.poll(), State::AwaitingNewCommand);
        assert_eq!(h.fsm.status(), Status::NakAfterResponseAccepted);
        assert_eq!(h.blocks.len(), 1);
    }

    #[test]
    fn test_composed_missing_next_block() {
        let mut h = Harness::new(0x26);
        h.synchronize();
        h.deliver(&response(0x26, 0x00));
        h.link.take_written();

        h.timer.expire();
        assert_eq!(h.poll(), State::AwaitingNewCommand);
        assert_eq!(h.fsm.status(), Status::NoReplyAwaitingNextBlock);
        assert!(h.link.take_written().is_empty());
        assert_eq!(h.blocks.len(), 1);
    }

    #[test]
    fn test_unexpected_byte_breaks_sequence() {
        let mut h = Harness::new(0x14);
        h.synchronize();

        h.link.feed(&[0x99, 0x01, 0x02, 0x03]);
        assert_eq!(h.poll(), State::Unsynchronized);
        assert_eq!(h.fsm.status(), Status::SequenceBreak);
        assert_eq!(h.link.pending(), 0);
    }

    #[test]
    fn test_resync_after_sequence_break() {
        let mut h = Harness::new(0x14);
        h.synchronize();
        h.link.feed(&[0x99]);
        h.poll();
        assert_eq!(h.fsm.status(), Status::SequenceBreak);

        h.synchronize();
        assert_eq!(h.fsm.status(), Status::InProgress);
        assert_eq!(h.deliver(&response(0x14, 0x00)), State::AwaitingNewCommand);
        assert_eq!(h.fsm.status(), Status::Success);
    }

    #[test]
    fn test_other_code_breaks_sequence() {
        let mut h = Harness::new(0x14);
        h.synchronize();

        // valid code, but not the one sent
        h.link.feed(&[0x20]);
        assert_eq!(h.poll(), State::Unsynchronized);
        assert_eq!(h.fsm.status(), Status::SequenceBreak);
    }

    #[test]
    fn test_synchronized_deadline() {
        let mut h = Harness::new(0x14);
        h.link.feed(&[ENQ]);
        assert_eq!(h.poll(), State::Synchronized);
        assert_eq!(h.timer.last_armed(), Some(Duration::from_millis(511)));

        h.link.feed(&[0x42]);
        h.timer.expire();
        assert_eq!(h.poll(), State::Unsynchronized);
        assert_eq!(h.fsm.status(), Status::InProgress);
        assert_eq!(h.link.pending(), 0);
        assert!(h.link.written().is_empty());
    }

    #[test]
    fn test_synchronized_ignores_other_bytes() {
        let mut h = Harness::new(0x14);
        h.link.feed(&[ENQ]);
        h.poll();

        h.link.feed(&[0x42]);
        assert_eq!(h.poll(), State::Synchronized);
        assert!(h.link.written().is_empty());
    }

    #[test]
    fn test_wait_then_enq() {
        let mut h = Harness::new(0x14);
        h.synchronize();

        h.link.feed(&[WAIT]);
        assert_eq!(h.poll(), State::SequenceDelayReceived);
        assert_eq!(h.timer.last_armed(), Some(Duration::from_secs(305)));
        assert_eq!(h.fsm.counters().wait_received, 0);

        h.link.feed(&[WAIT]);
        assert_eq!(h.poll(), State::SequenceDelayReceived);
        assert_eq!(h.fsm.counters().wait_received, 1);

        h.link.feed(&[ENQ]);
        assert_eq!(h.poll(), State::CommandTransmitted);
        assert_eq!(h.link.take_written(), h.command_bytes());

        assert_eq!(h.deliver(&response(0x14, 0x00)), State::AwaitingNewCommand);
        assert_eq!(h.fsm.status(), Status::Success);
    }

    #[test]
    fn test_wait_ceiling() {
        let mut h = Harness::new(0x14);
        h.synchronize();
        h.link.feed(&[WAIT]);
        h.poll();

        for _ in 1..MAX_BLOCK_WAIT {
            h.link.feed(&[WAIT]);
            assert_eq!(h.poll(), State::SequenceDelayReceived);
        }

        h.link.feed(&[WAIT]);
        assert_eq!(h.poll(), State::AwaitingNewCommand);
        assert_eq!(h.fsm.status(), Status::WaitReceivedCeiling);
    }

    #[test]
    fn test_wait_timeout() {
        let mut h = Harness::new(0x14);
        h.synchronize();
        h.link.feed(&[WAIT]);
        h.poll();

        h.timer.expire();
        assert_eq!(h.poll(), State::AwaitingNewCommand);
        assert_eq!(h.fsm.status(), Status::WaitTimeout);
    }

    #[test]
    fn test_sequence_break_while_waiting() {
        let mut h = Harness::new(0x14);
        h.synchronize();
        h.link.feed(&[WAIT]);
        h.poll();

        h.link.feed(&[0x14]);
        assert_eq!(h.poll(), State::Unsynchronized);
        assert_eq!(h.fsm.status(), Status::SequenceBreak);
    }

    #[test]
    fn test_bad_checksum_sends_nak() {
        let mut h = Harness::new(0x14);
        h.synchronize();

        assert_eq!(h.deliver(&corrupted(0x14)), State::CommandTransmitted);
        assert_eq!(h.link.take_written(), vec![NAK]);
        assert_eq!(h.fsm.counters().nak_transmitted, 1);
        assert!(h.blocks.is_empty());

        assert_eq!(h.deliver(&response(0x14, 0x00)), State::AwaitingNewCommand);
        assert_eq!(h.fsm.status(), Status::Success);
        assert_eq!(h.blocks.len(), 1);
    }

    #[test]
    fn test_nak_transmitted_ceiling() {
        let mut h = Harness::new(0x14);
        h.synchronize();

        for _ in 1..MAX_BLOCK_NAK {
            assert_eq!(h.deliver(&corrupted(0x14)), State::CommandTransmitted);
        }

        assert_eq!(h.deliver(&corrupted(0x14)), State::AwaitingNewCommand);
        assert_eq!(h.fsm.status(), Status::NakTransmittedCeiling);
        assert_eq!(h.link.take_written(), vec![NAK; MAX_BLOCK_NAK as usize]);
        assert!(h.blocks.is_empty());
    }

    #[test]
    fn test_no_reply_ceiling() {
        let mut h = Harness::new(0x14);
        h.synchronize();

        for i in 1..MAX_COMMAND_NO_REPLY {
            h.timer.expire();
            assert_eq!(h.poll(), State::CommandTransmitted);
            assert_eq!(h.fsm.counters().no_reply, i);
            assert_eq!(h.link.take_written(), h.command_bytes());
        }

        h.timer.expire();
        assert_eq!(h.poll(), State::AwaitingNewCommand);
        assert_eq!(h.fsm.status(), Status::NoReplyCeiling);
        assert!(h.link.take_written().is_empty());
    }

    #[test]
    fn test_character_gap_timeout() {
        let mut h = Harness::new(0x14);
        h.synchronize();

        let block = response(0x14, 0x00);
        h.link.feed(&block[..40]);
        assert_eq!(h.poll(), State::CodeReceived);
        assert_eq!(h.poll(), State::CodeReceived);
        assert_eq!(h.fsm.received(), 40);

        h.timer.expire();
        assert_eq!(h.poll(), State::CommandTransmitted);
        assert_eq!(h.fsm.counters().no_reply, 1);
        assert_eq!(h.link.take_written(), h.command_bytes());
        assert_eq!(h.timer.last_armed(), Some(h.fsm.timing().max_response));

        assert_eq!(h.deliver(&block), State::AwaitingNewCommand);
        assert_eq!(h.fsm.status(), Status::Success);
    }

    #[test]
    fn test_character_gap_ceiling() {
        let mut h = Harness::new(0x14);
        h.synchronize();

        let block = response(0x14, 0x00);

        for i in 1..=MAX_COMMAND_NO_REPLY {
            h.link.feed(&block[..40]);
            assert_eq!(h.poll(), State::CodeReceived);
            assert_eq!(h.poll(), State::CodeReceived);

            h.timer.expire();
            let state = h.poll();
            assert_eq!(h.fsm.counters().no_reply, i);

            if i < MAX_COMMAND_NO_REPLY {
                assert_eq!(state, State::CommandTransmitted);
                assert_eq!(h.link.take_written(), h.command_bytes());
            } else {
                assert_eq!(state, State::AwaitingNewCommand);
            }
        }

        assert_eq!(h.fsm.status(), Status::NoReplyCeiling);
        assert!(h.link.take_written().is_empty());
        assert!(h.blocks.is_empty());
    }

    #[test]
    fn test_composed_nak_transmitted_restarts_per_block() {
        let mut h = Harness::new(0x26);
        h.synchronize();

        for i in 1..MAX_BLOCK_NAK {
            assert_eq!(h.deliver(&corrupted(0x26)), State::CommandTransmitted);
            assert_eq!(h.fsm.counters().nak_transmitted, i);
        }

        assert_eq!(h.deliver(&response(0x26, 0x00)), State::CommandTransmitted);
        assert_eq!(h.fsm.counters().nak_transmitted, 0);

        // a full new allowance for the second block
        for _ in 1..MAX_BLOCK_NAK {
            assert_eq!(h.deliver(&corrupted(0x26)), State::CommandTransmitted);
        }
        assert_eq!(h.fsm.status(), Status::InProgress);

        assert_eq!(h.deliver(&response(0x26, 0x10)), State::AwaitingNewCommand);
        assert_eq!(h.fsm.status(), Status::Success);
        assert_eq!(h.blocks.len(), 2);
    }

    #[test]
    fn test_meter_occurrence() {
        let mut h = Harness::new(0x14);
        h.synchronize();

        assert_eq!(
            h.deliver(&response(CODE_METER_OCCURRENCE, 0x00)),
            State::AwaitingNewCommand
        );
        assert_eq!(h.fsm.status(), Status::MeterOccurrence);
        assert_eq!(h.blocks.len(), 1);
        assert_eq!(h.link.take_written(), vec![ACK]);
    }

    #[test]
    fn test_command_not_implemented() {
        let mut h = Harness::new(0x26);
        h.synchronize();

        assert_eq!(
            h.deliver(&response(CODE_NOT_IMPLEMENTED, 0x00)),
            State::AwaitingNewCommand
        );
        assert_eq!(h.fsm.status(), Status::CommandNotImplemented);
    }

    #[test]
    fn test_new_command_resets_session() {
        let mut h = Harness::new(0x14);
        h.synchronize();
        h.link.feed(&[NAK]);
        h.poll();
        assert_eq!(h.fsm.counters().nak_received, 1);

        h.link.feed(&[0xEE; 10]);
        h.fsm.set_command(CommandBlock::from_slice(&[0x20]));

        assert_eq!(h.fsm.state(), State::Unsynchronized);
        assert_eq!(h.fsm.status(), Status::InProgress);
        assert_eq!(h.fsm.counters(), Counters::default());
        assert_eq!(h.fsm.received(), 0);
        assert_eq!(h.link.pending(), 0);
    }

    #[test]
    fn test_short_write_is_tolerated() {
        let mut h = Harness::new(0x14);
        h.link.feed(&[ENQ]);
        h.poll();

        h.link.fail_next_writes(1);
        h.link.feed(&[ENQ]);
        assert_eq!(h.poll(), State::CommandTransmitted);
        assert!(h.link.written().is_empty());

        h.timer.expire();
        assert_eq!(h.poll(), State::CommandTransmitted);
        assert_eq!(h.link.take_written(), h.command_bytes());
    }

    #[test]
    fn test_installed_callback() {
        let link = SimulatedTransport::new();
        let mut fsm = ReaderFsm::new(link.clone(), ManualTimer::new());
        let count = Arc::new(AtomicUsize::new(0));

        let seen = count.clone();
        fsm.set_callback(move |block| {
            assert_eq!(block.code(), 0x21);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        fsm.set_command(CommandBlock::from_slice(&[0x21]));
        link.feed(&[ENQ, ENQ]);
        fsm.poll();
        fsm.poll();
        link.feed(&response(0x21, 0x00));
        fsm.poll();

        assert_eq!(fsm.poll(), State::AwaitingNewCommand);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_custom_timing() {
        let link = SimulatedTransport::new();
        let timer = ManualTimer::new();
        let timing = TimingTable::for_baud_rate(2400);
        let mut fsm = ReaderFsm::with_timing(link.clone(), timer.clone(), timing);

        fsm.set_command(CommandBlock::from_slice(&[0x14]));
        link.feed(&[ENQ, ENQ]);
        fsm.poll();
        fsm.poll();

        assert_eq!(timer.last_armed(), Some(Duration::from_millis(541)));
    }
}
