//! Request/response pairing.
//!
//! Every request class has at most one request outstanding. A request made while the previous
//! one is still unanswered is suppressed and counted, until the class timeout runs out and the
//! latch is forced open again.
use crate::core::{
    CHECKSUM_TIMEOUT_TICKS,
    RESPONSE_TIMEOUT_TICKS,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RequestClass {
    AScan,
    PeakData,
    RamRead,
    RamBlock,
    Checksum,
    DspStatus,
    BoardStatus,
}

impl RequestClass {
    pub const ALL: [RequestClass; 7] = [
        RequestClass::AScan,
        RequestClass::PeakData,
        RequestClass::RamRead,
        RequestClass::RamBlock,
        RequestClass::Checksum,
        RequestClass::DspStatus,
        RequestClass::BoardStatus,
    ];

    /// Ticks a request may stay unanswered
    #[must_use]
    pub fn timeout_ticks(self) -> u32 {
        match self {
            RequestClass::Checksum => CHECKSUM_TIMEOUT_TICKS,
            _ => RESPONSE_TIMEOUT_TICKS,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// What [`InFlight::try_issue`] decided
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Issue {
    /// Nothing pending, go ahead
    Send,
    /// The previous request is still pending
    Suppressed,
    /// The previous request was abandoned, go ahead
    TimedOut,
}

impl Issue {
    #[must_use]
    pub fn should_send(self) -> bool {
        self != Issue::Suppressed
    }
}

/// A single-outstanding-request latch
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InFlight {
    pending: bool,
    ticks: u32,
    timeout: u32,
    suppressed: u32,
    timeouts: u32,
}

impl InFlight {
    #[must_use]
    pub fn new(timeout: u32) -> Self {
        Self {
            pending: false,
            ticks: 0,
            timeout,
            suppressed: 0,
            timeouts: 0,
        }
    }

    /// Decide whether a new request may go out. Each suppressed call counts one tick against
    /// the pending request. The latch is set whenever the answer is to send.
    pub fn try_issue(&mut self) -> Issue {
        let issue = if self.pending {
            if self.ticks < self.timeout {
                self.ticks += 1;
                self.suppressed += 1;
                return Issue::Suppressed;
            }
            self.timeouts += 1;
            Issue::TimedOut
        } else {
            Issue::Send
        };
        self.pending = true;
        self.ticks = 0;
        issue
    }

    /// The response arrived
    pub fn clear(&mut self) {
        self.pending = false;
        self.ticks = 0;
    }

    /// Give up on the pending request without waiting out the ticks
    pub fn abandon(&mut self) {
        if self.pending {
            self.timeouts += 1;
        }
        self.clear();
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// `(suppressed, timed out)` since the last call
    pub fn take_counts(&mut self) -> (u32, u32) {
        let counts = (self.suppressed, self.timeouts);
        self.suppressed = 0;
        self.timeouts = 0;
        counts
    }
}

/// Answers that arrived and haven't been collected yet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Responses {
    pub board_status: Option<u8>,
    pub ram_word: Option<u16>,
    pub ram_block: Option<Vec<u8>>,
    pub checksum: Option<u16>,
    pub dsp_status: Option<u16>,
    /// Set when a decoded A-scan is waiting to be displayed
    pub ascan_ready: bool,
    /// Set when a peak packet has been decoded into the gates
    pub peak_ready: bool,
}

/// The latches for every request class of one board plus the answers they produced
#[derive(Debug, Clone)]
pub struct Correlator {
    latches: [InFlight; 7],
    pub responses: Responses,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            latches: RequestClass::ALL.map(|class| InFlight::new(class.timeout_ticks())),
            responses: Responses::default(),
        }
    }

    pub fn latch(&mut self, class: RequestClass) -> &mut InFlight {
        &mut self.latches[class.index()]
    }

    pub fn try_issue(&mut self, class: RequestClass) -> Issue {
        self.latch(class).try_issue()
    }

    /// The answer for `class` arrived
    pub fn complete(&mut self, class: RequestClass) {
        self.latch(class).clear();
    }

    #[must_use]
    pub fn is_pending(&self, class: RequestClass) -> bool {
        self.latches[class.index()].is_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_request_suppressed() {
        let mut latch = InFlight::new(RESPONSE_TIMEOUT_TICKS);
        assert_eq!(latch.try_issue(), Issue::Send);
        assert_eq!(latch.try_issue(), Issue::Suppressed);
        assert!(latch.is_pending());
        assert_eq!(latch.take_counts(), (1, 0));
    }

    #[test]
    fn test_cleared_latch_sends() {
        let mut latch = InFlight::new(3);
        latch.try_issue();
        latch.clear();
        assert_eq!(latch.try_issue(), Issue::Send);
    }

    #[test]
    fn test_forced_open_after_timeout() {
        let mut latch = InFlight::new(3);
        assert!(latch.try_issue().should_send());
        for _ in 0..3 {
            assert_eq!(latch.try_issue(), Issue::Suppressed);
        }
        assert_eq!(latch.try_issue(), Issue::TimedOut);
        assert_eq!(latch.take_counts(), (3, 1));
        // The forced request is itself pending
        assert_eq!(latch.try_issue(), Issue::Suppressed);
    }

    #[test]
    fn test_classes_are_independent() {
        let mut c = Correlator::new();
        assert_eq!(c.try_issue(RequestClass::AScan), Issue::Send);
        assert_eq!(c.try_issue(RequestClass::PeakData), Issue::Send);
        assert_eq!(c.try_issue(RequestClass::AScan), Issue::Suppressed);
        c.complete(RequestClass::AScan);
        assert!(!c.is_pending(RequestClass::AScan));
        assert!(c.is_pending(RequestClass::PeakData));
    }

    #[test]
    fn test_checksum_waits_longer() {
        assert_eq!(RequestClass::Checksum.timeout_ticks(), 500);
        assert_eq!(RequestClass::RamRead.timeout_ticks(), 50);
    }
}
