//! Blocking round trips: DSP RAM access, checksums, board and DSP status.
//!
//! Each request goes out only if its class has nothing outstanding, then packets are decoded
//! tick by tick until the answer shows up or the class timeout runs out.
use super::{
    Board,
    ALL_DSP_CORES,
};
use crate::{
    command::{
        self,
        DspMessage,
        MemoryPage,
    },
    core::MAX_BLOCK_READ_WORDS,
    correlator::{
        RequestClass,
        Responses,
    },
    transport::{
        Transport,
        TransportResult,
    },
};
use anyhow::bail;
use tracing::{
    debug,
    info,
    warn,
};

impl<T> Board<T>
where
    T: Transport,
{
    /// Decode packets until the outstanding request of `class` is answered, giving up on it
    /// after the class timeout
    fn await_pending(&mut self, class: RequestClass) -> anyhow::Result<()> {
        debug!(board = %self.identity, "Waiting on the {class:?} request already in flight");
        for _ in 0..=class.timeout_ticks() {
            if !self.correlator.is_pending(class) {
                return Ok(());
            }
            self.process_data_packets(false)?;
            self.tick();
        }
        self.correlator.latch(class).abandon();
        Ok(())
    }

    /// Send `cmd` as a request of `class` and decode packets until `take` finds the answer.
    /// A request of the same class already in flight is waited out first and its answer
    /// dropped. `None` means the board didn't answer in time.
    pub(crate) fn round_trip<R>(
        &mut self,
        class: RequestClass,
        cmd: &[u8],
        mut take: impl FnMut(&mut Responses) -> Option<R>,
    ) -> anyhow::Result<Option<R>> {
        if self.correlator.is_pending(class) {
            self.await_pending(class)?;
            let _stale = take(&mut self.correlator.responses);
        }
        if !self.correlator.try_issue(class).should_send() {
            bail!("A {class:?} request to {} is still outstanding", self.identity);
        }
        self.send(cmd)?;
        for _ in 0..=class.timeout_ticks() {
            self.process_data_packets(false)?;
            if let Some(answer) = take(&mut self.correlator.responses) {
                return Ok(Some(answer));
            }
            self.tick();
        }
        self.correlator.latch(class).abandon();
        debug!(board = %self.identity, "No answer to {class:?} request");
        Ok(None)
    }

    /// # Errors
    /// Returns an error on transport failures
    pub fn write_dsp_word(
        &mut self,
        chip: u8,
        core: u8,
        page: MemoryPage,
        addr: u16,
        value: u16,
    ) -> TransportResult<()> {
        self.send(&command::write_dsp(chip, core, page, addr, value))
    }

    /// Write at the address after the previous write to this core
    /// # Errors
    /// Returns an error on transport failures
    pub fn write_next_dsp_word(&mut self, chip: u8, core: u8, value: u16) -> TransportResult<()> {
        self.send(&command::write_next_dsp(chip, core, value))
    }

    /// Fill `count` words starting at `addr` with `value`
    /// # Errors
    /// Returns an error on transport failures
    pub fn fill_dsp_block(
        &mut self,
        chip: u8,
        core: u8,
        page: MemoryPage,
        addr: u16,
        count: u16,
        value: u16,
    ) -> TransportResult<()> {
        if count == 0 {
            return Ok(());
        }
        self.write_dsp_word(chip, core, page, addr, value)?;
        for _ in 1..count {
            self.write_next_dsp_word(chip, core, value)?;
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error on transport failures or if a read is already outstanding
    pub fn read_dsp_word(
        &mut self,
        chip: u8,
        core: u8,
        page: MemoryPage,
        addr: u16,
    ) -> anyhow::Result<Option<u16>> {
        self.correlator.responses.ram_word = None;
        let cmd = command::read_dsp(chip, core, page, addr);
        self.round_trip(RequestClass::RamRead, &cmd, |r| r.ram_word.take())
    }

    /// Read the word after the previous read from this core
    /// # Errors
    /// Returns an error on transport failures or if a read is already outstanding
    pub fn read_next_dsp_word(&mut self, chip: u8, core: u8) -> anyhow::Result<Option<u16>> {
        self.correlator.responses.ram_word = None;
        let cmd = command::read_next_dsp(chip, core);
        self.round_trip(RequestClass::RamRead, &cmd, |r| r.ram_word.take())
    }

    /// Read `count` words, at most [`MAX_BLOCK_READ_WORDS`]. Words the board didn't send read
    /// as zero.
    /// # Errors
    /// Returns an error on transport failures or if a read is already outstanding
    pub fn read_dsp_block(
        &mut self,
        chip: u8,
        core: u8,
        page: MemoryPage,
        addr: u16,
        count: u8,
    ) -> anyhow::Result<Vec<u16>> {
        let count = count.min(MAX_BLOCK_READ_WORDS);
        self.correlator.responses.ram_block = None;
        let cmd = command::read_dsp_block(chip, core, page, addr, count);
        let bytes = self
            .round_trip(RequestClass::RamBlock, &cmd, |r| r.ram_block.take())?
            .unwrap_or_default();
        let mut words: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        words.resize(usize::from(count), 0);
        Ok(words)
    }

    /// Sum of `size` words starting at `addr`, as computed by the board
    /// # Errors
    /// Returns an error on transport failures or if a checksum is already outstanding
    pub fn dsp_block_checksum(
        &mut self,
        chip: u8,
        core: u8,
        page: MemoryPage,
        addr: u16,
        size: u16,
    ) -> anyhow::Result<Option<u16>> {
        self.correlator.responses.checksum = None;
        let cmd = command::dsp_checksum(chip, core, page, addr, size);
        self.round_trip(RequestClass::Checksum, &cmd, |r| r.checksum.take())
    }

    /// The status byte of the board's network processor
    /// # Errors
    /// Returns an error on transport failures or if the board doesn't answer
    pub fn get_board_status(&mut self) -> anyhow::Result<u8> {
        self.correlator.responses.board_status = None;
        let cmd = command::get_status();
        match self.round_trip(RequestClass::BoardStatus, &cmd, |r| r.board_status.take())? {
            Some(status) => Ok(status),
            None => bail!("Board {} didn't answer a status request", self.identity),
        }
    }

    /// # Errors
    /// Returns an error on transport failures or if a status request is already outstanding
    pub fn read_dsp_status(&mut self, chip: u8, core: u8) -> anyhow::Result<Option<u16>> {
        self.correlator.responses.dsp_status = None;
        let cmd = command::message_dsp(chip, core, &DspMessage::status_request());
        self.round_trip(RequestClass::DspStatus, &cmd, |r| r.dsp_status.take())
    }

    /// Log one core's status word, trying up to `tries` times
    /// # Errors
    /// Returns an error on transport failures
    pub fn log_dsp_status(&mut self, chip: u8, core: u8, tries: usize) -> anyhow::Result<Option<u16>> {
        for _ in 0..tries {
            if let Some(status) = self.read_dsp_status(chip, core)? {
                info!(board = %self.identity, "DSP chip {chip} core {core} status {status:#06x}");
                return Ok(Some(status));
            }
        }
        warn!(board = %self.identity, "DSP chip {chip} core {core} status unreadable");
        Ok(None)
    }

    /// # Errors
    /// Returns an error on transport failures
    pub fn log_all_dsp_status(&mut self, tries: usize) -> anyhow::Result<()> {
        for (chip, core) in ALL_DSP_CORES {
            self.log_dsp_status(chip, core, tries)?;
        }
        Ok(())
    }

    /// Compare DSP messages sent against ACKs received, then start counting again. Returns
    /// whether they matched.
    pub fn check_dsp_acks(&mut self) -> bool {
        let sent = std::mem::take(&mut self.diag.dsp_messages_sent);
        let acked = std::mem::take(&mut self.diag.dsp_acks);
        if sent != acked {
            warn!(
                board = %self.identity,
                "DSP messages sent: {sent}, ACKs received: {acked}"
            );
        }
        sent == acked
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::sim_board;
    use crate::{
        command::MemoryPage,
        core::SHARED_MEMORY,
        transport::sim::Simulator,
    };

    fn quiet() -> Simulator {
        Simulator::with_greeting("")
    }

    #[test]
    fn test_word_write_then_read() {
        let mut board = sim_board(quiet());
        board
            .write_dsp_word(1, 2, MemoryPage::LOCAL, 0x0040, 0xBEEF)
            .unwrap();
        board.write_next_dsp_word(1, 2, 0x1234).unwrap();
        assert_eq!(
            board
                .read_dsp_word(1, 2, MemoryPage::LOCAL, 0x0040)
                .unwrap(),
            Some(0xBEEF)
        );
        assert_eq!(board.read_next_dsp_word(1, 2).unwrap(), Some(0x1234));
        // Local memory isn't shared with the other core of the pair
        assert_eq!(
            board
                .read_dsp_word(1, 1, MemoryPage::LOCAL, 0x0040)
                .unwrap(),
            Some(0)
        );
    }

    #[test]
    fn test_block_read_zero_fills() {
        let mut sim = quiet();
        sim.poke(2, 3, SHARED_MEMORY, 0x10, 7);
        sim.poke(2, 3, SHARED_MEMORY, 0x11, 8);
        let mut board = sim_board(sim);
        let words = board
            .read_dsp_block(2, 4, MemoryPage::SHARED, 0x10, 3)
            .unwrap();
        assert_eq!(words, vec![7, 8, 0]);
        board.transport_mut().set_silent(true);
        let words = board
            .read_dsp_block(2, 4, MemoryPage::SHARED, 0x10, 3)
            .unwrap();
        assert_eq!(words, vec![0, 0, 0]);
    }

    #[test]
    fn test_fill_block() {
        let mut board = sim_board(quiet());
        board
            .fill_dsp_block(1, 1, MemoryPage::LOCAL, 0x100, 4, 0xFFFF)
            .unwrap();
        let sim = board.transport_mut();
        assert_eq!(sim.peek(1, 1, 0, 0x103), 0xFFFF);
        assert_eq!(sim.peek(1, 1, 0, 0x104), 0);
    }

    #[test]
    fn test_checksum_and_status() {
        let mut sim = quiet();
        sim.poke(1, 1, SHARED_MEMORY, 0, 0xFFFF);
        sim.poke(1, 1, SHARED_MEMORY, 1, 0x0003);
        sim.set_dsp_status(0x0042);
        sim.set_fpga_loaded(true);
        let mut board = sim_board(sim);
        assert_eq!(
            board
                .dsp_block_checksum(1, 2, MemoryPage::SHARED, 0, 2)
                .unwrap(),
            Some(0x0002)
        );
        assert_eq!(board.read_dsp_status(2, 4).unwrap(), Some(0x0042));
        assert_eq!(board.get_board_status().unwrap() & 1, 1);
    }

    #[test]
    fn test_silent_board_times_out() {
        let mut sim = quiet();
        sim.set_silent(true);
        let mut board = sim_board(sim);
        assert_eq!(
            board
                .read_dsp_word(1, 1, MemoryPage::LOCAL, 0)
                .unwrap(),
            None
        );
        // The abandoned latch lets the next request out
        assert!(board.read_dsp_status(1, 1).unwrap().is_none());
        assert!(board.get_board_status().is_err());
    }

    #[test]
    fn test_status_read_after_pending_request() {
        let mut sim = quiet();
        sim.set_dsp_status(0x0011);
        let mut board = sim_board(sim);
        assert!(board.request_dsp_status(1, 1).unwrap().should_send());
        board.transport_mut().set_dsp_status(0x0022);
        board.log_all_dsp_status(1).unwrap();
        // The earlier answer is consumed, not mistaken for the blocking read's
        assert_eq!(board.read_dsp_status(2, 4).unwrap(), Some(0x0022));
        assert!(board.take_dsp_status().is_none());
    }

    #[test]
    fn test_unanswered_pending_request_is_given_up() {
        let mut sim = quiet();
        sim.set_silent(true);
        let mut board = sim_board(sim);
        assert!(board.request_dsp_status(1, 1).unwrap().should_send());
        board.transport_mut().set_silent(false);
        board.transport_mut().set_dsp_status(0x0033);
        assert_eq!(board.read_dsp_status(1, 2).unwrap(), Some(0x0033));
    }

    #[test]
    fn test_ack_accounting() {
        let mut board = sim_board(quiet());
        board.set_software_gain(0, 10.0).unwrap();
        board.process_data_packets(false).unwrap();
        assert!(board.check_dsp_acks());
        board.diag.dsp_messages_sent += 1;
        assert!(!board.check_dsp_acks());
    }
}
