//! Measurement requests. These never wait: a request is sent only when its class has nothing
//! outstanding, and the answer is picked up later by the packet decoder.
use super::Board;
use crate::{
    command::{
        self,
        DspMessage,
        PeakSlot,
    },
    correlator::{
        Issue,
        RequestClass,
    },
    transport::Transport,
};
use anyhow::bail;

impl<T> Board<T>
where
    T: Transport,
{
    fn issue(&mut self, class: RequestClass, cmd: &[u8]) -> anyhow::Result<Issue> {
        let issue = self.correlator.try_issue(class);
        if issue.should_send() {
            self.send(cmd)?;
        }
        Ok(issue)
    }

    /// Ask for one A-scan of `channel`, alternating between its two cores
    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    #[allow(clippy::cast_possible_truncation)]
    pub fn request_ascan(&mut self, channel: usize) -> anyhow::Result<Issue> {
        if channel >= self.channels.len() {
            bail!("Board {} has no channel {channel}", self.identity);
        }
        let issue = self.correlator.try_issue(RequestClass::AScan);
        if issue.should_send() {
            let ch = &mut self.channels[channel];
            let core = ch.next_ascan_core();
            let cmd = command::get_ascan(ch.chip, core, channel as u8);
            self.send(&cmd)?;
        }
        Ok(issue)
    }

    /// Ask for the peak data of one channel's linked gates
    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    #[allow(clippy::cast_possible_truncation)]
    pub fn request_peak_data(&mut self, channel: usize) -> anyhow::Result<Issue> {
        let Some(ch) = self.channels.get(channel) else {
            bail!("Board {} has no channel {channel}", self.identity);
        };
        let cmd = command::get_peak_data(channel as u8, ch.gate_count(), ch.is_wall);
        self.issue(RequestClass::PeakData, &cmd)
    }

    /// Ask for the peak data of all four channels at once. Inactive channels are left out.
    /// # Errors
    /// Returns an error on transport failures
    #[allow(clippy::cast_possible_truncation)]
    pub fn request_peak_data4(&mut self) -> anyhow::Result<Issue> {
        let mut slots: [PeakSlot; 4] = [None; 4];
        let mut wall_flags = 0u8;
        for (i, ch) in self.channels.iter().take(4).enumerate() {
            if ch.active {
                slots[i] = Some((i as u8, ch.gate_count()));
                if ch.is_wall {
                    wall_flags |= 1 << i;
                }
            }
        }
        let cmd = command::get_peak_data4(slots, wall_flags);
        self.issue(RequestClass::PeakData, &cmd)
    }

    /// Ask one core for its status word. The answer lands in the board's responses.
    /// # Errors
    /// Returns an error on transport failures
    pub fn request_dsp_status(&mut self, chip: u8, core: u8) -> anyhow::Result<Issue> {
        let cmd = command::message_dsp(chip, core, &DspMessage::status_request());
        self.issue(RequestClass::DspStatus, &cmd)
    }

    /// The status word from the last answered [`Board::request_dsp_status`]
    pub fn take_dsp_status(&mut self) -> Option<u16> {
        self.correlator.responses.dsp_status.take()
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::sim_board;
    use crate::{
        core::PacketId,
        correlator::Issue,
        gate::{
            Gate,
            GateRole,
            SigProcMode,
        },
        transport::sim::Simulator,
    };

    #[test]
    fn test_pending_ascan_suppressed() {
        let mut sim = Simulator::with_greeting("");
        sim.set_silent(true);
        let mut board = sim_board(sim);
        assert_eq!(board.request_ascan(1).unwrap(), Issue::Send);
        assert_eq!(board.request_ascan(1).unwrap(), Issue::Suppressed);
        let sent = board.transport_mut().commands().to_vec();
        assert_eq!(sent, vec![vec![PacketId::GetAScan as u8, 1, 3, 1]]);
        // The next request that does go out uses the other core
        for _ in 0..49 {
            assert_eq!(board.request_ascan(1).unwrap(), Issue::Suppressed);
        }
        assert_eq!(board.request_ascan(1).unwrap(), Issue::TimedOut);
        assert_eq!(board.transport_mut().commands()[1], vec![17, 1, 4, 1]);
    }

    #[test]
    fn test_peak4_slots() {
        let mut sim = Simulator::with_greeting("");
        sim.set_silent(true);
        let mut board = sim_board(sim);
        board.channels[1].active = false;
        board.channels[2].is_wall = true;
        board.link_gates(
            2,
            vec![
                Gate::new(GateRole::WallStart, SigProcMode::Peak).unwrap(),
                Gate::new(GateRole::WallEnd, SigProcMode::Peak).unwrap(),
            ],
        );
        assert!(board.request_peak_data4().unwrap().should_send());
        assert_eq!(
            board.transport_mut().commands()[0],
            vec![20, 0, 0, 0xFF, 0, 2, 2, 3, 0, 0b100]
        );
        assert!(!board.request_peak_data(0).unwrap().should_send());
    }

    #[test]
    fn test_dsp_status_request() {
        let mut sim = Simulator::with_greeting("");
        sim.set_dsp_status(0x0BAD);
        let mut board = sim_board(sim);
        assert!(board.request_dsp_status(2, 3).unwrap().should_send());
        board.process_data_packets(false).unwrap();
        assert_eq!(board.take_dsp_status(), Some(0x0BAD));
        assert_eq!(board.request_dsp_status(2, 3).unwrap(), Issue::Send);
    }
}
