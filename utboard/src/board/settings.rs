//! Channel and board parameter pushes. DSP messages go to both cores of the channel; register
//! values go straight to the FPGA.
use super::Board;
use crate::{
    command::{
        self,
        DspMessage,
        Filter,
        Rectification,
        MAX_TRIGGER_WIDTH,
        SOFTWARE_GAIN_SCALE,
    },
    registers::{
        PULSE_DELAY,
        SYNC_WIDTH,
        TRIG_WIDTH,
    },
    transport::{
        Transport,
        TransportResult,
    },
};
use anyhow::bail;
use tracing::debug;

/// Linear DSP multiplier for a gain in dB
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn db_to_dsp_gain(db: f64) -> u16 {
    (10f64.powf(db / 20.0) * SOFTWARE_GAIN_SCALE)
        .round()
        .clamp(0.0, f64::from(u16::MAX)) as u16
}

impl<T> Board<T>
where
    T: Transport,
{
    fn check_channel(&self, channel: usize) -> anyhow::Result<()> {
        if channel >= self.channels.len() {
            bail!("Board {} has no channel {channel}", self.identity);
        }
        Ok(())
    }

    /// Send `msg` to both DSP cores of `channel`
    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    pub fn send_channel_message(&mut self, channel: usize, msg: &DspMessage) -> anyhow::Result<()> {
        self.check_channel(channel)?;
        let chip = self.channels[channel].chip;
        for core in self.channels[channel].cores {
            self.send(&command::message_dsp(chip, core, msg))?;
            self.diag.dsp_messages_sent += 1;
        }
        Ok(())
    }

    fn send_channel_messages(&mut self, channel: usize, msgs: &[DspMessage]) -> anyhow::Result<()> {
        for msg in msgs {
            self.send_channel_message(channel, msg)?;
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    pub fn set_software_gain(&mut self, channel: usize, db: f64) -> anyhow::Result<()> {
        self.send_channel_message(channel, &DspMessage::software_gain(db))
    }

    /// Preamp gains of the channel's two amplifier stages
    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_hardware_gain(&mut self, channel: usize, gain1: i32, gain2: i32) -> anyhow::Result<()> {
        self.check_channel(channel)?;
        self.send(&command::set_hardware_gain(channel as u8, gain1, gain2))
    }

    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    pub fn set_ascan_scale(&mut self, channel: usize, scale: u16) -> anyhow::Result<()> {
        self.send_channel_message(channel, &DspMessage::ascan_scale(scale))
    }

    /// The DSP delay is given on top of the channel's hardware delay, which must be set first
    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    pub fn set_software_delay(&mut self, channel: usize, delay: u16) -> anyhow::Result<()> {
        self.check_channel(channel)?;
        let hardware = self.channels[channel].hardware_delay;
        self.send_channel_message(channel, &DspMessage::delays(delay, hardware))
    }

    /// Samples the FPGA skips after the initial pulse
    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    pub fn set_hardware_delay(&mut self, channel: usize, delay: u32) -> anyhow::Result<()> {
        self.check_channel(channel)?;
        self.channels[channel].hardware_delay = delay;
        let writes = command::hardware_delay(&self.channels[channel].registers, delay);
        self.send_all(&writes)
    }

    /// Samples the FPGA stores after the delay
    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    pub fn set_hardware_range(&mut self, channel: usize, count: u32) -> anyhow::Result<()> {
        self.check_channel(channel)?;
        let writes = command::hardware_range(&self.channels[channel].registers, count);
        self.send_all(&writes)
    }

    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    pub fn set_sample_buffer_start(&mut self, channel: usize, start: u32) -> anyhow::Result<()> {
        self.check_channel(channel)?;
        let writes = command::sample_buffer_start(&self.channels[channel].registers, start);
        self.send_all(&writes)
    }

    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    pub fn set_dsp_sample_size(&mut self, channel: usize, size: u16) -> anyhow::Result<()> {
        self.send_channel_message(channel, &DspMessage::sample_size(size))
    }

    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    pub fn set_rectification(&mut self, channel: usize, mode: Rectification) -> anyhow::Result<()> {
        self.send_channel_message(channel, &DspMessage::rectification(mode))
    }

    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    pub fn set_filter(&mut self, channel: usize, filter: &Filter) -> anyhow::Result<()> {
        self.send_channel_messages(channel, &filter.messages())
    }

    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    pub fn set_filter_abs_preprocessing(&mut self, channel: usize, enabled: bool) -> anyhow::Result<()> {
        self.send_channel_message(channel, &DspMessage::filter_abs_preprocessing(enabled))
    }

    /// Set bits of the channel's DSP flags1 word and send the whole word
    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    pub fn set_flags1(&mut self, channel: usize, bits: u16) -> anyhow::Result<()> {
        self.check_channel(channel)?;
        self.channels[channel].dsp_flags1 |= bits;
        let flags = self.channels[channel].dsp_flags1;
        self.send_channel_message(channel, &DspMessage::flags1(flags))
    }

    /// Clear bits of the channel's DSP flags1 word and send the whole word
    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    pub fn clear_flags1(&mut self, channel: usize, bits: u16) -> anyhow::Result<()> {
        self.check_channel(channel)?;
        self.channels[channel].dsp_flags1 &= !bits;
        let flags = self.channels[channel].dsp_flags1;
        self.send_channel_message(channel, &DspMessage::flags1(flags))
    }

    /// Push one linked gate's position, level, flags, hit/miss counts and tuning
    /// # Errors
    /// Returns an error for a bad channel or gate or on transport failures
    pub fn push_gate(&mut self, channel: usize, gate: usize) -> anyhow::Result<()> {
        self.check_channel(channel)?;
        let Some(g) = self.channels[channel].gates.get(gate) else {
            bail!("Board {} channel {channel} has no gate {gate}", self.identity);
        };
        let msgs = g.messages(gate);
        self.send_channel_messages(channel, &msgs)
    }

    /// Push every gate linked to `channel`
    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    pub fn push_gates(&mut self, channel: usize) -> anyhow::Result<()> {
        self.check_channel(channel)?;
        for gate in 0..self.channels[channel].gates.len() {
            self.push_gate(channel, gate)?;
        }
        debug!(board = %self.identity, "Channel {channel} gates pushed");
        Ok(())
    }

    /// A DAC section, its level given as a gain in dB
    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    pub fn set_dac_gate(
        &mut self,
        channel: usize,
        gate: u8,
        start: u32,
        width: u32,
        gain_db: f64,
    ) -> anyhow::Result<()> {
        let level = db_to_dsp_gain(gain_db);
        self.send_channel_message(channel, &DspMessage::dac_gate(gate, start, width, level))
    }

    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    pub fn set_dac_flags(&mut self, channel: usize, gate: u8, flags: u16) -> anyhow::Result<()> {
        self.send_channel_message(channel, &DspMessage::dac_flags(gate, flags))
    }

    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    pub fn set_hit_miss(&mut self, channel: usize, gate: u8, hit: u16, miss: u16) -> anyhow::Result<()> {
        self.send_channel_message(channel, &DspMessage::hit_miss(gate, hit, miss))
    }

    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    pub fn send_transducer(&mut self, channel: usize, on: bool, bank: u8, pulse_channel: u8) -> anyhow::Result<()> {
        self.check_channel(channel)?;
        let writes = command::transducer(&self.channels[channel].registers, on, bank, pulse_channel);
        self.send_all(&writes)
    }

    /// Reject level in percent of full A-scan height; decoding squashes anything below it
    /// # Errors
    /// Returns an error for a bad channel
    pub fn set_reject_level(&mut self, channel: usize, percent: i32) -> anyhow::Result<()> {
        self.check_channel(channel)?;
        self.channels[channel].set_reject_percent(percent);
        Ok(())
    }

    /// Number of A-scans averaged for display, 1 to 25
    /// # Errors
    /// Returns an error for a bad channel
    pub fn set_smoothing(&mut self, channel: usize, depth: usize) -> anyhow::Result<()> {
        self.check_channel(channel)?;
        self.channels[channel].set_smoothing(depth);
        Ok(())
    }

    /// Flags for the board's network processor, see [`crate::core::control_flags`]
    /// # Errors
    /// Returns an error on transport failures
    pub fn send_control_flags(&mut self, flags: u16) -> TransportResult<()> {
        self.control_flags = flags;
        self.send(&command::set_control_flags(flags))
    }

    /// # Errors
    /// Returns an error on transport failures
    pub fn send_mapping_channel(&mut self, channel: i16) -> TransportResult<()> {
        self.mapping_channel = channel;
        self.send(&command::set_mapping_channel(channel))
    }

    /// # Errors
    /// Returns an error on transport failures
    pub fn reset_for_next_run(&mut self) -> TransportResult<()> {
        self.send(&command::reset_for_next_run())
    }

    /// # Errors
    /// Returns an error for a bad channel or on transport failures
    pub fn reset_mapping(&mut self, channel: usize) -> anyhow::Result<()> {
        self.send_channel_message(channel, &DspMessage::reset_mapping())
    }

    /// Pulser repetition rate, shared between the board's transducer banks. Only the board's
    /// network processor writes the rep rate registers, so the count is never seen half set.
    /// # Errors
    /// Returns an error on transport failures
    pub fn send_rep_rate(&mut self, hz: u32) -> TransportResult<()> {
        let count = command::rep_rate_count(hz, self.timing.banks);
        self.timing.rep_rate_hz = hz;
        self.send(&command::set_rep_rate(count))
    }

    /// # Errors
    /// Returns an error on transport failures
    pub fn send_trigger_width(&mut self, width: u32) -> TransportResult<()> {
        let width = width.min(MAX_TRIGGER_WIDTH);
        self.timing.trigger_width = width;
        for (addr, value) in TRIG_WIDTH.writes(width) {
            self.write_fpga(addr, value)?;
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error on transport failures
    pub fn send_sync_width(&mut self, width: u16) -> TransportResult<()> {
        self.timing.sync_width = width;
        for (addr, value) in SYNC_WIDTH.writes(u32::from(width)) {
            self.write_fpga(addr, value)?;
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error on transport failures
    pub fn send_pulse_delay(&mut self, delay: u16) -> TransportResult<()> {
        self.timing.pulse_delay = delay;
        for (addr, value) in PULSE_DELAY.writes(u32::from(delay)) {
            self.write_fpga(addr, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        super::tests::sim_board,
        *,
    };
    use crate::{
        core::{
            dsp_flags1,
            DspMessageId,
            PacketId,
        },
        gate::{
            Gate,
            GateRole,
            SigProcMode,
        },
        transport::sim::Simulator,
    };

    fn board() -> Board<Simulator> {
        sim_board(Simulator::with_greeting(""))
    }

    fn dsp_messages(board: &mut Board<Simulator>) -> Vec<Vec<u8>> {
        board
            .transport_mut()
            .commands()
            .iter()
            .filter(|c| c[0] == PacketId::MessageDsp as u8)
            .cloned()
            .collect()
    }

    #[test]
    fn test_message_goes_to_both_cores() {
        let mut board = board();
        board.set_software_gain(3, 0.0).unwrap();
        let msgs = dsp_messages(&mut board);
        assert_eq!(msgs.len(), 2);
        assert_eq!(&msgs[0][..4], &[18, 2, 3, DspMessageId::SetGain as u8]);
        assert_eq!(&msgs[1][..4], &[18, 2, 4, DspMessageId::SetGain as u8]);
        // 10^0 * 6.476 rounds to 6
        assert_eq!(&msgs[0][6..8], &[0, 6]);
    }

    #[test]
    fn test_bad_channel() {
        let mut board = board();
        assert!(board.set_software_gain(4, 1.0).is_err());
        assert!(board.set_reject_level(9, 10).is_err());
    }

    #[test]
    fn test_software_delay_includes_hardware() {
        let mut board = board();
        board.set_hardware_delay(1, 0x0102_0304).unwrap();
        assert_eq!(board.transport_mut().register(0x1F), 0x04);
        assert_eq!(board.transport_mut().register(0x22), 0x01);
        board.set_software_delay(1, 10).unwrap();
        let msgs = dsp_messages(&mut board);
        assert_eq!(&msgs[0][6..12], &[0, 10, 1, 2, 3, 4]);
    }

    #[test]
    fn test_range_forced_even() {
        let mut board = board();
        board.set_hardware_range(0, 0x0001_0001).unwrap();
        let sim = board.transport_mut();
        assert_eq!(sim.register(0x2B), 0x02);
        assert_eq!(sim.register(0x2D), 0x01);
    }

    #[test]
    fn test_flags1_set_and_clear() {
        let mut board = board();
        board
            .set_flags1(2, dsp_flags1::PROCESSING | dsp_flags1::GATES_ENABLED)
            .unwrap();
        board.clear_flags1(2, dsp_flags1::PROCESSING).unwrap();
        assert_eq!(board.channels[2].dsp_flags1, dsp_flags1::GATES_ENABLED);
        let msgs = dsp_messages(&mut board);
        assert_eq!(&msgs.last().unwrap()[6..8], &[0, 2]);
    }

    #[test]
    fn test_gate_push() {
        let mut board = board();
        let mut gate = Gate::new(GateRole::Flaw, SigProcMode::Peak).unwrap();
        gate.start = 0x100;
        gate.width = 30;
        gate.level = 50;
        board.link_gates(0, vec![gate]);
        board.push_gates(0).unwrap();
        let msgs = dsp_messages(&mut board);
        // Gate, flags, hit/miss and tuning, to two cores
        assert_eq!(msgs.len(), 8);
        assert_eq!(&msgs[0][6..15], &[0, 0, 0, 1, 0, 0, 10, 0, 50]);
        assert!(board.push_gate(0, 1).is_err());
    }

    #[test]
    fn test_transducer_byte() {
        let mut board = board();
        board.send_transducer(2, true, 3, 5).unwrap();
        assert_eq!(board.transport_mut().register(0x45), 0x57);
    }

    #[test]
    fn test_trigger_width_clamped() {
        let mut board = board();
        board.send_trigger_width(80).unwrap();
        assert_eq!(board.transport_mut().register(0x48), 50);
        assert_eq!(board.timing().trigger_width, 50);
    }

    #[test]
    fn test_rep_rate() {
        let mut board = board();
        board.send_rep_rate(2000).unwrap();
        let sim = board.transport_mut();
        assert_eq!(
            sim.commands(),
            &[vec![PacketId::SetRepRate as u8, 0x00, 0x00, 0x82, 0x35]]
        );
        // Stored by the board itself
        assert_eq!(
            u32::from_le_bytes([
                sim.register(0x03),
                sim.register(0x04),
                sim.register(0x05),
                sim.register(0x06)
            ]),
            33_333
        );
    }

    #[test]
    fn test_db_conversion() {
        assert_eq!(db_to_dsp_gain(0.0), 6);
        assert_eq!(db_to_dsp_gain(20.0), 65);
    }
}
