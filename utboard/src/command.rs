//! Stateless builders for everything the host sends. Each returns the unframed command; the
//! board session wraps it with [`crate::frame::encode_frame`].
use crate::{
    core::{
        DspMessageId,
        PacketId,
        ASCAN_MAX_HEIGHT,
        MAX_BLOCK_READ_WORDS,
        SHARED_MEMORY,
    },
    registers::ChannelRegisters,
};

/// Data bytes in every DSP message
pub const DSP_MESSAGE_DATA_SIZE: u8 = 9;
/// Remote amplitude units per A-scan display unit
pub const ASCAN_SCALE: f64 = 3.5;
/// Linear multiplier that makes 50 dB of software gain a DSP gain of 4
pub const SOFTWARE_GAIN_SCALE: f64 = 6.476;
/// Largest repetition rate count the FPGA accepts
pub const MAX_REP_RATE_COUNT: u32 = 65_535;
/// Smallest count, which is a 16 kHz rate
pub const MIN_REP_RATE_COUNT: u32 = 4166;
/// Count used when the asked-for rate is out of bounds, 2 kHz with one bank
pub const DEFAULT_REP_RATE_COUNT: u32 = 33_333;
pub const MAX_TRIGGER_WIDTH: u32 = 50;

/// Which words of a core's RAM a command addresses
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct MemoryPage {
    /// Program memory shared by a pair of cores, otherwise the core's local data memory
    pub shared: bool,
    pub page: u8,
}

impl MemoryPage {
    pub const LOCAL: MemoryPage = MemoryPage {
        shared: false,
        page: 0,
    };
    pub const SHARED: MemoryPage = MemoryPage {
        shared: true,
        page: 0,
    };

    #[must_use]
    pub fn byte(self) -> u8 {
        (self.page & 0x0F) | if self.shared { SHARED_MEMORY } else { 0 }
    }
}

/// Reply the remote should send for a DSP message
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplySize {
    Ack = 1,
    Status = 2,
}

/// A message for the DSP cores of one channel
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DspMessage {
    pub id: DspMessageId,
    pub reply: ReplySize,
    pub data: [u8; DSP_MESSAGE_DATA_SIZE as usize],
}

impl DspMessage {
    /// A message expecting an ACK, with `data` zero padded
    #[must_use]
    pub fn new(id: DspMessageId, data: &[u8]) -> Self {
        let mut padded = [0u8; DSP_MESSAGE_DATA_SIZE as usize];
        let n = data.len().min(padded.len());
        padded[..n].copy_from_slice(&data[..n]);
        Self {
            id,
            reply: ReplySize::Ack,
            data: padded,
        }
    }

    #[must_use]
    pub fn status_request() -> Self {
        Self {
            reply: ReplySize::Status,
            ..Self::new(DspMessageId::GetStatus, &[])
        }
    }

    /// Software gain in dB, sent as a linear multiplier
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn software_gain(db: f64) -> Self {
        let gain = (10f64.powf(db / 20.0) * SOFTWARE_GAIN_SCALE).round() as u16;
        Self::new(DspMessageId::SetGain, &gain.to_be_bytes())
    }

    #[must_use]
    pub fn sample_size(size: u16) -> Self {
        Self::new(DspMessageId::SetAdSampleSize, &size.to_be_bytes())
    }

    /// The software delay applied by the DSP and the hardware delay it sits on top of
    #[must_use]
    pub fn delays(software: u16, hardware: u32) -> Self {
        let mut data = software.to_be_bytes().to_vec();
        data.extend_from_slice(&hardware.to_be_bytes());
        Self::new(DspMessageId::SetDelays, &data)
    }

    /// A-scan compression: `scale` input samples per output sample
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn ascan_scale(scale: u16) -> Self {
        let scale = scale.max(1);
        // Each output sample carries a min and a max, so twice the input is processed
        let batch = (50 / i32::from(scale) / 2 - 1).max(1) as u16;
        let mut data = scale.to_be_bytes().to_vec();
        data.extend_from_slice(&batch.to_be_bytes());
        Self::new(DspMessageId::SetAScanScale, &data)
    }

    /// Gate position and level. The DSP counts width in thirds and level in remote amplitude
    /// units, so `level_percent` is of full A-scan height.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn gate(gate: u8, start: u32, width: u32, level_percent: i32) -> Self {
        let width = (width / 3) as u16;
        let level = percent_to_amplitude(level_percent).clamp(0, i32::from(u16::MAX)) as u16;
        Self::new(DspMessageId::SetGate, &gate_data(gate, start, width, level))
    }

    #[must_use]
    pub fn gate_flags(gate: u8, flags: u16) -> Self {
        let [hi, lo] = flags.to_be_bytes();
        Self::new(DspMessageId::SetGateFlags, &[gate, hi, lo])
    }

    #[must_use]
    pub fn gate_sig_proc_tuning(gate: u8, values: [u16; 3]) -> Self {
        let mut data = vec![gate];
        for v in values {
            data.extend_from_slice(&v.to_be_bytes());
        }
        Self::new(DspMessageId::SetGateSigProcTuning, &data)
    }

    /// A DAC section. Unlike a gate, width is sent as is and can't be zero.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn dac_gate(gate: u8, start: u32, width: u32, level: u16) -> Self {
        let width = width.clamp(1, u32::from(u16::MAX)) as u16;
        Self::new(DspMessageId::SetDac, &gate_data(gate, start, width, level))
    }

    #[must_use]
    pub fn dac_flags(gate: u8, flags: u16) -> Self {
        let [hi, lo] = flags.to_be_bytes();
        Self::new(DspMessageId::SetDacFlags, &[gate, hi, lo])
    }

    #[must_use]
    pub fn hit_miss(gate: u8, hit: u16, miss: u16) -> Self {
        let [hh, hl] = hit.to_be_bytes();
        let [mh, ml] = miss.to_be_bytes();
        Self::new(DspMessageId::SetHitMissCounts, &[gate, hh, hl, mh, ml])
    }

    #[must_use]
    pub fn rectification(mode: Rectification) -> Self {
        Self::new(DspMessageId::SetRectification, &[mode as u8])
    }

    #[must_use]
    pub fn filter_abs_preprocessing(enabled: bool) -> Self {
        Self::new(DspMessageId::SetFilterAbsPreprocessing, &[u8::from(enabled)])
    }

    #[must_use]
    pub fn flags1(flags: u16) -> Self {
        Self::new(DspMessageId::SetFlags1, &flags.to_be_bytes())
    }

    #[must_use]
    pub fn reset_mapping() -> Self {
        Self::new(DspMessageId::ResetMapping, &[])
    }
}

fn gate_data(gate: u8, start: u32, width: u16, level: u16) -> Vec<u8> {
    let mut data = vec![gate];
    data.extend_from_slice(&start.to_be_bytes());
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&level.to_be_bytes());
    data
}

/// Convert a percentage of full A-scan height into remote amplitude units, saturating at the
/// ends of `i32`
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn percent_to_amplitude(percent: i32) -> i32 {
    let height = (f64::from(percent) * f64::from(ASCAN_MAX_HEIGHT) / 100.0).trunc();
    (height / ASCAN_SCALE) as i32
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Rectification {
    #[default]
    Positive = 0,
    Negative = 1,
    Full = 2,
    Rf = 3,
    Off = 4,
}

/// An FIR filter for the DSP
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Filter {
    /// Right shift applied after each convolution pass
    pub shift: i8,
    /// Take the absolute value of samples before filtering
    pub abs_preprocess: bool,
    pub coefficients: Vec<i16>,
}

impl Filter {
    /// The message sequence that loads this filter. The first carries the coefficient count,
    /// shift, and preprocessing mode; the rest carry four coefficients each.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn messages(&self) -> Vec<DspMessage> {
        let mut out = vec![DspMessage::new(
            DspMessageId::SetFilter,
            &[
                0,
                self.coefficients.len() as u8,
                self.shift as u8,
                u8::from(self.abs_preprocess),
            ],
        )];
        for (group, chunk) in self.coefficients.chunks(4).enumerate() {
            let mut data = vec![(group + 1) as u8];
            for c in chunk {
                data.extend_from_slice(&c.to_be_bytes());
            }
            out.push(DspMessage::new(DspMessageId::SetFilter, &data));
        }
        out
    }
}

/// `[MESSAGE_DSP, chip, core, msg, reply size, data size, data...]`
#[must_use]
pub fn message_dsp(chip: u8, core: u8, msg: &DspMessage) -> Vec<u8> {
    let mut out = vec![
        PacketId::MessageDsp as u8,
        chip,
        core,
        msg.id as u8,
        msg.reply as u8,
        DSP_MESSAGE_DATA_SIZE,
    ];
    out.extend_from_slice(&msg.data);
    out
}

#[must_use]
pub fn write_fpga(addr: u8, value: u8) -> Vec<u8> {
    vec![PacketId::WriteFpga as u8, addr, value]
}

#[must_use]
pub fn read_fpga(addr: u8) -> Vec<u8> {
    vec![PacketId::ReadFpga as u8, addr]
}

#[must_use]
pub fn get_status() -> Vec<u8> {
    vec![PacketId::GetStatus as u8]
}

#[must_use]
pub fn load_fpga() -> Vec<u8> {
    vec![PacketId::LoadFpga as u8]
}

#[must_use]
pub fn set_rep_rate(count: u32) -> Vec<u8> {
    let mut out = vec![PacketId::SetRepRate as u8];
    out.extend_from_slice(&count.to_be_bytes());
    out
}

#[must_use]
pub fn set_control_flags(flags: u16) -> Vec<u8> {
    let [hi, lo] = flags.to_be_bytes();
    vec![PacketId::SetControlFlags as u8, hi, lo]
}

#[must_use]
pub fn set_mapping_channel(channel: i16) -> Vec<u8> {
    let [hi, lo] = channel.to_be_bytes();
    vec![PacketId::SetMappingChannel as u8, hi, lo]
}

#[must_use]
pub fn reset_for_next_run() -> Vec<u8> {
    vec![PacketId::ResetForNextRun as u8, 0, 0]
}

/// Preamp gain byte: the gain less one in the low nibble, with the widest bandwidth
/// compensation the amplifier allows at that gain in the top two bits
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn hardware_gain_byte(gain: i32) -> u8 {
    let g = ((gain - 1) & 0x0F) as u8;
    match g {
        15 => g | 0xC0,
        10..=14 => g | 0x80,
        5..=9 => g | 0x40,
        _ => g,
    }
}

#[must_use]
pub fn set_hardware_gain(channel: u8, gain1: i32, gain2: i32) -> Vec<u8> {
    vec![
        PacketId::SetHardwareGain as u8,
        channel,
        hardware_gain_byte(gain1),
        hardware_gain_byte(gain2),
    ]
}

#[must_use]
pub fn write_dsp(chip: u8, core: u8, page: MemoryPage, addr: u16, value: u16) -> Vec<u8> {
    let [ah, al] = addr.to_be_bytes();
    let [vh, vl] = value.to_be_bytes();
    vec![
        PacketId::WriteDsp as u8,
        chip,
        core,
        page.byte(),
        ah,
        al,
        vh,
        vl,
    ]
}

/// Write at the address after the last write to the same core
#[must_use]
pub fn write_next_dsp(chip: u8, core: u8, value: u16) -> Vec<u8> {
    let [vh, vl] = value.to_be_bytes();
    vec![PacketId::WriteNextDsp as u8, chip, core, vh, vl]
}

#[must_use]
pub fn read_dsp(chip: u8, core: u8, page: MemoryPage, addr: u16) -> Vec<u8> {
    let [ah, al] = addr.to_be_bytes();
    vec![PacketId::ReadDsp as u8, chip, core, page.byte(), ah, al]
}

#[must_use]
pub fn read_next_dsp(chip: u8, core: u8) -> Vec<u8> {
    vec![PacketId::ReadNextDsp as u8, chip, core]
}

/// Read up to [`MAX_BLOCK_READ_WORDS`] words
#[must_use]
pub fn read_dsp_block(chip: u8, core: u8, page: MemoryPage, addr: u16, count: u8) -> Vec<u8> {
    let [ah, al] = addr.to_be_bytes();
    vec![
        PacketId::ReadDspBlock as u8,
        chip,
        core,
        page.byte(),
        ah,
        al,
        count.min(MAX_BLOCK_READ_WORDS),
    ]
}

#[must_use]
pub fn dsp_checksum(chip: u8, core: u8, page: MemoryPage, addr: u16, size: u16) -> Vec<u8> {
    let [ah, al] = addr.to_be_bytes();
    let [sh, sl] = size.to_be_bytes();
    vec![
        PacketId::GetDspRamBlockChecksum as u8,
        chip,
        core,
        page.byte(),
        ah,
        al,
        sh,
        sl,
    ]
}

#[must_use]
pub fn get_ascan(chip: u8, core: u8, channel: u8) -> Vec<u8> {
    vec![PacketId::GetAScan as u8, chip, core, channel]
}

#[must_use]
pub fn get_peak_data(channel: u8, gates: u8, wall: bool) -> Vec<u8> {
    vec![PacketId::GetPeakData as u8, channel, gates, u8::from(wall)]
}

/// One slot of a four channel peak request; `None` marks an inactive channel
pub type PeakSlot = Option<(u8, u8)>;

#[must_use]
pub fn get_peak_data4(slots: [PeakSlot; 4], wall_flags: u8) -> Vec<u8> {
    let mut out = vec![PacketId::GetPeakData4 as u8];
    for slot in slots {
        let (channel, gates) = slot.unwrap_or((0xFF, 0));
        out.extend_from_slice(&[channel, gates]);
    }
    out.push(wall_flags);
    out
}

/// Transducer setup byte: on/off in bit 0, bank in bits 1-3, pulser channel in bits 4-7
#[must_use]
pub fn ducer_setup(on: bool, bank: u8, pulse_channel: u8) -> u8 {
    u8::from(on) + ((bank & 0x07) << 1) + ((pulse_channel & 0x0F) << 4)
}

/// Register writes for one channel's transducer
#[must_use]
pub fn transducer(regs: &ChannelRegisters, on: bool, bank: u8, pulse_channel: u8) -> Vec<Vec<u8>> {
    vec![write_fpga(regs.ducer_setup, ducer_setup(on, bank, pulse_channel))]
}

#[must_use]
pub fn hardware_delay(regs: &ChannelRegisters, delay: u32) -> Vec<Vec<u8>> {
    regs.sample_delay
        .writes(delay)
        .map(|(a, v)| write_fpga(a, v))
        .collect()
}

/// The sample count is always even
#[must_use]
pub fn hardware_range(regs: &ChannelRegisters, count: u32) -> Vec<Vec<u8>> {
    let count = count + count % 2;
    regs.sample_count
        .writes(count)
        .map(|(a, v)| write_fpga(a, v))
        .collect()
}

#[must_use]
pub fn sample_buffer_start(regs: &ChannelRegisters, start: u32) -> Vec<Vec<u8>> {
    regs.buffer_start
        .writes(start)
        .map(|(a, v)| write_fpga(a, v))
        .collect()
}

/// FPGA repetition count for a rate in Hz, shared between `banks + 1` transducer banks
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn rep_rate_count(hz: u32, banks: u8) -> u32 {
    let period = f64::from(hz) * f64::from(u32::from(banks) + 1) * 15e-9;
    if period <= 0.0 {
        return DEFAULT_REP_RATE_COUNT;
    }
    let count = (1.0 / period) as u64;
    match u32::try_from(count) {
        Ok(c) if (MIN_REP_RATE_COUNT..=MAX_REP_RATE_COUNT).contains(&c) => c,
        _ => DEFAULT_REP_RATE_COUNT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paste::paste;

    macro_rules! test_hardware_gain {
        ($gain:literal, $byte:literal) => {
            paste! {
                #[test]
                fn [<test_hardware_gain_ $gain>]() {
                    assert_eq!(hardware_gain_byte($gain), $byte);
                }
            }
        };
    }

    test_hardware_gain!(1, 0x00);
    test_hardware_gain!(5, 0x04);
    test_hardware_gain!(6, 0x45);
    test_hardware_gain!(11, 0x8A);
    test_hardware_gain!(16, 0xCF);

    #[test]
    fn test_message_layout() {
        let msg = DspMessage::hit_miss(2, 3, 0x0104);
        assert_eq!(
            message_dsp(1, 3, &msg),
            vec![18, 1, 3, 12, 1, 9, 2, 0, 3, 1, 4, 0, 0, 0, 0]
        );
        assert_eq!(message_dsp(2, 1, &DspMessage::status_request())[4], 2);
    }

    #[test]
    fn test_software_gain() {
        // 50 dB is a DSP gain of 4
        let msg = DspMessage::software_gain(50.0);
        assert_eq!(u16::from_be_bytes([msg.data[0], msg.data[1]]), 2048);
        let msg = DspMessage::software_gain(0.0);
        assert_eq!(&msg.data[..2], &[0, 6]);
    }

    #[test]
    fn test_ascan_scale_batch() {
        let msg = DspMessage::ascan_scale(0);
        assert_eq!(&msg.data[..4], &[0, 1, 0, 24]);
        let msg = DspMessage::ascan_scale(5);
        assert_eq!(&msg.data[..4], &[0, 5, 0, 4]);
        let msg = DspMessage::ascan_scale(30);
        assert_eq!(&msg.data[..4], &[0, 30, 0, 1]);
    }

    #[test]
    fn test_gate_width_and_level() {
        let msg = DspMessage::gate(1, 0x0001_0203, 300, 50);
        // 50% of 350 is 175, which is 50 display units
        assert_eq!(msg.data, [1, 0, 1, 2, 3, 0, 100, 0, 50]);
        let dac = DspMessage::dac_gate(0, 10, 0, 7);
        assert_eq!(&dac.data[5..9], &[0, 1, 0, 7]);
    }

    #[test]
    fn test_gate_level_saturates() {
        assert_eq!(&DspMessage::gate(0, 0, 0, 100_000).data[7..9], &[0xFF, 0xFF]);
        assert_eq!(&DspMessage::gate(0, 0, 0, -5).data[7..9], &[0, 0]);
        assert_eq!(&DspMessage::gate(0, 0, 0, i32::MAX).data[7..9], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_percent_to_amplitude_extremes() {
        assert_eq!(percent_to_amplitude(100), 100);
        assert_eq!(percent_to_amplitude(-20), -20);
        assert_eq!(percent_to_amplitude(7), 6);
        assert!(percent_to_amplitude(i32::MAX) > 2_000_000_000);
        assert!(percent_to_amplitude(i32::MIN) < -2_000_000_000);
    }

    #[test]
    fn test_filter_groups() {
        let filter = Filter {
            shift: -2,
            abs_preprocess: true,
            coefficients: vec![1, -1, 2, 3, 4],
        };
        let msgs = filter.messages();
        assert_eq!(msgs.len(), 3);
        assert_eq!(&msgs[0].data[..4], &[0, 5, 0xFE, 1]);
        assert_eq!(&msgs[1].data, &[1, 0, 1, 0xFF, 0xFF, 0, 2, 0, 3]);
        assert_eq!(&msgs[2].data, &[2, 0, 4, 0, 0, 0, 0, 0, 0]);
        let empty = Filter::default().messages();
        assert_eq!(empty.len(), 1);
        assert_eq!(&empty[0].data, &[0; 9]);
    }

    #[test]
    fn test_peak_data4_inactive() {
        let cmd = get_peak_data4([Some((0, 2)), None, Some((2, 3)), None], 0b0100);
        assert_eq!(cmd, vec![20, 0, 2, 0xFF, 0, 2, 3, 0xFF, 0, 4]);
    }

    #[test]
    fn test_ram_commands() {
        assert_eq!(
            write_dsp(1, 2, MemoryPage::SHARED, 0x1234, 0xABCD),
            vec![11, 1, 2, 0x10, 0x12, 0x34, 0xAB, 0xCD]
        );
        assert_eq!(
            read_dsp_block(2, 4, MemoryPage::LOCAL, 0, 200),
            vec![15, 2, 4, 0, 0, 0, 127]
        );
    }

    #[test]
    fn test_ducer_and_range() {
        assert_eq!(ducer_setup(true, 1, 3), 0x33);
        let regs = ChannelRegisters::for_channel(0);
        let writes = hardware_range(&regs, 0x0001_0001);
        assert_eq!(writes[0], vec![7, 0x2B, 0x02]);
        assert_eq!(writes[2], vec![7, 0x2D, 0x01]);
    }

    #[test]
    fn test_rep_rate_count() {
        assert_eq!(rep_rate_count(2000, 0), 33_333);
        assert_eq!(rep_rate_count(2000, 1), 16_666);
        assert_eq!(rep_rate_count(100, 0), DEFAULT_REP_RATE_COUNT);
        assert_eq!(rep_rate_count(0, 0), DEFAULT_REP_RATE_COUNT);
    }
}
