//! The FPGA register map of the digitizer board.
//!
//! Bit-level registers are `packed_struct` words carrying their address; wider values are
//! spread over consecutive byte registers, least significant byte at the lowest address.
use crate::{
    core::NUMBER_OF_CHANNELS,
    transport::{
        Deserialize,
        Serialize,
    },
};
use packed_struct::prelude::*;
use utboard_derive::{
    address,
    RegisterSerde,
};

/// Byte registers that carry a fixed address on the FPGA
pub trait Address {
    fn addr() -> u8;
}

#[derive(Debug, PackedStruct, RegisterSerde, Default, Copy, Clone, PartialEq, Eq)]
#[address(0x00)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
pub struct MasterControl {
    /// Run mode hands the DSP HPI bus to the FPGA so samples flow; setup mode leaves it to the
    /// network processor
    #[packed_field(bits = "0")]
    pub setup_run: bool,
    /// This board drives the pulser sync for the whole chassis
    #[packed_field(bits = "1")]
    pub sync_source: bool,
    /// Feed the DSPs the FPGA's test sequence instead of A/D samples
    #[packed_field(bits = "2")]
    pub sim_data: bool,
}

#[derive(Debug, PackedStruct, RegisterSerde, Default, Copy, Clone, PartialEq, Eq)]
#[address(0x01)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
pub struct Reset {
    /// FPGA internals, active high
    #[packed_field(bits = "0")]
    pub internals: bool,
    /// Global DSP reset, active low
    #[packed_field(bits = "1")]
    pub dsp_global: bool,
    /// Individual core resets, active low
    #[packed_field(bits = "2")]
    pub dsp_a: bool,
    #[packed_field(bits = "3")]
    pub dsp_b: bool,
    #[packed_field(bits = "4")]
    pub dsp_c: bool,
    #[packed_field(bits = "5")]
    pub dsp_d: bool,
}

impl Reset {
    /// Mask of the four core run bits
    pub const DSP_RUN_MASK: u8 = 0x3C;

    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        Self {
            internals: bits & 0x01 != 0,
            dsp_global: bits & 0x02 != 0,
            dsp_a: bits & 0x04 != 0,
            dsp_b: bits & 0x08 != 0,
            dsp_c: bits & 0x10 != 0,
            dsp_d: bits & 0x20 != 0,
        }
    }

    #[must_use]
    pub fn bits(&self) -> u8 {
        self.serialize()[0]
    }

    /// True when every core is out of reset
    #[must_use]
    pub fn dsp_running(&self) -> bool {
        self.dsp_a && self.dsp_b && self.dsp_c && self.dsp_d
    }

    pub fn set_dsp_running(&mut self, run: bool) {
        self.dsp_a = run;
        self.dsp_b = run;
        self.dsp_c = run;
        self.dsp_d = run;
    }
}

impl MasterControl {
    #[must_use]
    pub fn bits(&self) -> u8 {
        self.serialize()[0]
    }
}

/// A value spread over `width` consecutive byte registers starting at `base`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MultiByteRegister {
    pub base: u8,
    pub width: u8,
}

impl MultiByteRegister {
    #[must_use]
    pub const fn new(base: u8, width: u8) -> Self {
        Self { base, width }
    }

    /// The `(address, byte)` writes that store `value`, least significant byte first
    #[allow(clippy::cast_possible_truncation)]
    pub fn writes(&self, value: u32) -> impl Iterator<Item = (u8, u8)> {
        let base = self.base;
        (0..self.width).map(move |i| (base + i, (value >> (8 * u32::from(i))) as u8))
    }
}

pub const REP_RATE: MultiByteRegister = MultiByteRegister::new(0x03, 4);
/// Inverted chassis (upper nibble) and slot (lower nibble) switches
pub const CHASSIS_SLOT: u8 = 0x08;
pub const NUMBER_BANKS: u8 = 0x47;
pub const TRIG_WIDTH: MultiByteRegister = MultiByteRegister::new(0x48, 4);
pub const PULSE_DELAY: MultiByteRegister = MultiByteRegister::new(0x50, 2);
pub const SYNC_WIDTH: MultiByteRegister = MultiByteRegister::new(0x6E, 2);

/// The per-channel register blocks
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChannelRegisters {
    pub sample_delay: MultiByteRegister,
    pub sample_count: MultiByteRegister,
    pub buffer_start: MultiByteRegister,
    pub ducer_setup: u8,
}

impl ChannelRegisters {
    /// # Panics
    /// Panics if `channel` isn't one of the board's analog channels
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn for_channel(channel: usize) -> Self {
        assert!(channel < NUMBER_OF_CHANNELS, "No such channel {channel}");
        let ch = channel as u8;
        Self {
            sample_delay: MultiByteRegister::new(0x1B + 4 * ch, 4),
            sample_count: MultiByteRegister::new(0x2B + 3 * ch, 3),
            buffer_start: MultiByteRegister::new(0x37 + 3 * ch, 3),
            ducer_setup: 0x43 + ch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_control_bits() {
        let mc = MasterControl {
            setup_run: true,
            sim_data: true,
            ..Default::default()
        };
        assert_eq!(mc.bits(), 0x05);
        assert_eq!(MasterControl::addr(), 0x00);
        let back = MasterControl::deserialize([0x02]).unwrap();
        assert!(back.sync_source);
        assert!(!back.setup_run);
    }

    #[test]
    fn test_reset_bits() {
        let mut reset = Reset::from_bits(0x3E);
        assert!(reset.dsp_running());
        assert!(!reset.internals);
        assert_eq!(reset.bits(), 0x3E);
        reset.set_dsp_running(false);
        assert_eq!(reset.bits(), 0x02);
        assert_eq!(Reset::addr(), 0x01);
    }

    #[test]
    fn test_channel_registers() {
        let ch3 = ChannelRegisters::for_channel(3);
        assert_eq!(ch3.sample_delay.base, 0x27);
        assert_eq!(ch3.sample_count.base, 0x34);
        assert_eq!(ch3.buffer_start.base, 0x40);
        assert_eq!(ch3.ducer_setup, 0x46);
    }

    #[test]
    fn test_multi_byte_writes_lsb_first() {
        let writes: Vec<_> = TRIG_WIDTH.writes(0x0102_0304).collect();
        assert_eq!(writes, vec![(0x48, 4), (0x49, 3), (0x4A, 2), (0x4B, 1)]);
        let writes: Vec<_> = SYNC_WIDTH.writes(200).collect();
        assert_eq!(writes, vec![(0x6E, 200), (0x6F, 0)]);
    }
}
