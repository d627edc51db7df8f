//! Gates: the time windows a channel's DSP cores search for signal, and the measurements the
//! peak decoder writes back into them.
use crate::{
    command::DspMessage,
    transport::{
        Deserialize,
        Serialize,
    },
};
use packed_struct::prelude::*;
use serde_derive::Deserialize as SerdeDeserialize;
use std::sync::{
    Arc,
    PoisonError,
    RwLock,
};
use thiserror::Error;
use utboard_derive::RegisterSerde;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("Wall gates can't use first crossing search")]
    WallCrossing,
}

/// The part a gate plays in the inspection; exactly one per gate
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, SerdeDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateRole {
    Interface,
    WallStart,
    WallEnd,
    #[default]
    Flaw,
}

impl GateRole {
    #[must_use]
    pub fn is_wall(self) -> bool {
        matches!(self, GateRole::WallStart | GateRole::WallEnd)
    }
}

/// How the DSP reduces the samples inside a gate
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, SerdeDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigProcMode {
    #[default]
    Peak,
    PeakAverage,
    FirstCrossing,
    IntegrateAbove,
    IntegrateAboveAverage,
    DualPeakCenter,
}

impl SigProcMode {
    #[must_use]
    pub fn averages(self) -> bool {
        matches!(self, SigProcMode::PeakAverage | SigProcMode::IntegrateAboveAverage)
    }
}

/// The gate function word understood by the DSP
#[derive(Debug, PackedStruct, RegisterSerde, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "2")]
pub struct GateFlags {
    #[packed_field(bits = "0")]
    pub active: bool,
    #[packed_field(bits = "1")]
    pub report_not_exceed: bool,
    /// Search for the minimum instead of the maximum
    #[packed_field(bits = "2")]
    pub find_min: bool,
    #[packed_field(bits = "3")]
    pub wall_start: bool,
    #[packed_field(bits = "4")]
    pub wall_end: bool,
    #[packed_field(bits = "5")]
    pub find_crossing: bool,
    #[packed_field(bits = "6")]
    pub uses_tracking: bool,
    #[packed_field(bits = "7")]
    pub flaw: bool,
    #[packed_field(bits = "8")]
    pub interface: bool,
    #[packed_field(bits = "9")]
    pub quench_if_overlimit: bool,
    #[packed_field(bits = "10")]
    pub trigger_ascan_save: bool,
    #[packed_field(bits = "11")]
    pub find_peak: bool,
    #[packed_field(bits = "12")]
    pub integrate_above: bool,
    #[packed_field(bits = "13")]
    pub dual_peak_center: bool,
    /// Number of shots averaged, less one
    #[packed_field(bits = "14..=15")]
    pub averaging: Integer<u8, packed_bits::Bits<2>>,
}

impl GateFlags {
    #[must_use]
    pub fn word(&self) -> u16 {
        u16::from_be_bytes(self.serialize())
    }
}

/// Everything the peak decoder knows about a gate after the last packet
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GateMeasurement {
    pub amplitude: i32,
    pub flags: u16,
    pub flight_time: i32,
    pub track: i32,
    /// Clock position 1 to 12, twelve being track zero
    pub clock: i32,
    /// Wall gates only
    pub thickness: Option<f64>,
    pub encoder1: u32,
    pub encoder2: u32,
    /// Largest amplitude, in display units, since the A-scan last collected it
    pub ascan_peak: i32,
    pub ascan_peak_flight: i32,
    /// Number of packets decoded into this gate
    pub updates: u64,
}

impl Default for GateMeasurement {
    fn default() -> Self {
        Self {
            amplitude: 0,
            flags: 0,
            flight_time: 0,
            track: 0,
            clock: 12,
            thickness: None,
            encoder1: 0,
            encoder2: 0,
            ascan_peak: i32::MIN,
            ascan_peak_flight: 0,
            updates: 0,
        }
    }
}

/// Shared handle to a gate's measurement. The decoder is the only writer; each update
/// replaces the record under the lock.
#[derive(Debug, Clone, Default)]
pub struct GateFeed(Arc<RwLock<GateMeasurement>>);

impl GateFeed {
    /// A consistent copy of the latest measurement
    #[must_use]
    pub fn snapshot(&self) -> GateMeasurement {
        *self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut GateMeasurement)) {
        let mut m = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut m);
    }

    /// Collect the A-scan peak and start looking for a new one
    pub fn take_ascan_peak(&self) -> Option<(i32, i32)> {
        let mut m = self.0.write().unwrap_or_else(PoisonError::into_inner);
        if m.ascan_peak == i32::MIN {
            return None;
        }
        let peak = (m.ascan_peak, m.ascan_peak_flight);
        m.ascan_peak = i32::MIN;
        Some(peak)
    }
}

/// One decoded gate of a peak packet
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct PeakReading {
    pub flags: u16,
    pub amplitude: i32,
    pub flight_time: i32,
    pub track: i32,
    pub clock: i32,
    pub encoder1: u32,
    pub encoder2: u32,
}

#[derive(Debug, Clone, SerdeDeserialize)]
#[serde(default)]
pub struct Gate {
    pub start: u32,
    pub width: u32,
    /// Percent of full A-scan height
    pub level: i32,
    pub role: GateRole,
    pub mode: SigProcMode,
    /// Shots averaged in the averaging modes, 1 to 4
    pub averaging_depth: u8,
    pub trigger_ascan_save: bool,
    /// Subtract this gate's amplitude from the next minimum wall reading
    pub modify_wall: bool,
    pub hit_count: u16,
    pub miss_count: u16,
    pub report_not_exceed: bool,
    pub find_min: bool,
    pub uses_tracking: bool,
    pub quench_if_overlimit: bool,
    pub sig_proc_tuning: [u16; 3],
    #[serde(skip)]
    feed: GateFeed,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            start: 0,
            width: 0,
            level: 0,
            role: GateRole::default(),
            mode: SigProcMode::default(),
            averaging_depth: 1,
            trigger_ascan_save: false,
            modify_wall: false,
            hit_count: 0,
            miss_count: 0,
            report_not_exceed: false,
            find_min: false,
            uses_tracking: false,
            quench_if_overlimit: false,
            sig_proc_tuning: [0; 3],
            feed: GateFeed::default(),
        }
    }
}

impl Gate {
    /// # Errors
    /// Returns an error if the combination of role and mode isn't allowed
    pub fn new(role: GateRole, mode: SigProcMode) -> Result<Self, Error> {
        let gate = Self {
            role,
            mode,
            ..Default::default()
        };
        gate.validate()?;
        Ok(gate)
    }

    /// # Errors
    /// Returns an error if a wall gate is set to first crossing
    pub fn validate(&self) -> Result<(), Error> {
        if self.role.is_wall() && self.mode == SigProcMode::FirstCrossing {
            return Err(Error::WallCrossing);
        }
        Ok(())
    }

    #[must_use]
    pub fn feed(&self) -> GateFeed {
        self.feed.clone()
    }

    #[must_use]
    pub fn flags(&self) -> GateFlags {
        let averaging = if self.mode.averages() {
            self.averaging_depth.clamp(1, 4) - 1
        } else {
            0
        };
        GateFlags {
            active: true,
            report_not_exceed: self.report_not_exceed,
            find_min: self.find_min,
            wall_start: self.role == GateRole::WallStart,
            wall_end: self.role == GateRole::WallEnd,
            find_crossing: self.mode == SigProcMode::FirstCrossing,
            uses_tracking: self.uses_tracking,
            flaw: self.role == GateRole::Flaw,
            interface: self.role == GateRole::Interface,
            quench_if_overlimit: self.quench_if_overlimit,
            trigger_ascan_save: self.trigger_ascan_save,
            find_peak: matches!(self.mode, SigProcMode::Peak | SigProcMode::PeakAverage),
            integrate_above: matches!(
                self.mode,
                SigProcMode::IntegrateAbove | SigProcMode::IntegrateAboveAverage
            ),
            dual_peak_center: self.mode == SigProcMode::DualPeakCenter,
            averaging: averaging.into(),
        }
    }

    /// The messages that push this gate's setup to the DSP as gate number `index`
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn messages(&self, index: usize) -> Vec<DspMessage> {
        let index = index as u8;
        vec![
            DspMessage::gate(index, self.start, self.width, self.level),
            DspMessage::gate_flags(index, self.flags().word()),
            DspMessage::hit_miss(index, self.hit_count, self.miss_count),
            DspMessage::gate_sig_proc_tuning(index, self.sig_proc_tuning),
        ]
    }

    /// Keep the largest A-scan amplitude until the A-scan collects it
    pub fn store_ascan_peak(&self, amplitude: i32, flight_time: i32) {
        self.feed.update(|m| {
            if amplitude > m.ascan_peak {
                m.ascan_peak = amplitude;
                m.ascan_peak_flight = flight_time;
            }
        });
    }

    pub fn store_peak(&self, reading: &PeakReading) {
        self.feed.update(|m| {
            m.amplitude = reading.amplitude;
            m.flags = reading.flags;
            m.flight_time = reading.flight_time;
            m.track = reading.track;
            m.clock = reading.clock;
            m.encoder1 = reading.encoder1;
            m.encoder2 = reading.encoder2;
            m.updates += 1;
        });
    }

    pub fn store_thickness(&self, thickness: f64, track: i32, clock: i32) {
        self.feed.update(|m| {
            m.thickness = Some(thickness);
            m.track = track;
            m.clock = clock;
            m.updates += 1;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wall_rejects_crossing() {
        assert_eq!(
            Gate::new(GateRole::WallStart, SigProcMode::FirstCrossing).unwrap_err(),
            Error::WallCrossing
        );
        assert!(Gate::new(GateRole::Flaw, SigProcMode::FirstCrossing).is_ok());
        assert!(Gate::new(GateRole::WallEnd, SigProcMode::Peak).is_ok());
    }

    #[test]
    fn test_flag_word() {
        let gate = Gate::new(GateRole::Interface, SigProcMode::FirstCrossing).unwrap();
        assert_eq!(gate.flags().word(), 0x0001 | 0x0020 | 0x0100);
        let mut gate = Gate::new(GateRole::WallStart, SigProcMode::PeakAverage).unwrap();
        gate.averaging_depth = 4;
        assert_eq!(gate.flags().word(), 0xC000 | 0x0800 | 0x0008 | 0x0001);
        gate.mode = SigProcMode::Peak;
        assert_eq!(gate.flags().word() & 0xC000, 0);
    }

    #[test]
    fn test_ascan_peak_keeps_max() {
        let gate = Gate::default();
        let feed = gate.feed();
        gate.store_ascan_peak(10, 1);
        gate.store_ascan_peak(30, 2);
        gate.store_ascan_peak(20, 3);
        assert_eq!(feed.take_ascan_peak(), Some((30, 2)));
        assert_eq!(feed.take_ascan_peak(), None);
    }

    #[test]
    fn test_feed_sees_updates() {
        let gate = Gate::default();
        let feed = gate.feed();
        gate.store_peak(&PeakReading {
            amplitude: 42,
            clock: 3,
            ..Default::default()
        });
        let m = feed.snapshot();
        assert_eq!(m.amplitude, 42);
        assert_eq!(m.clock, 3);
        assert_eq!(m.updates, 1);
    }
}
