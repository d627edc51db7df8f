//! Peak data packets.
//!
//! ```text
//! [encoder1 u32][encoder2 u32]
//! per channel: [channel i8][gate count]
//!              per gate: [flags u16][peak i16][flight u16][track u16]
//!              wall channels: [max block 6 × i16][min block 6 × i16]
//! ```
use super::Processed;
use crate::{
    board::Board,
    command::ASCAN_SCALE,
    core::{
        CLOCK_OFFSET,
        FLIGHT_TIME_ORIGIN,
        HIT_COUNT_MET,
        MAX_CLOCK_POSITION,
        MAX_GATES,
        NUMBER_OF_CHANNELS,
        PEAK_DATA_BYTES_FOR_WALL,
        PEAK_DATA_BYTES_PER_GATE,
        PEAK_HEADER_SIZE,
    },
    correlator::RequestClass,
    frame::PacketHeader,
    gate::{
        GateRole,
        PeakReading,
    },
    transport::{
        Transport,
        TransportResult,
    },
};
use tracing::trace;

/// A modify-wall amplitude must exceed this before it is taken off the next minimum reading
pub const WALL_MODIFIER_THRESHOLD: i32 = 50;
/// Readings under the toss threshold that may be skipped in a row
pub const MAX_TOSSES: u32 = 2;

/// Values under the reject level keep only their last decimal digit, which leaves a little
/// grass on the display
#[must_use]
pub fn squash(value: i32, reject: i32) -> i32 {
    if value.abs() < reject {
        value % 10
    } else {
        value
    }
}

#[must_use]
pub fn decode_flight(raw: u16) -> i32 {
    i32::from(raw) - FLIGHT_TIME_ORIGIN
}

/// `(track, clock)` for a raw track count. Track 0 is clock position 12.
#[must_use]
pub fn track_to_clock(raw: i32) -> (i32, i32) {
    let mut track = raw.max(0) + CLOCK_OFFSET;
    if track > MAX_CLOCK_POSITION {
        track %= MAX_CLOCK_POSITION + 1;
    }
    let clock = if track == 0 { MAX_CLOCK_POSITION + 1 } else { track };
    (track, clock)
}

/// Hold-last-value filtering of the wall readings of one board
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WallTracker {
    prev_max: i32,
    prev_min: i32,
    toss_threshold: i32,
    toss_count: u32,
    modifier: i32,
}

impl Default for WallTracker {
    fn default() -> Self {
        Self {
            prev_max: 0,
            prev_min: 0,
            toss_threshold: 0,
            toss_count: 0,
            modifier: i32::MIN,
        }
    }
}

impl WallTracker {
    /// -32768 means no new maximum
    pub fn update_max(&mut self, raw: i16) -> i32 {
        if raw != i16::MIN {
            self.prev_max = i32::from(raw);
        }
        self.prev_max
    }

    /// 32767 means no new minimum. A reading well under the last one is taken as a dropout and
    /// tossed, at most twice in a row.
    pub fn update_min(&mut self, raw: i16) -> i32 {
        let raw = i32::from(raw);
        if raw == i32::from(i16::MAX) || (raw < self.toss_threshold && self.toss_count < MAX_TOSSES) {
            self.toss_count += 1;
            return self.prev_min;
        }
        let mut min = raw;
        if self.modifier > WALL_MODIFIER_THRESHOLD {
            min -= self.modifier;
            self.modifier = i32::MIN;
        }
        self.prev_min = min;
        self.toss_threshold = min - min / 4;
        self.toss_count = 0;
        min
    }

    /// Keep the largest modify-wall amplitude until the next minimum uses it
    pub fn note_modifier(&mut self, amplitude: i32) {
        self.modifier = self.modifier.max(amplitude);
    }

    #[must_use]
    pub fn previous(&self) -> (i32, i32) {
        (self.prev_max, self.prev_min)
    }
}

fn be_u16(b: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([b[at], b[at + 1]])
}

fn be_i16(b: &[u8], at: usize) -> i16 {
    i16::from_be_bytes([b[at], b[at + 1]])
}

impl<T> Board<T>
where
    T: Transport,
{
    pub(crate) fn decode_peak(&mut self, header: PacketHeader, records: usize) -> TransportResult<Processed> {
        let id = header.id;
        self.correlator.complete(RequestClass::PeakData);
        let Some(head) = self.read_body(PEAK_HEADER_SIZE)? else {
            return Ok(Processed::TimedOut(id));
        };
        let encoder1 = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
        let encoder2 = u32::from_be_bytes([head[4], head[5], head[6], head[7]]);
        self.encoders = (encoder1, encoder2);

        for _ in 0..records {
            let Some(rec) = self.read_body(2)? else {
                return Ok(Processed::TimedOut(id));
            };
            let channel = i8::from_be_bytes([rec[0]]);
            let gate_count = usize::from(rec[1]);
            if channel == -1 {
                continue;
            }
            let Ok(channel) = usize::try_from(channel) else {
                return Ok(Processed::Malformed(id));
            };
            if channel >= NUMBER_OF_CHANNELS || gate_count > MAX_GATES {
                trace!(board = %self.identity, "Bad peak record: channel {channel}, {gate_count} gates");
                return Ok(Processed::Malformed(id));
            }
            let Some(gates) = self.read_body(gate_count * PEAK_DATA_BYTES_PER_GATE)? else {
                return Ok(Processed::TimedOut(id));
            };
            self.store_gate_peaks(channel, &gates, encoder1, encoder2);

            if self.channels[channel].is_wall {
                let Some(wall) = self.read_body(PEAK_DATA_BYTES_FOR_WALL)? else {
                    return Ok(Processed::TimedOut(id));
                };
                self.store_wall(channel, &wall);
            }
        }
        self.correlator.responses.peak_ready = true;
        Ok(Processed::Decoded(id))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn store_gate_peaks(&mut self, channel: usize, gates: &[u8], encoder1: u32, encoder2: u32) {
        let ch = &self.channels[channel];
        for (gate, raw) in ch.gates.iter().zip(gates.chunks_exact(PEAK_DATA_BYTES_PER_GATE)) {
            let flags = be_u16(raw, 0);
            let mut amplitude = squash(i32::from(be_i16(raw, 2)), ch.reject_level);
            if gate.hit_count > 0 && flags & HIT_COUNT_MET == 0 {
                amplitude %= 10;
            }
            let flight_time = decode_flight(be_u16(raw, 4));
            let (track, clock) = track_to_clock(i32::from(be_i16(raw, 6)));

            gate.store_ascan_peak((f64::from(amplitude) * ASCAN_SCALE) as i32, flight_time);
            gate.store_peak(&PeakReading {
                flags,
                amplitude,
                flight_time,
                track,
                clock,
                encoder1,
                encoder2,
            });
            if gate.modify_wall {
                self.wall.note_modifier(amplitude);
            }
        }
    }

    fn store_wall(&mut self, channel: usize, wall: &[u8]) {
        let max = self.wall.update_max(be_i16(wall, 0));
        let max_track = track_to_clock(i32::from(be_i16(wall, 10)));
        let min = self.wall.update_min(be_i16(wall, 12));
        let min_track = track_to_clock(i32::from(be_i16(wall, 22)));

        let ch = &self.channels[channel];
        if let Some(gate) = ch.gate_with_role(GateRole::WallStart) {
            gate.store_thickness(f64::from(max), max_track.0, max_track.1);
        }
        if let Some(gate) = ch.gate_with_role(GateRole::WallEnd) {
            gate.store_thickness(f64::from(min), min_track.0, min_track.1);
        }
    }

    /// Encoder counts from the last peak packet
    #[must_use]
    pub fn encoders(&self) -> (u32, u32) {
        self.encoders
    }

    /// Whether peak data arrived since the last call
    pub fn take_peak_ready(&mut self) -> bool {
        std::mem::take(&mut self.correlator.responses.peak_ready)
    }
}
