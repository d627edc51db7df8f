//! One analog channel of a board and the two DSP cores that process it
use crate::{
    command::percent_to_amplitude,
    core::{
        ASCAN_FIFO_SIZE,
        ASCAN_SAMPLE_SIZE,
        NUMBER_OF_CHANNELS,
    },
    gate::{
        Gate,
        GateRole,
    },
    registers::ChannelRegisters,
};
use std::sync::{
    Arc,
    PoisonError,
    RwLock,
};

/// One A-scan: the samples, the range code it was taken with, and where the interface gate
/// was crossed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AScanDataset {
    pub range: i32,
    pub crossing: i32,
    pub samples: Vec<i32>,
}

impl Default for AScanDataset {
    fn default() -> Self {
        Self {
            range: 0,
            crossing: 0,
            samples: vec![0; ASCAN_SAMPLE_SIZE],
        }
    }
}

/// The smoothed A-scan as of the last decoded packet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AScanSnapshot {
    pub set: AScanDataset,
    /// Number of A-scans decoded into the channel so far
    pub updates: u64,
}

/// Shared handle to a channel's smoothed A-scan. The decoder is the only writer; each update
/// replaces the whole set under the lock.
#[derive(Debug, Clone, Default)]
pub struct AScanFeed(Arc<RwLock<AScanSnapshot>>);

impl AScanFeed {
    #[must_use]
    pub fn snapshot(&self) -> AScanSnapshot {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The latest set, if more than `seen` have been decoded
    #[must_use]
    pub fn newer_than(&self, seen: u64) -> Option<AScanSnapshot> {
        let current = self.0.read().unwrap_or_else(PoisonError::into_inner);
        (current.updates > seen).then(|| current.clone())
    }

    fn publish(&self, set: AScanDataset) {
        let mut current = self.0.write().unwrap_or_else(PoisonError::into_inner);
        current.set = set;
        current.updates += 1;
    }
}

/// The ring of raw datasets that smoothing averages over
#[derive(Debug, Clone)]
pub struct AScanRing {
    slots: Vec<AScanDataset>,
    index: usize,
}

impl Default for AScanRing {
    fn default() -> Self {
        Self {
            slots: vec![AScanDataset::default(); ASCAN_FIFO_SIZE],
            index: 0,
        }
    }
}

impl AScanRing {
    /// Store `set` in the slot after the last one, wrapping at `depth`
    pub fn push(&mut self, set: AScanDataset, depth: usize) {
        let depth = depth.clamp(1, ASCAN_FIFO_SIZE);
        self.index = (self.index + 1) % depth;
        self.slots[self.index] = set;
    }

    /// The integer mean of the first `depth` slots, whether filled yet or not
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn average(&self, depth: usize) -> AScanDataset {
        let depth = depth.clamp(1, ASCAN_FIFO_SIZE);
        let slots = &self.slots[..depth];
        let n = depth as i32;
        let mut avg = AScanDataset {
            range: slots.iter().map(|s| s.range).sum::<i32>() / n,
            crossing: slots.iter().map(|s| s.crossing).sum::<i32>() / n,
            samples: vec![0; ASCAN_SAMPLE_SIZE],
        };
        for (i, out) in avg.samples.iter_mut().enumerate() {
            *out = slots.iter().map(|s| s.samples[i]).sum::<i32>() / n;
        }
        avg
    }
}

#[derive(Debug, Clone)]
pub struct BoardChannel {
    pub index: usize,
    pub chip: u8,
    pub cores: [u8; 2],
    pub registers: ChannelRegisters,
    pub gates: Vec<Gate>,
    pub active: bool,
    pub is_wall: bool,
    /// Samples below this many remote amplitude units are squashed
    pub reject_level: i32,
    /// Added to every A-scan crossing
    pub hardware_delay: u32,
    pub dsp_flags1: u16,
    smoothing: usize,
    ring: AScanRing,
    display: Option<AScanDataset>,
    feed: AScanFeed,
    last_ascan_core: usize,
}

impl BoardChannel {
    /// Channels 0 and 1 live on chip 1, 2 and 3 on chip 2; even channels use cores 1 and 2, odd
    /// ones cores 3 and 4
    /// # Panics
    /// Panics if `index` isn't a channel of the board
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(index: usize) -> Self {
        assert!(index < NUMBER_OF_CHANNELS, "No such channel {index}");
        let chip = 1 + (index / 2) as u8;
        let cores = if index % 2 == 0 { [1, 2] } else { [3, 4] };
        Self {
            index,
            chip,
            cores,
            registers: ChannelRegisters::for_channel(index),
            gates: vec![],
            active: true,
            is_wall: false,
            reject_level: 0,
            hardware_delay: 0,
            dsp_flags1: 0,
            smoothing: 1,
            ring: AScanRing::default(),
            display: None,
            feed: AScanFeed::default(),
            last_ascan_core: 1,
        }
    }

    #[must_use]
    pub fn smoothing(&self) -> usize {
        self.smoothing
    }

    pub fn set_smoothing(&mut self, depth: usize) {
        self.smoothing = depth.clamp(1, ASCAN_FIFO_SIZE);
    }

    /// Reject level as a percent of full A-scan height
    pub fn set_reject_percent(&mut self, percent: i32) {
        self.reject_level = percent_to_amplitude(percent);
    }

    /// Alternate between the two cores so both are seen to be working
    pub fn next_ascan_core(&mut self) -> u8 {
        self.last_ascan_core ^= 1;
        self.cores[self.last_ascan_core]
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn gate_count(&self) -> u8 {
        self.gates.len() as u8
    }

    /// First gate playing `role`
    #[must_use]
    pub fn gate_with_role(&self, role: GateRole) -> Option<&Gate> {
        self.gates.iter().find(|g| g.role == role)
    }

    /// Add a freshly decoded set, recompute the display set and publish it
    pub fn push_ascan(&mut self, set: AScanDataset) {
        self.ring.push(set, self.smoothing);
        let display = self.ring.average(self.smoothing);
        self.feed.publish(display.clone());
        self.display = Some(display);
    }

    /// A handle other threads can read the smoothed A-scan through
    #[must_use]
    pub fn ascan_feed(&self) -> AScanFeed {
        self.feed.clone()
    }

    /// The latest averaged A-scan, if one arrived since the last call
    pub fn take_ascan(&mut self) -> Option<AScanDataset> {
        self.display.take()
    }

    #[must_use]
    pub fn has_ascan(&self) -> bool {
        self.display.is_some()
    }
}
