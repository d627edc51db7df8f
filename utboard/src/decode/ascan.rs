//! A-scan packets: `[channel][range][crossing u16][400 × i16 samples]`
use super::{
    peak::squash,
    Processed,
};
use crate::{
    board::Board,
    channel::{
        AScanDataset,
        AScanFeed,
        BoardChannel,
    },
    command::ASCAN_SCALE,
    core::{
        ASCAN_PAYLOAD_SIZE,
        NUMBER_OF_CHANNELS,
    },
    correlator::RequestClass,
    frame::PacketHeader,
    transport::{
        Transport,
        TransportResult,
    },
};

/// Turn the raw payload into a dataset, squashing samples under `reject` and scaling the rest
/// to display units. A payload too short for its header decodes as an empty dataset.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn decode_ascan_payload(payload: &[u8], hardware_delay: u32, reject: i32) -> AScanDataset {
    if payload.len() < 4 {
        return AScanDataset::default();
    }
    let crossing = i32::from(u16::from_be_bytes([payload[2], payload[3]]));
    let samples = payload[4..]
        .chunks_exact(2)
        .map(|c| {
            let v = squash(i32::from(i16::from_be_bytes([c[0], c[1]])), reject);
            (f64::from(v) * ASCAN_SCALE) as i32
        })
        .collect();
    AScanDataset {
        range: i32::from(payload[1]),
        crossing: crossing.wrapping_add(hardware_delay as i32),
        samples,
    }
}

impl<T> Board<T>
where
    T: Transport,
{
    pub(crate) fn decode_ascan(&mut self, header: PacketHeader) -> TransportResult<Processed> {
        self.correlator.complete(RequestClass::AScan);
        let Some(payload) = self.read_body(ASCAN_PAYLOAD_SIZE)? else {
            return Ok(Processed::TimedOut(header.id));
        };
        let channel = usize::from(payload[0]).min(NUMBER_OF_CHANNELS - 1);
        let ch = &mut self.channels[channel];
        let set = decode_ascan_payload(&payload, ch.hardware_delay, ch.reject_level);
        ch.push_ascan(set);
        self.correlator.responses.ascan_ready = true;
        Ok(Processed::Decoded(header.id))
    }

    /// A handle for reading `channel`'s smoothed A-scan from another thread
    #[must_use]
    pub fn ascan_feed(&self, channel: usize) -> Option<AScanFeed> {
        self.channels.get(channel).map(BoardChannel::ascan_feed)
    }

    /// The latest smoothed A-scan of `channel`, if a new one was decoded since the last call
    pub fn take_ascan(&mut self, channel: usize) -> Option<AScanDataset> {
        let set = self.channels.get_mut(channel)?.take_ascan();
        if self.channels.iter().all(|c| !c.has_ascan()) {
            self.correlator.responses.ascan_ready = false;
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        board::tests::sim_board,
        core::ASCAN_SAMPLE_SIZE,
        correlator::Issue,
        transport::sim::Simulator,
    };

    #[test]
    fn test_payload_decode() {
        let mut payload = vec![1, 7, 0x01, 0x00];
        for v in [100i16, -3, 13, -40] {
            payload.extend_from_slice(&v.to_be_bytes());
        }
        let set = decode_ascan_payload(&payload, 20, 14);
        assert_eq!(set.range, 7);
        assert_eq!(set.crossing, 0x100 + 20);
        // -3 and 13 fall under the reject level and keep only their last digit
        assert_eq!(set.samples, vec![350, -10, 10, -140]);
    }

    #[test]
    fn test_request_and_decode() {
        let mut sim = Simulator::with_greeting("");
        sim.set_ascan(3, 50, &[10, 20, 30]);
        let mut board = sim_board(sim);
        let feed = board.ascan_feed(2).unwrap();
        board.channels[2].hardware_delay = 5;
        board.set_smoothing(2, 1).unwrap();
        assert_eq!(board.request_ascan(2).unwrap(), Issue::Send);
        board.process_data_packets(false).unwrap();
        assert!(board.correlator.responses.ascan_ready);
        let set = board.take_ascan(2).unwrap();
        assert_eq!(set.samples.len(), ASCAN_SAMPLE_SIZE);
        assert_eq!(&set.samples[..3], &[35, 70, 105]);
        assert_eq!(set.crossing, 55);
        assert_eq!(set.range, 3);
        assert!(!board.correlator.responses.ascan_ready);
        assert_eq!(feed.snapshot().set, set);
        assert!(board.ascan_feed(4).is_none());
        // The latch was cleared by the answer
        assert_eq!(board.request_ascan(2).unwrap(), Issue::Send);
    }

    #[test]
    fn test_channel_clamped() {
        let mut sim = Simulator::with_greeting("");
        let mut payload = vec![9, 0, 0, 0];
        payload.extend(vec![0; 800]);
        sim.queue_frame(crate::core::PacketId::GetAScan, 2, 3, &payload);
        let mut board = sim_board(sim);
        board.process_data_packets(false).unwrap();
        assert!(board.take_ascan(3).is_some());
    }
}
