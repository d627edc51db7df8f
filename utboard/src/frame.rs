//! Outbound frame encoding and the inbound header reader with its resynchronizer.
//!
//! Inbound frames are `[AA 55 BB 66][type][chip][core][payload]`. The marker is checked a byte
//! at a time; on the first bad byte everything up to the next 0xAA is dropped, and a bad byte
//! that is itself 0xAA is taken as the start of the next marker. After a resync the 0xAA has
//! already been consumed, so the next header read starts at the second marker byte and needs
//! one byte less.
use crate::{
    core::FRAME_MARKER,
    transport::{
        Transport,
        TransportResult,
    },
};

/// Marker, packet type, chip and core
pub const HEADER_SIZE: usize = 7;

/// The byte that makes an outbound frame sum to zero
#[must_use]
pub fn checksum(bytes: &[u8]) -> u8 {
    0u8.wrapping_sub(bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)))
}

/// Wrap a command in the marker and trailing checksum
#[must_use]
pub fn encode_frame(bytes: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_MARKER.len() + bytes.len() + 1);
    frame.extend_from_slice(&FRAME_MARKER);
    frame.extend_from_slice(bytes);
    frame.push(checksum(bytes));
    frame
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PacketHeader {
    /// Raw packet type, kept raw so unknown types can be reported
    pub id: u8,
    pub chip: u8,
    pub core: u8,
}

/// The last good packet seen before a resync
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PreviousPacket {
    pub id: u8,
    pub chip: u8,
    pub core: u8,
    pub dsp_msg_id: u8,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ResyncStats {
    pub count: u32,
    pub previous: PreviousPacket,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HeaderRead {
    /// Fewer than a header's worth of bytes waiting
    Incomplete,
    Header(PacketHeader),
    /// The marker didn't match and bytes were discarded
    Resynced,
}

#[derive(Debug, Default)]
pub struct FrameReader {
    resynced: bool,
    last: PreviousPacket,
    stats: ResyncStats,
}

impl FrameReader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the next header off `transport`
    /// # Errors
    /// Returns an error on transport failures
    pub fn read_header<T: Transport>(&mut self, transport: &mut T) -> TransportResult<HeaderRead> {
        let skip = usize::from(self.resynced);
        if transport.available()? < self.header_len() {
            return Ok(HeaderRead::Incomplete);
        }
        self.resynced = false;
        for expected in &FRAME_MARKER[skip..] {
            let byte = transport.read_byte()?;
            if byte == *expected {
                continue;
            }
            if byte == FRAME_MARKER[0] {
                self.count_resync();
                self.resynced = true;
            } else {
                self.resync(transport)?;
            }
            return Ok(HeaderRead::Resynced);
        }
        let mut ids = [0u8; 3];
        transport.read_bytes(&mut ids)?;
        let header = PacketHeader {
            id: ids[0],
            chip: ids[1],
            core: ids[2],
        };
        self.last = PreviousPacket {
            id: header.id,
            chip: header.chip,
            core: header.core,
            dsp_msg_id: 0,
        };
        Ok(HeaderRead::Header(header))
    }

    /// Discard bytes up to and including the next marker start byte, or until the stream is
    /// empty
    /// # Errors
    /// Returns an error on transport failures
    pub fn resync<T: Transport>(&mut self, transport: &mut T) -> TransportResult<()> {
        self.count_resync();
        while transport.available()? > 0 {
            if transport.read_byte()? == FRAME_MARKER[0] {
                self.resynced = true;
                break;
            }
        }
        Ok(())
    }

    fn count_resync(&mut self) {
        self.stats.count += 1;
        self.stats.previous = self.last;
    }

    /// Record the DSP message id of the packet being decoded
    pub fn note_dsp_message(&mut self, msg_id: u8) {
        self.last.dsp_msg_id = msg_id;
    }

    #[must_use]
    pub fn is_resynced(&self) -> bool {
        self.resynced
    }

    /// Bytes the next header read needs
    #[must_use]
    pub fn header_len(&self) -> usize {
        HEADER_SIZE - usize::from(self.resynced)
    }

    #[must_use]
    pub fn stats(&self) -> ResyncStats {
        self.stats
    }

    /// Return the counters and start counting again
    pub fn take_stats(&mut self) -> ResyncStats {
        std::mem::take(&mut self.stats)
    }
}
