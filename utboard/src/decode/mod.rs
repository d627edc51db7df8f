//! Inbound packet decoding.
//!
//! Every packet starts with a header read by the [`crate::frame::FrameReader`]; the packet
//! type picks the decoder. Payload bytes that haven't arrived are waited for a bounded number
//! of ticks. Anything left unread after a malformed or unknown packet is discarded by the next
//! resync.

pub mod ascan;
pub mod peak;

use crate::{
    board::Board,
    core::{
        DspMessageId,
        DspReplyError,
        PacketId,
        DSP_ERROR_FLAG,
        RESPONSE_TIMEOUT_TICKS,
    },
    correlator::RequestClass,
    frame::{
        HeaderRead,
        PacketHeader,
        ResyncStats,
    },
    transport::{
        Transport,
        TransportResult,
    },
};
use num_traits::FromPrimitive;
use tracing::{
    debug,
    info,
    warn,
};

/// What one call to [`Board::process_one_packet`] did
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Processed {
    /// Not enough bytes for a header
    Idle,
    /// Bytes were discarded looking for a marker
    Resynced,
    Decoded(u8),
    /// The payload didn't arrive in time
    TimedOut(u8),
    /// A channel or gate index was out of range; parsing was abandoned
    Malformed(u8),
    /// A packet type this host doesn't decode
    Unhandled(u8),
}

/// An error reported by a DSP core in place of a reply
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DspErrorRecord {
    pub chip: u8,
    pub core: u8,
    pub code: u8,
}

/// Per-board counters kept by the decoder
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub dsp_messages_sent: u32,
    pub dsp_acks: u32,
    pub dsp_errors: u32,
    pub last_dsp_error: Option<DspErrorRecord>,
    pub unhandled: u32,
}

/// Counters collected by [`Board::status_report`]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub resync: ResyncStats,
    pub peak_suppressed: u32,
    pub peak_timeouts: u32,
    pub ascan_suppressed: u32,
    pub ascan_timeouts: u32,
    pub dsp_errors: u32,
    pub last_dsp_error: Option<DspErrorRecord>,
}

impl<T> Board<T>
where
    T: Transport,
{
    /// Wait for `n` payload bytes and read them, or `None` if they don't show up in time
    pub(crate) fn read_body(&mut self, n: usize) -> TransportResult<Option<Vec<u8>>> {
        if !self.wait_for_bytes(n, RESPONSE_TIMEOUT_TICKS)? {
            return Ok(None);
        }
        let mut body = vec![0u8; n];
        self.transport.read_bytes(&mut body)?;
        Ok(Some(body))
    }

    /// Decode at most one packet. With `wait`, give a header up to the response timeout to
    /// arrive.
    /// # Errors
    /// Returns an error on transport failures
    pub fn process_one_packet(&mut self, wait: bool) -> TransportResult<Processed> {
        if wait && !self.wait_for_bytes(self.frames.header_len(), RESPONSE_TIMEOUT_TICKS)? {
            return Ok(Processed::Idle);
        }
        match self.frames.read_header(&mut self.transport)? {
            HeaderRead::Incomplete => Ok(Processed::Idle),
            HeaderRead::Resynced => Ok(Processed::Resynced),
            HeaderRead::Header(header) => self.dispatch(header),
        }
    }

    /// Decode packets until no complete header is waiting. Returns how many packets were
    /// handled.
    /// # Errors
    /// Returns an error on transport failures
    pub fn process_data_packets(&mut self, wait: bool) -> TransportResult<usize> {
        let mut handled = 0;
        loop {
            match self.process_one_packet(wait)? {
                Processed::Idle => break,
                _ => handled += 1,
            }
        }
        Ok(handled)
    }

    /// Decode packets until a peak packet has been decoded, or the response timeout runs out
    /// with nothing arriving. Returns whether peak data was decoded.
    /// # Errors
    /// Returns an error on transport failures
    pub fn process_until_peak(&mut self) -> TransportResult<bool> {
        let mut idle = 0;
        while idle <= RESPONSE_TIMEOUT_TICKS {
            match self.process_one_packet(false)? {
                Processed::Decoded(id)
                    if id == PacketId::GetPeakData as u8 || id == PacketId::GetPeakData4 as u8 =>
                {
                    return Ok(true);
                }
                Processed::Idle => {
                    idle += 1;
                    self.tick();
                }
                _ => idle = 0,
            }
        }
        Ok(false)
    }

    fn dispatch(&mut self, header: PacketHeader) -> TransportResult<Processed> {
        let id = header.id;
        match PacketId::from_u8(id) {
            Some(PacketId::GetStatus) => {
                let Some(body) = self.read_body(2)? else {
                    return Ok(Processed::TimedOut(id));
                };
                self.correlator.responses.board_status = Some(body[0]);
                self.correlator.complete(RequestClass::BoardStatus);
                Ok(Processed::Decoded(id))
            }
            Some(PacketId::GetAScan) => self.decode_ascan(header),
            Some(PacketId::GetPeakData) => self.decode_peak(header, 1),
            Some(PacketId::GetPeakData4) => self.decode_peak(header, 4),
            Some(PacketId::ReadDsp | PacketId::ReadNextDsp) => {
                let body = self.read_body(2)?;
                self.correlator.complete(RequestClass::RamRead);
                self.correlator.responses.ram_word =
                    Some(body.as_ref().map_or(0, |b| u16::from_be_bytes([b[0], b[1]])));
                Ok(match body {
                    Some(_) => Processed::Decoded(id),
                    None => Processed::TimedOut(id),
                })
            }
            Some(PacketId::ReadDspBlock) => {
                let count = match self.read_body(1)? {
                    Some(b) => usize::from(b[0]),
                    None => return Ok(Processed::TimedOut(id)),
                };
                let body = self.read_body(count)?;
                self.correlator.complete(RequestClass::RamBlock);
                let timed_out = body.is_none();
                self.correlator.responses.ram_block = Some(body.unwrap_or_else(|| vec![0; count]));
                Ok(if timed_out {
                    Processed::TimedOut(id)
                } else {
                    Processed::Decoded(id)
                })
            }
            Some(PacketId::GetDspRamBlockChecksum) => {
                let Some(body) = self.read_body(2)? else {
                    return Ok(Processed::TimedOut(id));
                };
                self.correlator.responses.checksum = Some(u16::from_be_bytes([body[0], body[1]]));
                self.correlator.complete(RequestClass::Checksum);
                Ok(Processed::Decoded(id))
            }
            Some(PacketId::MessageDsp) => self.decode_dsp_reply(header),
            Some(PacketId::GetWallMap) => {
                self.diag.unhandled += 1;
                warn!(board = %self.identity, "Wall map packet received but not handled");
                Ok(Processed::Unhandled(id))
            }
            _ => {
                self.diag.unhandled += 1;
                debug!(
                    board = %self.identity,
                    "Unknown packet type {id} from chip {} core {}", header.chip, header.core
                );
                Ok(Processed::Unhandled(id))
            }
        }
    }

    fn decode_dsp_reply(&mut self, header: PacketHeader) -> TransportResult<Processed> {
        let id = header.id;
        let Some(body) = self.read_body(2)? else {
            return Ok(Processed::TimedOut(id));
        };
        let (msg, core) = (body[0], body[1]);
        self.frames.note_dsp_message(msg);

        if core & DSP_ERROR_FLAG != 0 {
            let record = DspErrorRecord {
                chip: header.chip,
                core: core & !DSP_ERROR_FLAG,
                code: msg,
            };
            self.diag.dsp_errors += 1;
            self.diag.last_dsp_error = Some(record);
            let what = match DspReplyError::from_u8(msg) {
                Some(DspReplyError::IllegalSize) => "illegal message size",
                Some(DspReplyError::Timeout) => "timeout",
                Some(DspReplyError::InvalidHeader) => "invalid header",
                None => "unknown error",
            };
            warn!(
                board = %self.identity,
                "DSP chip {} core {} reported {what}", record.chip, record.core
            );
            return Ok(Processed::Decoded(id));
        }

        match DspMessageId::from_u8(msg) {
            Some(DspMessageId::GetStatus) => {
                let Some(status) = self.read_body(2)? else {
                    return Ok(Processed::TimedOut(id));
                };
                self.correlator.responses.dsp_status = Some(u16::from_be_bytes([status[0], status[1]]));
                self.correlator.complete(RequestClass::DspStatus);
            }
            Some(DspMessageId::Ack) => {
                let Some(acked) = self.read_body(1)? else {
                    return Ok(Processed::TimedOut(id));
                };
                self.diag.dsp_acks += 1;
                debug!(board = %self.identity, "DSP core {core} ACK for message {}", acked[0]);
            }
            Some(DspMessageId::GetMapCount) => {
                let Some(count) = self.read_body(2)? else {
                    return Ok(Processed::TimedOut(id));
                };
                debug!(
                    board = %self.identity,
                    "DSP core {core} map count {}",
                    u16::from_be_bytes([count[0], count[1]])
                );
            }
            _ => {
                self.diag.unhandled += 1;
                return Ok(Processed::Unhandled(id));
            }
        }
        Ok(Processed::Decoded(id))
    }

    /// Log and reset the resync, request, and DSP error counters
    pub fn status_report(&mut self) -> StatusReport {
        let resync = self.frames.take_stats();
        let (peak_suppressed, peak_timeouts) = self.correlator.latch(RequestClass::PeakData).take_counts();
        let (ascan_suppressed, ascan_timeouts) = self.correlator.latch(RequestClass::AScan).take_counts();
        let report = StatusReport {
            resync,
            peak_suppressed,
            peak_timeouts,
            ascan_suppressed,
            ascan_timeouts,
            dsp_errors: std::mem::take(&mut self.diag.dsp_errors),
            last_dsp_error: self.diag.last_dsp_error.take(),
        };
        if report.resync.count > 0 {
            let p = report.resync.previous;
            info!(
                board = %self.identity,
                "Resyncs: {}, previous packet type {} chip {} core {} DSP message {}",
                report.resync.count, p.id, p.chip, p.core, p.dsp_msg_id
            );
        }
        info!(
            board = %self.identity,
            "Peak requests suppressed: {}, timed out: {}; A-scan suppressed: {}, timed out: {}",
            report.peak_suppressed, report.peak_timeouts, report.ascan_suppressed, report.ascan_timeouts
        );
        if let Some(e) = report.last_dsp_error {
            warn!(
                board = %self.identity,
                "DSP errors: {}, last from chip {} core {} code {}", report.dsp_errors, e.chip, e.core, e.code
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        board::tests::sim_board,
        transport::sim::Simulator,
    };

    fn board_with(inbound: &[u8]) -> Board<Simulator> {
        let mut sim = Simulator::with_greeting("");
        sim.queue_inbound(inbound);
        sim_board(sim)
    }

    #[test]
    fn test_idle_when_empty() {
        let mut board = board_with(&[]);
        assert_eq!(board.process_one_packet(false).unwrap(), Processed::Idle);
        assert_eq!(board.process_one_packet(true).unwrap(), Processed::Idle);
    }

    #[test]
    fn test_unknown_type_then_resync() {
        let mut sim = Simulator::with_greeting("");
        sim.queue_frame(PacketId::Debug, 0, 0, &[1, 2, 3]);
        sim.queue_frame(PacketId::GetStatus, 0, 0, &[1, 0]);
        let mut board = sim_board(sim);
        assert_eq!(
            board.process_one_packet(false).unwrap(),
            Processed::Unhandled(PacketId::Debug as u8)
        );
        assert_eq!(board.process_one_packet(false).unwrap(), Processed::Resynced);
        assert_eq!(
            board.process_one_packet(false).unwrap(),
            Processed::Decoded(PacketId::GetStatus as u8)
        );
        assert_eq!(board.correlator.responses.board_status, Some(1));
        assert_eq!(board.status_report().resync.count, 1);
    }

    #[test]
    fn test_wall_map_unhandled() {
        let mut sim = Simulator::with_greeting("");
        sim.queue_frame(PacketId::GetWallMap, 1, 1, &[0; 10]);
        let mut board = sim_board(sim);
        assert_eq!(
            board.process_one_packet(false).unwrap(),
            Processed::Unhandled(PacketId::GetWallMap as u8)
        );
    }

    #[test]
    fn test_dsp_error_recorded() {
        let mut sim = Simulator::with_greeting("");
        sim.queue_frame(PacketId::MessageDsp, 2, 3, &[2, 3 | DSP_ERROR_FLAG]);
        let mut board = sim_board(sim);
        board.process_data_packets(false).unwrap();
        let report = board.status_report();
        assert_eq!(report.dsp_errors, 1);
        assert_eq!(
            report.last_dsp_error,
            Some(DspErrorRecord {
                chip: 2,
                core: 3,
                code: DspReplyError::Timeout as u8
            })
        );
        assert_eq!(board.status_report().dsp_errors, 0);
    }

    #[test]
    fn test_short_payload_times_out() {
        let mut sim = Simulator::with_greeting("");
        sim.queue_frame(PacketId::ReadDsp, 1, 1, &[0x12]);
        let mut board = sim_board(sim);
        assert_eq!(
            board.process_one_packet(false).unwrap(),
            Processed::TimedOut(PacketId::ReadDsp as u8)
        );
        // Zero filled
        assert_eq!(board.correlator.responses.ram_word, Some(0));
    }

    #[test]
    fn test_previous_packet_in_report() {
        let mut sim = Simulator::with_greeting("");
        sim.queue_frame(PacketId::MessageDsp, 1, 2, &[127, 2, 8]);
        sim.queue_inbound(&[0x00, 0x01]);
        sim.queue_frame(PacketId::GetStatus, 0, 0, &[0, 0]);
        let mut board = sim_board(sim);
        assert_eq!(board.process_data_packets(false).unwrap(), 3);
        let report = board.status_report();
        assert_eq!(report.resync.count, 1);
        assert_eq!(report.resync.previous.id, PacketId::MessageDsp as u8);
        assert_eq!(report.resync.previous.dsp_msg_id, 127);
        assert_eq!(board.diag.dsp_acks, 1);
    }
}
