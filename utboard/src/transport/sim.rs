//! In-process stand-ins for a digitizer board and for the datagram group, used when no hardware
//! is attached and for testing the interface.
//!
//! The simulated board answers at the protocol level only: register reads and writes, DSP RAM,
//! DSP messages, bitstream loading, and quiet A-scan and peak packets. Every call to
//! [`Transport::write_bytes`] is taken as one complete frame or one raw data block, which is
//! how the host side writes them.

use super::{
    Datagram,
    Transport,
    TransportResult,
};
use crate::{
    core::{
        DspMessageId,
        DspReplyError,
        LoadStatus,
        PacketId,
        ASCAN_SAMPLE_SIZE,
        DSP_ERROR_FLAG,
        FPGA_BLOCK_SIZE,
        FPGA_LOADED_FLAG,
        FRAME_MARKER,
        HIT_COUNT_MET,
        MAX_BLOCK_READ_WORDS,
        SHARED_MEMORY,
    },
    discovery::ROLL_CALL,
    registers::{
        CHASSIS_SLOT,
        REP_RATE,
    },
};
use anyhow::bail;
use num_traits::FromPrimitive;
use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    net::IpAddr,
    time::Duration,
};

/// Location of one word of DSP RAM. Cores 1/2 and 3/4 share program memory; local memory is
/// per core.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct RamKey {
    chip: u8,
    bank: u8,
    page: u8,
    addr: u16,
}

impl RamKey {
    fn new(chip: u8, core: u8, page: u8, addr: u16) -> Self {
        let bank = if page & SHARED_MEMORY == 0 {
            0x10 + core
        } else {
            core.saturating_sub(1) / 2
        };
        Self {
            chip,
            bank,
            page: page & 0x0F,
            addr,
        }
    }
}

/// One gate's worth of a peak record
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SimGatePeak {
    pub flags: u16,
    pub peak: i16,
    /// Flight time as sent, offset by 0x8000
    pub flight: u16,
    pub track: u16,
}

impl Default for SimGatePeak {
    fn default() -> Self {
        Self {
            flags: HIT_COUNT_MET,
            peak: 0,
            flight: 0x8000,
            track: 0,
        }
    }
}

/// The wall block of a quiet wall channel: both readings hold their "no data" sentinels
pub const QUIET_WALL: [i16; 12] = [i16::MIN, 0, 0, 0, 0, 0, i16::MAX, 0, 0, 0, 0, 0];

/// Encode one channel record of a peak packet
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn encode_peak_channel(channel: i8, gates: &[SimGatePeak], wall: Option<&[i16; 12]>) -> Vec<u8> {
    let mut out = vec![channel as u8, gates.len() as u8];
    for g in gates {
        out.extend_from_slice(&g.flags.to_be_bytes());
        out.extend_from_slice(&g.peak.to_be_bytes());
        out.extend_from_slice(&g.flight.to_be_bytes());
        out.extend_from_slice(&g.track.to_be_bytes());
    }
    if let Some(wall) = wall {
        for v in wall {
            out.extend_from_slice(&v.to_be_bytes());
        }
    }
    out
}

/// Encode a whole inbound frame: marker, header, payload
#[must_use]
pub fn encode_inbound(id: PacketId, chip: u8, core: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = FRAME_MARKER.to_vec();
    out.extend_from_slice(&[id as u8, chip, core]);
    out.extend_from_slice(payload);
    out
}

/// A simulated digitizer board
#[derive(Debug)]
pub struct Simulator {
    rx: VecDeque<u8>,
    registers: [u8; 256],
    ram: HashMap<RamKey, u16>,
    write_cursor: HashMap<(u8, u8), (u8, u16)>,
    read_cursor: HashMap<(u8, u8), (u8, u16)>,
    fpga_loaded: bool,
    /// Bitstream bytes received while a load is running
    loading: Option<usize>,
    blocks_received: usize,
    bitstream_len: Option<usize>,
    load_fault: Option<(usize, LoadStatus)>,
    dsp_status: u16,
    dsp_error: Option<DspReplyError>,
    ascan_range: u8,
    ascan_crossing: u16,
    ascan_samples: Vec<i16>,
    encoders: (u32, u32),
    silent: bool,
    corrupt_dsp_writes: bool,
    commands: Vec<Vec<u8>>,
    bad_frames: usize,
    closed: bool,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    /// A board with an unloaded FPGA, chassis 0 slot 0, that greets with a fixed line
    #[must_use]
    pub fn new() -> Self {
        Self::with_greeting("Hello from Simulated UT Board\r\n")
    }

    #[must_use]
    pub fn with_greeting(greeting: &str) -> Self {
        let mut sim = Self {
            rx: greeting.bytes().collect(),
            registers: [0u8; 256],
            ram: HashMap::default(),
            write_cursor: HashMap::default(),
            read_cursor: HashMap::default(),
            fpga_loaded: false,
            loading: None,
            blocks_received: 0,
            bitstream_len: None,
            load_fault: None,
            dsp_status: 0,
            dsp_error: None,
            ascan_range: 0,
            ascan_crossing: 0,
            ascan_samples: vec![0; ASCAN_SAMPLE_SIZE],
            encoders: (0, 0),
            silent: false,
            corrupt_dsp_writes: false,
            commands: vec![],
            bad_frames: 0,
            closed: false,
        };
        sim.set_switches(0, 0);
        sim
    }

    /// Set the motherboard switches; the FPGA reports them inverted
    pub fn set_switches(&mut self, chassis: u8, slot: u8) {
        self.registers[usize::from(CHASSIS_SLOT)] = !(((chassis & 0x0F) << 4) | (slot & 0x0F));
    }

    pub fn set_fpga_loaded(&mut self, loaded: bool) {
        self.fpga_loaded = loaded;
    }

    #[must_use]
    pub fn fpga_loaded(&self) -> bool {
        self.fpga_loaded
    }

    /// Report success once this many bitstream bytes arrived, instead of on a short block
    pub fn expect_bitstream(&mut self, len: usize) {
        self.bitstream_len = Some(len);
    }

    /// Fail the next bitstream load with `status` after `blocks` data blocks
    pub fn fail_load_after(&mut self, blocks: usize, status: LoadStatus) {
        self.load_fault = Some((blocks, status));
    }

    pub fn set_dsp_status(&mut self, status: u16) {
        self.dsp_status = status;
    }

    /// Answer every DSP message with this error until cleared
    pub fn set_dsp_error(&mut self, error: Option<DspReplyError>) {
        self.dsp_error = error;
    }

    pub fn set_ascan(&mut self, range: u8, crossing: u16, samples: &[i16]) {
        self.ascan_range = range;
        self.ascan_crossing = crossing;
        self.ascan_samples = samples.to_vec();
        self.ascan_samples.resize(ASCAN_SAMPLE_SIZE, 0);
    }

    pub fn set_encoders(&mut self, encoder1: u32, encoder2: u32) {
        self.encoders = (encoder1, encoder2);
    }

    /// Stop answering requests; commands are still recorded
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Flip the low bit of every DSP RAM word written from now on
    pub fn set_corrupt_dsp_writes(&mut self, corrupt: bool) {
        self.corrupt_dsp_writes = corrupt;
    }

    /// Append raw bytes to what the host will read
    pub fn queue_inbound(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    pub fn queue_frame(&mut self, id: PacketId, chip: u8, core: u8, payload: &[u8]) {
        let frame = encode_inbound(id, chip, core, payload);
        self.queue_inbound(&frame);
    }

    /// The body of every well-formed frame received so far, without marker or checksum
    #[must_use]
    pub fn commands(&self) -> &[Vec<u8>] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Frames dropped for a bad checksum or an unknown shape
    #[must_use]
    pub fn bad_frames(&self) -> usize {
        self.bad_frames
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[must_use]
    pub fn register(&self, addr: u8) -> u8 {
        self.registers[usize::from(addr)]
    }

    /// Read DSP RAM directly
    #[must_use]
    pub fn peek(&self, chip: u8, core: u8, page: u8, addr: u16) -> u16 {
        self.ram
            .get(&RamKey::new(chip, core, page, addr))
            .copied()
            .unwrap_or_default()
    }

    /// Write DSP RAM directly
    pub fn poke(&mut self, chip: u8, core: u8, page: u8, addr: u16, value: u16) {
        self.ram.insert(RamKey::new(chip, core, page, addr), value);
    }

    fn reply_raw(&mut self, bytes: &[u8]) {
        if !self.silent {
            self.rx.extend(bytes);
        }
    }

    fn reply(&mut self, id: PacketId, chip: u8, core: u8, payload: &[u8]) {
        if !self.silent {
            self.queue_frame(id, chip, core, payload);
        }
    }

    fn handle_frame(&mut self, body: &[u8]) {
        let Some((checksum, payload)) = body.split_last() else {
            self.bad_frames += 1;
            return;
        };
        let sum = payload
            .iter()
            .fold(*checksum, |acc, b| acc.wrapping_add(*b));
        if sum != 0 || payload.is_empty() {
            self.bad_frames += 1;
            return;
        }
        self.commands.push(payload.to_vec());
        self.execute(payload);
    }

    #[allow(clippy::too_many_lines)]
    fn execute(&mut self, p: &[u8]) {
        let arg = |i: usize| p.get(i).copied().unwrap_or_default();
        let word = |i: usize| u16::from_be_bytes([arg(i), arg(i + 1)]);
        match PacketId::from_u8(p[0]) {
            Some(PacketId::GetStatus) => {
                let status = if self.fpga_loaded { FPGA_LOADED_FLAG } else { 0 };
                self.reply(PacketId::GetStatus, 0, 0, &[status, 0]);
            }
            Some(PacketId::LoadFpga) => {
                self.loading = Some(0);
                self.blocks_received = 0;
                self.reply_raw(&[PacketId::SendData as u8, LoadStatus::NoStatus as u8]);
            }
            Some(PacketId::WriteFpga) => {
                self.registers[usize::from(arg(1))] = arg(2);
            }
            Some(PacketId::SetRepRate) => {
                let count = u32::from_be_bytes([arg(1), arg(2), arg(3), arg(4)]);
                for (addr, value) in REP_RATE.writes(count) {
                    self.registers[usize::from(addr)] = value;
                }
            }
            Some(PacketId::ReadFpga) => {
                let value = self.registers[usize::from(arg(1))];
                self.reply_raw(&[value, 0]);
            }
            Some(PacketId::WriteDsp) => {
                let (chip, core, page, addr) = (arg(1), arg(2), arg(3), word(4));
                let value = word(6) ^ u16::from(self.corrupt_dsp_writes);
                self.poke(chip, core, page, addr, value);
                self.write_cursor
                    .insert((chip, core), (page, addr.wrapping_add(1)));
            }
            Some(PacketId::WriteNextDsp) => {
                let (chip, core) = (arg(1), arg(2));
                if let Some((page, addr)) = self.write_cursor.get(&(chip, core)).copied() {
                    let value = word(3) ^ u16::from(self.corrupt_dsp_writes);
                    self.poke(chip, core, page, addr, value);
                    self.write_cursor
                        .insert((chip, core), (page, addr.wrapping_add(1)));
                }
            }
            Some(PacketId::ReadDsp) => {
                let (chip, core, page, addr) = (arg(1), arg(2), arg(3), word(4));
                let value = self.peek(chip, core, page, addr);
                self.read_cursor
                    .insert((chip, core), (page, addr.wrapping_add(1)));
                self.reply(PacketId::ReadDsp, chip, core, &value.to_be_bytes());
            }
            Some(PacketId::ReadNextDsp) => {
                let (chip, core) = (arg(1), arg(2));
                let (page, addr) = self
                    .read_cursor
                    .get(&(chip, core))
                    .copied()
                    .unwrap_or_default();
                let value = self.peek(chip, core, page, addr);
                self.read_cursor
                    .insert((chip, core), (page, addr.wrapping_add(1)));
                self.reply(PacketId::ReadNextDsp, chip, core, &value.to_be_bytes());
            }
            Some(PacketId::ReadDspBlock) => {
                let (chip, core, page, addr) = (arg(1), arg(2), arg(3), word(4));
                let count = arg(6).min(MAX_BLOCK_READ_WORDS);
                let mut payload = vec![count * 2];
                for i in 0..u16::from(count) {
                    let value = self.peek(chip, core, page, addr.wrapping_add(i));
                    payload.extend_from_slice(&value.to_be_bytes());
                }
                self.reply(PacketId::ReadDspBlock, chip, core, &payload);
            }
            Some(PacketId::GetDspRamBlockChecksum) => {
                let (chip, core, page, addr, size) = (arg(1), arg(2), arg(3), word(4), word(6));
                let sum = (0..size).fold(0u16, |acc, i| {
                    acc.wrapping_add(self.peek(chip, core, page, addr.wrapping_add(i)))
                });
                self.reply(
                    PacketId::GetDspRamBlockChecksum,
                    chip,
                    core,
                    &sum.to_be_bytes(),
                );
            }
            Some(PacketId::MessageDsp) => {
                let (chip, core, msg) = (arg(1), arg(2), arg(3));
                if let Some(error) = self.dsp_error {
                    self.reply(
                        PacketId::MessageDsp,
                        chip,
                        core,
                        &[error as u8, core | DSP_ERROR_FLAG],
                    );
                    return;
                }
                let payload = match DspMessageId::from_u8(msg) {
                    Some(DspMessageId::GetStatus) => {
                        let [hi, lo] = self.dsp_status.to_be_bytes();
                        vec![msg, core, hi, lo]
                    }
                    Some(DspMessageId::GetMapCount) => vec![msg, core, 0, 0],
                    _ => vec![DspMessageId::Ack as u8, core, msg],
                };
                self.reply(PacketId::MessageDsp, chip, core, &payload);
            }
            Some(PacketId::GetAScan) => {
                let (chip, core, channel) = (arg(1), arg(2), arg(3));
                let mut payload = vec![channel, self.ascan_range];
                payload.extend_from_slice(&self.ascan_crossing.to_be_bytes());
                for s in &self.ascan_samples {
                    payload.extend_from_slice(&s.to_be_bytes());
                }
                self.reply(PacketId::GetAScan, chip, core, &payload);
            }
            Some(PacketId::GetPeakData) => {
                let request = [(arg(1), arg(2))];
                let wall_flags = u8::from(arg(3) != 0) << arg(1).min(7);
                let payload = self.quiet_peak_payload(&request, wall_flags);
                self.reply(PacketId::GetPeakData, 0, 0, &payload);
            }
            Some(PacketId::GetPeakData4) => {
                let request = [
                    (arg(1), arg(2)),
                    (arg(3), arg(4)),
                    (arg(5), arg(6)),
                    (arg(7), arg(8)),
                ];
                let payload = self.quiet_peak_payload(&request, arg(9));
                self.reply(PacketId::GetPeakData4, 0, 0, &payload);
            }
            _ => (),
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn quiet_peak_payload(&self, request: &[(u8, u8)], wall_flags: u8) -> Vec<u8> {
        let mut payload = self.encoders.0.to_be_bytes().to_vec();
        payload.extend_from_slice(&self.encoders.1.to_be_bytes());
        for (channel, gates) in request {
            if *channel == 0xFF {
                payload.extend_from_slice(&[0xFF, 0]);
                continue;
            }
            let gates = vec![SimGatePeak::default(); usize::from(*gates)];
            let wall = (wall_flags >> channel.min(&7)) & 1 == 1;
            payload.extend(encode_peak_channel(
                *channel as i8,
                &gates,
                wall.then_some(&QUIET_WALL),
            ));
        }
        payload
    }

    fn handle_data_block(&mut self, data: &[u8]) {
        let Some(received) = self.loading else {
            self.bad_frames += 1;
            return;
        };
        let received = received + data.len();
        self.blocks_received += 1;
        let status = match (self.load_fault, self.bitstream_len) {
            (Some((after, status)), _) if self.blocks_received >= after => Some(status),
            (_, Some(len)) if received >= len => Some(LoadStatus::ConfigGood),
            (_, None) if data.len() < FPGA_BLOCK_SIZE => Some(LoadStatus::ConfigGood),
            _ => None,
        };
        match status {
            Some(status) => {
                self.loading = None;
                self.load_fault = None;
                self.fpga_loaded = status == LoadStatus::ConfigGood;
                self.reply_raw(&[PacketId::NoAction as u8, status as u8]);
            }
            None => {
                self.loading = Some(received);
                self.reply_raw(&[PacketId::SendData as u8, LoadStatus::NoStatus as u8]);
            }
        }
    }
}

impl Transport for Simulator {
    fn available(&mut self) -> TransportResult<usize> {
        Ok(self.rx.len())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> TransportResult<()> {
        if self.rx.len() < buf.len() {
            bail!(
                "Simulated board has {} of the {} bytes asked for",
                self.rx.len(),
                buf.len()
            );
        }
        let n = buf.len();
        for (dst, src) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *dst = src;
        }
        Ok(())
    }

    fn write_bytes(&mut self, data: &[u8]) -> TransportResult<()> {
        if self.closed {
            bail!("Simulated board connection is closed");
        }
        if let Some(body) = data.strip_prefix(&FRAME_MARKER) {
            self.handle_frame(body);
        } else if let Some((&first, block)) = data.split_first() {
            if first == PacketId::Data as u8 {
                self.handle_data_block(block);
            } else {
                self.bad_frames += 1;
            }
        }
        Ok(())
    }

    fn set_timeout(&mut self, _timeout: Duration) -> TransportResult<()> {
        Ok(())
    }

    fn close(&mut self) -> TransportResult<()> {
        self.closed = true;
        Ok(())
    }
}

/// One board listening on the simulated datagram group
#[derive(Debug, Clone)]
pub struct SimRemote {
    pub addr: IpAddr,
    pub fpga_loaded: bool,
    /// Fail a broadcast load with this status on the first data block
    pub fault: Option<LoadStatus>,
    /// Never answer anything
    pub mute: bool,
    loading: Option<usize>,
}

impl SimRemote {
    #[must_use]
    pub fn new(addr: IpAddr) -> Self {
        Self {
            addr,
            fpga_loaded: false,
            fault: None,
            mute: false,
            loading: None,
        }
    }
}

/// A simulated datagram group holding any number of boards
#[derive(Debug, Default)]
pub struct SimGroup {
    pub remotes: Vec<SimRemote>,
    /// Answer each roll call twice, as boards do when they hear repeated broadcasts
    pub echo_roll_call: bool,
    bitstream_len: Option<usize>,
    inbox: VecDeque<(Vec<u8>, IpAddr)>,
    sent: Vec<Vec<u8>>,
}

impl SimGroup {
    #[must_use]
    pub fn new(remotes: Vec<SimRemote>) -> Self {
        Self {
            remotes,
            ..Default::default()
        }
    }

    /// Report success once this many bitstream bytes arrived, instead of on a short block
    pub fn expect_bitstream(&mut self, len: usize) {
        self.bitstream_len = Some(len);
    }

    /// Every datagram broadcast so far
    #[must_use]
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    fn roll_call(&mut self) {
        let copies = if self.echo_roll_call { 2 } else { 1 };
        for remote in self.remotes.iter().filter(|r| !r.mute) {
            let text = if remote.fpga_loaded {
                "UT board present, FPGA loaded..."
            } else {
                "UT board present..."
            };
            for _ in 0..copies {
                self.inbox.push_back((text.as_bytes().to_vec(), remote.addr));
            }
        }
    }

    fn data_block(&mut self, data: &[u8]) {
        for remote in self.remotes.iter_mut().filter(|r| !r.mute) {
            let Some(received) = remote.loading else {
                continue;
            };
            let received = received + data.len();
            let done = match self.bitstream_len {
                Some(len) => received >= len,
                None => data.len() < FPGA_BLOCK_SIZE,
            };
            let reply = if let Some(fault) = remote.fault {
                remote.loading = None;
                [PacketId::NoAction as u8, fault as u8]
            } else if done {
                remote.loading = None;
                remote.fpga_loaded = true;
                [PacketId::NoAction as u8, LoadStatus::ConfigGood as u8]
            } else {
                remote.loading = Some(received);
                [PacketId::SendData as u8, LoadStatus::NoStatus as u8]
            };
            self.inbox.push_back((reply.to_vec(), remote.addr));
        }
    }
}

impl Datagram for SimGroup {
    fn broadcast(&mut self, data: &[u8]) -> TransportResult<()> {
        self.sent.push(data.to_vec());
        if data == ROLL_CALL {
            self.roll_call();
        } else if data == [PacketId::LoadFpga as u8] {
            for remote in self.remotes.iter_mut().filter(|r| !r.mute) {
                remote.loading = Some(0);
                self.inbox.push_back((
                    vec![PacketId::SendData as u8, LoadStatus::NoStatus as u8],
                    remote.addr,
                ));
            }
        } else if let Some((&first, block)) = data.split_first() {
            if first == PacketId::Data as u8 {
                self.data_block(block);
            }
        }
        Ok(())
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> TransportResult<Option<(usize, IpAddr)>> {
        Ok(self.inbox.pop_front().map(|(data, addr)| {
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            (n, addr)
        }))
    }

    fn set_timeout(&mut self, _timeout: Duration) -> TransportResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_frame;

    fn fresh() -> Simulator {
        let mut sim = Simulator::with_greeting("");
        sim.set_switches(2, 5);
        sim
    }

    #[test]
    fn test_register_write_read() {
        let mut sim = fresh();
        sim.write_bytes(&encode_frame(&[PacketId::WriteFpga as u8, 0x47, 3]))
            .unwrap();
        assert_eq!(sim.register(0x47), 3);
        sim.write_bytes(&encode_frame(&[PacketId::ReadFpga as u8, CHASSIS_SLOT]))
            .unwrap();
        let mut reply = [0u8; 2];
        sim.read_bytes(&mut reply).unwrap();
        assert_eq!(!reply[0], 0x25);
    }

    #[test]
    fn test_bad_checksum_is_dropped() {
        let mut sim = fresh();
        let mut frame = encode_frame(&[PacketId::WriteFpga as u8, 0x47, 3]);
        *frame.last_mut().unwrap() ^= 0xFF;
        sim.write_bytes(&frame).unwrap();
        assert_eq!(sim.register(0x47), 0);
        assert_eq!(sim.bad_frames(), 1);
        assert!(sim.commands().is_empty());
    }

    #[test]
    fn test_shared_memory_between_core_pairs() {
        let mut sim = fresh();
        sim.poke(1, 1, SHARED_MEMORY, 0x100, 0xBEEF);
        assert_eq!(sim.peek(1, 2, SHARED_MEMORY, 0x100), 0xBEEF);
        assert_eq!(sim.peek(1, 3, SHARED_MEMORY, 0x100), 0);
        assert_eq!(sim.peek(1, 2, 0, 0x100), 0);
    }

    #[test]
    fn test_read_past_end_fails() {
        let mut sim = fresh();
        let mut buf = [0u8; 3];
        assert!(sim.read_bytes(&mut buf).is_err());
    }

    #[test]
    fn test_reads_drain_in_order() {
        let mut sim = fresh();
        sim.queue_inbound(&[1, 2, 3, 4, 5]);
        let mut head = [0u8; 2];
        sim.read_bytes(&mut head).unwrap();
        assert_eq!(head, [1, 2]);
        let mut tail = [0u8; 3];
        sim.read_bytes(&mut tail).unwrap();
        assert_eq!(tail, [3, 4, 5]);
        assert_eq!(sim.available().unwrap(), 0);
    }

    #[test]
    fn test_short_block_finishes_load() {
        let mut sim = fresh();
        sim.write_bytes(&encode_frame(&[PacketId::LoadFpga as u8]))
            .unwrap();
        let mut reply = [0u8; 2];
        sim.read_bytes(&mut reply).unwrap();
        assert_eq!(reply, [PacketId::SendData as u8, 0]);
        sim.write_bytes(&[PacketId::Data as u8, 1, 2, 3]).unwrap();
        sim.read_bytes(&mut reply).unwrap();
        assert_eq!(reply, [0, LoadStatus::ConfigGood as u8]);
        assert!(sim.fpga_loaded());
    }

    #[test]
    fn test_group_roll_call() {
        let mut group = SimGroup::new(vec![SimRemote::new("10.0.1.2".parse().unwrap())]);
        group.broadcast(ROLL_CALL).unwrap();
        let mut buf = [0u8; 64];
        let (n, addr) = group.recv_from(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"UT board present...");
        assert_eq!(addr, "10.0.1.2".parse::<IpAddr>().unwrap());
        assert!(group.recv_from(&mut buf).unwrap().is_none());
    }
}
