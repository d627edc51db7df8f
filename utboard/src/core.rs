//! The identifiers and fixed numbers shared by the board firmware and the host
use num_derive::{
    FromPrimitive,
    ToPrimitive,
};
use std::time::Duration;

/// Every frame, in both directions, starts with this marker
pub const FRAME_MARKER: [u8; 4] = [0xAA, 0x55, 0xBB, 0x66];

/// Number of analog channels on one board
pub const NUMBER_OF_CHANNELS: usize = 4;
/// Largest gate count a channel may report in a peak packet
pub const MAX_GATES: usize = 9;

/// Samples in one A-scan dataset
pub const ASCAN_SAMPLE_SIZE: usize = 400;
/// Payload length of an A-scan packet: channel, range, crossing, then the samples
pub const ASCAN_PAYLOAD_SIZE: usize = 4 + 2 * ASCAN_SAMPLE_SIZE;
/// Full scale height of the A-scan display in remote amplitude units
pub const ASCAN_MAX_HEIGHT: i32 = 350;
/// Number of raw datasets the A-scan ring can hold
pub const ASCAN_FIFO_SIZE: usize = 25;

/// Header of a peak packet: two encoder counts
pub const PEAK_HEADER_SIZE: usize = 8;
pub const PEAK_DATA_BYTES_PER_GATE: usize = 8;
/// Extra bytes appended to a wall channel's peak record
pub const PEAK_DATA_BYTES_FOR_WALL: usize = 24;

/// Flight times are sent offset so they fit an unsigned word
pub const FLIGHT_TIME_ORIGIN: i32 = 0x8000;
/// Added to the raw track so that position 0 lands at six o'clock
pub const CLOCK_OFFSET: i32 = 6;
pub const MAX_CLOCK_POSITION: i32 = 11;

/// Peak flag set by the remote when the gate's hit count has been reached
pub const HIT_COUNT_MET: u16 = 0x0001;
/// Loaded bit of the remote status byte
pub const FPGA_LOADED_FLAG: u8 = 0x01;
/// Set in the core byte of a DSP reply when the remote reports an error
pub const DSP_ERROR_FLAG: u8 = 0x80;
/// Shared program memory select bit in the page byte of DSP RAM commands
pub const SHARED_MEMORY: u8 = 0x10;

/// Where the FPGA stores A/D samples in each DSP core
pub const AD_RAW_DATA_BUFFER_ADDRESS: u32 = 0x4000;
/// Largest word count one block read may ask for
pub const MAX_BLOCK_READ_WORDS: u8 = 127;
/// Bitstream bytes after the command byte in one data block
pub const FPGA_BLOCK_SIZE: usize = 1024;

/// One decode tick
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Ticks to wait for the body of a packet or a response
pub const RESPONSE_TIMEOUT_TICKS: u32 = 50;
/// Ticks to wait for a DSP RAM checksum, which needs the remote to scan the block
pub const CHECKSUM_TIMEOUT_TICKS: u32 = 500;
/// Loop iterations the point-to-point bitstream loader allows without a data request
pub const FPGA_LOAD_TIMEOUT: u32 = 200;
/// Words written between flow control round trips while loading DSP code
pub const DSP_LOAD_HANDSHAKE_INTERVAL: usize = 100;

/// Packet types, at the level of the board's network processor
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum PacketId {
    NoAction = 0,
    LoadFpga = 4,
    SendData = 5,
    Data = 6,
    WriteFpga = 7,
    ReadFpga = 8,
    GetStatus = 9,
    SetHardwareGain = 10,
    WriteDsp = 11,
    WriteNextDsp = 12,
    ReadDsp = 13,
    ReadNextDsp = 14,
    ReadDspBlock = 15,
    ZeroDsp = 16,
    GetAScan = 17,
    MessageDsp = 18,
    GetPeakData = 19,
    GetPeakData4 = 20,
    GetDspRamBlockChecksum = 21,
    LoadFirmware = 22,
    SetRepRate = 23,
    SetControlFlags = 24,
    GetWallMap = 25,
    ResetForNextRun = 26,
    SetMappingChannel = 27,
    Error = 125,
    Debug = 126,
    Exit = 127,
}

/// Status byte of a bitstream loader reply
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum LoadStatus {
    NoStatus = 0,
    InitBError = 1,
    DoneError = 2,
    CrcError = 3,
    ConfigGood = 4,
}

/// Messages understood by the DSP cores
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum DspMessageId {
    Null = 0,
    GetStatus = 1,
    SetGain = 2,
    GetAScanBlock = 3,
    GetAScanNextBlock = 4,
    SetAdSampleSize = 5,
    SetDelays = 6,
    SetAScanScale = 7,
    SetGate = 8,
    SetGateFlags = 9,
    SetDac = 10,
    SetDacFlags = 11,
    SetHitMissCounts = 12,
    GetPeakData = 13,
    SetRectification = 14,
    SetFlags1 = 15,
    SetGateSigProcTuning = 17,
    GetMapBlock = 18,
    GetMapCount = 19,
    ResetMapping = 20,
    SetFilter = 21,
    SetFilterAbsPreprocessing = 22,
    Ack = 127,
}

/// Error codes carried in the message byte of a DSP reply flagged with [`DSP_ERROR_FLAG`]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum DspReplyError {
    IllegalSize = 1,
    Timeout = 2,
    InvalidHeader = 3,
}

/// Control flags sent to the board's network processor
pub mod control_flags {
    pub const FLAW_WALL_MODE: u16 = 0x0001;
    pub const WALL_MAP_MODE: u16 = 0x0002;
    pub const SEND_DATA_ASYNC: u16 = 0x0004;
}

/// Bits of the DSP `SET_FLAGS1` word
pub mod dsp_flags1 {
    pub const PROCESSING: u16 = 0x0001;
    pub const GATES_ENABLED: u16 = 0x0002;
    pub const DAC_ENABLED: u16 = 0x0004;
    pub const ASCAN_FAST: u16 = 0x0008;
    pub const ASCAN_SLOW: u16 = 0x0010;
    pub const ASCAN_FREE_RUN: u16 = 0x0020;
    pub const FLAW_WALL_MODE: u16 = 0x0040;
    pub const WALL_MAP_MODE: u16 = 0x0080;
}
