//! The session with one board, from connect through program loading and register setup to the
//! steady state of requests and decoded packets, and finally shutdown.
//!
//! A board is driven by one worker that owns it for the whole session. Nothing here is shared
//! between boards, so one board's failure never reaches another.

pub mod ram;
pub mod requests;
pub mod settings;

use crate::{
    channel::BoardChannel,
    command,
    config::{
        BoardConfig,
        ChannelConfig,
        ChassisSlot,
        Timing,
    },
    core::{
        AD_RAW_DATA_BUFFER_ADDRESS,
        NUMBER_OF_CHANNELS,
        POLL_INTERVAL,
    },
    correlator::Correlator,
    decode::{
        peak::WallTracker,
        Diagnostics,
    },
    frame::{
        encode_frame,
        FrameReader,
    },
    gate::Gate,
    registers::{
        Address,
        MasterControl,
        Reset,
        CHASSIS_SLOT,
    },
    transport::{
        Transport,
        TransportResult,
    },
};
use anyhow::bail;
use std::{
    fmt::Display,
    net::IpAddr,
    time::Duration,
};
use tracing::{
    error,
    info,
    warn,
};
use utboard_utils::program_sources::{
    bitstream,
    dsp::Program,
};

/// Where a board is in its session
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    ProgramLoad,
    Verify,
    RegisterInit,
    Ready,
    ShuttingDown,
    /// The transport failed or setup was abandoned; the board takes no part in measurement
    Failed,
}

/// The on/off switches of [`Board::set_state`]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BoardSwitch {
    /// Run mode, with the FPGA feeding samples to the DSPs
    Sampling = 0,
    /// All four DSP cores out of reset
    DspRun = 1,
    /// FPGA test data in place of A/D samples
    SimData = 2,
    /// FPGA internals running; off holds them in reset
    FpgaInternals = 3,
}

/// Network address and chassis position of a board
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BoardIdentity {
    pub addr: IpAddr,
    pub chassis: u8,
    pub slot: u8,
    /// Chassis and slot came from the configured override, not the switches
    pub overridden: bool,
}

impl BoardIdentity {
    #[must_use]
    pub fn new(addr: IpAddr) -> Self {
        Self {
            addr,
            chassis: 0,
            slot: 0,
            overridden: false,
        }
    }
}

impl Display for BoardIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} ({})", self.chassis, self.slot, self.addr)
    }
}

/// The images a board is loaded with
#[derive(Debug, Copy, Clone)]
pub struct Programs<'a> {
    /// `None` to leave the FPGA as the board has it
    pub bitstream: Option<&'a bitstream::File>,
    pub dsp: &'a Program,
}

/// The DSP cores whose program memory is loaded; cores 1/2 and 3/4 share memory
pub const DSP_PROGRAM_CORES: [(u8, u8); 4] = [(1, 1), (1, 3), (2, 1), (2, 3)];
/// Every DSP core on the board
pub const ALL_DSP_CORES: [(u8, u8); 8] = [
    (1, 1),
    (1, 2),
    (1, 3),
    (1, 4),
    (2, 1),
    (2, 2),
    (2, 3),
    (2, 4),
];

#[derive(Debug)]
pub struct Board<T> {
    pub(crate) transport: T,
    pub identity: BoardIdentity,
    pub channels: Vec<BoardChannel>,
    pub(crate) frames: FrameReader,
    pub(crate) correlator: Correlator,
    pub(crate) diag: Diagnostics,
    pub(crate) wall: WallTracker,
    pub(crate) encoders: (u32, u32),
    pub(crate) poll_interval: Duration,
    state: SessionState,
    master: MasterControl,
    reset: Reset,
    fpga_loaded: bool,
    timing: Timing,
    control_flags: u16,
    mapping_channel: i16,
    settle: Duration,
    greeting: Option<String>,
}

impl<T> Board<T>
where
    T: Transport,
{
    /// A board at `addr` reached over `transport`, with default timing and nothing linked
    pub fn new(transport: T, addr: IpAddr) -> Self {
        Self {
            transport,
            identity: BoardIdentity::new(addr),
            channels: (0..NUMBER_OF_CHANNELS).map(BoardChannel::new).collect(),
            frames: FrameReader::new(),
            correlator: Correlator::new(),
            diag: Diagnostics::default(),
            wall: WallTracker::default(),
            encoders: (0, 0),
            poll_interval: POLL_INTERVAL,
            state: SessionState::Connecting,
            master: MasterControl::default(),
            reset: Reset::default(),
            fpga_loaded: false,
            timing: Timing::default(),
            control_flags: 0,
            mapping_channel: 0,
            settle: Duration::from_secs(1),
            greeting: None,
        }
    }

    /// Build a board from its configuration entry, linking every channel's gates
    pub fn from_config(transport: T, addr: IpAddr, config: &BoardConfig, timing: Timing) -> Self {
        let mut board = Self::new(transport, addr);
        board.timing = timing;
        board.control_flags = config.control_flags;
        board.mapping_channel = config.mapping_channel;
        for (i, ch) in config.channels.iter().take(NUMBER_OF_CHANNELS).enumerate() {
            board.configure_channel(i, ch);
        }
        board
    }

    /// Apply a channel's settings and link its gates
    pub fn configure_channel(&mut self, channel: usize, config: &ChannelConfig) {
        let ch = &mut self.channels[channel];
        ch.active = config.active;
        ch.is_wall = config.is_wall;
        ch.hardware_delay = config.hardware_delay;
        ch.set_smoothing(config.smoothing);
        ch.set_reject_percent(config.reject_level);
        self.link_gates(channel, config.gates.clone());
    }

    pub fn link_gates(&mut self, channel: usize, gates: Vec<Gate>) {
        self.channels[channel].gates = gates;
    }

    /// Length of one decode tick; zero never sleeps
    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    /// How long the DSPs are given to boot before their status is read
    pub fn set_settle_time(&mut self, settle: Duration) {
        self.settle = settle;
    }

    pub fn set_timing(&mut self, timing: Timing) {
        self.timing = timing;
    }

    #[must_use]
    pub fn timing(&self) -> Timing {
        self.timing
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    #[must_use]
    pub fn fpga_loaded(&self) -> bool {
        self.fpga_loaded
    }

    /// The board's FPGA was configured outside its session, by a broadcast load
    pub fn set_fpga_loaded(&mut self, loaded: bool) {
        self.fpga_loaded = loaded;
    }

    #[must_use]
    pub fn greeting(&self) -> Option<&str> {
        self.greeting.as_deref()
    }

    #[must_use]
    pub fn master_control(&self) -> MasterControl {
        self.master
    }

    #[must_use]
    pub fn reset_register(&self) -> Reset {
        self.reset
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Sleep one decode tick
    pub(crate) fn tick(&self) {
        if !self.poll_interval.is_zero() {
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Frame and send a command
    pub(crate) fn send(&mut self, bytes: &[u8]) -> TransportResult<()> {
        self.transport.write_bytes(&encode_frame(bytes))
    }

    pub(crate) fn send_all(&mut self, commands: &[Vec<u8>]) -> TransportResult<()> {
        for cmd in commands {
            self.send(cmd)?;
        }
        Ok(())
    }

    /// Write an FPGA register
    /// # Errors
    /// Returns an error on transport failures
    pub fn write_fpga(&mut self, addr: u8, value: u8) -> TransportResult<()> {
        self.send(&command::write_fpga(addr, value))
    }

    /// Read an FPGA register. The reply isn't framed, so nothing else may be in flight.
    /// # Errors
    /// Returns an error on transport failures or if the board doesn't answer in time
    pub fn read_fpga(&mut self, addr: u8) -> anyhow::Result<u8> {
        self.send(&command::read_fpga(addr))?;
        if !self.wait_for_bytes(2, crate::core::RESPONSE_TIMEOUT_TICKS)? {
            bail!("No answer reading FPGA register {addr:#04x}");
        }
        let mut reply = [0u8; 2];
        self.transport.read_bytes(&mut reply)?;
        Ok(reply[0])
    }

    pub(crate) fn write_master(&mut self) -> TransportResult<()> {
        self.write_fpga(MasterControl::addr(), self.master.bits())
    }

    pub(crate) fn write_reset(&mut self) -> TransportResult<()> {
        self.write_fpga(Reset::addr(), self.reset.bits())
    }

    /// Wait up to `ticks` decode ticks for `n` bytes to be readable
    pub(crate) fn wait_for_bytes(&mut self, n: usize, ticks: u32) -> TransportResult<bool> {
        for _ in 0..=ticks {
            if self.transport.available()? >= n {
                return Ok(true);
            }
            self.tick();
        }
        Ok(false)
    }

    /// Run the whole bring-up: greeting, bitstream, register init, chassis/slot, DSP programs,
    /// DSP start. The board is ready when this returns `Ok`; on error it is marked failed.
    /// # Errors
    /// Returns an error if any step fails; only this board is affected
    pub fn connect(
        &mut self,
        programs: &Programs<'_>,
        override_slot: Option<ChassisSlot>,
    ) -> anyhow::Result<()> {
        let res = self.bring_up(programs, override_slot);
        if let Err(e) = &res {
            error!(board = %self.identity, "Board setup failed: {e:#}");
            self.state = SessionState::Failed;
        }
        res
    }

    fn bring_up(
        &mut self,
        programs: &Programs<'_>,
        override_slot: Option<ChassisSlot>,
    ) -> anyhow::Result<()> {
        self.state = SessionState::Connecting;
        let greeting = self.transport.read_line(256)?;
        info!(board = %self.identity.addr, "{greeting}");
        self.greeting = Some(greeting);

        self.state = SessionState::ProgramLoad;
        match programs.bitstream {
            Some(_) if self.fpga_loaded => {
                info!(board = %self.identity, "FPGA loaded by broadcast");
            }
            Some(image) => self.load_fpga(image)?,
            None => (),
        }
        self.init_fpga()?;
        self.read_chassis_slot()?;
        if let Some(over) = override_slot {
            self.identity.chassis = over.chassis;
            self.identity.slot = over.slot;
            self.identity.overridden = true;
            info!(board = %self.identity, "Chassis and slot overridden");
        }
        for (chip, core) in DSP_PROGRAM_CORES {
            self.load_dsp_code(chip, core, programs.dsp)?;
        }

        self.state = SessionState::Verify;
        for (chip, core) in DSP_PROGRAM_CORES {
            let report = self.verify_dsp_code(chip, core, programs.dsp)?;
            if !report.passed() {
                bail!(
                    "DSP chip {chip} core {core}: blocks {:?} of {} failed verification",
                    report.mismatched,
                    report.blocks
                );
            }
        }

        self.state = SessionState::RegisterInit;
        self.start_dsps()?;
        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
        self.log_all_dsp_status(3)?;
        self.set_state(BoardSwitch::Sampling, true)?;

        for ch in &self.channels {
            if ch.active && ch.gates.is_empty() {
                warn!(board = %self.identity, "Channel {} has no gates linked", ch.index);
            }
        }
        self.state = SessionState::Ready;
        info!(board = %self.identity, "Board ready");
        Ok(())
    }

    /// Hold the FPGA in reset while the control registers and sample buffers are set up
    /// # Errors
    /// Returns an error on transport failures
    pub fn init_fpga(&mut self) -> TransportResult<()> {
        self.reset = Reset::from_bits(0x01);
        self.write_reset()?;
        self.master = MasterControl::default();
        self.write_master()?;
        for i in 0..NUMBER_OF_CHANNELS {
            let writes = command::sample_buffer_start(
                &self.channels[i].registers,
                AD_RAW_DATA_BUFFER_ADDRESS,
            );
            self.send_all(&writes)?;
        }
        // Release the FPGA internals, keep the DSP cores held
        self.reset = Reset::from_bits(0x02);
        self.write_reset()
    }

    /// Read the chassis and slot switches. The FPGA reads them inverted.
    /// # Errors
    /// Returns an error if the register can't be read
    pub fn read_chassis_slot(&mut self) -> anyhow::Result<(u8, u8)> {
        let raw = !self.read_fpga(CHASSIS_SLOT)?;
        self.identity.chassis = (raw >> 4) & 0x0F;
        self.identity.slot = raw & 0x0F;
        info!(board = %self.identity, "Chassis and slot read from switches");
        Ok((self.identity.chassis, self.identity.slot))
    }

    /// Take every DSP core out of reset, then cycle the core resets once more
    /// # Errors
    /// Returns an error on transport failures
    pub fn start_dsps(&mut self) -> TransportResult<()> {
        self.reset = Reset::from_bits(0x3E);
        self.write_reset()?;
        self.reset.set_dsp_running(false);
        self.write_reset()?;
        self.reset.set_dsp_running(true);
        self.write_reset()
    }

    /// Second stage setup, once the board is ready: pulser timing, transducers, sync
    /// # Errors
    /// Returns an error if the board isn't ready or on transport failures
    pub fn initialize(&mut self) -> anyhow::Result<()> {
        if !self.is_ready() {
            bail!("Board {} isn't ready", self.identity);
        }
        self.send_control_flags(self.control_flags)?;
        self.send_mapping_channel(self.mapping_channel)?;

        self.reset.internals = true;
        self.write_reset()?;

        for ch in 0..NUMBER_OF_CHANNELS {
            #[allow(clippy::cast_possible_truncation)]
            self.send_transducer(ch, false, 1, ch as u8)?;
        }

        let timing = self.timing;
        self.send_rep_rate(timing.rep_rate_hz)?;
        self.send_trigger_width(timing.trigger_width)?;
        self.send_sync_width(timing.sync_width)?;
        self.send_pulse_delay(timing.pulse_delay)?;
        self.write_fpga(crate::registers::NUMBER_BANKS, timing.banks)?;

        self.master.sync_source = timing.sync_source;
        self.master.sim_data = false;
        self.write_master()?;

        self.reset.internals = false;
        self.write_reset()?;

        for ch in 0..NUMBER_OF_CHANNELS {
            if self.channels[ch].active {
                self.push_gates(ch)?;
            }
        }
        Ok(())
    }

    /// Turn one of the board switches on or off
    /// # Errors
    /// Returns an error on transport failures
    pub fn set_state(&mut self, switch: BoardSwitch, on: bool) -> anyhow::Result<()> {
        match switch {
            BoardSwitch::Sampling => {
                if on {
                    // Leaves each core's HPI address on its local data page before the
                    // FPGA takes the bus
                    for (chip, core) in ALL_DSP_CORES {
                        self.read_dsp_word(chip, core, command::MemoryPage::LOCAL, 0)?;
                    }
                }
                self.master.setup_run = on;
                self.reset.internals = true;
                self.write_reset()?;
                self.write_master()?;
                self.reset.internals = false;
                self.write_reset()?;
            }
            BoardSwitch::DspRun => {
                self.reset.set_dsp_running(on);
                self.write_reset()?;
            }
            BoardSwitch::SimData => {
                self.master.sim_data = on;
                self.write_master()?;
            }
            BoardSwitch::FpgaInternals => {
                self.reset.internals = !on;
                self.write_reset()?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn get_state(&self, switch: BoardSwitch) -> bool {
        match switch {
            BoardSwitch::Sampling => self.master.setup_run,
            BoardSwitch::DspRun => self.reset.bits() & Reset::DSP_RUN_MASK != 0,
            BoardSwitch::SimData => self.master.sim_data,
            BoardSwitch::FpgaInternals => !self.reset.internals,
        }
    }

    /// Put the board back in reset and close the connection
    /// # Errors
    /// Returns an error on transport failures; the board is closed either way
    pub fn shutdown(&mut self) -> TransportResult<()> {
        self.state = SessionState::ShuttingDown;
        self.reset = Reset::from_bits(0x01);
        let res = self.write_reset();
        let closed = self.transport.close();
        res.and(closed)
    }

    /// Mark the board failed after a transport error during the steady state
    pub fn fail(&mut self, reason: &anyhow::Error) {
        error!(board = %self.identity, "Board dropped from measurement: {reason:#}");
        self.state = SessionState::Failed;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        gate::{
            GateRole,
            SigProcMode,
        },
        transport::sim::Simulator,
    };
    use utboard_utils::program_sources::dsp::parse_program;

    pub(crate) fn sim_board(sim: Simulator) -> Board<Simulator> {
        let mut board = Board::new(sim, "10.0.1.17".parse().unwrap());
        board.set_poll_interval(Duration::ZERO);
        board.set_settle_time(Duration::ZERO);
        board
    }

    pub(crate) fn program() -> Program {
        parse_program(b"\x02$A0000 0001,0002,0003 $A0100 1234\x03", "dsp.hex".into()).unwrap()
    }

    fn image() -> bitstream::File {
        bitstream::File::from_bytes(vec![0x5A; 2500], "fpga.bin".into()).unwrap()
    }

    #[test]
    fn test_connect_loads_and_readies() {
        let mut sim = Simulator::new();
        sim.set_switches(2, 7);
        sim.expect_bitstream(2500);
        let mut board = sim_board(sim);
        board.link_gates(
            0,
            vec![Gate::new(GateRole::Interface, SigProcMode::FirstCrossing).unwrap()],
        );
        let dsp = program();
        let image = image();
        board
            .connect(
                &Programs {
                    bitstream: Some(&image),
                    dsp: &dsp,
                },
                None,
            )
            .unwrap();
        assert!(board.is_ready());
        assert!(board.fpga_loaded());
        assert_eq!((board.identity.chassis, board.identity.slot), (2, 7));
        assert!(board.greeting().unwrap().contains("UT Board"));
        let sim = board.transport_mut();
        assert!(sim.fpga_loaded());
        // Program memory is shared within each core pair
        assert_eq!(sim.peek(2, 4, 0x10, 0x0100), 0x1234);
        assert_eq!(sim.peek(1, 2, 0x10, 0x0002), 3);
        // Sampling on, FPGA internals running, DSPs running
        assert_eq!(sim.register(0x00) & 0x01, 0x01);
        assert_eq!(sim.register(0x01), 0x3E);
        assert_eq!(sim.register(0x37), 0x00);
        assert_eq!(sim.register(0x38), 0x40);
        assert_eq!(sim.bad_frames(), 0);
    }

    #[test]
    fn test_connect_skips_loaded_fpga_and_overrides() {
        let mut sim = Simulator::new();
        sim.set_fpga_loaded(true);
        let mut board = sim_board(sim);
        let dsp = program();
        let image = image();
        board
            .connect(
                &Programs {
                    bitstream: Some(&image),
                    dsp: &dsp,
                },
                Some(ChassisSlot {
                    chassis: 5,
                    slot: 1,
                }),
            )
            .unwrap();
        assert!(board.identity.overridden);
        assert_eq!(board.identity.slot, 1);
        let sent_data = board
            .transport_mut()
            .commands()
            .iter()
            .any(|c| c[0] == crate::core::PacketId::LoadFpga as u8);
        assert!(!sent_data);
    }

    #[test]
    fn test_failed_load_marks_board() {
        let mut sim = Simulator::new();
        sim.fail_load_after(1, crate::core::LoadStatus::CrcError);
        let mut board = sim_board(sim);
        let dsp = program();
        let image = image();
        let res = board.connect(
            &Programs {
                bitstream: Some(&image),
                dsp: &dsp,
            },
            None,
        );
        assert!(res.is_err());
        assert_eq!(board.state(), SessionState::Failed);
    }

    #[test]
    fn test_dsp_mismatch_fails_only_that_board() {
        let mut bad = Simulator::new();
        bad.set_fpga_loaded(true);
        bad.set_corrupt_dsp_writes(true);
        let mut bad = sim_board(bad);
        let mut good = Simulator::new();
        good.set_fpga_loaded(true);
        let mut good = sim_board(good);
        let dsp = program();
        let programs = Programs {
            bitstream: None,
            dsp: &dsp,
        };
        let err = bad.connect(&programs, None).unwrap_err();
        assert!(err.to_string().contains("failed verification"));
        assert_eq!(bad.state(), SessionState::Failed);
        // Nothing is started on a board whose program didn't verify
        assert_eq!(bad.transport_mut().register(0x00) & 0x01, 0);
        good.connect(&programs, None).unwrap();
        assert!(good.is_ready());
    }

    #[test]
    fn test_state_switches() {
        let mut board = sim_board(Simulator::new());
        board.set_state(BoardSwitch::DspRun, true).unwrap();
        assert!(board.get_state(BoardSwitch::DspRun));
        assert_eq!(board.transport_mut().register(0x01), 0x3C);
        board.set_state(BoardSwitch::SimData, true).unwrap();
        assert!(board.get_state(BoardSwitch::SimData));
        assert_eq!(board.transport_mut().register(0x00), 0x04);
        board.set_state(BoardSwitch::FpgaInternals, false).unwrap();
        assert!(!board.get_state(BoardSwitch::FpgaInternals));
        assert_eq!(board.transport_mut().register(0x01), 0x3D);
        board.set_state(BoardSwitch::Sampling, true).unwrap();
        assert!(board.get_state(BoardSwitch::Sampling));
        // Internals pulsed around the write and left running
        assert_eq!(board.transport_mut().register(0x01), 0x3C);
        let reads = board
            .transport_mut()
            .commands()
            .iter()
            .filter(|c| c[0] == crate::core::PacketId::ReadDsp as u8)
            .count();
        assert_eq!(reads, 8);
    }

    #[test]
    fn test_initialize_requires_ready() {
        let mut board = sim_board(Simulator::new());
        assert!(board.initialize().is_err());
    }

    #[test]
    fn test_shutdown_resets() {
        let mut board = sim_board(Simulator::new());
        board.shutdown().unwrap();
        assert_eq!(board.state(), SessionState::ShuttingDown);
        assert_eq!(board.transport_mut().register(0x01), 0x01);
        assert!(board.transport_mut().is_closed());
    }
}
