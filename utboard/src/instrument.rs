//! The whole instrument: every configured board, brought up in parallel and polled together.
//!
//! Each board's session runs on its own worker. A board that fails is marked so and left out
//! of measurement rounds; the others carry on.
use crate::{
    board::{
        Board,
        Programs,
        SessionState,
    },
    config::{
        BoardConfig,
        ChassisSlot,
        Config,
    },
    decode::StatusReport,
    discovery::{
        assign_addresses,
        roll_call,
        send_run_trigger,
        ROLL_CALL_INTERVAL,
    },
    loader::{
        broadcast_load,
        BroadcastOutcome,
    },
    transport::{
        tcp::Tcp,
        udp::Udp,
        Transport,
    },
};
use anyhow::bail;
use std::net::{
    IpAddr,
    SocketAddr,
};
use tracing::{
    error,
    info,
    warn,
};
use utboard_utils::program_sources::{
    bitstream::read_bitstream_file,
    dsp::read_dsp_program_file,
};

#[derive(Debug)]
pub struct Instrument<T> {
    pub boards: Vec<Board<T>>,
    /// Configured boards no session could be opened to
    pub unreachable: Vec<IpAddr>,
}

impl<T> Instrument<T>
where
    T: Transport + Send,
{
    #[must_use]
    pub fn new(boards: Vec<Board<T>>) -> Self {
        Self {
            boards,
            unreachable: vec![],
        }
    }

    /// Open a session to every board in `boards` with `open`. A board that can't be reached is
    /// logged and listed in `unreachable`; the rest are kept in configuration order.
    /// # Errors
    /// Returns an error if a board has no address
    pub fn open<F>(config: &Config, boards: &[BoardConfig], mut open: F) -> anyhow::Result<Self>
    where
        F: FnMut(SocketAddr) -> anyhow::Result<T>,
    {
        let mut instrument = Self::new(vec![]);
        for (i, board_config) in boards.iter().enumerate() {
            let Some(addr) = board_config.address else {
                bail!("Board {i} has no address");
            };
            match open(SocketAddr::new(addr, config.port)) {
                Ok(transport) => instrument.boards.push(Board::from_config(
                    transport,
                    addr,
                    board_config,
                    config.timing_for(i),
                )),
                Err(e) => {
                    error!(board = %addr, "Couldn't connect: {e:#}");
                    instrument.unreachable.push(addr);
                }
            }
        }
        Ok(instrument)
    }

    /// Note the boards a broadcast load configured so their sessions don't load them again
    pub fn mark_loaded(&mut self, outcome: &BroadcastOutcome) {
        for board in &mut self.boards {
            if outcome.loaded.contains(&board.identity.addr) {
                board.set_fpga_loaded(true);
            }
        }
    }

    /// Every configured board, reachable or not
    #[must_use]
    pub fn board_count(&self) -> usize {
        self.boards.len() + self.unreachable.len()
    }

    /// Run every board's bring-up and extended initialization on its own worker. The result
    /// for each board is in board order.
    pub fn connect_all<F>(&mut self, programs: &Programs<'_>, overrides: F) -> Vec<anyhow::Result<()>>
    where
        F: Fn(IpAddr) -> Option<ChassisSlot> + Sync,
    {
        let overrides = &overrides;
        std::thread::scope(|s| {
            let handles: Vec<_> = self
                .boards
                .iter_mut()
                .map(|board| {
                    s.spawn(move || {
                        board.connect(programs, overrides(board.identity.addr))?;
                        let res = board.initialize();
                        if let Err(e) = &res {
                            board.fail(e);
                        }
                        res
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(res) => res,
                    Err(e) => {
                        error!("Board worker panicked: {e:?}");
                        Err(anyhow::anyhow!("Board worker panicked"))
                    }
                })
                .collect()
        })
    }

    /// The boards that take part in measurement
    pub fn ready(&mut self) -> impl Iterator<Item = &mut Board<T>> {
        self.boards.iter_mut().filter(|b| b.is_ready())
    }

    /// One steady-state round: ask every ready board for peak data and decode whatever has
    /// arrived. A board whose transport fails is dropped from later rounds. Returns the number
    /// of packets decoded.
    pub fn poll_round(&mut self) -> usize {
        let mut decoded = 0;
        for board in self.ready() {
            let res = board
                .request_peak_data4()
                .and_then(|_| board.process_data_packets(false));
            match res {
                Ok(n) => decoded += n,
                Err(e) => board.fail(&e),
            }
        }
        decoded
    }

    /// Log and reset each ready board's counters
    pub fn status_reports(&mut self) -> Vec<StatusReport> {
        self.ready().map(Board::status_report).collect()
    }

    /// Put every board still connected back into reset and close it
    pub fn shutdown(&mut self) {
        for board in &mut self.boards {
            if board.state() == SessionState::Failed {
                continue;
            }
            if let Err(e) = board.shutdown() {
                error!(board = %board.identity, "Shutdown failed: {e:#}");
            }
        }
    }
}

impl Instrument<Tcp> {
    /// Bring up the instrument described by `config`: roll call for unaddressed boards,
    /// broadcast bitstream load if asked for, then a session per board. A board the broadcast
    /// couldn't configure is loaded over its own session instead. Boards that can't be reached
    /// are listed in `unreachable`; boards that can't be set up are kept, marked failed.
    /// # Errors
    /// Returns an error if the program files can't be read, discovery can't find every board,
    /// or the datagram group fails
    pub fn start(config: &Config) -> anyhow::Result<Self> {
        let image = read_bitstream_file(&config.fpga_bitstream)?;
        let dsp = read_dsp_program_file(&config.dsp_program)?;
        let mut boards_config = config.boards.clone();

        let needs_discovery = boards_config.iter().any(|b| b.address.is_none());
        let mut outcome = BroadcastOutcome::default();
        if needs_discovery || config.broadcast_load {
            let disc = &config.discovery;
            let mut group = Udp::bind(disc.local_port, disc.group_addr())?;
            let call = roll_call(
                &mut group,
                boards_config.len(),
                disc.attempts,
                ROLL_CALL_INTERVAL,
            )?;
            assign_addresses(&mut boards_config, &call)?;
            let unloaded = call.unloaded();
            if config.broadcast_load && !unloaded.is_empty() {
                outcome = broadcast_load(&mut group, &image, &unloaded)?;
                if !outcome.failed.is_empty() {
                    warn!(
                        "{} boards will be loaded one at a time",
                        outcome.failed.len()
                    );
                }
            } else {
                send_run_trigger(&mut group)?;
            }
        }

        let mut instrument = Self::open(config, &boards_config, |addr| {
            let mut tcp = Tcp::connect(addr, config.timeout())?;
            tcp.set_timeout(config.timeout())?;
            Ok(tcp)
        })?;
        instrument.mark_loaded(&outcome);
        let programs = Programs {
            bitstream: Some(&image),
            dsp: &dsp,
        };
        let results = instrument.connect_all(&programs, |addr| config.override_for(addr));
        let ready = results.iter().filter(|r| r.is_ok()).count();
        info!(
            "{ready} of {} boards ready, {} unreachable",
            instrument.board_count(),
            instrument.unreachable.len()
        );
        Ok(instrument)
    }
}
