//! Prelude (helpful reexports) for this package

pub use crate::{
    board::{
        Board,
        BoardSwitch,
        Programs,
        SessionState,
    },
    config::Config,
    gate::{
        Gate,
        GateRole,
        SigProcMode,
    },
    instrument::Instrument,
    transport::{
        sim::Simulator,
        tcp::Tcp,
        udp::Udp,
        Datagram,
        Transport,
    },
};
pub use utboard_utils::program_sources::{
    bitstream::read_bitstream_file,
    dsp::read_dsp_program_file,
};
