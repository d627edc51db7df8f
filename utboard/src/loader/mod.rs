//! Getting code into a board: the FPGA configuration bitstream, over the board's stream or to
//! every board at once over the datagram group, and the DSP program with its verification.

pub mod bitstream;
pub mod broadcast;
pub mod dsp;

pub use broadcast::{
    broadcast_load,
    BroadcastOutcome,
};
pub use dsp::VerifyReport;
