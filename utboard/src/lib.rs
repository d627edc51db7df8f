#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Host-side protocol engine for networked ultrasonic-testing digitizer boards.
//!
//! Each board is driven over its own persistent stream connection: chip bitstream and DSP
//! program loading, register setup, then a steady state of A-scan and peak-data requests whose
//! answers are decoded into per-gate measurements. A best-effort datagram channel handles
//! discovery and broadcast bitstream loading.

pub mod board;
pub mod channel;
pub mod command;
pub mod config;
pub mod core;
pub mod correlator;
pub mod decode;
pub mod discovery;
pub mod frame;
pub mod gate;
pub mod instrument;
pub mod loader;
pub mod prelude;
pub mod registers;
pub mod transport;
